use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TciaError;

/// Identifier of a remote series, as listed in a TCIA manifest.
///
/// In practice this is a DICOM Series Instance UID, but the archive treats it
/// as an opaque token. Only blank values and control characters are rejected;
/// the id is sent as a query parameter and never used as a path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SeriesId(String);

impl SeriesId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SeriesId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SeriesId {
    type Err = TciaError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim();
        let is_valid = !normalized.is_empty() && !normalized.chars().any(char::is_control);
        if !is_valid {
            return Err(TciaError::InvalidSeriesId(value.to_string()));
        }
        Ok(Self(normalized.to_string()))
    }
}

impl TryFrom<String> for SeriesId {
    type Error = TciaError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SeriesId> for String {
    fn from(value: SeriesId) -> Self {
        value.0
    }
}
