use std::fs;
use std::io::{self, Write};
use std::path::Path;

use serde::Serialize;

use crate::app::{ProgressEvent, ProgressSink, RunSummary};
use crate::error::TciaError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Human,
    Json,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_summary(summary: &RunSummary) -> io::Result<()> {
        Self::print_json(summary)
    }

    /// Write the summary as pretty JSON, refusing to replace an existing file.
    pub fn write_report(path: &Path, summary: &RunSummary) -> Result<(), TciaError> {
        if path.exists() {
            return Err(TciaError::DestinationExists(path.to_path_buf()));
        }
        let json = serde_json::to_string_pretty(summary)
            .map_err(|err| TciaError::Filesystem(err.to_string()))?;
        fs::write(path, format!("{json}\n")).map_err(|err| TciaError::Filesystem(err.to_string()))
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Prints one line per state transition to stderr.
pub struct ConsoleProgress;

impl ProgressSink for ConsoleProgress {
    fn event(&self, event: ProgressEvent) {
        let line = match event.elapsed {
            Some(elapsed) => format!("[{:>7.1}s] {}", elapsed.as_secs_f64(), event.message),
            None => event.message,
        };
        let _ = writeln!(io::stderr().lock(), "{line}");
    }
}
