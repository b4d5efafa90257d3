//! Slice ordering and volume assembly for one series.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::TciaError;
use crate::metadata::FileMetadata;
use crate::series::SeriesGroup;

/// Writes one volume from slice files given in their final order.
pub trait VolumeWriter: Send + Sync {
    fn write_volume(&self, slices: &[PathBuf], destination: &Path) -> Result<(), TciaError>;
}

/// Adjacent slices whose (acquisition, instance) order contradicts their
/// z-location order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Discrepancy {
    pub lower: String,
    pub upper: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum OrderSource {
    InstanceNumber,
    ZLocation,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SliceOrder {
    /// Member indices in canonical order.
    pub indices: Vec<usize>,
    pub source: OrderSource,
    pub discrepancies: Vec<Discrepancy>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VolumeArtifact {
    pub series: String,
    pub path: PathBuf,
    pub slices: usize,
    pub order: OrderSource,
    pub discrepancies: usize,
}

/// Order by (acquisition number, instance number) and by z-location; when the
/// two disagree the z order wins.
pub fn reconcile(members: &[FileMetadata]) -> SliceOrder {
    let mut by_instance: Vec<usize> = (0..members.len()).collect();
    by_instance.sort_by(|&a, &b| {
        let key = |i: usize| (members[i].acquisition_number(), members[i].instance_number());
        key(a).cmp(&key(b))
    });

    let Some(z) = members
        .iter()
        .map(FileMetadata::z_location)
        .collect::<Option<Vec<f64>>>()
    else {
        debug!("z-location missing on some slices, ordering by instance number");
        return SliceOrder {
            indices: by_instance,
            source: OrderSource::InstanceNumber,
            discrepancies: Vec::new(),
        };
    };

    let mut rank = vec![0usize; members.len()];
    for (position, &index) in by_instance.iter().enumerate() {
        rank[index] = position;
    }

    let mut by_z: Vec<usize> = (0..members.len()).collect();
    by_z.sort_by(|&a, &b| match z[a].total_cmp(&z[b]) {
        Ordering::Equal => rank[a].cmp(&rank[b]),
        other => other,
    });

    let discrepancies: Vec<Discrepancy> = by_z
        .windows(2)
        .filter(|pair| rank[pair[0]] > rank[pair[1]])
        .map(|pair| Discrepancy {
            lower: members[pair[0]].slice_label(),
            upper: members[pair[1]].slice_label(),
        })
        .collect();

    if discrepancies.is_empty() {
        SliceOrder {
            indices: by_instance,
            source: OrderSource::InstanceNumber,
            discrepancies,
        }
    } else {
        SliceOrder {
            indices: by_z,
            source: OrderSource::ZLocation,
            discrepancies,
        }
    }
}

/// Order the group's slices and hand them to `writer`.
pub fn assemble<W: VolumeWriter + ?Sized>(
    group: &SeriesGroup,
    destination: &Path,
    writer: &W,
) -> Result<VolumeArtifact, TciaError> {
    if group.is_empty() {
        return Err(TciaError::EmptySeries(group.uid().to_string()));
    }

    let mut uids: Vec<String> = group
        .members()
        .iter()
        .map(|member| member.series_uid().to_string())
        .collect();
    uids.sort();
    uids.dedup();
    if uids.len() > 1 {
        return Err(TciaError::AmbiguousSeries(uids));
    }

    if destination.exists() {
        return Err(TciaError::DestinationExists(destination.to_path_buf()));
    }

    let order = reconcile(group.members());
    for discrepancy in &order.discrepancies {
        warn!(
            series = group.uid(),
            lower = %discrepancy.lower,
            upper = %discrepancy.upper,
            "slice order differs between instance number and z-location, using z-location"
        );
    }

    let slices: Vec<PathBuf> = order
        .indices
        .iter()
        .map(|&i| group.members()[i].source().to_path_buf())
        .collect();
    writer.write_volume(&slices, destination)?;

    Ok(VolumeArtifact {
        series: group.uid().to_string(),
        path: destination.to_path_buf(),
        slices: slices.len(),
        order: order.source,
        discrepancies: order.discrepancies.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::Field;

    fn slice(name: &str, acquisition: &str, instance: &str, z: Option<f64>) -> FileMetadata {
        let mut meta = FileMetadata::unknown(format!("{name}.dcm"))
            .with(Field::SeriesInstanceUid, "1.2")
            .with(Field::SopInstanceUid, name)
            .with(Field::AcquisitionNumber, acquisition)
            .with(Field::InstanceNumber, instance);
        if let Some(z) = z {
            meta.set(Field::ImagePositionPatient, format!("0\\0\\{z}"));
        }
        meta
    }

    #[test]
    fn agreeing_orders_use_instance_number() {
        let members = vec![
            slice("c", "1", "3", Some(30.0)),
            slice("a", "1", "1", Some(10.0)),
            slice("b", "1", "2", Some(20.0)),
        ];
        let order = reconcile(&members);
        assert_eq!(order.indices, vec![1, 2, 0]);
        assert_eq!(order.source, OrderSource::InstanceNumber);
        assert!(order.discrepancies.is_empty());
    }

    #[test]
    fn disagreeing_orders_use_z_location() {
        // instance order a, b, c, d; z order a, c, b, d
        let members = vec![
            slice("a", "1", "1", Some(0.0)),
            slice("b", "1", "2", Some(20.0)),
            slice("c", "1", "3", Some(10.0)),
            slice("d", "1", "4", Some(30.0)),
        ];
        let order = reconcile(&members);
        assert_eq!(order.source, OrderSource::ZLocation);
        assert_eq!(order.indices, vec![0, 2, 1, 3]);
        assert_eq!(
            order.discrepancies,
            vec![Discrepancy {
                lower: "c".to_string(),
                upper: "b".to_string()
            }]
        );
    }

    #[test]
    fn acquisition_number_ranks_before_instance() {
        let members = vec![
            slice("late", "2", "1", None),
            slice("early", "1", "9", None),
        ];
        let order = reconcile(&members);
        assert_eq!(order.indices, vec![1, 0]);
    }

    #[test]
    fn missing_z_falls_back_to_instance_order() {
        let members = vec![slice("b", "1", "2", Some(1.0)), slice("a", "1", "1", None)];
        let order = reconcile(&members);
        assert_eq!(order.indices, vec![1, 0]);
        assert_eq!(order.source, OrderSource::InstanceNumber);
    }
}
