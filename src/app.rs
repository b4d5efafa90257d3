use std::fmt;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::ResolvedConfig;
use crate::domain::SeriesId;
use crate::error::TciaError;
use crate::fs_util::{self, StagingDirectory};
use crate::layout;
use crate::metadata::{FileMetadata, MetadataReader};
use crate::placement::{Collision, PlacementRegistry};
use crate::series::{FilterOptions, SeriesGroup};
use crate::tcia::ArchiveClient;
use crate::volume::{self, VolumeArtifact, VolumeWriter};

/// Everything one run needs besides its clients; passed explicitly instead of
/// living in globals.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub root: Utf8PathBuf,
    pub workers: usize,
    pub filters: FilterOptions,
    pub volumes: bool,
    pub staging_dir: Option<PathBuf>,
    pub registry: Arc<PlacementRegistry>,
}

impl RunContext {
    pub fn new(root: Utf8PathBuf, config: &ResolvedConfig) -> Self {
        Self {
            root,
            workers: config.workers.max(1),
            filters: config.filters,
            volumes: config.volumes,
            staging_dir: config.staging_dir.clone(),
            registry: Arc::new(PlacementRegistry::new()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Fetching,
    Extracting,
    Classifying,
    Placing,
    Assembling,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Fetching => "fetching",
            Stage::Extracting => "extracting",
            Stage::Classifying => "classifying",
            Stage::Placing => "placing",
            Stage::Assembling => "assembling",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnitState {
    Queued,
    Fetching,
    Extracting,
    Classifying,
    Done,
    Failed,
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UnitState::Queued => "queued",
            UnitState::Fetching => "fetching",
            UnitState::Extracting => "extracting",
            UnitState::Classifying => "classifying",
            UnitState::Done => "done",
            UnitState::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failure {
    pub series: String,
    pub stage: Stage,
    pub kind: String,
    pub message: String,
}

impl Failure {
    fn new(series: &str, stage: Stage, error: &TciaError) -> Self {
        Self {
            series: series.to_string(),
            stage,
            kind: error.kind().to_string(),
            message: error.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitReport {
    pub series: String,
    pub state: UnitState,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub collided: usize,
    pub volumes_written: usize,
    pub series_filtered: usize,
    pub files_filtered: usize,
    pub files_placed: usize,
    pub files_unreadable: usize,
    pub units: Vec<UnitReport>,
    pub collisions: Vec<Collision>,
    pub failures: Vec<Failure>,
    pub volumes: Vec<VolumeArtifact>,
    pub started_at: String,
    pub finished_at: String,
}

impl RunSummary {
    fn new(attempted: usize) -> Self {
        Self {
            attempted,
            succeeded: 0,
            failed: 0,
            collided: 0,
            volumes_written: 0,
            series_filtered: 0,
            files_filtered: 0,
            files_placed: 0,
            files_unreadable: 0,
            units: Vec::with_capacity(attempted),
            collisions: Vec::new(),
            failures: Vec::new(),
            volumes: Vec::new(),
            started_at: now_rfc3339(),
            finished_at: String::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

/// Receives state transitions from the driver and from every worker.
pub trait ProgressSink: Sync {
    fn event(&self, event: ProgressEvent);
}

struct Classified {
    series: SeriesId,
    staging: StagingDirectory,
    items: Vec<FileMetadata>,
    unreadable: usize,
}

/// A placed series waiting for its volume; assembled once every unit has
/// been placed so the series folder is final.
struct PendingVolume {
    series: SeriesId,
    group: SeriesGroup,
    destination: Utf8PathBuf,
}

enum WorkerMessage {
    Classified(Classified),
    Failed {
        series: SeriesId,
        stage: Stage,
        error: TciaError,
    },
}

/// Pipeline driver: a bounded pool fetches, extracts and reads metadata;
/// the driver thread filters, places and assembles each completed unit.
pub struct App<C: ArchiveClient, M: MetadataReader, W: VolumeWriter> {
    client: C,
    reader: M,
    writer: W,
}

impl<C: ArchiveClient, M: MetadataReader, W: VolumeWriter> App<C, M, W> {
    pub fn new(client: C, reader: M, writer: W) -> Self {
        Self {
            client,
            reader,
            writer,
        }
    }

    pub fn run(
        &self,
        ids: Vec<SeriesId>,
        ctx: &RunContext,
        sink: &dyn ProgressSink,
    ) -> Result<RunSummary, TciaError> {
        // Unsafe destinations abort before any worker starts.
        fs_util::mkdir_safe(ctx.root.as_std_path())?;

        let started = Instant::now();
        let mut summary = RunSummary::new(ids.len());
        let workers = ctx.workers.max(1);
        info!(series = ids.len(), workers, root = %ctx.root, "starting run");
        for id in &ids {
            report(sink, started, id, UnitState::Queued);
        }

        let (job_tx, job_rx) = mpsc::sync_channel::<SeriesId>(workers);
        let (result_tx, result_rx) = mpsc::sync_channel::<WorkerMessage>(workers);
        let jobs = Mutex::new(job_rx);
        let mut pending = Vec::new();

        thread::scope(|scope| {
            scope.spawn(move || {
                for id in ids {
                    if job_tx.send(id).is_err() {
                        break;
                    }
                }
            });

            for _ in 0..workers {
                let result_tx = result_tx.clone();
                let jobs = &jobs;
                scope.spawn(move || {
                    while let Some(id) = next_job(jobs) {
                        let message = self.process(id, ctx, sink, started);
                        if result_tx.send(message).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(result_tx);

            for message in result_rx {
                match message {
                    WorkerMessage::Classified(unit) => {
                        let series = unit.series.clone();
                        self.settle(unit, ctx, &mut summary, &mut pending);
                        summary.succeeded += 1;
                        summary.units.push(UnitReport {
                            series: series.to_string(),
                            state: UnitState::Done,
                        });
                        report(sink, started, &series, UnitState::Done);
                    }
                    WorkerMessage::Failed {
                        series,
                        stage,
                        error,
                    } => {
                        error!(series = %series, %stage, kind = error.kind(), "{error}");
                        summary.failed += 1;
                        summary
                            .failures
                            .push(Failure::new(series.as_str(), stage, &error));
                        summary.units.push(UnitReport {
                            series: series.to_string(),
                            state: UnitState::Failed,
                        });
                        report(sink, started, &series, UnitState::Failed);
                    }
                }
            }
        });

        for volume in pending {
            self.assemble(volume, ctx, &mut summary);
        }

        summary.collisions = ctx.registry.collisions();
        summary.collided = summary.collisions.len();
        summary.volumes_written = summary.volumes.len();
        summary.finished_at = now_rfc3339();
        info!(
            attempted = summary.attempted,
            succeeded = summary.succeeded,
            failed = summary.failed,
            collided = summary.collided,
            volumes = summary.volumes_written,
            "run finished"
        );
        Ok(summary)
    }

    /// Worker side: fetch, extract, read metadata. Runs on a pool thread.
    fn process(
        &self,
        series: SeriesId,
        ctx: &RunContext,
        sink: &dyn ProgressSink,
        started: Instant,
    ) -> WorkerMessage {
        let failed = |series: SeriesId, stage, error| WorkerMessage::Failed {
            series,
            stage,
            error,
        };

        report(sink, started, &series, UnitState::Fetching);
        let blob = match self.client.fetch(&series) {
            Ok(blob) => blob,
            Err(error) => return failed(series, Stage::Fetching, error),
        };
        debug!(series = %series, bytes = blob.len(), "archive downloaded");

        report(sink, started, &series, UnitState::Extracting);
        let staging = match fs_util::extract_archive(blob, ctx.staging_dir.as_deref()) {
            Ok(staging) => staging,
            Err(error) => return failed(series, Stage::Extracting, error),
        };
        debug!(
            series = %series,
            files = staging.files().len(),
            staging = %staging.path().display(),
            "archive extracted"
        );

        report(sink, started, &series, UnitState::Classifying);
        let mut items = Vec::with_capacity(staging.files().len());
        let mut unreadable = 0;
        for path in staging.files() {
            match self.reader.read_metadata(path) {
                Ok(metadata) => items.push(metadata),
                Err(error) => {
                    warn!(series = %series, path = %path.display(), "skipping file: {error}");
                    unreadable += 1;
                }
            }
        }
        if items.is_empty() {
            let error = TciaError::EmptySeries(series.to_string());
            return failed(series, Stage::Classifying, error);
        }

        WorkerMessage::Classified(Classified {
            series,
            staging,
            items,
            unreadable,
        })
    }

    /// Driver side: filter and place one unit, queue its volumes, then
    /// release its staging directory.
    fn settle(
        &self,
        unit: Classified,
        ctx: &RunContext,
        summary: &mut RunSummary,
        pending: &mut Vec<PendingVolume>,
    ) {
        let Classified {
            series,
            staging,
            items,
            unreadable,
        } = unit;
        summary.files_unreadable += unreadable;

        let admission = ctx.filters.admit(items);
        summary.files_filtered += admission.dropped_slices.len();
        for dropped in &admission.dropped_series {
            info!(series = %series, uid = %dropped.uid, len = dropped.len, "series filtered out");
            summary.series_filtered += 1;
            summary.files_filtered += dropped.len;
        }

        for group in admission.groups {
            let uid = group.uid().to_string();
            let mut placed = Vec::with_capacity(group.len());
            for mut member in group.into_members() {
                let destination = ctx.root.join(layout::build_path(&member));
                match ctx
                    .registry
                    .place(member.source(), destination.as_std_path(), &uid)
                {
                    Ok(()) => {
                        summary.files_placed += 1;
                        member.set_source(destination.into_std_path_buf());
                        placed.push(member);
                    }
                    Err(TciaError::DestinationExists(_)) => {}
                    Err(error) => {
                        warn!(series = %series, path = %destination, "placement failed: {error}");
                        summary
                            .failures
                            .push(Failure::new(series.as_str(), Stage::Placing, &error));
                    }
                }
            }

            if ctx.volumes && !placed.is_empty() {
                let destination = ctx.root.join(layout::volume_path(&placed[0]));
                pending.push(PendingVolume {
                    series: series.clone(),
                    group: SeriesGroup::new(uid, placed),
                    destination,
                });
            }
        }

        drop(staging);
    }

    fn assemble(&self, volume: PendingVolume, ctx: &RunContext, summary: &mut RunSummary) {
        let PendingVolume {
            series,
            group,
            destination,
        } = volume;
        match self.write_volume(&group, &destination, ctx) {
            Ok(artifact) => summary.volumes.push(artifact),
            Err(error) => {
                warn!(series = %series, path = %destination, "volume not written: {error}");
                summary
                    .failures
                    .push(Failure::new(series.as_str(), Stage::Assembling, &error));
            }
        }
    }

    fn write_volume(
        &self,
        group: &SeriesGroup,
        destination: &Utf8Path,
        ctx: &RunContext,
    ) -> Result<VolumeArtifact, TciaError> {
        // Placed members all live in the series folder.
        if let Some(folder) = group.members().first().and_then(|m| m.source().parent()) {
            let claimants = ctx.registry.series_in(folder);
            if claimants.len() > 1 {
                return Err(TciaError::AmbiguousSeries(claimants));
            }
        }
        volume::assemble(group, destination.as_std_path(), &self.writer)
    }
}

fn next_job(jobs: &Mutex<Receiver<SeriesId>>) -> Option<SeriesId> {
    let receiver = jobs.lock().ok()?;
    receiver.recv().ok()
}

fn report(sink: &dyn ProgressSink, started: Instant, series: &SeriesId, state: UnitState) {
    sink.event(ProgressEvent {
        message: format!("series={series}; state={state}"),
        elapsed: Some(started.elapsed()),
    });
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}
