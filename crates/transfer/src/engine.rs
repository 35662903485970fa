//! Copy, move and delete between any two paths.
//!
//! The engine only talks to [`Path`]; which backend sits underneath never
//! changes the algorithm. Each invocation:
//!
//! 1. rejects impossible targets (into itself, read-only) before any I/O,
//! 2. plans the whole source tree so progress has totals,
//! 3. walks the plan, streaming files in fixed-size chunks (or using the
//!    backend's native copy when both sides share a backend), checking the
//!    cancel token after every chunk and before every item.
//!
//! Conflicts are skipped and recorded, per-item failures are collected, and
//! only a transfer of a single file propagates its error directly.

use crate::error::{ErrorKind, Result};
use crate::plan::{Item, ItemKind, Plan};
use crate::progress::{CancelToken, ProgressFn, TransferTask};
use duopane_storage::error::Batch;
use duopane_storage::{COPY_CHUNK_SIZE, ErrorKind as StorageErrorKind, Path};
use exn::ResultExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::task::JoinHandle;

/// Default minimum gap between two progress callbacks.
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferOptions {
    /// Bytes read and written per step of a streaming copy.
    pub chunk_size: usize,
    pub progress_interval: Duration,
}
impl Default for TransferOptions {
    fn default() -> Self {
        Self { chunk_size: COPY_CHUNK_SIZE, progress_interval: DEFAULT_PROGRESS_INTERVAL }
    }
}

/// Outcome of a finished transfer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Summary {
    /// Files (and links) written, or items removed by a delete.
    pub files_done: u64,
    pub bytes_done: u64,
    pub files_total: u64,
    pub bytes_total: u64,
    /// Destinations that already existed and were left untouched.
    pub conflicts: Vec<Path>,
    /// Directory links that could not be recreated at the destination.
    pub skipped_links: Vec<Path>,
}

/// A transfer to run in the background, see [`TransferEngine::spawn()`].
#[derive(Debug, Clone)]
pub enum TransferJob {
    Copy { source: Path, destination: Path, overwrite: bool },
    Move { source: Path, destination: Path, overwrite: bool },
    Delete { targets: Vec<Path> },
}

enum Step {
    Copied { bytes: u64 },
    Created,
    Conflict,
    Skipped,
    Cancelled,
}

/// Copy results that a move needs to finish its job.
#[derive(Default)]
struct Copied {
    summary: Summary,
    batch: Batch,
    /// Source files and links whose copy completed.
    files: Vec<Path>,
    /// Source directories, parents first.
    dirs: Vec<Path>,
}

#[derive(Debug, Clone, Default)]
pub struct TransferEngine {
    options: TransferOptions,
}

impl TransferEngine {
    pub fn new(options: TransferOptions) -> Self {
        Self { options: TransferOptions { chunk_size: options.chunk_size.max(1), ..options } }
    }

    pub fn options(&self) -> TransferOptions {
        self.options
    }

    /// Copy `source` to exactly `destination`, recursively for directories.
    ///
    /// Existing destinations are skipped and listed in
    /// [`Summary::conflicts`] unless `overwrite` is set. Per-item failures in a
    /// directory copy end in [`PartialFailure`](ErrorKind::PartialFailure)
    /// after every other item was attempted.
    pub async fn execute(
        &self,
        source: &Path,
        destination: &Path,
        overwrite: bool,
        on_progress: &ProgressFn<'_>,
        cancel: &CancelToken,
    ) -> Result<Summary> {
        let mut task = TransferTask::new(self.options.progress_interval, on_progress, cancel);
        let copied = self.copy(source, destination, overwrite, &mut task).await?;
        task.finish();
        tracing::info!(
            %source,
            %destination,
            files = copied.summary.files_done,
            bytes = copied.summary.bytes_done,
            conflicts = copied.summary.conflicts.len(),
            "copy finished"
        );
        finish(copied.summary, copied.batch)
    }

    /// Copy, then delete every source item that was copied. Items that
    /// failed or conflicted stay at the source.
    ///
    /// Within one backend that renames directories natively, a move to a free
    /// destination is a single rename.
    pub async fn move_to(
        &self,
        source: &Path,
        destination: &Path,
        overwrite: bool,
        on_progress: &ProgressFn<'_>,
        cancel: &CancelToken,
    ) -> Result<Summary> {
        if source.is_read_only() {
            exn::bail!(ErrorKind::ReadOnlySource(source.to_string()));
        }
        let mut task = TransferTask::new(self.options.progress_interval, on_progress, cancel);
        if let Some(summary) = self.try_rename(source, destination, &mut task).await? {
            task.finish();
            tracing::info!(%source, %destination, files = summary.files_done, "moved by rename");
            return Ok(summary);
        }
        let Copied { summary, mut batch, files, dirs } = self.copy(source, destination, overwrite, &mut task).await?;
        let single = files.len() == 1 && dirs.is_empty();
        for file in &files {
            if let Err(err) = file.unlink().await {
                if single {
                    return Err(err.raise(ErrorKind::Storage));
                }
                batch.failed(file, err);
            }
        }
        for dir in dirs.iter().rev() {
            match dir.rmdir().await {
                Ok(()) => {},
                // Something stayed behind (a conflict or a failure), or the
                // directory was virtual and vanished with its last object.
                Err(err) if matches!(&*err, StorageErrorKind::DirectoryNotEmpty(_) | StorageErrorKind::NotFound(_)) => {},
                Err(err) => batch.failed(dir, err),
            }
        }
        task.finish();
        tracing::info!(%source, %destination, files = summary.files_done, bytes = summary.bytes_done, "move finished");
        finish(summary, batch)
    }

    /// Remove files and directory trees. Keeps going past failures and
    /// reports them together.
    pub async fn delete(&self, targets: &[Path], on_progress: &ProgressFn<'_>, cancel: &CancelToken) -> Result<Summary> {
        for target in targets {
            if target.is_read_only() {
                exn::bail!(ErrorKind::ReadOnlySource(target.to_string()));
            }
        }
        let mut task = TransferTask::new(self.options.progress_interval, on_progress, cancel);
        task.set_totals(targets.len() as u64, 0);
        let mut summary = Summary { files_total: targets.len() as u64, ..Summary::default() };
        let mut batch = Batch::new();
        let single = targets.len() == 1;
        for target in targets {
            if task.is_cancelled() {
                exn::bail!(ErrorKind::Cancelled);
            }
            task.start_item(target);
            let removed = match target.stat().await {
                Ok(stat) if stat.is_directory && !stat.is_symlink => target.rmtree().await,
                Ok(_) => target.unlink().await.map(|()| single_report(target)),
                Err(err) => Err(err),
            };
            match removed {
                Ok(report) => {
                    summary.files_done += report.succeeded.len() as u64;
                    report.succeeded.iter().for_each(|item| batch.succeeded(item));
                },
                Err(err) => {
                    let nested = match &*err {
                        StorageErrorKind::PartialFailure(report) => Some(report.clone()),
                        _ => None,
                    };
                    match nested {
                        Some(report) => {
                            summary.files_done += report.succeeded.len() as u64;
                            batch.absorb_partial(&report, err);
                        },
                        None if single => return Err(err.raise(ErrorKind::Storage)),
                        None => batch.failed(target, err),
                    }
                },
            }
            task.file_done();
        }
        task.finish();
        tracing::info!(targets = targets.len(), removed = summary.files_done, "delete finished");
        finish(summary, batch)
    }

    /// Run `job` to completion.
    pub async fn run(&self, job: TransferJob, on_progress: &ProgressFn<'_>, cancel: &CancelToken) -> Result<Summary> {
        match job {
            TransferJob::Copy { source, destination, overwrite } => {
                self.execute(&source, &destination, overwrite, on_progress, cancel).await
            },
            TransferJob::Move { source, destination, overwrite } => {
                self.move_to(&source, &destination, overwrite, on_progress, cancel).await
            },
            TransferJob::Delete { targets } => self.delete(&targets, on_progress, cancel).await,
        }
    }

    /// Run `job` on a tokio task so the caller's loop stays responsive.
    pub fn spawn(&self, job: TransferJob, on_progress: Arc<ProgressFn<'static>>, cancel: CancelToken) -> JoinHandle<Result<Summary>> {
        let engine = self.clone();
        tokio::spawn(async move { engine.run(job, &*on_progress, &cancel).await })
    }

    async fn copy(&self, source: &Path, dest: &Path, overwrite: bool, task: &mut TransferTask<'_>) -> Result<Copied> {
        check_target(source, dest)?;
        let mut copied = Copied::default();
        let plan = Plan::scan(source, dest, &mut copied.batch, task).await.or_raise(|| ErrorKind::Storage)?;
        if task.is_cancelled() {
            exn::bail!(ErrorKind::Cancelled);
        }
        task.set_totals(plan.files_total, plan.bytes_total);
        copied.summary.files_total = plan.files_total;
        copied.summary.bytes_total = plan.bytes_total;
        let single = plan.is_single_item();
        let native = source.same_backend(dest);
        for item in plan.items {
            if task.is_cancelled() {
                exn::bail!(ErrorKind::Cancelled);
            }
            task.start_item(&item.source);
            match self.copy_item(&item, overwrite, native, task).await {
                Ok(Step::Copied { bytes }) => {
                    copied.summary.files_done += 1;
                    copied.summary.bytes_done += bytes;
                    copied.batch.succeeded(&item.source);
                    copied.files.push(item.source);
                    task.file_done();
                },
                Ok(Step::Created) => copied.dirs.push(item.source),
                Ok(Step::Conflict) => {
                    tracing::warn!(source = %item.source, dest = %item.dest, "destination exists, skipped");
                    copied.summary.conflicts.push(item.dest);
                },
                Ok(Step::Skipped) => {
                    tracing::warn!(source = %item.source, "cannot recreate directory link, skipped");
                    copied.summary.skipped_links.push(item.source);
                },
                Ok(Step::Cancelled) => exn::bail!(ErrorKind::Cancelled),
                Err(err) if single => return Err(err.raise(ErrorKind::Storage)),
                Err(err) => copied.batch.failed(&item.source, err),
            }
        }
        Ok(copied)
    }

    async fn copy_item(
        &self,
        item: &Item,
        overwrite: bool,
        native: bool,
        task: &mut TransferTask<'_>,
    ) -> duopane_storage::Result<Step> {
        match item.kind {
            ItemKind::Directory => {
                item.dest.mkdir(true, true).await?;
                return Ok(Step::Created);
            },
            ItemKind::SkippedLink => return Ok(Step::Skipped),
            ItemKind::File { .. } | ItemKind::Link => {},
        }
        let exists = item.dest.exists().await?;
        if exists && !overwrite {
            return Ok(Step::Conflict);
        }
        match item.kind {
            ItemKind::Link => {
                let target = item.source.read_link().await?;
                if exists {
                    item.dest.unlink().await?;
                }
                item.dest.symlink_to(&target).await?;
                Ok(Step::Copied { bytes: 0 })
            },
            ItemKind::File { size } if native => {
                item.source.copy_to(&item.dest, overwrite).await?;
                task.add_bytes(size);
                Ok(Step::Copied { bytes: size })
            },
            _ => self.stream(&item.source, &item.dest, task).await,
        }
    }

    /// Chunked copy through the generic reader/writer pair. A cancelled or
    /// failed copy discards the partial destination.
    async fn stream(&self, source: &Path, dest: &Path, task: &mut TransferTask<'_>) -> duopane_storage::Result<Step> {
        let mut reader = source.reader().await?;
        let mut writer = dest.writer().await?;
        let mut buffer = vec![0; self.options.chunk_size];
        let mut written = 0;
        loop {
            let read = match reader.read(&mut buffer).await {
                Ok(0) => break,
                Ok(read) => read,
                Err(e) => {
                    discard(writer, dest).await;
                    exn::bail!(StorageErrorKind::from_io(e, source));
                },
            };
            if let Err(err) = writer.write_chunk(&buffer[..read]).await {
                discard(writer, dest).await;
                return Err(err);
            }
            written += read as u64;
            task.add_bytes(read as u64);
            if task.is_cancelled() {
                discard(writer, dest).await;
                tracing::info!(%source, %dest, written, "cancelled mid-file, partial copy discarded");
                return Ok(Step::Cancelled);
            }
        }
        writer.commit().await?;
        Ok(Step::Copied { bytes: written })
    }

    /// Rename when the backend can do the whole move in one step. A backend
    /// that turns the rename down as unsupported (a cross-device local move,
    /// a store without server-side copy) leaves the move to copy and delete.
    async fn try_rename(&self, source: &Path, dest: &Path, task: &mut TransferTask<'_>) -> Result<Option<Summary>> {
        if !source.same_backend(dest) {
            return Ok(None);
        }
        check_target(source, dest)?;
        let stat = source.stat().await.or_raise(|| ErrorKind::Storage)?;
        let is_tree = stat.is_directory && !stat.is_symlink;
        if (is_tree && !source.supports_directory_rename()) || dest.exists().await.or_raise(|| ErrorKind::Storage)? {
            return Ok(None);
        }
        let mut batch = Batch::new();
        let plan = Plan::scan(source, dest, &mut batch, task).await.or_raise(|| ErrorKind::Storage)?;
        task.set_totals(plan.files_total, plan.bytes_total);
        if let Err(err) = source.rename(dest).await {
            if !matches!(&*err, StorageErrorKind::Unsupported(_)) {
                return Err(err.raise(ErrorKind::Storage));
            }
            tracing::debug!(%source, %dest, error = %err, "rename unavailable, copying instead");
            return Ok(None);
        }
        Ok(Some(Summary {
            files_done: plan.files_total,
            bytes_done: plan.bytes_total,
            files_total: plan.files_total,
            bytes_total: plan.bytes_total,
            ..Summary::default()
        }))
    }
}

fn check_target(source: &Path, dest: &Path) -> Result<()> {
    if dest.is_relative_to(source) {
        exn::bail!(ErrorKind::IntoItself(source.to_string()));
    }
    if dest.is_read_only() {
        exn::bail!(ErrorKind::ReadOnlyDestination(dest.to_string()));
    }
    Ok(())
}

fn single_report(target: &Path) -> duopane_storage::BatchReport {
    duopane_storage::BatchReport { succeeded: vec![target.to_string()], failed: Vec::new() }
}

fn finish(summary: Summary, batch: Batch) -> Result<Summary> {
    if !batch.report().is_complete() {
        tracing::warn!(report = %batch.report(), "transfer finished with failures");
    }
    batch.finish(ErrorKind::PartialFailure)?;
    Ok(summary)
}

async fn discard(writer: duopane_storage::backend::BoxWriter, dest: &Path) {
    if let Err(err) = writer.abort().await {
        tracing::warn!(%dest, error = %err, "could not discard partial copy");
    }
}
