use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use futures_util::future::join_all;
use log::{debug, info, warn};
use tokio::sync::mpsc;

use crate::compression::{Decompressor, is_compressible};
use crate::engine::models::{FINGERPRINT_FILE, FileSelection, Fingerprint};
use crate::engine::state::{Event, SessionSummary};
use crate::networking::AssetFetcher;
use crate::util::join_path;

pub mod queue;

pub use queue::{DownloadQueue, DownloadTask};

pub const MIN_WORKERS: usize = 1;
pub const MAX_WORKERS: usize = 10;

#[derive(Clone, Debug)]
pub struct DownloadConfig {
    pub output_root: PathBuf,
    pub workers: usize,
    pub decompress: bool,
    pub overwrite: bool,
}

impl DownloadConfig {
    pub fn worker_count(&self) -> usize {
        self.workers.clamp(MIN_WORKERS, MAX_WORKERS)
    }

    /// Directory the files of `masterhash` end up in.
    pub fn target_dir(&self, masterhash: &str) -> PathBuf {
        self.output_root.join(masterhash)
    }
}

/// Pick the fingerprint files to queue: wanted files that are not on disk
/// yet (or all wanted files when overwriting), followed by the fingerprint
/// itself.
pub fn plan(
    fingerprint: &Fingerprint,
    selection: &FileSelection,
    config: &DownloadConfig,
) -> Result<Vec<String>, String> {
    let target = config.target_dir(fingerprint.masterhash()?);
    let mut tasks = Vec::new();
    for entry in &fingerprint.files {
        if !selection.wants(&entry.file) || entry.file == FINGERPRINT_FILE {
            continue;
        }
        // Unsafe paths stay queued; the worker refuses them and reports a failure.
        match relative_target(&entry.file) {
            Ok(relative) if !config.overwrite && target.join(&relative).is_file() => {
                debug!("plan: skipping {} (already downloaded)", entry.file);
                continue;
            }
            Ok(_) => {}
            Err(err) => warn!("plan: {err}"),
        }
        tasks.push(entry.file.clone());
    }
    tasks.push(FINGERPRINT_FILE.to_owned());
    Ok(tasks)
}

/// Turn a fingerprint path into a relative path that stays below the target.
fn relative_target(file: &str) -> Result<PathBuf, String> {
    let path = Path::new(file);
    let mut clean = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            _ => return Err(format!("refusing unsafe file path {file:?}")),
        }
    }
    if clean.as_os_str().is_empty() {
        return Err(format!("refusing empty file path {file:?}"));
    }
    Ok(clean)
}

/// Cloneable control for a running [`DownloadSession`].
#[derive(Clone)]
pub struct SessionHandle {
    queue: Arc<DownloadQueue>,
    running: Arc<AtomicBool>,
    cancelled: Arc<AtomicBool>,
    workers: usize,
}

impl SessionHandle {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop the session: queued files are dropped and every worker exits
    /// after the file it is currently on. Returns false if already stopped.
    pub fn stop(&self) -> bool {
        self.shutdown(true)
    }

    fn shutdown(&self, cancelled: bool) -> bool {
        if !self.running.swap(false, Ordering::SeqCst) {
            return false;
        }
        if cancelled {
            self.cancelled.store(true, Ordering::SeqCst);
            let dropped = self.queue.discard_pending();
            warn!("download: stop requested, {dropped} queued files dropped");
        }
        for _ in 0..self.workers {
            self.queue.put(DownloadTask::Stop);
        }
        true
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct WorkerTally {
    downloaded: usize,
    failed: usize,
}

/// One download run of a fingerprint's files by a pool of workers.
pub struct DownloadSession<F> {
    fetcher: Arc<F>,
    decompressor: Arc<Decompressor>,
    handle: SessionHandle,
    asset_host: String,
    masterhash: String,
    target_dir: PathBuf,
    decompress: bool,
}

impl<F: AssetFetcher> DownloadSession<F> {
    pub fn new(
        fetcher: Arc<F>,
        asset_host: impl Into<String>,
        masterhash: impl Into<String>,
        config: &DownloadConfig,
    ) -> Self {
        let masterhash = masterhash.into();
        let handle = SessionHandle {
            queue: Arc::new(DownloadQueue::new()),
            running: Arc::new(AtomicBool::new(true)),
            cancelled: Arc::new(AtomicBool::new(false)),
            workers: config.worker_count(),
        };
        Self {
            fetcher,
            decompressor: Arc::new(Decompressor::default()),
            handle,
            asset_host: asset_host.into(),
            target_dir: config.target_dir(&masterhash),
            masterhash,
            decompress: config.decompress,
        }
    }

    #[must_use]
    pub fn with_decompressor(mut self, decompressor: Decompressor) -> Self {
        self.decompressor = Arc::new(decompressor);
        self
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Queue `tasks`, run the workers until the queue drains (or the session
    /// is stopped) and report the totals.
    pub async fn run(
        &self,
        tasks: Vec<String>,
        events: &mpsc::UnboundedSender<Event>,
    ) -> SessionSummary {
        let started = Utc::now();
        let queue = &self.handle.queue;
        let total = tasks.len();
        for task in tasks {
            queue.put(DownloadTask::File(task));
        }
        if !self.handle.is_running() {
            // Stopped before the files were queued.
            queue.discard_pending();
        }

        let workers = self.handle.workers;
        info!(
            "download: {} files from {}/{} with {} workers",
            total, self.asset_host, self.masterhash, workers
        );
        let _ = events.send(Event::SessionStarted { total, workers });

        let supervisor = async {
            queue.join().await;
            self.handle.shutdown(false);
        };
        let pool = join_all((0..workers).map(|id| self.worker(id, events)));
        let (tallies, ()) = tokio::join!(pool, supervisor);

        let summary = SessionSummary {
            downloaded: tallies.iter().map(|t| t.downloaded).sum(),
            failed: tallies.iter().map(|t| t.failed).sum(),
            cancelled: self.handle.cancelled.load(Ordering::SeqCst),
            elapsed_secs: (Utc::now() - started).num_seconds(),
        };
        info!("download: finished, {}", summary.describe());
        let _ = events.send(Event::SessionFinished(summary.clone()));
        summary
    }

    async fn worker(&self, id: usize, events: &mpsc::UnboundedSender<Event>) -> WorkerTally {
        let queue = &self.handle.queue;
        let mut tally = WorkerTally::default();
        loop {
            let file = match queue.get().await {
                DownloadTask::Stop => {
                    queue.task_done();
                    debug!("worker {id}: stopping");
                    return tally;
                }
                DownloadTask::File(file) => file,
            };

            let success = match self.download_one(&file).await {
                Ok(bytes) => {
                    debug!("worker {id}: {file} ({bytes} bytes)");
                    tally.downloaded += 1;
                    true
                }
                Err(err) => {
                    warn!("worker {id}: {file} failed: {err}");
                    tally.failed += 1;
                    false
                }
            };
            let _ = events.send(Event::FileDownloaded {
                file,
                success,
                running: self.handle.is_running(),
            });
            queue.task_done();
        }
    }

    /// Fetch, optionally decompress, and write one file. Returns bytes written.
    async fn download_one(&self, file: &str) -> Result<usize, String> {
        let dest = self.target_dir.join(relative_target(file)?);
        let url = join_path(&[&self.asset_host, &self.masterhash, file]);
        let mut body = self.fetcher.fetch(&url).await?;

        if self.decompress && is_compressible(file) {
            let decompressor = Arc::clone(&self.decompressor);
            body = tokio::task::spawn_blocking(move || decompressor.decompress(&body))
                .await
                .map_err(|e| format!("decompression task failed: {e}"))?;
        }

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| format!("failed to create {}: {e}", parent.display()))?;
        }
        tokio::fs::write(&dest, &body)
            .await
            .map_err(|e| format!("failed to write {}: {e}", dest.display()))?;
        Ok(body.len())
    }
}
