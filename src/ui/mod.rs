//! Terminal presentation of engine events.

use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::engine::state::{Event, SessionSummary};
use crate::util::progress_percent;

const BAR_TEMPLATE: &str =
    "{spinner:.blue} [{elapsed_precise}] {wide_bar:.cyan/blue} {pos}/{len} files {wide_msg}";
const BAR_CHARS: &str = "█▓▒░  ";

fn bar_style() -> Option<ProgressStyle> {
    ProgressStyle::with_template(BAR_TEMPLATE)
        .ok()
        .map(|style| style.progress_chars(BAR_CHARS))
}

/// Turns the event stream into log lines and a progress bar.
pub struct ProgressReporter {
    bar: Option<ProgressBar>,
    visible: bool,
    total: usize,
    completed: usize,
    failed: Vec<String>,
    summary: Option<SessionSummary>,
}

impl ProgressReporter {
    pub fn new() -> Self {
        Self::with_visibility(true)
    }

    /// A reporter that draws nothing, for non-interactive use.
    pub fn hidden() -> Self {
        Self::with_visibility(false)
    }

    fn with_visibility(visible: bool) -> Self {
        Self {
            bar: None,
            visible,
            total: 0,
            completed: 0,
            failed: Vec::new(),
            summary: None,
        }
    }

    pub fn handle(&mut self, event: Event) {
        match event {
            Event::Status(message) => match &self.bar {
                Some(bar) => bar.set_message(message),
                None => info!("{message}"),
            },
            Event::ProbeAttempt { major, build } => {
                debug!("probe: trying major {major} build {build}");
            }
            Event::VersionProbed { major, build } => {
                info!("probe: live version is major {major} build {build}");
            }
            Event::SessionStarted { total, workers } => {
                self.total = total;
                self.completed = 0;
                let bar = if self.visible {
                    ProgressBar::new(total as u64)
                } else {
                    ProgressBar::hidden()
                };
                let bar = match bar_style() {
                    Some(style) => bar.with_style(style),
                    None => bar,
                };
                bar.set_message(format!("{workers} workers"));
                self.bar = Some(bar);
            }
            Event::FileDownloaded {
                file,
                success,
                running,
            } => {
                self.completed += 1;
                if !success {
                    warn!("download: {file} failed");
                    self.failed.push(file);
                }
                if let Some(bar) = &self.bar {
                    bar.inc(1);
                    if !running {
                        bar.set_message("stopping...");
                    }
                }
            }
            Event::SessionFinished(summary) => {
                if let Some(bar) = self.bar.take() {
                    bar.finish_with_message(summary.describe());
                }
                self.summary = Some(summary);
            }
        }
    }

    pub fn progress(&self) -> f32 {
        progress_percent(self.completed, self.total)
    }

    pub fn failed_files(&self) -> &[String] {
        &self.failed
    }

    pub fn summary(&self) -> Option<&SessionSummary> {
        self.summary.as_ref()
    }

    /// Consume events until every sender is gone.
    pub fn spawn(mut self, mut events: mpsc::UnboundedReceiver<Event>) -> JoinHandle<Self> {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                self.handle(event);
            }
            self
        })
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}
