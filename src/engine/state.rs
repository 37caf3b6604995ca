/// Everything the core reports back to whoever drives it.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    Status(String),
    ProbeAttempt {
        major: u32,
        build: u32,
    },
    VersionProbed {
        major: u32,
        build: u32,
    },
    SessionStarted {
        total: usize,
        workers: usize,
    },
    FileDownloaded {
        file: String,
        success: bool,
        /// Whether the session was still running when the file completed.
        running: bool,
    },
    SessionFinished(SessionSummary),
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionSummary {
    pub downloaded: usize,
    pub failed: usize,
    pub cancelled: bool,
    pub elapsed_secs: i64,
}

impl SessionSummary {
    pub fn describe(&self) -> String {
        if self.downloaded == 0 {
            return "No files were downloaded".into();
        }
        let (minutes, seconds) = (self.elapsed_secs / 60, self.elapsed_secs % 60);
        let mut text = format!(
            "{} files downloaded in {}min {}s",
            self.downloaded, minutes, seconds
        );
        if self.failed > 0 {
            text.push_str(&format!(", {} failed", self.failed));
        }
        if self.cancelled {
            text.push_str(" (stopped early)");
        }
        text
    }
}
