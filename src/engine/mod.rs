use std::sync::Arc;

use log::{error, info, warn};
use tokio::sync::mpsc;

use crate::download::{DownloadConfig, DownloadSession, SessionHandle, plan};
use crate::engine::models::{DownloadMethod, FileSelection, Fingerprint, VersionState};
use crate::engine::state::{Event, SessionSummary};
use crate::networking::{AssetFetcher, fetch_fingerprint};
use crate::protocol::prober::{DEFAULT_MAX_STEPS, VersionProber};
use crate::protocol::{Handshake, HandshakeInfo, ProtocolError};
use crate::util::is_masterhash_valid;

pub mod models;
pub mod state;

/// Result of talking to the game server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Connection {
    /// Version the server accepted.
    pub version: VersionState,
    /// True when `version` had to be probed and should be persisted.
    pub version_changed: bool,
    pub info: HandshakeInfo,
}

/// Drives one user action end to end: handshake, version recovery,
/// fingerprint resolution and the download session.
pub struct DownloaderEngine<H, F> {
    handshake: H,
    fetcher: Arc<F>,
    max_probe_steps: usize,
}

impl<H: Handshake, F: AssetFetcher> DownloaderEngine<H, F> {
    pub fn new(handshake: H, fetcher: Arc<F>) -> Self {
        Self {
            handshake,
            fetcher,
            max_probe_steps: DEFAULT_MAX_STEPS,
        }
    }

    #[must_use]
    pub fn with_max_probe_steps(mut self, steps: usize) -> Self {
        self.max_probe_steps = steps;
        self
    }

    /// Handshake with `version`, probing for the live version if the server
    /// reports it as outdated.
    pub async fn connect(
        &self,
        version: VersionState,
        events: &mpsc::UnboundedSender<Event>,
    ) -> Result<Connection, String> {
        status(events, "Connecting to game server...");
        info!(
            "connect: handshake with major {} build {}",
            version.major, version.build
        );
        let reply = self
            .handshake
            .login(version)
            .await
            .map_err(|e| format!("handshake failed: {e}"))?;

        match reply.into_result() {
            Ok(info) => Ok(Connection {
                version,
                version_changed: false,
                info,
            }),
            Err(ProtocolError::VersionOutdated) => {
                warn!("connect: client version outdated, probing for the live one");
                status(events, "Client version outdated, searching for the live version...");
                let outcome = VersionProber::new(&self.handshake, events)
                    .with_max_steps(self.max_probe_steps)
                    .probe(version)
                    .await
                    .map_err(|e| format!("version probe failed: {e}"))?;
                let info = match outcome.info {
                    Some(info) => info,
                    None => self
                        .handshake
                        .login(outcome.version)
                        .await
                        .and_then(|reply| reply.into_result())
                        .map_err(|e| format!("handshake failed after probe: {e}"))?,
                };
                status(
                    events,
                    format!(
                        "New major version: {}, new build version: {}",
                        outcome.version.major, outcome.version.build
                    ),
                );
                Ok(Connection {
                    version: outcome.version,
                    version_changed: true,
                    info,
                })
            }
            Err(err) => {
                error!("connect: {err}");
                Err(format!("handshake failed: {err}"))
            }
        }
    }

    /// Resolve the fingerprint named by `method`.
    pub async fn fingerprint(
        &self,
        method: &DownloadMethod,
        info: &HandshakeInfo,
    ) -> Result<Fingerprint, String> {
        match method {
            DownloadMethod::LatestPatch => {
                let text = info
                    .fingerprint
                    .as_deref()
                    .ok_or_else(|| "server did not send a fingerprint".to_owned())?;
                Fingerprint::from_json(text)
            }
            DownloadMethod::Masterhash(masterhash) => {
                if masterhash.is_empty() || !is_masterhash_valid(masterhash) {
                    return Err(format!("invalid masterhash: {masterhash:?}"));
                }
                fetch_fingerprint(self.fetcher.as_ref(), &info.asset_host, masterhash).await
            }
            DownloadMethod::FingerprintFile(path) => {
                let text = tokio::fs::read_to_string(path)
                    .await
                    .map_err(|e| format!("unable to read {}: {e}", path.display()))?;
                Fingerprint::from_json(&text)
            }
        }
    }

    /// Plan and prepare a download session; run it with [`run_session`].
    pub fn prepare(
        &self,
        fingerprint: &Fingerprint,
        selection: &FileSelection,
        info: &HandshakeInfo,
        config: &DownloadConfig,
    ) -> Result<(DownloadSession<F>, Vec<String>), String> {
        let masterhash = fingerprint.masterhash()?;
        let tasks = plan(fingerprint, selection, config)?;
        info!(
            "prepare: {} of {} files queued for {masterhash}",
            tasks.len(),
            fingerprint.files.len()
        );
        let session = DownloadSession::new(
            Arc::clone(&self.fetcher),
            info.asset_host.clone(),
            masterhash,
            config,
        );
        Ok((session, tasks))
    }

    /// Connect, resolve the fingerprint and download it. `on_session` is
    /// handed the stop handle before the first file is fetched.
    pub async fn download(
        &self,
        version: VersionState,
        method: &DownloadMethod,
        selection: &FileSelection,
        config: &DownloadConfig,
        events: &mpsc::UnboundedSender<Event>,
        on_session: impl FnOnce(SessionHandle),
    ) -> Result<(Connection, SessionSummary), String> {
        let connection = self.connect(version, events).await?;
        let fingerprint = self.fingerprint(method, &connection.info).await?;
        let (session, tasks) = self.prepare(&fingerprint, selection, &connection.info, config)?;
        on_session(session.handle());
        status(
            events,
            format!(
                "Downloading patch {} from {}",
                fingerprint.version, connection.info.asset_host
            ),
        );
        let summary = run_session(&session, tasks, events).await;
        Ok((connection, summary))
    }
}

pub async fn run_session<F: AssetFetcher>(
    session: &DownloadSession<F>,
    tasks: Vec<String>,
    events: &mpsc::UnboundedSender<Event>,
) -> SessionSummary {
    let summary = session.run(tasks, events).await;
    status(events, summary.describe());
    summary
}

fn status(events: &mpsc::UnboundedSender<Event>, message: impl Into<String>) {
    let _ = events.send(Event::Status(message.into()));
}
