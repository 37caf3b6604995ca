use std::path::{Path, PathBuf};

use log::{debug, info};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::download::{MAX_WORKERS, MIN_WORKERS};
use crate::engine::models::VersionState;
use crate::env;

const DEFAULT_WORKERS: usize = 4;
const DEFAULT_MAJOR: u32 = 3;

/// Persisted user settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub output_path: PathBuf,
    pub workers_count: usize,
    pub major: u32,
    pub build: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            output_path: env::default_output_dir(),
            workers_count: DEFAULT_WORKERS,
            major: DEFAULT_MAJOR,
            build: 0,
        }
    }
}

impl Settings {
    pub fn version(&self) -> VersionState {
        VersionState {
            major: self.major,
            build: self.build,
        }
    }

    pub fn set_version(&mut self, version: VersionState) {
        self.major = version.major;
        self.build = version.build;
    }

    /// Bring hand-edited values back into range.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.workers_count = self.workers_count.clamp(MIN_WORKERS, MAX_WORKERS);
        self
    }
}

#[derive(Clone, Debug)]
pub struct SettingsStore {
    path: PathBuf,
}

impl Default for SettingsStore {
    fn default() -> Self {
        Self::new(env::config_path())
    }
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the settings file; a missing file yields the defaults.
    pub async fn load(&self) -> Result<Settings, String> {
        let text = match fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!("settings: {} not found, using defaults", self.path.display());
                return Ok(Settings::default());
            }
            Err(err) => {
                return Err(format!(
                    "unable to read settings {}: {err}",
                    self.path.display()
                ));
            }
        };
        let settings: Settings = serde_json::from_str(&text)
            .map_err(|e| format!("invalid settings file {}: {e}", self.path.display()))?;
        Ok(settings.normalized())
    }

    pub async fn save(&self, settings: &Settings) -> Result<(), String> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| format!("unable to create settings dir: {e}"))?;
        }
        let text = serde_json::to_string_pretty(settings)
            .map_err(|e| format!("unable to serialize settings: {e}"))?;
        fs::write(&self.path, text)
            .await
            .map_err(|e| format!("unable to persist settings: {e}"))?;
        info!("settings: saved to {}", self.path.display());
        Ok(())
    }
}
