use std::env;
use std::path::PathBuf;

const APP_DIR_NAME: &str = "sc-downloader";
const CONFIG_FILE: &str = "config.json";

/// Per-user data directory for the downloader.
pub fn default_app_dir() -> PathBuf {
    let base = match env::consts::OS {
        "windows" => env::var_os("LOCALAPPDATA")
            .or_else(|| env::var_os("APPDATA"))
            .map(PathBuf::from),
        "macos" => env::var_os("HOME")
            .map(PathBuf::from)
            .map(|home| home.join("Library").join("Application Support")),
        _ => env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .or_else(|| {
                env::var_os("HOME")
                    .map(PathBuf::from)
                    .map(|home| home.join(".local").join("share"))
            }),
    }
    .unwrap_or_else(|| PathBuf::from("."));

    base.join(APP_DIR_NAME)
}

pub fn config_path() -> PathBuf {
    default_app_dir().join(CONFIG_FILE)
}

pub fn default_output_dir() -> PathBuf {
    default_app_dir().join("assets")
}
