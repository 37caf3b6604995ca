use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::util::is_masterhash_valid;

pub const FINGERPRINT_FILE: &str = "fingerprint.json";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub file: String,
    #[serde(default, rename = "sha", skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub sha: Option<String>,
    #[serde(default)]
    pub files: Vec<FileEntry>,
}

impl Fingerprint {
    /// Parse and validate a fingerprint document.
    pub fn from_json(text: &str) -> Result<Self, String> {
        let fingerprint: Fingerprint =
            serde_json::from_str(text).map_err(|e| format!("couldn't parse fingerprint: {e}"))?;
        fingerprint.validate()?;
        Ok(fingerprint)
    }

    pub fn validate(&self) -> Result<(), String> {
        if let Some(sha) = &self.sha
            && !is_masterhash_valid(sha)
        {
            return Err(format!("fingerprint has an invalid masterhash: {sha}"));
        }
        if let Some(index) = self.files.iter().position(|f| f.file.is_empty()) {
            return Err(format!("fingerprint file entry {index} has no path"));
        }
        Ok(())
    }

    /// The masterhash the files are published under.
    pub fn masterhash(&self) -> Result<&str, String> {
        self.sha
            .as_deref()
            .filter(|sha| !sha.is_empty())
            .ok_or_else(|| "fingerprint is missing its masterhash".to_owned())
    }

    /// Distinct file extensions (with leading dot), in sorted order.
    pub fn extensions(&self) -> Vec<String> {
        self.files
            .iter()
            .map(|entry| extension_of(&entry.file))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

/// Extension of `file` including the dot, or an empty string.
pub fn extension_of(file: &str) -> String {
    Path::new(file)
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default()
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionState {
    pub major: u32,
    pub build: u32,
}

/// Where the fingerprint of the patch to download comes from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DownloadMethod {
    LatestPatch,
    Masterhash(String),
    FingerprintFile(PathBuf),
}

/// Which fingerprint files to fetch.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum FileSelection {
    #[default]
    All,
    Extensions(Vec<String>),
}

impl FileSelection {
    pub fn wants(&self, file: &str) -> bool {
        match self {
            FileSelection::All => true,
            FileSelection::Extensions(exts) => exts.iter().any(|ext| file.ends_with(ext.as_str())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHA: &str = "0123456789abcdef0123456789abcdef01234567";

    fn sample() -> String {
        format!(
            r#"{{"version":"3.2964.5","sha":"{SHA}","files":[
                {{"file":"logic/buildings.csv","sha":"aa"}},
                {{"file":"sc/ui.sc","sha":"bb"}},
                {{"file":"sc/ui_tex.sc"}},
                {{"file":"music/theme.ogg","sha":"cc"}}
            ]}}"#
        )
    }

    #[test]
    fn parses_fingerprint_document() {
        let fingerprint = Fingerprint::from_json(&sample()).unwrap();
        assert_eq!(fingerprint.version, "3.2964.5");
        assert_eq!(fingerprint.masterhash().unwrap(), SHA);
        assert_eq!(fingerprint.files.len(), 4);
        assert_eq!(fingerprint.files[0].hash.as_deref(), Some("aa"));
        assert_eq!(fingerprint.files[2].hash, None);
        assert_eq!(fingerprint.extensions(), vec![".csv", ".ogg", ".sc"]);
    }

    #[test]
    fn rejects_invalid_documents() {
        assert!(Fingerprint::from_json("not json").is_err());
        assert!(Fingerprint::from_json(r#"{"sha":"XYZ","files":[]}"#).is_err());
        assert!(Fingerprint::from_json(&format!(r#"{{"sha":"{SHA}","files":[{{"file":""}}]}}"#)).is_err());
        assert!(Fingerprint::from_json(&format!(r#"{{"sha":"{SHA}","files":[{{"sha":"aa"}}]}}"#)).is_err());
    }

    #[test]
    fn missing_masterhash_is_reported_on_use() {
        let fingerprint = Fingerprint::from_json(r#"{"files":[{"file":"a.csv"}]}"#).unwrap();
        assert!(fingerprint.masterhash().is_err());
    }

    #[test]
    fn selection_matches_suffixes() {
        let selection = FileSelection::Extensions(vec![".csv".into(), ".json".into()]);
        assert!(selection.wants("logic/buildings.csv"));
        assert!(selection.wants(FINGERPRINT_FILE));
        assert!(!selection.wants("sc/ui.sc"));
        assert!(FileSelection::All.wants("anything.bin"));
    }

    #[test]
    fn extension_includes_dot() {
        assert_eq!(extension_of("a/b/c.csv"), ".csv");
        assert_eq!(extension_of("README"), "");
    }
}
