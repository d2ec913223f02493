// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Persisted incremental state.

One JSON document holds everything the pipeline needs to make the next run
incremental: per-fetcher opaque snapshots keyed by kind then uid, and the
identity of each distribution's last successfully extracted artifact.
*/

use {
    crate::error::{FetchError, Result},
    serde::{Deserialize, Serialize},
    std::{collections::BTreeMap, path::Path},
};

/// Sentinel for a distribution with no prior extracted artifact.
pub const NO_URL: &str = "NONE";

/// Per-distribution persisted record.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct DistroRunState {
    /// URL of the last artifact whose configuration was extracted.
    pub latest_url: String,
}

impl Default for DistroRunState {
    fn default() -> Self {
        Self {
            latest_url: NO_URL.to_string(),
        }
    }
}

/// The whole persisted state document.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct StateFile {
    /// Opaque fetcher snapshots, keyed by fetcher kind, then uid.
    #[serde(default)]
    pub fetchers: BTreeMap<String, BTreeMap<String, serde_json::Value>>,

    /// Per-distribution records, keyed by unique name.
    #[serde(default)]
    pub distros: BTreeMap<String, DistroRunState>,
}

impl StateFile {
    /// Load state from a file; a missing file yields empty state.
    pub async fn load(path: &Path) -> Result<Self> {
        match tokio::fs::read(path).await {
            Ok(data) => Ok(serde_json::from_slice(&data)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(FetchError::IoPath(path.display().to_string(), e)),
        }
    }

    /// Persist state as sorted, pretty-printed JSON.
    pub async fn save(&self, path: &Path) -> Result<()> {
        let mut data = serde_json::to_vec_pretty(self)?;
        data.push(b'\n');

        tokio::fs::write(path, data)
            .await
            .map_err(|e| FetchError::IoPath(path.display().to_string(), e))
    }

    /// The saved snapshot for one fetcher instance, if any.
    pub fn fetcher_state(&self, kind: &str, uid: &str) -> Option<&serde_json::Value> {
        self.fetchers.get(kind).and_then(|m| m.get(uid))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn missing_file_yields_empty_state() {
        let td = tempfile::tempdir().unwrap();
        let state = StateFile::load(&td.path().join("state.json")).await.unwrap();
        assert!(state.fetchers.is_empty());
        assert!(state.distros.is_empty());
    }

    #[tokio::test]
    async fn round_trip_preserves_document() {
        let td = tempfile::tempdir().unwrap();
        let path = td.path().join("state.json");

        let mut state = StateFile::default();
        state.distros.insert(
            "Fedora 40 x86_64".to_string(),
            DistroRunState {
                latest_url: "https://example.com/kernel-core.rpm".to_string(),
            },
        );
        state
            .fetchers
            .entry("rpm".to_string())
            .or_default()
            .insert(
                "https://example.com/os".to_string(),
                serde_json::json!({"last_db": "abc"}),
            );

        state.save(&path).await.unwrap();
        let loaded = StateFile::load(&path).await.unwrap();
        assert_eq!(loaded, state);

        let raw = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(raw.ends_with('\n'));
    }

    #[test]
    fn fetcher_state_lookup() {
        let mut state = StateFile::default();
        state
            .fetchers
            .entry("deb".to_string())
            .or_default()
            .insert("uid".to_string(), serde_json::json!({"last_hash": "h"}));

        assert!(state.fetcher_state("deb", "uid").is_some());
        assert!(state.fetcher_state("deb", "other").is_none());
        assert!(state.fetcher_state("rpm", "uid").is_none());
    }
}
