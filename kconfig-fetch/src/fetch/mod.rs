// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Polymorphic package fetching.

Package managers typically publish a small metadata file that tells whether
the package database changed. A [Fetcher] first answers that question
cheaply ([Fetcher::is_updated]); only when the index moved does the pipeline
resolve the concrete artifact URL ([Fetcher::latest_version_url]) and
download it.

Fetcher instances are deduplicated across distributions sharing an
underlying index: [FetcherKind::uid] derives a pure identity string from the
spec, and [FetcherRegistry] caches one instance per `(kind, uid)` for the
whole run. Instances must therefore tolerate concurrent callers; those that
lazily query a remote index cache the result behind a lock so the query runs
at most once per run.
*/

pub mod android;
pub mod deb;
pub mod github;
pub mod pacman;
pub mod rpm;
pub mod upstream;

use {
    crate::{
        distro::{DistroSpec, FetcherKind},
        error::{FetchError, Result},
        io::Checksum,
        run::AppContext,
    },
    async_trait::async_trait,
    std::{
        collections::{BTreeMap, HashMap},
        path::PathBuf,
        sync::{Arc, Mutex},
    },
};

/// A resolved downloadable artifact: URL plus optional integrity material.
#[derive(Clone, Debug)]
pub struct ArtifactRef {
    pub url: String,
    pub checksum: Option<Checksum>,
}

/// Determines whether a newer package exists and where to download it.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Whether the package index changed since the persisted snapshot.
    ///
    /// Cheap network check. Idempotent within a run: the computed "latest"
    /// value is cached after the first call.
    async fn is_updated(&self) -> Result<bool>;

    /// Resolve the currently-latest downloadable artifact for `package`.
    ///
    /// Only meaningful after [Self::is_updated] has run at least once in
    /// this process; implementations may compute lazily but must serialize
    /// concurrent callers.
    async fn latest_version_url(&self, package: &str) -> Result<ArtifactRef>;

    /// Location of a detached signature for the latest artifact, if one exists.
    async fn signature_url(&self, _package: &str) -> Result<Option<String>> {
        Ok(None)
    }

    /// Snapshot to persist for the next run.
    fn save_data(&self) -> serde_json::Value;
}

impl FetcherKind {
    /// Deterministic identity for fetcher deduplication.
    ///
    /// A pure function of the spec; distributions mapping to the same uid
    /// share one fetcher instance (and its persisted snapshot).
    pub fn uid(&self, spec: &DistroSpec) -> Result<String> {
        match self {
            Self::Deb => deb::uid(spec),
            Self::Rpm => Ok(spec.index.clone()),
            Self::Pacman => Ok(spec.index.clone()),
            Self::Github => github::uid(spec),
            Self::AndroidGki => Ok(spec.index.clone()),
            Self::Upstream => upstream::uid(spec),
        }
    }
}

/// Join a relative href onto an index base URL.
///
/// Hrefs that are already absolute are passed through.
pub(crate) fn join_url(base: &str, rel: &str) -> String {
    if rel.starts_with("http://") || rel.starts_with("https://") {
        rel.to_string()
    } else {
        format!("{}/{}", base.trim_end_matches('/'), rel.trim_start_matches('/'))
    }
}

/// Uids double as directory names; flatten URL punctuation.
fn sanitize_uid(uid: &str) -> String {
    uid.replace(&[':', '/', '?'][..], "_")
}

/// Caches one [Fetcher] instance per `(kind, uid)` for the duration of a run.
///
/// Instances are constructed lazily, never evicted, and handed out as
/// [Arc]s so each distribution task borrows the shared instance. Each
/// instance owns a scratch directory that persists across runs, suitable for
/// caching package databases.
pub struct FetcherRegistry {
    ctx: Arc<AppContext>,
    root: PathBuf,
    instances: Mutex<HashMap<(FetcherKind, String), Arc<dyn Fetcher>>>,
}

impl FetcherRegistry {
    /// Construct a registry storing fetcher scratch directories under
    /// `<download_dir>/fetcher`.
    pub fn new(ctx: Arc<AppContext>, download_dir: &std::path::Path) -> Self {
        Self {
            ctx,
            root: download_dir.join("fetcher"),
            instances: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve the fetcher instance for a spec, constructing it on first use.
    pub fn get(
        &self,
        spec: &DistroSpec,
        state: &crate::state::StateFile,
    ) -> Result<Arc<dyn Fetcher>> {
        let kind = spec.fetcher;
        let uid = kind.uid(spec)?;

        let mut instances = self.instances.lock().expect("registry lock poisoned");

        if let Some(fetcher) = instances.get(&(kind, uid.clone())) {
            return Ok(fetcher.clone());
        }

        let savedir = self.root.join(kind.to_string()).join(sanitize_uid(&uid));
        std::fs::create_dir_all(&savedir)
            .map_err(|e| FetchError::IoPath(savedir.display().to_string(), e))?;

        let saved = state.fetcher_state(&kind.to_string(), &uid);

        let fetcher: Arc<dyn Fetcher> = match kind {
            FetcherKind::Deb => Arc::new(deb::DebFetcher::new(
                saved,
                spec,
                savedir,
                self.ctx.clone(),
            )?),
            FetcherKind::Rpm => Arc::new(rpm::RpmFetcher::new(
                saved,
                spec,
                savedir,
                self.ctx.clone(),
            )?),
            FetcherKind::Pacman => Arc::new(pacman::PacmanFetcher::new(
                saved,
                spec,
                self.ctx.clone(),
            )?),
            FetcherKind::Github => Arc::new(github::GithubFetcher::new(spec, self.ctx.clone())?),
            FetcherKind::AndroidGki => {
                Arc::new(android::AndroidGkiFetcher::new(spec, self.ctx.clone()))
            }
            FetcherKind::Upstream => Arc::new(upstream::UpstreamFetcher::new(
                saved,
                spec,
                self.ctx.clone(),
            )?),
        };

        instances.insert((kind, uid), fetcher.clone());

        Ok(fetcher)
    }

    /// Snapshot every live instance for persistence.
    pub fn save_state(&self) -> BTreeMap<String, BTreeMap<String, serde_json::Value>> {
        let instances = self.instances.lock().expect("registry lock poisoned");

        let mut out: BTreeMap<String, BTreeMap<String, serde_json::Value>> = BTreeMap::new();
        for ((kind, uid), fetcher) in instances.iter() {
            out.entry(kind.to_string())
                .or_default()
                .insert(uid.clone(), fetcher.save_data());
        }

        out
    }
}
