// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Pipeline orchestration.

One task per distribution, all started together. Each task asks its
(possibly shared) fetcher whether the index moved, resolves the latest
artifact, downloads and verifies it, and extracts the configuration. The
combined download/verify/extract section is CPU- and disk-heavy, so it is
gated by a semaphore sized to the host CPU count; index checks are not.

A failure in one distribution never interrupts its siblings: all tasks run
to completion, successful results are folded into the new state document,
and the failures are reported alongside it.
*/

use {
    crate::{
        distro::DistroSpec,
        download::DownloadManager,
        error::{FetchError, Result},
        fetch::{Fetcher, FetcherRegistry},
        io::url_file_name,
        state::{DistroRunState, StateFile},
        verify::SignatureVerifier,
    },
    log::{error, info},
    std::{
        path::{Path, PathBuf},
        sync::Arc,
    },
    tokio::sync::Semaphore,
};

/// Application-scoped shared resources.
///
/// Constructed once at startup and passed into every component needing
/// network access, trust anchors, or helper tools.
pub struct AppContext {
    pub downloads: DownloadManager,
    pub verifier: SignatureVerifier,
    /// Helper executable that recovers an embedded config from a kernel image.
    pub ikconfig_script: PathBuf,
}

impl AppContext {
    pub fn new(
        keys_dir: impl Into<PathBuf>,
        ikconfig_script: impl Into<PathBuf>,
    ) -> Result<Self> {
        Ok(Self {
            downloads: DownloadManager::new()?,
            verifier: SignatureVerifier::new(keys_dir),
            ikconfig_script: ikconfig_script.into(),
        })
    }
}

/// One distribution's failure, reported after all tasks finished.
#[derive(Debug)]
pub struct DistroFailure {
    pub distro: String,
    pub error: FetchError,
}

/// The outcome of a run: the state to persist plus any per-distro failures.
#[derive(Debug)]
pub struct RunReport {
    pub state: StateFile,
    pub failures: Vec<DistroFailure>,
}

/// Run the fetch/verify/extract pipeline for every spec concurrently.
///
/// `filtered` indicates the spec list is a subset of the configured
/// distributions; prior state entries outside the subset are then carried
/// over instead of dropped.
pub async fn run_distros(
    specs: &[DistroSpec],
    prior: &StateFile,
    filtered: bool,
    download_dir: &Path,
    output_dir: &Path,
    ctx: Arc<AppContext>,
) -> Result<RunReport> {
    let registry = FetcherRegistry::new(ctx.clone(), download_dir);
    let extract_permits = Arc::new(Semaphore::new(num_cpus::get() + 1));

    let mut state = if filtered {
        prior.clone()
    } else {
        StateFile::default()
    };

    let mut failures = vec![];
    let mut names = vec![];
    let mut handles = vec![];

    for spec in specs {
        let unique = spec.unique_name();

        let fetcher = match registry.get(spec, prior) {
            Ok(fetcher) => fetcher,
            Err(error) => {
                failures.push(DistroFailure {
                    distro: unique,
                    error,
                });
                continue;
            }
        };

        let prior_state = prior.distros.get(&unique).cloned().unwrap_or_default();

        names.push(unique);
        handles.push(tokio::spawn(run_for_distro(
            spec.clone(),
            fetcher,
            prior_state,
            download_dir.to_path_buf(),
            output_dir.to_path_buf(),
            ctx.clone(),
            extract_permits.clone(),
        )));
    }

    for (unique, joined) in names.into_iter().zip(futures::future::join_all(handles).await) {
        match joined {
            Ok(Ok(run_state)) => {
                state.distros.insert(unique, run_state);
            }
            Ok(Err(error)) => {
                error!("{unique}: {error}");
                failures.push(DistroFailure {
                    distro: unique,
                    error,
                });
            }
            Err(join_error) => {
                error!("{unique}: task panicked: {join_error}");
                failures.push(DistroFailure {
                    distro: unique,
                    error: FetchError::TaskJoin(join_error.to_string()),
                });
            }
        }
    }

    for (kind, uids) in registry.save_state() {
        state.fetchers.entry(kind).or_default().extend(uids);
    }

    Ok(RunReport { state, failures })
}

/// The per-distribution pipeline.
async fn run_for_distro(
    spec: DistroSpec,
    fetcher: Arc<dyn Fetcher>,
    prior: DistroRunState,
    download_dir: PathBuf,
    output_dir: PathBuf,
    ctx: Arc<AppContext>,
    extract_permits: Arc<Semaphore>,
) -> Result<DistroRunState> {
    let unique = spec.unique_name();
    let workdir = download_dir.join("distro").join(&unique);

    let output = output_dir.join(&unique).join("config");
    if let Some(parent) = output.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| FetchError::IoPath(parent.display().to_string(), e))?;
    }

    let result = fetch_and_extract(&spec, &fetcher, &prior, &workdir, &output, &ctx, &extract_permits)
        .await;

    // Clear the distro's work directory to conserve space, on every outcome.
    if tokio::fs::try_exists(&workdir).await.unwrap_or(false) {
        let _ = tokio::fs::remove_dir_all(&workdir).await;
    }

    result
}

async fn fetch_and_extract(
    spec: &DistroSpec,
    fetcher: &Arc<dyn Fetcher>,
    prior: &DistroRunState,
    workdir: &Path,
    output: &Path,
    ctx: &AppContext,
    extract_permits: &Semaphore,
) -> Result<DistroRunState> {
    let unique = spec.unique_name();
    let mut latest_url = prior.latest_url.clone();

    if spec.do_update && fetcher.is_updated().await? {
        if tokio::fs::try_exists(workdir).await? {
            tokio::fs::remove_dir_all(workdir).await?;
        }
        tokio::fs::create_dir_all(workdir)
            .await
            .map_err(|e| FetchError::IoPath(workdir.display().to_string(), e))?;

        let artifact = fetcher.latest_version_url(&spec.package).await?;

        if artifact.url != prior.latest_url {
            let _permit = extract_permits
                .acquire()
                .await
                .expect("semaphore never closed");

            let file = workdir.join(url_file_name(&artifact.url));
            ctx.downloads
                .download_to_file(&artifact.url, &file, false, artifact.checksum.as_ref())
                .await?;

            let extractor = spec.extractor.extractor();

            if let Some(sig_url) = fetcher.signature_url(&spec.package).await? {
                let sig_file = workdir.join(url_file_name(&sig_url));
                ctx.downloads
                    .download_to_file(&sig_url, &sig_file, false, None)
                    .await?;
                extractor.verify_signature(&file, &sig_file, spec, ctx).await?;
            }

            info!("extracting configuration of {unique}");
            extractor.extract_kconfig(&file, output, spec, ctx).await?;
        }

        latest_url = artifact.url;
    }

    Ok(DistroRunState { latest_url })
}
