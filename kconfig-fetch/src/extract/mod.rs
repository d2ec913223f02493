// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Polymorphic configuration extraction.

An [Extractor] pulls the kernel build configuration out of a downloaded
artifact using format-specific logic, mostly by driving external tools
inside a scoped temporary directory. Extractors are stateless; one instance
per kind is shared freely between concurrent distribution tasks.
*/

pub mod android;
pub mod deb;
pub mod defconfig;
pub mod pacman;
pub mod rpm;

use {
    crate::{
        distro::{DistroSpec, ExtractorKind},
        error::{FetchError, Result},
        run::AppContext,
    },
    async_trait::async_trait,
    log::info,
    std::path::Path,
};

/// Pulls a build configuration payload out of a downloaded artifact.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Verify a detached signature over the artifact.
    ///
    /// The default checks the signature against the spec's keyring.
    /// Extractors with unusual trust shapes override this.
    async fn verify_signature(
        &self,
        artifact: &Path,
        sig: &Path,
        spec: &DistroSpec,
        ctx: &AppContext,
    ) -> Result<()> {
        let key = spec.require(&spec.key, "key")?;

        if ctx.verifier.gpg_verify(artifact, sig, key).await? {
            info!("good GPG signature [{}]: {}", key, artifact.display());
            Ok(())
        } else {
            Err(FetchError::BadSignature {
                key: key.to_string(),
                path: artifact.display().to_string(),
            })
        }
    }

    /// Extract the build configuration from `artifact` into `output`.
    async fn extract_kconfig(
        &self,
        artifact: &Path,
        output: &Path,
        spec: &DistroSpec,
        ctx: &AppContext,
    ) -> Result<()>;
}

impl ExtractorKind {
    /// The stateless extractor implementation for this kind.
    pub fn extractor(&self) -> &'static dyn Extractor {
        match self {
            Self::Deb => &deb::DebExtractor,
            Self::Rpm => &rpm::RpmExtractor,
            Self::Pacman => &pacman::PacmanExtractor,
            Self::AndroidGki => &android::AndroidGkiExtractor,
            Self::Defconfig => &defconfig::DefconfigExtractor,
        }
    }
}

/// Find the single regular file under `dir` whose name starts with `prefix`.
pub(crate) async fn single_file_with_prefix(
    dir: &Path,
    prefix: &str,
    pattern: &str,
) -> Result<std::path::PathBuf> {
    let mut matches = vec![];

    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(FetchError::ExtractedFileMismatch {
                pattern: pattern.to_string(),
                count: 0,
            })
        }
        Err(e) => return Err(FetchError::IoPath(dir.display().to_string(), e)),
    };

    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file()
            && entry.file_name().to_string_lossy().starts_with(prefix)
        {
            matches.push(entry.path());
        }
    }

    if matches.len() == 1 {
        Ok(matches.remove(0))
    } else {
        Err(FetchError::ExtractedFileMismatch {
            pattern: pattern.to_string(),
            count: matches.len(),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn single_file_requires_exactly_one_match() {
        let td = tempfile::tempdir().unwrap();
        tokio::fs::write(td.path().join("config-6.5.0"), b"x")
            .await
            .unwrap();

        let got = single_file_with_prefix(td.path(), "config", "boot/config*")
            .await
            .unwrap();
        assert!(got.ends_with("config-6.5.0"));

        tokio::fs::write(td.path().join("config-6.6.0"), b"x")
            .await
            .unwrap();

        let err = single_file_with_prefix(td.path(), "config", "boot/config*")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            FetchError::ExtractedFileMismatch { count: 2, .. }
        ));
    }

    #[tokio::test]
    async fn missing_directory_counts_as_zero_matches() {
        let td = tempfile::tempdir().unwrap();
        let err = single_file_with_prefix(&td.path().join("boot"), "config", "boot/config*")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            FetchError::ExtractedFileMismatch { count: 0, .. }
        ));
    }
}
