// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Default configuration generation from source tarballs.

For sources that ship no prebuilt kernel, the configuration is the build
system's generated default: untar, run `make ARCH=<arch> defconfig`, take
the resulting `.config`.

Upstream detached signatures (`.sign`) are made over the decompressed
tarball, not the compressed download, so verification decompresses first.
The decompressed copy is large and deleted as soon as the signature checks
out.
*/

use {
    crate::{
        distro::DistroSpec,
        error::{FetchError, Result},
        extract::Extractor,
        io::maybe_decompress,
        process::run_checked,
        run::AppContext,
    },
    async_trait::async_trait,
    log::info,
    std::path::{Path, PathBuf},
    tokio::process::Command,
};

/// Key sentinel marking a source as deliberately unsigned.
pub const NOVERIFY_GITHUB: &str = "NOVERIFY-GITHUB";

/// Kernel build system architecture names.
fn kernel_arch(arch: &str) -> &str {
    match arch {
        "aarch64" => "arm64",
        other => other,
    }
}

/// Find the single top-level directory of an extracted tarball.
async fn single_subdir(dir: &Path) -> Result<PathBuf> {
    let mut subdirs = vec![];

    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        subdirs.push(entry.path());
    }

    if subdirs.len() == 1 {
        Ok(subdirs.remove(0))
    } else {
        Err(FetchError::ExtractedFileMismatch {
            pattern: "single top-level source directory".to_string(),
            count: subdirs.len(),
        })
    }
}

/// Generates a defconfig from a source tarball.
pub struct DefconfigExtractor;

#[async_trait]
impl Extractor for DefconfigExtractor {
    async fn verify_signature(
        &self,
        artifact: &Path,
        sig: &Path,
        spec: &DistroSpec,
        ctx: &AppContext,
    ) -> Result<()> {
        if spec.key.as_deref() == Some(NOVERIFY_GITHUB) {
            return Ok(());
        }

        let key = spec.require(&spec.key, "key")?;

        // The signature covers the decompressed tarball.
        let tarball = maybe_decompress(artifact).await?;

        if ctx.verifier.gpg_verify(&tarball, sig, key).await? {
            info!("good GPG signature [{}]: {}", key, artifact.display());
            // The decompressed copy takes up too much disk space to keep.
            if tarball != artifact {
                tokio::fs::remove_file(&tarball).await?;
            }
            Ok(())
        } else {
            Err(FetchError::BadSignature {
                key: key.to_string(),
                path: artifact.display().to_string(),
            })
        }
    }

    async fn extract_kconfig(
        &self,
        artifact: &Path,
        output: &Path,
        spec: &DistroSpec,
        _ctx: &AppContext,
    ) -> Result<()> {
        let td = tempfile::tempdir()?;

        run_checked(
            Command::new("tar")
                .arg("xf")
                .arg(artifact)
                .current_dir(td.path()),
        )
        .await?;

        let source_dir = single_subdir(td.path()).await?;

        // O= and MAKEFLAGS inherited from an outer build would leak into the
        // kernel makefiles and corrupt the generated config.
        run_checked(
            Command::new("make")
                .arg(format!("ARCH={}", kernel_arch(&spec.arch)))
                .arg("defconfig")
                .env_remove("O")
                .env_remove("MAKEFLAGS")
                .current_dir(&source_dir),
        )
        .await?;

        tokio::fs::copy(source_dir.join(".config"), output)
            .await
            .map_err(|e| FetchError::IoPath(output.display().to_string(), e))?;

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn kernel_arch_mapping() {
        assert_eq!(kernel_arch("aarch64"), "arm64");
        assert_eq!(kernel_arch("x86_64"), "x86_64");
        assert_eq!(kernel_arch("riscv"), "riscv");
    }

    #[tokio::test]
    async fn tarball_must_have_one_top_level_directory() {
        let td = tempfile::tempdir().unwrap();
        tokio::fs::create_dir(td.path().join("linux-6.8.9"))
            .await
            .unwrap();

        let got = single_subdir(td.path()).await.unwrap();
        assert!(got.ends_with("linux-6.8.9"));

        tokio::fs::create_dir(td.path().join("stray"))
            .await
            .unwrap();
        assert!(matches!(
            single_subdir(td.path()).await,
            Err(FetchError::ExtractedFileMismatch { count: 2, .. })
        ));
    }
}
