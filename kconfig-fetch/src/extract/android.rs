// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Android GKI boot image extraction. */

use {
    crate::{
        distro::DistroSpec,
        error::{FetchError, Result},
        extract::Extractor,
        process::{output_checked, run_checked},
        run::AppContext,
    },
    async_trait::async_trait,
    std::path::{Path, PathBuf},
    tokio::process::Command,
};

/// Find a `boot*.img` in an unzipped GKI archive.
async fn find_boot_image(dir: &Path) -> Result<PathBuf> {
    let mut entries = tokio::fs::read_dir(dir).await?;

    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with("boot") && name.ends_with(".img") {
            return Ok(entry.path());
        }
    }

    Err(FetchError::KernelImageNotFound(dir.display().to_string()))
}

/// Extracts the embedded config out of a certified boot image zip.
pub struct AndroidGkiExtractor;

#[async_trait]
impl Extractor for AndroidGkiExtractor {
    async fn extract_kconfig(
        &self,
        artifact: &Path,
        output: &Path,
        _spec: &DistroSpec,
        ctx: &AppContext,
    ) -> Result<()> {
        let td = tempfile::tempdir()?;

        run_checked(
            Command::new("unzip")
                .arg(artifact)
                .current_dir(td.path()),
        )
        .await?;

        let image = find_boot_image(td.path()).await?;
        let config = output_checked(Command::new(&ctx.ikconfig_script).arg(&image)).await?;

        tokio::fs::write(output, config)
            .await
            .map_err(|e| FetchError::IoPath(output.display().to_string(), e))?;

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn boot_image_discovery() {
        let td = tempfile::tempdir().unwrap();
        tokio::fs::write(td.path().join("vendor_boot.img"), b"x")
            .await
            .unwrap();
        tokio::fs::write(td.path().join("boot-5.10.img"), b"x")
            .await
            .unwrap();

        let image = find_boot_image(td.path()).await.unwrap();
        assert!(image.ends_with("boot-5.10.img"));
    }

    #[tokio::test]
    async fn archive_without_boot_image_is_an_error() {
        let td = tempfile::tempdir().unwrap();
        tokio::fs::write(td.path().join("README"), b"x").await.unwrap();

        assert!(matches!(
            find_boot_image(td.path()).await,
            Err(FetchError::KernelImageNotFound(_))
        ));
    }
}
