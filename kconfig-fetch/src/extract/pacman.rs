// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Pacman package extraction.

Arch-style kernel packages ship the compressed kernel image under
`usr/lib/modules/<version>/vmlinuz`; the configuration is embedded in the
image and recovered with the `extract-ikconfig` helper.
*/

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

/// Find the kernel image under an extracted package tree.
pub(crate) async fn find_kernel_image(root: &Path) -> Result<PathBuf> {
    let modules = root.join("usr/lib/modules");

    let mut entries = tokio::fs::read_dir(&modules)
        .await
        .map_err(|_| FetchError::KernelImageNotFound(modules.display().to_string()))?;

    while let Some(entry) = entries.next_entry().await? {
        let candidate = entry.path().join("vmlinuz");
        if tokio::fs::try_exists(&candidate).await? {
            return Ok(candidate);
        }
    }

    Err(FetchError::KernelImageNotFound(modules.display().to_string()))
}

/// Extracts the embedded config out of a pacman kernel package.
pub struct PacmanExtractor;

#[async_trait]
impl Extractor for PacmanExtractor {
    async fn extract_kconfig(
        &self,
        artifact: &Path,
        output: &Path,
        _spec: &DistroSpec,
        ctx: &AppContext,
    ) -> Result<()> {
        let td = tempfile::tempdir()?;

        run_checked(
            Command::new("tar")
                .arg("xf")
                .arg(artifact)
                .current_dir(td.path()),
        )
        .await?;

        let image = find_kernel_image(td.path()).await?;
        let config = output_checked(Command::new(&ctx.ikconfig_script).arg(&image)).await?;

        tokio::fs::write(output, config)
            .await
            .map_err(|e| FetchError::IoPath(output.display().to_string(), e))?;

        Ok(())
    }
}
