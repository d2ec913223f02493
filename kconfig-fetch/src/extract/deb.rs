// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Debian package extraction. */

use {
    crate::{
        distro::DistroSpec,
        error::{FetchError, Result},
        extract::{single_file_with_prefix, Extractor},
        process::run_checked,
        run::AppContext,
    },
    async_trait::async_trait,
    std::path::Path,
    tokio::process::Command,
};

/// Extracts `boot/config*` out of a `.deb` package.
pub struct DebExtractor;

#[async_trait]
impl Extractor for DebExtractor {
    async fn extract_kconfig(
        &self,
        artifact: &Path,
        output: &Path,
        _spec: &DistroSpec,
        _ctx: &AppContext,
    ) -> Result<()> {
        let td = tempfile::tempdir()?;

        run_checked(
            Command::new("dpkg-deb")
                .arg("-x")
                .arg(artifact)
                .arg(td.path()),
        )
        .await?;

        let config =
            single_file_with_prefix(&td.path().join("boot"), "config", "boot/config*").await?;

        tokio::fs::copy(&config, output)
            .await
            .map_err(|e| FetchError::IoPath(output.display().to_string(), e))?;

        Ok(())
    }
}
