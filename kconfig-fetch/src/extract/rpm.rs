// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! RPM package extraction.

RPM packages carry an embedded signature, checked through rpm itself before
anything is unpacked. Extraction pipes `rpm2cpio` into `cpio`, filtering for
the config file paths kernel packages are known to use; `cpio -v` reports
each extracted name on stderr, which is how the "exactly one config" check
is enforced.
*/

use {
    crate::{
        distro::DistroSpec,
        error::{FetchError, Result},
        extract::Extractor,
        process::checked_output,
        run::AppContext,
    },
    async_trait::async_trait,
    std::path::Path,
    tokio::process::Command,
};

const CONFIG_PATTERNS: &[&str] = &["*/config", "./boot/config-*"];

/// Extracts the config file out of an RPM kernel package.
pub struct RpmExtractor;

#[async_trait]
impl Extractor for RpmExtractor {
    async fn extract_kconfig(
        &self,
        artifact: &Path,
        output: &Path,
        spec: &DistroSpec,
        ctx: &AppContext,
    ) -> Result<()> {
        let key = spec.require(&spec.key, "key")?;
        ctx.verifier.verify_rpm(artifact, key).await?;

        let td = tempfile::tempdir()?;

        let patterns = CONFIG_PATTERNS
            .iter()
            .map(|p| format!("'{p}'"))
            .collect::<Vec<_>>()
            .join(" ");
        let pipeline = format!("rpm2cpio '{}' | cpio -ivd {patterns}", artifact.display());

        let out = checked_output(
            Command::new("sh")
                .arg("-c")
                .arg(&pipeline)
                .current_dir(td.path()),
        )
        .await?;

        // cpio -v lists extracted names on stderr, then a "N blocks" line.
        let stderr = String::from_utf8_lossy(&out.stderr);
        let files = stderr
            .lines()
            .filter(|l| !l.trim().is_empty() && !l.ends_with("blocks"))
            .collect::<Vec<_>>();

        if files.len() != 1 {
            return Err(FetchError::ExtractedFileMismatch {
                pattern: CONFIG_PATTERNS.join(" "),
                count: files.len(),
            });
        }

        let config = td.path().join(files[0].trim());
        tokio::fs::copy(&config, output)
            .await
            .map_err(|e| FetchError::IoPath(output.display().to_string(), e))?;

        Ok(())
    }
}
