// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Signature verification against named trust anchors.

Each logical key name corresponds to a keyring file `<keys_dir>/<name>.gpg`
provisioned ahead of time. A few names are combined keyrings holding several
underlying keys; detached verification accepts any key in the ring, while
RPM's embedded signature check needs the underlying keys imported one by one
into a disposable key database.
*/

use {
    crate::{
        download::DownloadManager,
        error::{FetchError, Result},
        io::url_file_name,
        process::run_checked,
    },
    log::{info, warn},
    std::path::{Path, PathBuf},
    tokio::process::Command,
    url::Url,
};

/// Hosts from which unsigned index files may be accepted over HTTPS.
///
/// Applies only to call sites that opt in; everything else requires a
/// detached signature.
pub const TRUSTED_HTTPS_HOSTS: &[&str] = &[
    "yum.oracle.com",
    "source.android.com",
    "dl.fedoraproject.org",
    "download.copr.fedorainfracloud.org",
];

/// Key names that are combined keyrings of several underlying keys.
///
/// gpg happily verifies against a combined ring, but `rpm --import` wants
/// the individual keys.
const MULTI_KEYS: &[(&str, &[&str])] = &[("asahi", &["fedora-asahi", "fedora-asahi-kernel"])];

/// Whether a URL is HTTPS to a host on the pinned allow-list.
pub fn trusted_url(url: &str) -> bool {
    Url::parse(url)
        .map(|u| {
            u.scheme() == "https"
                && u.host_str()
                    .map(|h| TRUSTED_HTTPS_HOSTS.contains(&h))
                    .unwrap_or(false)
        })
        .unwrap_or(false)
}

/// Detached and embedded signature verification against named keyrings.
#[derive(Clone, Debug)]
pub struct SignatureVerifier {
    keys_dir: PathBuf,
}

impl SignatureVerifier {
    pub fn new(keys_dir: impl Into<PathBuf>) -> Self {
        Self {
            keys_dir: keys_dir.into(),
        }
    }

    /// Path of the keyring file for a logical key name.
    pub fn keyring_path(&self, key: &str) -> PathBuf {
        self.keys_dir.join(format!("{key}.gpg"))
    }

    /// The underlying key names behind a logical key name.
    fn underlying_keys(key: &str) -> Vec<&str> {
        MULTI_KEYS
            .iter()
            .find(|(name, _)| *name == key)
            .map(|(_, keys)| keys.to_vec())
            .unwrap_or_else(|| vec![key])
    }

    /// Verify a detached signature.
    ///
    /// Returns `Ok(true)` for a good signature, `Ok(false)` for a signature
    /// that is present but bad, and an error for any other tool failure
    /// (missing tool, corrupt keyring). gpg exits 0 for success, 1 for at
    /// least one bad signature, and other codes for fatal errors.
    pub async fn gpg_verify(&self, file: &Path, sig: &Path, key: &str) -> Result<bool> {
        let keyring = self.keyring_path(key);

        let output = Command::new("gpg")
            .arg("--no-default-keyring")
            .arg("--keyring")
            .arg(&keyring)
            .arg("--verify")
            .arg(sig)
            .arg(file)
            .output()
            .await?;

        match output.status.code() {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => Err(FetchError::SignatureToolFailure {
                key: key.to_string(),
                path: file.display().to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }),
        }
    }

    /// Verify an RPM package's embedded signature.
    ///
    /// Imports the named key(s) into a disposable key database and asks rpm
    /// itself to check the package.
    pub async fn verify_rpm(&self, package: &Path, key: &str) -> Result<()> {
        let td = tempfile::tempdir()?;

        for name in Self::underlying_keys(key) {
            run_checked(
                Command::new("rpm")
                    .arg(format!("--dbpath={}", td.path().display()))
                    .arg("--import")
                    .arg(self.keyring_path(name)),
            )
            .await?;
        }

        let status = Command::new("rpm")
            .arg(format!("--dbpath={}", td.path().display()))
            .arg("-K")
            .arg(package)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .await?;

        if status.success() {
            info!("good RPM signature [{}] for {}", key, package.display());
            Ok(())
        } else {
            Err(FetchError::BadSignature {
                key: key.to_string(),
                path: package.display().to_string(),
            })
        }
    }

    /// Download a document into memory, insisting on a trust decision.
    ///
    /// The document and its detached signature at `<url><suffix>` are fetched
    /// concurrently. A present signature must verify against `key`. An absent
    /// signature (404) is tolerated only when `https_ok` is set and the URL's
    /// host is on [TRUSTED_HTTPS_HOSTS]; that path logs a warning instead of
    /// failing.
    pub async fn fetch_verified(
        &self,
        downloads: &DownloadManager,
        url: &str,
        key: Option<&str>,
        https_ok: bool,
        suffix: &str,
    ) -> Result<Vec<u8>> {
        let td = tempfile::tempdir()?;
        let file_name = url_file_name(url);
        let file_path = td.path().join(file_name);
        let sig_path = td.path().join(format!("{file_name}{suffix}"));
        let sig_url = format!("{url}{suffix}");

        let (file_res, sig_res) = tokio::join!(
            downloads.download_to_file(url, &file_path, false, None),
            downloads.download_to_file(&sig_url, &sig_path, false, None),
        );
        file_res?;

        let sig_exists = match sig_res {
            Ok(()) => true,
            Err(FetchError::NotFound(_)) => false,
            Err(e) => return Err(e),
        };

        if sig_exists {
            let key = key.ok_or_else(|| FetchError::MissingKey(url.to_string()))?;
            if self.gpg_verify(&file_path, &sig_path, key).await? {
                info!("good GPG signature [{}]: {}", key, url);
            } else {
                return Err(FetchError::BadSignature {
                    key: key.to_string(),
                    path: url.to_string(),
                });
            }
        } else if https_ok && trusted_url(url) {
            warn!("{} not GPG-signed, but fetched from trusted host via HTTPS", url);
        } else {
            return Err(FetchError::MissingSignature(url.to_string()));
        }

        Ok(tokio::fs::read(&file_path).await?)
    }
}
