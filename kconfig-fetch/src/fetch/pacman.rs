// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Pacman repository fetching.

A pacman repository is a compressed tar database containing one `desc` file
per package. The database's `Last-Modified` header is the freshness token.
`desc` files are key/value blocks separated by blank lines, with keys
wrapped in `%` markers.
*/

use {
    crate::{
        distro::DistroSpec,
        error::{FetchError, Result},
        fetch::{join_url, ArtifactRef, Fetcher},
        io::{url_file_name, Checksum},
        process::run_checked,
        run::AppContext,
    },
    async_trait::async_trait,
    serde::Deserialize,
    std::{
        collections::HashMap,
        path::Path,
        sync::{Arc, Mutex},
    },
    tokio::{process::Command, sync::OnceCell},
};

/// Parse a pacman `desc` file into its key/value pairs.
pub(crate) fn parse_desc(text: &str) -> HashMap<String, String> {
    let mut out = HashMap::new();

    for block in text.split("\n\n") {
        if block.trim().is_empty() {
            continue;
        }

        if let Some((key, value)) = block.split_once('\n') {
            out.insert(
                key.trim().trim_matches('%').to_string(),
                value.trim().to_string(),
            );
        }
    }

    out
}

#[derive(Debug, Default, Deserialize)]
struct SavedState {
    last_modified: Option<String>,
}

/// Fetcher for pacman repositories.
pub struct PacmanFetcher {
    ctx: Arc<AppContext>,
    index: String,
    db_url: String,
    last_modified: Option<String>,
    latest_modified: OnceCell<String>,
    latest_url: Mutex<Option<String>>,
}

impl PacmanFetcher {
    pub fn new(
        saved: Option<&serde_json::Value>,
        spec: &DistroSpec,
        ctx: Arc<AppContext>,
    ) -> Result<Self> {
        let saved: SavedState = saved
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();
        let repo = spec.require(&spec.repo, "repo")?;

        Ok(Self {
            ctx,
            index: spec.index.clone(),
            db_url: join_url(&spec.index, &format!("{repo}.db.tar.gz")),
            last_modified: saved.last_modified,
            latest_modified: OnceCell::new(),
            latest_url: Mutex::new(None),
        })
    }

    /// Find the target package's desc entry in an extracted database tree.
    async fn find_desc(dir: &Path, package: &str) -> Result<HashMap<String, String>> {
        let prefix = format!("{package}-");
        let mut entries = tokio::fs::read_dir(dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !name.starts_with(&prefix) {
                continue;
            }

            let desc_path = entry.path().join("desc");
            if !tokio::fs::try_exists(&desc_path).await? {
                continue;
            }

            let desc = parse_desc(&tokio::fs::read_to_string(&desc_path).await?);
            if desc.get("NAME").map(String::as_str) == Some(package) {
                return Ok(desc);
            }
        }

        Err(FetchError::PackageNotFound {
            package: package.to_string(),
            index: dir.display().to_string(),
        })
    }
}

#[async_trait]
impl Fetcher for PacmanFetcher {
    async fn is_updated(&self) -> Result<bool> {
        let latest = self
            .latest_modified
            .get_or_try_init(|| async {
                let headers = self.ctx.downloads.head(&self.db_url).await?;
                headers
                    .get("last-modified")
                    .and_then(|v| v.to_str().ok())
                    .map(|v| v.to_string())
                    .ok_or_else(|| FetchError::MissingHeader {
                        url: self.db_url.clone(),
                        header: "Last-Modified",
                    })
            })
            .await?;

        Ok(Some(latest) != self.last_modified.as_ref())
    }

    async fn latest_version_url(&self, package: &str) -> Result<ArtifactRef> {
        let td = tempfile::tempdir()?;
        let db_path = td.path().join(url_file_name(&self.db_url));

        self.ctx
            .downloads
            .download_to_file(&self.db_url, &db_path, true, None)
            .await?;

        run_checked(
            Command::new("tar")
                .arg("xf")
                .arg(&db_path)
                .current_dir(td.path()),
        )
        .await?;

        let desc = Self::find_desc(td.path(), package).await?;

        let filename = desc
            .get("FILENAME")
            .ok_or(FetchError::StanzaMissingField {
                package: package.to_string(),
                field: "FILENAME",
            })?;
        let sha256 = desc
            .get("SHA256SUM")
            .ok_or(FetchError::StanzaMissingField {
                package: package.to_string(),
                field: "SHA256SUM",
            })?;

        let url = join_url(&self.index, filename);
        *self.latest_url.lock().expect("lock poisoned") = Some(url.clone());

        Ok(ArtifactRef {
            url,
            checksum: Some(Checksum::from_parts("sha256", sha256)?),
        })
    }

    async fn signature_url(&self, _package: &str) -> Result<Option<String>> {
        let latest = self.latest_url.lock().expect("lock poisoned").clone();
        let latest = latest.ok_or(FetchError::InvalidState(
            "signature URL requested before the latest version was resolved",
        ))?;

        Ok(Some(format!("{latest}.sig")))
    }

    fn save_data(&self) -> serde_json::Value {
        let modified = self
            .latest_modified
            .get()
            .cloned()
            .or_else(|| self.last_modified.clone());

        serde_json::json!({ "last_modified": modified })
    }
}

#[cfg(test)]
mod test {
    use {super::*, indoc::indoc};

    const DESC: &str = indoc! {"
        %FILENAME%
        linux-6.8.9.arch1-1-x86_64.pkg.tar.zst

        %NAME%
        linux

        %VERSION%
        6.8.9.arch1-1

        %SHA256SUM%
        9f39a3b7b9e4b15914bcd36b863bfa46c7bba0fc09e4422f11a2c8a3cdba9e9c

        %DEPENDS%
        coreutils
        initramfs
    "};

    #[test]
    fn desc_blocks_parse_to_key_values() {
        let desc = parse_desc(DESC);
        assert_eq!(desc["NAME"], "linux");
        assert_eq!(desc["FILENAME"], "linux-6.8.9.arch1-1-x86_64.pkg.tar.zst");
        assert_eq!(
            desc["SHA256SUM"],
            "9f39a3b7b9e4b15914bcd36b863bfa46c7bba0fc09e4422f11a2c8a3cdba9e9c"
        );
        // multi-line values survive
        assert_eq!(desc["DEPENDS"], "coreutils\ninitramfs");
    }

    #[tokio::test]
    async fn find_desc_matches_exact_package_name() {
        let td = tempfile::tempdir().unwrap();

        // "linux-lts" must not shadow "linux" despite the shared prefix.
        let lts = td.path().join("linux-lts-6.6.30-1");
        tokio::fs::create_dir_all(&lts).await.unwrap();
        tokio::fs::write(lts.join("desc"), "%NAME%\nlinux-lts\n\n%FILENAME%\nlts.pkg\n")
            .await
            .unwrap();

        let linux = td.path().join("linux-6.8.9.arch1-1");
        tokio::fs::create_dir_all(&linux).await.unwrap();
        tokio::fs::write(
            linux.join("desc"),
            "%NAME%\nlinux\n\n%FILENAME%\nlinux.pkg\n",
        )
        .await
        .unwrap();

        let desc = PacmanFetcher::find_desc(td.path(), "linux").await.unwrap();
        assert_eq!(desc["FILENAME"], "linux.pkg");
    }

    #[tokio::test]
    async fn find_desc_missing_package_is_an_error() {
        let td = tempfile::tempdir().unwrap();
        let err = PacmanFetcher::find_desc(td.path(), "linux").await.unwrap_err();
        assert!(matches!(err, FetchError::PackageNotFound { .. }));
    }
}
