// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! RPM repository fetching.

An RPM repository publishes `repodata/repomd.xml`, which describes the
metadata files constituting the repository. The package list lives in a
`primary` data file; repositories that also publish `primary_db` offer the
same data as a sqlite database, which is cheaper to query than the XML, so
it is preferred. The URL of the primary data file doubles as the freshness
token: a repository regenerates it (under a new digest-prefixed name)
whenever package contents change.
*/

use {
    crate::{
        distro::DistroSpec,
        error::{FetchError, Result},
        fetch::{join_url, ArtifactRef, Fetcher},
        io::{maybe_decompress, url_file_name, Checksum},
        run::AppContext,
        version::compare_evr,
    },
    async_trait::async_trait,
    serde::Deserialize,
    std::{
        path::{Path, PathBuf},
        sync::Arc,
    },
    tokio::sync::OnceCell,
};

/// A `repomd.xml` document, reduced to what artifact resolution needs.
#[derive(Clone, Debug, Deserialize)]
pub(crate) struct RepoMd {
    pub data: Vec<RepoMdData>,
}

/// A `<data>` element in a `repomd.xml` file.
#[derive(Clone, Debug, Deserialize)]
pub(crate) struct RepoMdData {
    #[serde(rename = "type")]
    pub data_type: String,
    pub checksum: XmlChecksum,
    pub location: Location,
}

/// A checksum element carrying its digest type as an attribute.
#[derive(Clone, Debug, Deserialize)]
pub(crate) struct XmlChecksum {
    #[serde(rename = "type")]
    pub name: String,
    #[serde(rename = "$value")]
    pub value: String,
}

#[derive(Clone, Debug, Deserialize)]
pub(crate) struct Location {
    pub href: String,
}

/// Select the primary package list from a `repomd.xml` document.
///
/// `primary_db` (sqlite) is preferred over plain-XML `primary`.
pub(crate) fn select_primary(repomd: &RepoMd) -> Result<&RepoMdData> {
    repomd
        .data
        .iter()
        .find(|d| d.data_type == "primary_db")
        .or_else(|| repomd.data.iter().find(|d| d.data_type == "primary"))
        .ok_or(FetchError::MetadataEntryNotFound("primary"))
}

/// One candidate package row from the primary data.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct PkgMeta {
    pub version: String,
    pub release: String,
    pub href: String,
    pub checksum: String,
    pub checksum_type: String,
}

/// The newest row by RPM version comparison, release as tiebreak.
pub(crate) fn select_latest(rows: Vec<PkgMeta>) -> Option<PkgMeta> {
    rows.into_iter().max_by(|a, b| {
        compare_evr((&a.version, &a.release), (&b.version, &b.release))
    })
}

#[derive(Clone, Debug, Deserialize)]
struct PrimaryXml {
    #[serde(rename = "package", default)]
    packages: Vec<PrimaryPackage>,
}

#[derive(Clone, Debug, Deserialize)]
struct PrimaryPackage {
    name: String,
    version: PrimaryVersion,
    checksum: XmlChecksum,
    location: Location,
}

#[derive(Clone, Debug, Deserialize)]
struct PrimaryVersion {
    #[serde(rename = "ver")]
    version: String,
    #[serde(rename = "rel")]
    release: String,
}

/// Query a plain-XML primary file for rows matching a package name.
///
/// Source RPMs are excluded.
pub(crate) fn packages_from_xml(text: &str, package: &str) -> Result<Vec<PkgMeta>> {
    let primary: PrimaryXml = serde_xml_rs::from_str(text)?;

    Ok(primary
        .packages
        .into_iter()
        .filter(|p| p.name == package && !p.location.href.ends_with(".src.rpm"))
        .map(|p| PkgMeta {
            version: p.version.version,
            release: p.version.release,
            href: p.location.href,
            checksum: p.checksum.value,
            checksum_type: p.checksum.name,
        })
        .collect())
}

/// Query a `primary_db` sqlite database for rows matching a package name.
async fn packages_from_sqlite(path: &Path, package: &str) -> Result<Vec<PkgMeta>> {
    let path = path.to_path_buf();
    let package = package.to_string();

    tokio::task::spawn_blocking(move || -> Result<Vec<PkgMeta>> {
        let conn = rusqlite::Connection::open(&path)?;
        let mut stmt = conn.prepare(
            "SELECT version, release, location_href, pkgId, checksum_type FROM packages \
             WHERE name = ?1 AND location_href NOT LIKE '%.src.rpm'",
        )?;

        let rows = stmt
            .query_map([package.as_str()], |row| {
                Ok(PkgMeta {
                    version: row.get(0)?,
                    release: row.get(1)?,
                    href: row.get(2)?,
                    checksum: row.get(3)?,
                    checksum_type: row.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(rows)
    })
    .await
    .map_err(|e| FetchError::TaskJoin(e.to_string()))?
}

#[derive(Debug, Default, Deserialize)]
struct SavedState {
    last_db: Option<String>,
}

/// The resolved primary data source for this run.
#[derive(Clone, Debug)]
struct PrimarySource {
    url: String,
    checksum: Checksum,
}

/// Fetcher for RPM (yum/dnf) repositories.
pub struct RpmFetcher {
    ctx: Arc<AppContext>,
    savedir: PathBuf,
    index: String,
    key: String,
    last_db: Option<String>,
    latest: OnceCell<PrimarySource>,
    db_path: OnceCell<PathBuf>,
}

impl RpmFetcher {
    pub fn new(
        saved: Option<&serde_json::Value>,
        spec: &DistroSpec,
        savedir: PathBuf,
        ctx: Arc<AppContext>,
    ) -> Result<Self> {
        let saved: SavedState = saved
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();

        Ok(Self {
            ctx,
            savedir,
            index: spec.index.clone(),
            key: spec.require(&spec.key, "key")?.to_string(),
            last_db: saved.last_db,
            latest: OnceCell::new(),
            db_path: OnceCell::new(),
        })
    }

    /// Fetch `repomd.xml` and resolve the primary data source, once per run.
    ///
    /// Most RPM repositories publish a detached `repomd.xml.asc`; those that
    /// do not are accepted from the pinned HTTPS allow-list.
    async fn primary_source(&self) -> Result<&PrimarySource> {
        self.latest
            .get_or_try_init(|| async {
                let url = join_url(&self.index, "repodata/repomd.xml");
                let data = self
                    .ctx
                    .verifier
                    .fetch_verified(&self.ctx.downloads, &url, Some(&self.key), true, ".asc")
                    .await?;

                let repomd: RepoMd = serde_xml_rs::from_reader(data.as_slice())?;
                let primary = select_primary(&repomd)?;

                Ok(PrimarySource {
                    url: join_url(&self.index, &primary.location.href),
                    checksum: Checksum::from_parts(
                        &primary.checksum.name,
                        &primary.checksum.value,
                    )?,
                })
            })
            .await
    }

    /// Download and decompress the primary data file, once per run.
    async fn primary_file(&self) -> Result<&PathBuf> {
        self.db_path
            .get_or_try_init(|| async {
                let source = self.primary_source().await?;
                let file = self.savedir.join(url_file_name(&source.url));

                self.ctx
                    .downloads
                    .download_to_file(&source.url, &file, false, Some(&source.checksum))
                    .await?;

                maybe_decompress(&file).await
            })
            .await
    }
}

#[async_trait]
impl Fetcher for RpmFetcher {
    async fn is_updated(&self) -> Result<bool> {
        let source = self.primary_source().await?;
        Ok(Some(&source.url) != self.last_db.as_ref())
    }

    async fn latest_version_url(&self, package: &str) -> Result<ArtifactRef> {
        let path = self.primary_file().await?.clone();

        let rows = if path.extension().and_then(|e| e.to_str()) == Some("xml") {
            let text = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| FetchError::IoPath(path.display().to_string(), e))?;
            packages_from_xml(&text, package)?
        } else {
            packages_from_sqlite(&path, package).await?
        };

        let newest = select_latest(rows).ok_or_else(|| FetchError::PackageNotFound {
            package: package.to_string(),
            index: self.index.clone(),
        })?;

        Ok(ArtifactRef {
            url: join_url(&self.index, &newest.href),
            checksum: Some(Checksum::from_parts(
                &newest.checksum_type,
                &newest.checksum,
            )?),
        })
    }

    fn save_data(&self) -> serde_json::Value {
        let db = self
            .latest
            .get()
            .map(|source| source.url.clone())
            .or_else(|| self.last_db.clone());

        serde_json::json!({ "last_db": db })
    }
}

#[cfg(test)]
mod test {
    use {super::*, indoc::indoc};

    const REPOMD: &str = indoc! {r#"
        <?xml version="1.0" encoding="UTF-8"?>
        <repomd xmlns="http://linux.duke.edu/metadata/repo">
          <revision>1714562000</revision>
          <data type="primary">
            <checksum type="sha256">1111111111111111111111111111111111111111111111111111111111111111</checksum>
            <location href="repodata/aaaa-primary.xml.gz"/>
          </data>
          <data type="primary_db">
            <checksum type="sha256">2222222222222222222222222222222222222222222222222222222222222222</checksum>
            <location href="repodata/bbbb-primary.sqlite.bz2"/>
          </data>
          <data type="filelists">
            <checksum type="sha256">3333333333333333333333333333333333333333333333333333333333333333</checksum>
            <location href="repodata/cccc-filelists.xml.gz"/>
          </data>
        </repomd>
    "#};

    #[test]
    fn primary_db_is_preferred_over_xml() {
        let repomd: RepoMd = serde_xml_rs::from_str(REPOMD).unwrap();
        let primary = select_primary(&repomd).unwrap();
        assert_eq!(primary.data_type, "primary_db");
        assert_eq!(primary.location.href, "repodata/bbbb-primary.sqlite.bz2");
        assert_eq!(primary.checksum.name, "sha256");
    }

    #[test]
    fn primary_xml_is_the_fallback() {
        let xml_only = REPOMD.replace("primary_db", "other_db");
        let repomd: RepoMd = serde_xml_rs::from_str(&xml_only).unwrap();
        let primary = select_primary(&repomd).unwrap();
        assert_eq!(primary.location.href, "repodata/aaaa-primary.xml.gz");
    }

    const PRIMARY: &str = indoc! {r#"
        <?xml version="1.0" encoding="UTF-8"?>
        <metadata xmlns="http://linux.duke.edu/metadata/common" packages="4">
          <package type="rpm">
            <name>kernel-core</name>
            <arch>x86_64</arch>
            <version epoch="0" ver="5.14.0" rel="362.8.1.el9_3"/>
            <checksum type="sha256" pkgid="YES">4444444444444444444444444444444444444444444444444444444444444444</checksum>
            <location href="Packages/kernel-core-5.14.0-362.8.1.el9_3.x86_64.rpm"/>
          </package>
          <package type="rpm">
            <name>kernel-core</name>
            <arch>x86_64</arch>
            <version epoch="0" ver="5.14.0" rel="362.13.1.el9_3"/>
            <checksum type="sha256" pkgid="YES">5555555555555555555555555555555555555555555555555555555555555555</checksum>
            <location href="Packages/kernel-core-5.14.0-362.13.1.el9_3.x86_64.rpm"/>
          </package>
          <package type="rpm">
            <name>kernel-core</name>
            <arch>src</arch>
            <version epoch="0" ver="5.14.0" rel="999.el9_3"/>
            <checksum type="sha256" pkgid="YES">6666666666666666666666666666666666666666666666666666666666666666</checksum>
            <location href="Packages/kernel-core-5.14.0-999.el9_3.src.rpm"/>
          </package>
          <package type="rpm">
            <name>kernel-debug</name>
            <arch>x86_64</arch>
            <version epoch="0" ver="5.14.0" rel="362.13.1.el9_3"/>
            <checksum type="sha256" pkgid="YES">7777777777777777777777777777777777777777777777777777777777777777</checksum>
            <location href="Packages/kernel-debug-5.14.0-362.13.1.el9_3.x86_64.rpm"/>
          </package>
        </metadata>
    "#};

    #[test]
    fn xml_query_filters_name_and_source_rpms() {
        let rows = packages_from_xml(PRIMARY, "kernel-core").unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| !r.href.ends_with(".src.rpm")));
    }

    #[test]
    fn newest_row_wins_by_evr() {
        let rows = packages_from_xml(PRIMARY, "kernel-core").unwrap();
        let newest = select_latest(rows).unwrap();
        assert_eq!(newest.release, "362.13.1.el9_3");
        assert_eq!(
            newest.href,
            "Packages/kernel-core-5.14.0-362.13.1.el9_3.x86_64.rpm"
        );
    }

    #[test]
    fn no_rows_yields_none() {
        let rows = packages_from_xml(PRIMARY, "kernel-rt").unwrap();
        assert!(select_latest(rows).is_none());
    }

    #[tokio::test]
    async fn sqlite_query_excludes_source_rpms() {
        let td = tempfile::tempdir().unwrap();
        let db = td.path().join("primary.sqlite");

        {
            let conn = rusqlite::Connection::open(&db).unwrap();
            conn.execute_batch(
                "CREATE TABLE packages (
                     name TEXT, version TEXT, release TEXT,
                     location_href TEXT, pkgId TEXT, checksum_type TEXT
                 );
                 INSERT INTO packages VALUES
                     ('kernel', '6.8.1', '1.fc40', 'Packages/kernel-6.8.1-1.fc40.x86_64.rpm', 'aa', 'sha256'),
                     ('kernel', '6.8.9', '2.fc40', 'Packages/kernel-6.8.9-2.fc40.x86_64.rpm', 'bb', 'sha256'),
                     ('kernel', '6.8.9', '2.fc40', 'Packages/kernel-6.8.9-2.fc40.src.rpm', 'cc', 'sha256'),
                     ('other', '1.0', '1', 'Packages/other-1.0.rpm', 'dd', 'sha256');",
            )
            .unwrap();
        }

        let rows = packages_from_sqlite(&db, "kernel").await.unwrap();
        assert_eq!(rows.len(), 2);

        let newest = select_latest(rows).unwrap();
        assert_eq!(newest.version, "6.8.9");
        assert_eq!(newest.checksum, "bb");
    }
}
