// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Debian-style repository fetching.

The signed `Release` file under `dists/<codename>/` carries a SHA256 digest
table over the repository's index files; the digest of the architecture's
`Packages` index doubles as the freshness token. The index itself is a
sequence of RFC822-style stanzas.

Resolving the artifact walks a dependency indirection: the flavor
meta-package `linux-image-<flavor>` does not carry the build configuration
itself. Its `Depends` names the concrete `linux-image-<uname>-<flavor>`
package, and the configuration actually ships in the matching
`linux-modules-<uname>-<flavor>` package where one exists.
*/

use {
    crate::{
        distro::DistroSpec,
        error::{FetchError, Result},
        fetch::{join_url, ArtifactRef, Fetcher},
        io::{maybe_decompress, url_file_name, Checksum},
        run::AppContext,
    },
    async_trait::async_trait,
    once_cell::sync::Lazy,
    regex::Regex,
    serde::Deserialize,
    std::{collections::HashMap, path::PathBuf, sync::Arc},
    tokio::sync::OnceCell,
};

static DIGEST_ENTRY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*([0-9a-f]+)\s+\d+\s+(.*)$").expect("static regex is valid"));

/// Architecture names differ between the RPM and Debian worlds.
fn deb_arch(arch: &str) -> &str {
    match arch {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        other => other,
    }
}

pub fn uid(spec: &DistroSpec) -> Result<String> {
    let codename = spec.require(&spec.codename, "codename")?;

    Ok(format!(
        "{}-{}-{}-{}",
        spec.index,
        codename,
        deb_arch(&spec.arch),
        spec.category.as_deref().unwrap_or("main")
    ))
}

/// The `Packages` index chosen from a `Release` digest table.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct PackagesIndex {
    /// Hex SHA256 of the compressed index, doubling as the freshness token.
    pub sha256: String,
    /// Path of the index relative to `dists/<codename>/`.
    pub path: String,
}

/// Locate the best compressed `Packages` index in a `Release` document.
///
/// Compression preference: xz, then bz2, then gz.
pub(crate) fn find_packages_index(
    release: &str,
    category: &str,
    arch: &str,
) -> Result<PackagesIndex> {
    let ix = release
        .find("SHA256:\n")
        .ok_or(FetchError::MetadataEntryNotFound("SHA256 digest table"))?;

    let mut file_to_hash = HashMap::new();
    for caps in DIGEST_ENTRY_RE.captures_iter(&release[ix..]) {
        file_to_hash.insert(caps[2].trim().to_string(), caps[1].to_string());
    }

    for ext in ["xz", "bz2", "gz"] {
        let path = format!("{category}/binary-{arch}/Packages.{ext}");
        if let Some(hash) = file_to_hash.get(&path) {
            return Ok(PackagesIndex {
                sha256: hash.clone(),
                path,
            });
        }
    }

    Err(FetchError::PackagesIndexNotFound(format!(
        "{category}/binary-{arch}"
    )))
}

/// Parse the stanzas whose `Package` name looks kernel-related for `flavor`.
///
/// Only `linux-*<flavor>` stanzas are retained, which keeps the map small
/// even for a full distribution index. Continuation lines fold into the
/// preceding field.
pub(crate) fn parse_stanzas(
    text: &str,
    flavor: &str,
) -> Result<HashMap<String, HashMap<String, String>>> {
    let pkg_re = Regex::new(&format!("^Package: (linux-.*{})$", regex::escape(flavor)))
        .map_err(|e| FetchError::Config(format!("bad flavor pattern: {e}")))?;

    let mut stanzas: HashMap<String, HashMap<String, String>> = HashMap::new();
    let mut current: Option<String> = None;
    let mut last_field: Option<String> = None;

    for line in text.lines() {
        if line.trim().is_empty() {
            current = None;
            last_field = None;
            continue;
        }

        if let Some(package) = current.clone() {
            if line.starts_with(' ') || line.starts_with('\t') {
                if let Some(field) = &last_field {
                    let fields = stanzas.entry(package).or_default();
                    if let Some(value) = fields.get_mut(field) {
                        value.push('\n');
                        value.push_str(line.trim());
                    }
                }
            } else if let Some((key, value)) = line.split_once(':') {
                let key = key.trim().to_string();
                stanzas
                    .entry(package)
                    .or_default()
                    .insert(key.clone(), value.trim().to_string());
                last_field = Some(key);
            }
        } else if let Some(caps) = pkg_re.captures(line.trim()) {
            let name = caps[1].to_string();
            stanzas.entry(name.clone()).or_default();
            current = Some(name);
            last_field = None;
        }
    }

    Ok(stanzas)
}

/// Walk the flavor meta-package's dependencies to the package carrying the
/// configuration.
///
/// Finds the versioned `linux-image-<uname>-<flavor>` dependency of
/// `linux-image-<flavor>` and substitutes `linux-image` with
/// `linux-modules`, falling back to the image package itself when no modules
/// package exists in the index.
pub(crate) fn resolve_target_package(
    stanzas: &HashMap<String, HashMap<String, String>>,
    flavor: &str,
) -> Result<String> {
    let meta = format!("linux-image-{flavor}");
    let fields = stanzas
        .get(&meta)
        .ok_or_else(|| FetchError::PackageNotFound {
            package: meta.clone(),
            index: "Packages".to_string(),
        })?;

    let depends = fields
        .get("Depends")
        .ok_or(FetchError::StanzaMissingField {
            package: meta,
            field: "Depends",
        })?;

    for dep in depends.split(',') {
        let dep = dep
            .split_whitespace()
            .next()
            .unwrap_or_default();

        if dep.starts_with("linux-image") {
            let modules = dep.replacen("linux-image", "linux-modules", 1);
            return Ok(if stanzas.contains_key(&modules) {
                modules
            } else {
                dep.to_string()
            });
        }
    }

    Err(FetchError::DependencyNotFound(flavor.to_string()))
}

#[derive(Debug, Default, Deserialize)]
struct SavedState {
    last_hash: Option<String>,
}

/// Fetcher for Debian-style (apt) repositories.
pub struct DebFetcher {
    ctx: Arc<AppContext>,
    savedir: PathBuf,
    index: String,
    arch: String,
    category: String,
    codename: String,
    key: String,
    last_hash: Option<String>,
    release: OnceCell<PackagesIndex>,
    packages: OnceCell<PathBuf>,
}

impl DebFetcher {
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
            arch: deb_arch(&spec.arch).to_string(),
            category: spec.category.clone().unwrap_or_else(|| "main".to_string()),
            codename: spec.require(&spec.codename, "codename")?.to_string(),
            key: spec.require(&spec.key, "key")?.to_string(),
            last_hash: saved.last_hash,
            release: OnceCell::new(),
            packages: OnceCell::new(),
        })
    }

    /// Fetch and parse the signed Release file, once per run.
    async fn packages_index(&self) -> Result<&PackagesIndex> {
        self.release
            .get_or_try_init(|| async {
                let url = join_url(&self.index, &format!("dists/{}/Release", self.codename));
                let data = self
                    .ctx
                    .verifier
                    .fetch_verified(&self.ctx.downloads, &url, Some(&self.key), false, ".gpg")
                    .await?;
                let text = String::from_utf8_lossy(&data);

                find_packages_index(&text, &self.category, &self.arch)
            })
            .await
    }

    /// Download and decompress the Packages index, once per run.
    async fn packages_file(&self) -> Result<&PathBuf> {
        self.packages
            .get_or_try_init(|| async {
                let info = self.packages_index().await?;
                let refresh = self.is_updated().await?;

                let url = join_url(
                    &self.index,
                    &format!("dists/{}/{}", self.codename, info.path),
                );
                let file = self.savedir.join(url_file_name(&url));
                let checksum = Checksum::from_parts("sha256", &info.sha256)?;

                self.ctx
                    .downloads
                    .download_to_file(&url, &file, refresh, Some(&checksum))
                    .await?;

                maybe_decompress(&file).await
            })
            .await
    }
}

#[async_trait]
impl Fetcher for DebFetcher {
    async fn is_updated(&self) -> Result<bool> {
        let info = self.packages_index().await?;
        Ok(Some(&info.sha256) != self.last_hash.as_ref())
    }

    async fn latest_version_url(&self, package: &str) -> Result<ArtifactRef> {
        let path = self.packages_file().await?;

        let flavor = package
            .strip_prefix("linux-")
            .ok_or(FetchError::InvalidState(
                "deb kernel packages are expected to be named linux-<flavor>",
            ))?;

        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| FetchError::IoPath(path.display().to_string(), e))?;

        let stanzas = parse_stanzas(&text, flavor)?;
        let target = resolve_target_package(&stanzas, flavor)?;

        let fields = stanzas
            .get(&target)
            .ok_or_else(|| FetchError::PackageNotFound {
                package: target.clone(),
                index: self.index.clone(),
            })?;

        let filename = fields
            .get("Filename")
            .ok_or(FetchError::StanzaMissingField {
                package: target.clone(),
                field: "Filename",
            })?;
        let sha256 = fields
            .get("SHA256")
            .ok_or(FetchError::StanzaMissingField {
                package: target.clone(),
                field: "SHA256",
            })?;

        Ok(ArtifactRef {
            url: join_url(&self.index, filename),
            checksum: Some(Checksum::from_parts("sha256", sha256)?),
        })
    }

    fn save_data(&self) -> serde_json::Value {
        let hash = self
            .release
            .get()
            .map(|info| info.sha256.clone())
            .or_else(|| self.last_hash.clone());

        serde_json::json!({ "last_hash": hash })
    }
}

#[cfg(test)]
mod test {
    use {super::*, indoc::indoc};

    const RELEASE: &str = indoc! {"
        Origin: Ubuntu
        Codename: noble
        MD5Sum:
         11111111111111111111111111111111 100 main/binary-amd64/Packages.xz
        SHA256:
         aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa 120 main/binary-amd64/Packages.xz
         bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb 140 main/binary-amd64/Packages.bz2
         cccccccccccccccccccccccccccccccccccccccccccccccccccccccccccccccc 160 main/binary-amd64/Packages.gz
         dddddddddddddddddddddddddddddddddddddddddddddddddddddddddddddddd 180 universe/binary-amd64/Packages.gz
    "};

    #[test]
    fn packages_index_prefers_xz() {
        let got = find_packages_index(RELEASE, "main", "amd64").unwrap();
        assert_eq!(got.path, "main/binary-amd64/Packages.xz");
        assert_eq!(got.sha256, "a".repeat(64));
    }

    #[test]
    fn packages_index_falls_back_through_compressions() {
        let got = find_packages_index(RELEASE, "universe", "amd64").unwrap();
        assert_eq!(got.path, "universe/binary-amd64/Packages.gz");
        assert_eq!(got.sha256, "d".repeat(64));
    }

    #[test]
    fn packages_index_absent_is_an_error() {
        assert!(matches!(
            find_packages_index(RELEASE, "main", "arm64"),
            Err(FetchError::PackagesIndexNotFound(_))
        ));
        assert!(matches!(
            find_packages_index("Origin: X\n", "main", "amd64"),
            Err(FetchError::MetadataEntryNotFound(_))
        ));
    }

    const PACKAGES: &str = indoc! {"
        Package: linux-image-generic
        Architecture: amd64
        Version: 6.5.0.15.15
        Depends: linux-image-6.5.0-15-generic (= 6.5.0-15.15), linux-modules-extra-6.5.0-15-generic (= 6.5.0-15.15)
        Description: Generic Linux kernel image

        Package: linux-image-6.5.0-15-generic
        Architecture: amd64
        Version: 6.5.0-15.15
        Filename: pool/main/l/linux/linux-image-6.5.0-15-generic_6.5.0-15.15_amd64.deb
        SHA256: 1111111111111111111111111111111111111111111111111111111111111111

        Package: linux-modules-6.5.0-15-generic
        Architecture: amd64
        Version: 6.5.0-15.15
        Filename: pool/main/l/linux/linux-modules-6.5.0-15-generic_6.5.0-15.15_amd64.deb
        SHA256: 2222222222222222222222222222222222222222222222222222222222222222

        Package: vim
        Architecture: amd64
        Version: 2:9.1

        Package: linux-headers-6.5.0-15-generic
        Architecture: amd64
        Version: 6.5.0-15.15
    "};

    #[test]
    fn stanza_parsing_keeps_only_kernel_stanzas() {
        let stanzas = parse_stanzas(PACKAGES, "generic").unwrap();
        assert!(stanzas.contains_key("linux-image-generic"));
        assert!(stanzas.contains_key("linux-modules-6.5.0-15-generic"));
        assert!(!stanzas.contains_key("vim"));
        assert!(!stanzas.contains_key("linux-headers-6.5.0-15-generic"));

        assert_eq!(
            stanzas["linux-image-6.5.0-15-generic"]["Filename"],
            "pool/main/l/linux/linux-image-6.5.0-15-generic_6.5.0-15.15_amd64.deb"
        );
    }

    #[test]
    fn dependency_indirection_prefers_modules_package() {
        let stanzas = parse_stanzas(PACKAGES, "generic").unwrap();
        assert_eq!(
            resolve_target_package(&stanzas, "generic").unwrap(),
            "linux-modules-6.5.0-15-generic"
        );
    }

    #[test]
    fn dependency_indirection_falls_back_to_image_package() {
        let without_modules = PACKAGES.replace("Package: linux-modules-6.5.0-15-generic", "Package: linux-unrelated-6.5.0-15-generic");
        let stanzas = parse_stanzas(&without_modules, "generic").unwrap();
        assert_eq!(
            resolve_target_package(&stanzas, "generic").unwrap(),
            "linux-image-6.5.0-15-generic"
        );
    }

    #[test]
    fn missing_dependency_chain_is_an_error() {
        let text = indoc! {"
            Package: linux-image-generic
            Depends: grub-pc, initramfs-tools
        "};
        let stanzas = parse_stanzas(text, "generic").unwrap();
        assert!(matches!(
            resolve_target_package(&stanzas, "generic"),
            Err(FetchError::DependencyNotFound(_))
        ));
    }

    #[test]
    fn deb_arch_mapping() {
        assert_eq!(deb_arch("x86_64"), "amd64");
        assert_eq!(deb_arch("aarch64"), "arm64");
        assert_eq!(deb_arch("riscv64"), "riscv64");
    }
}
