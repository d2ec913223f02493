// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Upstream kernel.org release fetching.

kernel.org publishes an RSS feed of releases. A spec pins a release series
("6.1", "4.14"); feed entries match when their version is the series itself
or a dotted/rc-suffixed extension of it. Plain prefix matching would be
wrong: "6.1" must match "6.1.15" and "6.1-rc5" but not "6.10".
*/

use {
    crate::{
        distro::DistroSpec,
        error::{FetchError, Result},
        fetch::{ArtifactRef, Fetcher},
        run::AppContext,
    },
    async_trait::async_trait,
    once_cell::sync::Lazy,
    regex::Regex,
    serde::Deserialize,
    std::sync::Arc,
    tokio::sync::OnceCell,
};

static TARBALL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"https?://.*/linux-[0-9a-zA-Z.-]+\.tar\.(?:gz|xz|bz2|zst)")
        .expect("static regex is valid")
});

#[derive(Clone, Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Clone, Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    items: Vec<Item>,
}

#[derive(Clone, Debug, Deserialize)]
struct Item {
    title: String,
    description: String,
}

/// One release parsed from the feed.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct UpstreamRelease {
    pub version: String,
    pub url: String,
}

impl UpstreamRelease {
    fn from_item(item: &Item) -> Result<Self> {
        let version = item
            .title
            .split(':')
            .next()
            .unwrap_or(&item.title)
            .trim()
            .to_string();

        // linux-next has no downloadable tarball; track it under a dummy URL.
        if item.title.contains("linux-next") {
            return Ok(Self {
                version,
                url: "linux-next".to_string(),
            });
        }

        let url = TARBALL_RE
            .find(&item.description)
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| FetchError::FeedEntryNoTarball(item.title.clone()))?;

        Ok(Self { version, url })
    }
}

/// Whether a feed version belongs to a pinned release series.
pub(crate) fn version_matches(release: &str, version: &str) -> bool {
    version == release
        || version.starts_with(&format!("{release}."))
        || version.starts_with(&format!("{release}-"))
}

/// The newest feed entry belonging to the release series.
pub(crate) fn find_release(feed: &str, release: &str) -> Result<UpstreamRelease> {
    let rss: Rss = serde_xml_rs::from_str(feed)?;

    for item in &rss.channel.items {
        let candidate = UpstreamRelease::from_item(item)?;
        if version_matches(release, &candidate.version) {
            return Ok(candidate);
        }
    }

    Err(FetchError::UpstreamReleaseNotFound(release.to_string()))
}

pub fn uid(spec: &DistroSpec) -> Result<String> {
    let version = spec.require(&spec.version, "version")?;
    Ok(format!("upstream-{}-{}", version, spec.arch))
}

#[derive(Debug, Default, Deserialize)]
struct SavedState {
    last_version: Option<String>,
}

/// Fetcher for upstream kernel.org releases.
pub struct UpstreamFetcher {
    ctx: Arc<AppContext>,
    index: String,
    release: String,
    key: Option<String>,
    last_version: Option<String>,
    latest: OnceCell<UpstreamRelease>,
}

impl UpstreamFetcher {
    pub fn new(
        saved: Option<&serde_json::Value>,
        spec: &DistroSpec,
        ctx: Arc<AppContext>,
    ) -> Result<Self> {
        let saved: SavedState = saved
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();

        Ok(Self {
            ctx,
            index: spec.index.clone(),
            release: spec.require(&spec.version, "version")?.to_string(),
            key: spec.key.clone(),
            last_version: saved.last_version,
            latest: OnceCell::new(),
        })
    }

    async fn latest(&self) -> Result<&UpstreamRelease> {
        self.latest
            .get_or_try_init(|| async {
                let data = self.ctx.downloads.download_to_memory(&self.index, None).await?;
                find_release(&String::from_utf8_lossy(&data), &self.release)
            })
            .await
    }
}

#[async_trait]
impl Fetcher for UpstreamFetcher {
    async fn is_updated(&self) -> Result<bool> {
        let latest = self.latest().await?;
        Ok(Some(&latest.version) != self.last_version.as_ref())
    }

    async fn latest_version_url(&self, _package: &str) -> Result<ArtifactRef> {
        let latest = self.latest().await?;

        Ok(ArtifactRef {
            url: latest.url.clone(),
            checksum: None,
        })
    }

    /// Detached signatures apply to the decompressed tarball, so the `.sign`
    /// URL replaces the compression extension rather than appending to it.
    async fn signature_url(&self, _package: &str) -> Result<Option<String>> {
        if self.key.is_none() {
            return Ok(None);
        }

        let latest = self.latest().await?;
        let base = latest
            .url
            .rsplit_once('.')
            .map(|(base, _)| base)
            .unwrap_or(&latest.url);

        Ok(Some(format!("{base}.sign")))
    }

    fn save_data(&self) -> serde_json::Value {
        let version = self
            .latest
            .get()
            .map(|l| l.version.clone())
            .or_else(|| self.last_version.clone());

        serde_json::json!({ "last_version": version })
    }
}
