// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Android GKI boot image fetching.

Certified boot images are scraped off an index page. Names look like
`gki-certified-boot-android12-5.10-2023-03_r3.zip`: the prefix is constant
for a given index and only the `YYYY-MM_rX` tail varies. The revision may be
one or two digits, so a plain string sort misorders `_r9` and `_r10`; the
year, month, and revision are parsed and compared numerically.
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
    std::{collections::HashSet, sync::Arc},
};

static LINK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"https://.*gki-certified-boot-android\d+-\d+\.\d+-\d{4}-\d{2}_r\d+\.zip")
        .expect("static regex is valid")
});

static VERSION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^.*(\d{4})-(\d{2})_r(\d+)\.zip$").expect("static regex is valid"));

fn version_key(link: &str) -> Result<(u32, u32, u32)> {
    let caps = VERSION_RE
        .captures(link)
        .ok_or_else(|| FetchError::NoBootImages(link.to_string()))?;

    Ok((caps[1].parse()?, caps[2].parse()?, caps[3].parse()?))
}

/// The newest certified boot image link on an index page.
pub(crate) fn latest_gki_link(page: &str, index: &str) -> Result<String> {
    let links: HashSet<&str> = LINK_RE.find_iter(page).map(|m| m.as_str()).collect();

    let mut best: Option<((u32, u32, u32), &str)> = None;
    for link in links {
        let key = version_key(link)?;
        if best.as_ref().map(|(k, _)| key > *k).unwrap_or(true) {
            best = Some((key, link));
        }
    }

    best.map(|(_, link)| link.to_string())
        .ok_or_else(|| FetchError::NoBootImages(index.to_string()))
}

/// Fetcher for Android GKI certified boot images.
pub struct AndroidGkiFetcher {
    ctx: Arc<AppContext>,
    index: String,
}

impl AndroidGkiFetcher {
    pub fn new(spec: &DistroSpec, ctx: Arc<AppContext>) -> Self {
        Self {
            ctx,
            index: spec.index.clone(),
        }
    }
}

#[async_trait]
impl Fetcher for AndroidGkiFetcher {
    async fn is_updated(&self) -> Result<bool> {
        // The index page is the only source; change detection happens on the
        // resolved artifact URL.
        Ok(true)
    }

    async fn latest_version_url(&self, _package: &str) -> Result<ArtifactRef> {
        let data = self.ctx.downloads.download_to_memory(&self.index, None).await?;
        let page = String::from_utf8_lossy(&data);

        Ok(ArtifactRef {
            url: latest_gki_link(&page, &self.index)?,
            checksum: None,
        })
    }

    fn save_data(&self) -> serde_json::Value {
        serde_json::json!({})
    }
}
