// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! GitHub release fetching.

The releases API lists releases newest-first; the first entry's source
tarball is the artifact. There is no separate index to poll, so the fetcher
always reports updated and change detection falls to the stored artifact
URL.

Release tarballs carry no detached signature. Specs using this fetcher pair
it with the `NOVERIFY-GITHUB` key sentinel so the defconfig extractor skips
detached verification.
*/

use {
    crate::{
        distro::DistroSpec,
        error::{FetchError, Result},
        fetch::{ArtifactRef, Fetcher},
        run::AppContext,
    },
    async_trait::async_trait,
    serde::Deserialize,
    std::sync::Arc,
    url::Url,
};

#[derive(Clone, Debug, Deserialize)]
struct Release {
    tarball_url: String,
}

/// The newest release's tarball URL from a releases API response.
pub(crate) fn first_tarball(data: &[u8], repo: &str) -> Result<String> {
    let releases: Vec<Release> = serde_json::from_slice(data)?;

    releases
        .into_iter()
        .next()
        .map(|r| r.tarball_url)
        .ok_or_else(|| FetchError::NoReleases(repo.to_string()))
}

/// Split a repository index URL into its user and repository components.
fn user_repo(index: &str) -> Result<(String, String)> {
    let url = Url::parse(index)?;
    let mut segments = url
        .path_segments()
        .into_iter()
        .flatten()
        .filter(|s| !s.is_empty());

    match (segments.next(), segments.next()) {
        (Some(user), Some(repo)) => Ok((user.to_string(), repo.to_string())),
        _ => Err(FetchError::Config(format!(
            "github index URL must name a user and repository: {index}"
        ))),
    }
}

pub fn uid(spec: &DistroSpec) -> Result<String> {
    let (user, repo) = user_repo(&spec.index)?;
    Ok(format!("github-{user}-{repo}"))
}

/// Fetcher for GitHub releases.
pub struct GithubFetcher {
    ctx: Arc<AppContext>,
    user: String,
    repo: String,
}

impl GithubFetcher {
    pub fn new(spec: &DistroSpec, ctx: Arc<AppContext>) -> Result<Self> {
        let (user, repo) = user_repo(&spec.index)?;

        Ok(Self { ctx, user, repo })
    }
}

#[async_trait]
impl Fetcher for GithubFetcher {
    async fn is_updated(&self) -> Result<bool> {
        // There is no extra index to check.
        Ok(true)
    }

    async fn latest_version_url(&self, _package: &str) -> Result<ArtifactRef> {
        let url = format!(
            "https://api.github.com/repos/{}/{}/releases",
            self.user, self.repo
        );
        let data = self.ctx.downloads.download_to_memory(&url, None).await?;

        Ok(ArtifactRef {
            url: first_tarball(&data, &format!("{}/{}", self.user, self.repo))?,
            checksum: None,
        })
    }

    fn save_data(&self) -> serde_json::Value {
        serde_json::json!({})
    }
}

#[cfg(test)]
mod test {
    use {super::*, indoc::indoc};

    const RELEASES: &str = indoc! {r#"
        [
          {
            "tag_name": "asahi-6.8.9-1",
            "tarball_url": "https://api.github.com/repos/AsahiLinux/linux/tarball/asahi-6.8.9-1"
          },
          {
            "tag_name": "asahi-6.8.8-1",
            "tarball_url": "https://api.github.com/repos/AsahiLinux/linux/tarball/asahi-6.8.8-1"
          }
        ]
    "#};

    #[test]
    fn first_release_is_the_newest() {
        assert_eq!(
            first_tarball(RELEASES.as_bytes(), "AsahiLinux/linux").unwrap(),
            "https://api.github.com/repos/AsahiLinux/linux/tarball/asahi-6.8.9-1"
        );
    }

    #[test]
    fn empty_release_list_is_an_error() {
        assert!(matches!(
            first_tarball(b"[]", "x/y"),
            Err(FetchError::NoReleases(_))
        ));
    }

    #[test]
    fn uid_derives_from_the_repository_path() {
        let url = "https://github.com/AsahiLinux/linux";
        assert_eq!(user_repo(url).unwrap(), ("AsahiLinux".to_string(), "linux".to_string()));
    }

    #[test]
    fn bad_index_url_is_a_config_error() {
        assert!(user_repo("https://github.com/onlyuser").is_err());
    }
}
