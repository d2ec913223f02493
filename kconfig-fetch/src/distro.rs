// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Distribution descriptions.

A [DistroSpec] declares one distribution/architecture/version combination to
track. The fetcher and extractor kinds are closed enums resolved while the
configuration is loaded, so an unknown kind string is a config error rather
than a failure on first use.
*/

use {
    crate::error::{FetchError, Result},
    strum::{Display, EnumString},
};

/// The package-index protocols a distribution can be fetched through.
#[derive(Clone, Copy, Debug, Display, EnumString, Eq, Hash, PartialEq)]
#[strum(serialize_all = "kebab-case")]
pub enum FetcherKind {
    Deb,
    Rpm,
    Pacman,
    Github,
    AndroidGki,
    Upstream,
}

/// The artifact formats a build configuration can be extracted from.
#[derive(Clone, Copy, Debug, Display, EnumString, Eq, Hash, PartialEq)]
#[strum(serialize_all = "kebab-case")]
pub enum ExtractorKind {
    Deb,
    Rpm,
    Pacman,
    AndroidGki,
    Defconfig,
}

/// Declarative description of one tracked distribution.
#[derive(Clone, Debug)]
pub struct DistroSpec {
    /// Human-readable distribution name, e.g. `Ubuntu` or `Fedora`.
    pub name: String,

    /// Target machine architecture, in the distribution's own vocabulary.
    pub arch: String,

    /// The kernel package to track.
    pub package: String,

    /// Protocol used to locate new package versions.
    pub fetcher: FetcherKind,

    /// Format-specific extraction strategy.
    pub extractor: ExtractorKind,

    /// Base URL of the package index.
    pub index: String,

    /// Whether this distribution participates in update runs.
    pub do_update: bool,

    /// Tracked release series, when one distribution name spans several.
    pub version: Option<String>,

    /// Logical signing key name, resolving to a provisioned keyring.
    pub key: Option<String>,

    /// Distribution codename (Debian-style repositories).
    pub codename: Option<String>,

    /// Repository category/component (Debian-style repositories).
    pub category: Option<String>,

    /// Repository name (Pacman-style repositories).
    pub repo: Option<String>,
}

impl DistroSpec {
    /// Stable identity of this spec across runs.
    ///
    /// Must be unique within a configured set.
    pub fn unique_name(&self) -> String {
        if let Some(version) = &self.version {
            format!("{} {} {}", self.name, version, self.arch)
        } else {
            format!("{} {}", self.name, self.arch)
        }
    }

    /// A required optional field, as a hard error naming the distribution.
    pub fn require<'a>(&self, value: &'a Option<String>, field: &'static str) -> Result<&'a str> {
        value
            .as_deref()
            .ok_or_else(|| FetchError::SpecMissingField {
                distro: self.unique_name(),
                field,
            })
    }
}

#[cfg(test)]
mod test {
    use {super::*, std::str::FromStr};

    fn spec() -> DistroSpec {
        DistroSpec {
            name: "Fedora".to_string(),
            arch: "x86_64".to_string(),
            package: "kernel-core".to_string(),
            fetcher: FetcherKind::Rpm,
            extractor: ExtractorKind::Rpm,
            index: "https://dl.fedoraproject.org/pub/fedora/linux/releases/40/Everything/x86_64/os/".to_string(),
            do_update: true,
            version: None,
            key: Some("fedora".to_string()),
            codename: None,
            category: None,
            repo: None,
        }
    }

    #[test]
    fn unique_name_with_and_without_version() {
        let mut s = spec();
        assert_eq!(s.unique_name(), "Fedora x86_64");

        s.version = Some("40".to_string());
        assert_eq!(s.unique_name(), "Fedora 40 x86_64");
    }

    #[test]
    fn kind_strings_round_trip() {
        assert_eq!(FetcherKind::from_str("deb").unwrap(), FetcherKind::Deb);
        assert_eq!(
            FetcherKind::from_str("android-gki").unwrap(),
            FetcherKind::AndroidGki
        );
        assert_eq!(FetcherKind::AndroidGki.to_string(), "android-gki");
        assert_eq!(
            ExtractorKind::from_str("defconfig").unwrap(),
            ExtractorKind::Defconfig
        );
        assert!(FetcherKind::from_str("kconfigs.deb.DebFetcher").is_err());
    }

    #[test]
    fn require_names_the_missing_field() {
        let s = spec();
        let err = s.require(&s.codename, "codename").unwrap_err();
        match err {
            FetchError::SpecMissingField { distro, field } => {
                assert_eq!(distro, "Fedora x86_64");
                assert_eq!(field, "codename");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
