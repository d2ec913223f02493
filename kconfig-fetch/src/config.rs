// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Distribution configuration loading.

The configuration is a sectioned key/value document, one section per tracked
distribution:

```text
[ubuntu-noble-x86_64]
name = Ubuntu
arch = x86_64
package = linux-generic
fetcher = deb
extractor = deb
index = http://archive.ubuntu.com/ubuntu
codename = noble
key = ubuntu
```

Section headers only name the section; they are matched against `--filter`
patterns. All spec fields come from the keys. Kind strings and booleans are
validated here, at load time.
*/

use {
    crate::{
        distro::{DistroSpec, ExtractorKind, FetcherKind},
        error::{FetchError, Result},
    },
    std::{collections::HashSet, path::Path, str::FromStr},
};

/// One parsed config section.
struct Section {
    name: String,
    entries: Vec<(String, String)>,
}

/// Parse a truthy/falsy config token.
fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "yes" | "true" | "on" => Some(true),
        "0" | "no" | "false" | "off" => Some(false),
        _ => None,
    }
}

fn split_sections(text: &str) -> Result<Vec<Section>> {
    let mut sections: Vec<Section> = vec![];

    for (lineno, raw) in text.lines().enumerate() {
        let line = raw.trim();

        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }

        if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            sections.push(Section {
                name: name.trim().to_string(),
                entries: vec![],
            });
            continue;
        }

        let (key, value) = line.split_once('=').ok_or_else(|| {
            FetchError::Config(format!("line {}: expected `key = value`: {raw}", lineno + 1))
        })?;

        let section = sections.last_mut().ok_or_else(|| {
            FetchError::Config(format!("line {}: entry before any section", lineno + 1))
        })?;

        section
            .entries
            .push((key.trim().to_string(), value.trim().to_string()));
    }

    Ok(sections)
}

fn build_spec(section: Section) -> Result<DistroSpec> {
    let mut name = None;
    let mut arch = None;
    let mut package = None;
    let mut fetcher = None;
    let mut extractor = None;
    let mut index = None;
    let mut do_update = true;
    let mut version = None;
    let mut key = None;
    let mut codename = None;
    let mut category = None;
    let mut repo = None;

    let context = |k: &str| format!("section [{}], key {k}", section.name);

    for (k, v) in section.entries {
        match k.as_str() {
            "name" => name = Some(v),
            "arch" => arch = Some(v),
            "package" => package = Some(v),
            "fetcher" => {
                fetcher = Some(FetcherKind::from_str(&v).map_err(|_| {
                    FetchError::Config(format!("{}: unknown fetcher kind {v}", context(&k)))
                })?)
            }
            "extractor" => {
                extractor = Some(ExtractorKind::from_str(&v).map_err(|_| {
                    FetchError::Config(format!("{}: unknown extractor kind {v}", context(&k)))
                })?)
            }
            "index" => index = Some(v),
            "do_update" => {
                do_update = parse_bool(&v).ok_or_else(|| {
                    FetchError::Config(format!("{}: not a boolean: {v}", context(&k)))
                })?
            }
            "version" => version = Some(v),
            "key" => key = Some(v),
            "codename" => codename = Some(v),
            "category" => category = Some(v),
            "repo" => repo = Some(v),
            _ => {
                return Err(FetchError::Config(format!(
                    "{}: unknown key",
                    context(&k)
                )))
            }
        }
    }

    let required = |field: Option<String>, what: &str| {
        field.ok_or_else(|| {
            FetchError::Config(format!("section [{}] lacks key {what}", section.name))
        })
    };

    Ok(DistroSpec {
        name: required(name, "name")?,
        arch: required(arch, "arch")?,
        package: required(package, "package")?,
        fetcher: fetcher.ok_or_else(|| {
            FetchError::Config(format!("section [{}] lacks key fetcher", section.name))
        })?,
        extractor: extractor.ok_or_else(|| {
            FetchError::Config(format!("section [{}] lacks key extractor", section.name))
        })?,
        index: required(index, "index")?,
        do_update,
        version,
        key,
        codename,
        category,
        repo,
    })
}

/// Parse a configuration document, keeping sections matched by `filters`.
///
/// An empty filter list keeps everything. Duplicate `unique_name`s across
/// the kept sections are rejected.
pub fn parse_config(text: &str, filters: &[glob::Pattern]) -> Result<Vec<DistroSpec>> {
    let mut specs = vec![];
    let mut seen = HashSet::new();

    for section in split_sections(text)? {
        if !filters.is_empty() && !filters.iter().any(|p| p.matches(&section.name)) {
            continue;
        }

        let spec = build_spec(section)?;
        let unique = spec.unique_name();

        if !seen.insert(unique.clone()) {
            return Err(FetchError::Config(format!(
                "duplicate distribution identity: {unique}"
            )));
        }

        specs.push(spec);
    }

    Ok(specs)
}

/// Load and parse a configuration file.
pub async fn load_config(path: &Path, filters: &[glob::Pattern]) -> Result<Vec<DistroSpec>> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| FetchError::IoPath(path.display().to_string(), e))?;

    parse_config(&text, filters)
}

#[cfg(test)]
mod test {
    use {super::*, indoc::indoc};

    const SAMPLE: &str = indoc! {"
        # tracked distributions
        [ubuntu-noble-x86_64]
        name = Ubuntu
        arch = x86_64
        package = linux-generic
        fetcher = deb
        extractor = deb
        index = http://archive.ubuntu.com/ubuntu
        codename = noble
        key = ubuntu

        [fedora-40-x86_64]
        name = Fedora
        version = 40
        arch = x86_64
        package = kernel-core
        fetcher = rpm
        extractor = rpm
        index = https://dl.fedoraproject.org/pub/fedora/linux/releases/40/Everything/x86_64/os
        key = fedora
        do_update = yes
    "};

    #[test]
    fn parses_sections_into_specs() {
        let specs = parse_config(SAMPLE, &[]).unwrap();
        assert_eq!(specs.len(), 2);

        assert_eq!(specs[0].name, "Ubuntu");
        assert_eq!(specs[0].fetcher, FetcherKind::Deb);
        assert_eq!(specs[0].codename.as_deref(), Some("noble"));
        assert!(specs[0].do_update);

        assert_eq!(specs[1].unique_name(), "Fedora 40 x86_64");
    }

    #[test]
    fn filters_select_sections_by_pattern() {
        let filters = vec![glob::Pattern::new("fedora-*").unwrap()];
        let specs = parse_config(SAMPLE, &filters).unwrap();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].name, "Fedora");
    }

    #[test]
    fn boolean_tokens() {
        for (token, expected) in [
            ("1", true),
            ("yes", true),
            ("True", true),
            ("ON", true),
            ("0", false),
            ("no", false),
            ("False", false),
            ("off", false),
        ] {
            assert_eq!(parse_bool(token), Some(expected), "{token}");
        }
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn unknown_fetcher_kind_is_a_config_error() {
        let text = indoc! {"
            [x]
            name = X
            arch = x86_64
            package = linux
            fetcher = kconfigs.deb.DebFetcher
            extractor = deb
            index = http://example.com
        "};

        let err = parse_config(text, &[]).unwrap_err();
        assert!(err.to_string().contains("unknown fetcher kind"));
    }

    #[test]
    fn unknown_key_is_a_config_error() {
        let text = indoc! {"
            [x]
            name = X
            arch = x86_64
            package = linux
            fetcher = github
            extractor = defconfig
            index = http://example.com
            flavor = generic
        "};

        assert!(parse_config(text, &[]).is_err());
    }

    #[test]
    fn duplicate_unique_name_is_rejected() {
        let text = indoc! {"
            [a]
            name = X
            arch = x86_64
            package = linux
            fetcher = github
            extractor = defconfig
            index = http://example.com/one

            [b]
            name = X
            arch = x86_64
            package = linux
            fetcher = github
            extractor = defconfig
            index = http://example.com/two
        "};

        let err = parse_config(text, &[]).unwrap_err();
        assert!(err.to_string().contains("duplicate distribution identity"));
    }

    #[test]
    fn missing_required_key_is_a_config_error() {
        let text = indoc! {"
            [x]
            name = X
            arch = x86_64
            fetcher = github
            extractor = defconfig
            index = http://example.com
        "};

        let err = parse_config(text, &[]).unwrap_err();
        assert!(err.to_string().contains("lacks key package"));
    }
}
