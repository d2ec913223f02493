// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Kernel build configuration collection.

This crate tracks the latest released kernel package across a catalog of
software distributions, verifies what it downloads, and extracts each
package's build configuration for comparison.

The pipeline per distribution is: check whether the package index changed
since the last run, resolve the concrete artifact URL plus integrity
material, download with retries and checksum verification, check the
artifact's signature, and extract the configuration payload with
format-specific logic. Enough state is persisted between runs to keep all
of this incremental.

# A Tour of Functionality

The [fetch] module tree defines the [fetch::Fetcher] trait — "is there
something new, and where?" — with one implementation per package-index
protocol: Debian archives ([fetch::deb]), RPM repodata ([fetch::rpm]),
Pacman databases ([fetch::pacman]), GitHub releases ([fetch::github]),
Android GKI boot image indexes ([fetch::android]), and upstream kernel.org
feeds ([fetch::upstream]). Instances are deduplicated across distributions
sharing an index by [fetch::FetcherRegistry].

The [extract] module tree defines the [extract::Extractor] trait — "given
the artifact, pull out the config" — again one implementation per format.
Extraction drives external tools inside scoped temporary directories.

[download::DownloadManager] owns the process-wide HTTP client and bounds
transfer concurrency. [verify::SignatureVerifier] checks detached and
embedded signatures against named trust anchors. [run::run_distros] drives
everything concurrently and assembles the [state::StateFile] persisted for
the next run. [config] loads the distribution catalog.

[version::rpmvercmp] implements the RPM version comparison algorithm used
to pick the newest package from RPM repository metadata.
*/

pub mod config;
pub mod distro;
pub mod download;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod io;
pub mod process;
pub mod run;
pub mod state;
pub mod verify;
pub mod version;

pub use crate::error::{FetchError, Result};
