// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Error handling. */

use thiserror::Error;

/// Primary crate error type.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("URL parse error: {0:?}")]
    Url(#[from] url::ParseError),

    #[error("HTTP error: {0:?}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP status {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("failed to download {url} after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        url: String,
        attempts: usize,
        last_error: String,
    },

    #[error("{algorithm} digest mismatch for {url}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        url: String,
        algorithm: String,
        expected: String,
        actual: String,
    },

    #[error("invalid hex in digest {0}: {1:?}")]
    DigestBadHex(String, hex::FromHexError),

    #[error("unknown or disallowed digest algorithm: {0}")]
    UnknownDigestAlgorithm(String),

    #[error("bad signature [{key}] for {path}")]
    BadSignature { key: String, path: String },

    #[error("missing signature for {0}")]
    MissingSignature(String),

    #[error("missing signing key for {0}")]
    MissingKey(String),

    #[error("signature tool failure [{key}] for {path}: {stderr}")]
    SignatureToolFailure {
        key: String,
        path: String,
        stderr: String,
    },

    #[error("command {program} exited {status}: {stderr}")]
    CommandFailed {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("I/O error: {0:?}")]
    Io(#[from] std::io::Error),

    #[error("I/O error on path {0}: {1:?}")]
    IoPath(String, std::io::Error),

    #[error("XML error: {0:?}")]
    Xml(#[from] serde_xml_rs::Error),

    #[error("JSON error: {0:?}")]
    Json(#[from] serde_json::Error),

    #[error("sqlite error: {0:?}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("integer parsing error: {0:?}")]
    ParseInt(#[from] std::num::ParseIntError),

    #[error("background task failed: {0}")]
    TaskJoin(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("distribution {distro} is missing required field {field}")]
    SpecMissingField { distro: String, field: &'static str },

    #[error("response for {url} lacks a {header} header")]
    MissingHeader { url: String, header: &'static str },

    #[error("repository metadata entry not found: {0}")]
    MetadataEntryNotFound(&'static str),

    #[error("could not find a Packages index for {0}")]
    PackagesIndexNotFound(String),

    #[error("package {package} not found in index {index}")]
    PackageNotFound { package: String, index: String },

    #[error("stanza for {package} lacks a {field} field")]
    StanzaMissingField { package: String, field: &'static str },

    #[error("could not resolve a kernel modules package for {0}")]
    DependencyNotFound(String),

    #[error("no release assets published for {0}")]
    NoReleases(String),

    #[error("no certified boot images found at {0}")]
    NoBootImages(String),

    #[error("could not find upstream kernel release {0}")]
    UpstreamReleaseNotFound(String),

    #[error("feed entry for {0} does not reference a source tarball")]
    FeedEntryNoTarball(String),

    #[error("expected exactly one file matching {pattern}, found {count}")]
    ExtractedFileMismatch { pattern: String, count: usize },

    #[error("no kernel image found under {0}")]
    KernelImageNotFound(String),

    #[error("invalid operation: {0}")]
    InvalidState(&'static str),
}

/// Result wrapper for this crate.
pub type Result<T> = std::result::Result<T, FetchError>;
