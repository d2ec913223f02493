// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! I/O primitives: content digests and artifact decompression. */

use {
    crate::error::{FetchError, Result},
    async_compression::tokio::bufread::{BzDecoder, GzipDecoder, XzDecoder, ZstdDecoder},
    std::{
        fmt::{Display, Formatter},
        path::{Path, PathBuf},
        str::FromStr,
    },
    tokio::io::{AsyncRead, AsyncWriteExt},
};

/// Digest algorithms accepted for artifact integrity checks.
///
/// Package indexes advertise digests by name. Only members of this
/// allow-list are honored; anything else fails at parse time.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DigestAlgorithm {
    Sha256,
    Sha512,
}

impl FromStr for DigestAlgorithm {
    type Err = FetchError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sha256" => Ok(Self::Sha256),
            "sha512" => Ok(Self::Sha512),
            _ => Err(FetchError::UnknownDigestAlgorithm(s.to_string())),
        }
    }
}

impl Display for DigestAlgorithm {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sha256 => write!(f, "sha256"),
            Self::Sha512 => write!(f, "sha512"),
        }
    }
}

/// An (algorithm, hex digest) pair describing expected artifact content.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Checksum {
    pub algorithm: DigestAlgorithm,
    digest: String,
}

impl Checksum {
    /// Construct an instance from an algorithm name and a hex digest string.
    ///
    /// The digest is validated as hex and normalized to lowercase.
    pub fn from_parts(algorithm: &str, digest: &str) -> Result<Self> {
        let algorithm = DigestAlgorithm::from_str(algorithm)?;
        let raw = hex::decode(digest)
            .map_err(|e| FetchError::DigestBadHex(digest.to_string(), e))?;

        Ok(Self {
            algorithm,
            digest: hex::encode(raw),
        })
    }

    /// The normalized hex digest.
    pub fn digest_hex(&self) -> &str {
        &self.digest
    }

    /// Create a new hasher matching the algorithm of this checksum.
    pub fn new_hasher(&self) -> Box<dyn digest::DynDigest + Send> {
        match self.algorithm {
            DigestAlgorithm::Sha256 => Box::new(sha2::Sha256::default()),
            DigestAlgorithm::Sha512 => Box::new(sha2::Sha512::default()),
        }
    }

    /// Whether a computed hex digest matches this checksum.
    pub fn matches_hex(&self, hex_digest: &str) -> bool {
        self.digest == hex_digest.to_lowercase()
    }
}

/// Compression formats recognized on downloaded artifacts.
#[derive(Clone, Copy, Debug)]
pub enum Compression {
    Gzip,
    Bzip2,
    Xz,
    Zstd,
}

impl Compression {
    /// Infer a compression format from a filename extension.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "gz" => Some(Self::Gzip),
            "bz2" => Some(Self::Bzip2),
            "xz" => Some(Self::Xz),
            "zst" | "zstd" => Some(Self::Zstd),
            _ => None,
        }
    }
}

/// The final path component of a URL.
pub fn url_file_name(url: &str) -> &str {
    url.rsplit('/').next().unwrap_or(url)
}

/// Decompress a downloaded file next to itself, if its name says it is compressed.
///
/// Returns the path to the decompressed file, which is the input path with its
/// compression extension stripped. A file with no recognized compression
/// extension is returned as-is. If the decompressed sibling already exists it
/// is reused without touching the compressed file.
pub async fn maybe_decompress(path: &Path) -> Result<PathBuf> {
    let compression = match path
        .extension()
        .and_then(|e| e.to_str())
        .and_then(Compression::from_extension)
    {
        Some(compression) => compression,
        None => return Ok(path.to_path_buf()),
    };

    let dest = path.with_extension("");
    if tokio::fs::try_exists(&dest).await? {
        return Ok(dest);
    }

    let input = tokio::fs::File::open(path)
        .await
        .map_err(|e| FetchError::IoPath(path.display().to_string(), e))?;
    let reader = tokio::io::BufReader::new(input);

    let mut decoder: Box<dyn AsyncRead + Send + Unpin> = match compression {
        Compression::Gzip => Box::new(GzipDecoder::new(reader)),
        Compression::Bzip2 => Box::new(BzDecoder::new(reader)),
        Compression::Xz => Box::new(XzDecoder::new(reader)),
        Compression::Zstd => Box::new(ZstdDecoder::new(reader)),
    };

    let mut output = tokio::fs::File::create(&dest)
        .await
        .map_err(|e| FetchError::IoPath(dest.display().to_string(), e))?;

    match tokio::io::copy(&mut decoder, &mut output).await {
        Ok(_) => {
            output.flush().await?;
            Ok(dest)
        }
        Err(e) => {
            let _ = tokio::fs::remove_file(&dest).await;
            Err(FetchError::IoPath(dest.display().to_string(), e))
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn digest_allow_list() {
        assert_eq!(
            DigestAlgorithm::from_str("sha256").unwrap(),
            DigestAlgorithm::Sha256
        );
        assert_eq!(
            DigestAlgorithm::from_str("sha512").unwrap(),
            DigestAlgorithm::Sha512
        );
        assert!(matches!(
            DigestAlgorithm::from_str("sha1"),
            Err(FetchError::UnknownDigestAlgorithm(_))
        ));
        assert!(matches!(
            DigestAlgorithm::from_str("md5"),
            Err(FetchError::UnknownDigestAlgorithm(_))
        ));
    }

    #[test]
    fn checksum_normalizes_and_matches() {
        let c = Checksum::from_parts(
            "sha256",
            "2CF24DBA5FB0A30E26E83B2AC5B9E29E1B161E5C1FA7425E73043362938B9824",
        )
        .unwrap();
        assert!(c.matches_hex("2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"));

        let mut hasher = c.new_hasher();
        hasher.update(b"hello");
        let got = hex::encode(hasher.finalize_reset());
        assert!(c.matches_hex(&got));
    }

    #[test]
    fn checksum_rejects_bad_hex() {
        assert!(matches!(
            Checksum::from_parts("sha256", "zzzz"),
            Err(FetchError::DigestBadHex(_, _))
        ));
    }

    #[test]
    fn url_file_name_components() {
        assert_eq!(
            url_file_name("https://example.com/pool/linux-5.4.deb"),
            "linux-5.4.deb"
        );
        assert_eq!(url_file_name("linux-next"), "linux-next");
    }

    #[tokio::test]
    async fn maybe_decompress_passthrough() {
        let td = tempfile::tempdir().unwrap();
        let plain = td.path().join("Packages");
        tokio::fs::write(&plain, b"data").await.unwrap();

        assert_eq!(maybe_decompress(&plain).await.unwrap(), plain);
    }

    #[tokio::test]
    async fn maybe_decompress_reuses_existing_sibling() {
        let td = tempfile::tempdir().unwrap();
        let compressed = td.path().join("primary.sqlite.bz2");
        let sibling = td.path().join("primary.sqlite");
        tokio::fs::write(&compressed, b"not really bzip2")
            .await
            .unwrap();
        tokio::fs::write(&sibling, b"already here").await.unwrap();

        let got = maybe_decompress(&compressed).await.unwrap();
        assert_eq!(got, sibling);
        assert_eq!(tokio::fs::read(&sibling).await.unwrap(), b"already here");
    }
}
