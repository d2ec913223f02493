// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Shared download manager.

All network traffic in the pipeline funnels through a single
[DownloadManager], which owns the process-wide HTTP client and a semaphore
bounding the number of in-flight transfers. Many distribution tasks call
through one instance concurrently; the semaphore is the only serialization
between them.
*/

use {
    crate::{
        error::{FetchError, Result},
        io::Checksum,
    },
    futures::TryStreamExt,
    log::{info, warn},
    reqwest::{header::HeaderMap, Client, ClientBuilder, StatusCode},
    std::{path::Path, time::Duration},
    tokio::{io::AsyncWriteExt, sync::Semaphore},
};

/// Default HTTP user agent string.
pub const USER_AGENT: &str = "kconfig-fetch Rust crate (https://crates.io/crates/kconfig-fetch)";

/// Default bound on concurrent transfers.
pub const DEFAULT_MAX_TRANSFERS: usize = 8;

/// Shared HTTP transfer manager with bounded concurrency and retries.
#[derive(Debug)]
pub struct DownloadManager {
    client: Client,
    semaphore: Semaphore,
    retry_delay: Duration,
}

impl DownloadManager {
    /// Number of attempts made for retryable download failures.
    pub const RETRIES: usize = 3;

    /// Construct an instance with default limits.
    pub fn new() -> Result<Self> {
        Self::with_limits(DEFAULT_MAX_TRANSFERS, Duration::from_secs(1))
    }

    /// Construct an instance with an explicit transfer bound and retry delay.
    pub fn with_limits(max_transfers: usize, retry_delay: Duration) -> Result<Self> {
        let client = ClientBuilder::new().user_agent(USER_AGENT).build()?;

        Ok(Self {
            client,
            semaphore: Semaphore::new(max_transfers),
            retry_delay,
        })
    }

    /// Issue a single HEAD request and return the response headers.
    ///
    /// HEAD requests are cheap freshness probes and are not retried.
    pub async fn head(&self, url: &str) -> Result<HeaderMap> {
        let _permit = self.semaphore.acquire().await.expect("semaphore never closed");

        info!("HTTP HEAD {}", url);
        let res = self.client.head(url).send().await?;
        let res = check_status(res, url)?;

        Ok(res.headers().clone())
    }

    /// Download a URL to a local file.
    ///
    /// If `dest` already exists and `always_download` is false, no request is
    /// made and the existing file is trusted as-is. A supplied checksum is
    /// computed while streaming and a mismatch is a hard failure that removes
    /// the destination. Transient failures are retried up to [Self::RETRIES]
    /// times; a 404 aborts immediately. No partial file survives a failure.
    pub async fn download_to_file(
        &self,
        url: &str,
        dest: &Path,
        always_download: bool,
        checksum: Option<&Checksum>,
    ) -> Result<()> {
        if !always_download && tokio::fs::try_exists(dest).await? {
            info!("skip download of {}; {} exists", url, dest.display());
            return Ok(());
        }

        let mut last_error = None;

        for attempt in 1..=Self::RETRIES {
            match self.fetch_file_once(url, dest, checksum, attempt).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    let _ = tokio::fs::remove_file(dest).await;
                    if !is_retryable(&e) {
                        return Err(e);
                    }
                    warn!("download of {} failed (attempt {}): {}", url, attempt, e);
                    last_error = Some(e);
                }
            }

            tokio::time::sleep(self.retry_delay).await;
        }

        Err(FetchError::RetriesExhausted {
            url: url.to_string(),
            attempts: Self::RETRIES,
            last_error: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown".to_string()),
        })
    }

    /// Download a URL into memory.
    ///
    /// Same retry and checksum contract as [Self::download_to_file]. Intended
    /// for small metadata documents.
    pub async fn download_to_memory(
        &self,
        url: &str,
        checksum: Option<&Checksum>,
    ) -> Result<Vec<u8>> {
        let mut last_error = None;

        for attempt in 1..=Self::RETRIES {
            match self.fetch_memory_once(url, checksum, attempt).await {
                Ok(data) => return Ok(data),
                Err(e) => {
                    if !is_retryable(&e) {
                        return Err(e);
                    }
                    warn!("download of {} failed (attempt {}): {}", url, attempt, e);
                    last_error = Some(e);
                }
            }

            tokio::time::sleep(self.retry_delay).await;
        }

        Err(FetchError::RetriesExhausted {
            url: url.to_string(),
            attempts: Self::RETRIES,
            last_error: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown".to_string()),
        })
    }

    async fn fetch_file_once(
        &self,
        url: &str,
        dest: &Path,
        checksum: Option<&Checksum>,
        attempt: usize,
    ) -> Result<()> {
        let _permit = self.semaphore.acquire().await.expect("semaphore never closed");

        info!(
            "download {} to {} [attempt {}/{}]",
            url,
            dest.display(),
            attempt,
            Self::RETRIES
        );

        let res = self.client.get(url).send().await?;
        let res = check_status(res, url)?;

        let mut hasher = checksum.map(|c| c.new_hasher());
        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| FetchError::IoPath(dest.display().to_string(), e))?;

        let mut stream = res.bytes_stream();
        while let Some(chunk) = stream.try_next().await? {
            if let Some(hasher) = hasher.as_mut() {
                hasher.update(&chunk);
            }
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        if let (Some(mut hasher), Some(checksum)) = (hasher, checksum) {
            verify_digest(&mut hasher, checksum, url)?;
        }

        Ok(())
    }

    async fn fetch_memory_once(
        &self,
        url: &str,
        checksum: Option<&Checksum>,
        attempt: usize,
    ) -> Result<Vec<u8>> {
        let _permit = self.semaphore.acquire().await.expect("semaphore never closed");

        info!("download {} to memory [attempt {}/{}]", url, attempt, Self::RETRIES);

        let res = self.client.get(url).send().await?;
        let res = check_status(res, url)?;

        let mut hasher = checksum.map(|c| c.new_hasher());
        let mut data = vec![];

        let mut stream = res.bytes_stream();
        while let Some(chunk) = stream.try_next().await? {
            if let Some(hasher) = hasher.as_mut() {
                hasher.update(&chunk);
            }
            data.extend_from_slice(&chunk);
        }

        if let (Some(mut hasher), Some(checksum)) = (hasher, checksum) {
            verify_digest(&mut hasher, checksum, url)?;
        }

        Ok(data)
    }
}

fn check_status(res: reqwest::Response, url: &str) -> Result<reqwest::Response> {
    match res.error_for_status() {
        Ok(res) => Ok(res),
        Err(e) if e.status() == Some(StatusCode::NOT_FOUND) => {
            Err(FetchError::NotFound(url.to_string()))
        }
        Err(e) => Err(FetchError::HttpStatus {
            url: url.to_string(),
            status: e.status().map(|s| s.as_u16()).unwrap_or(0),
        }),
    }
}

fn verify_digest(
    hasher: &mut Box<dyn digest::DynDigest + Send>,
    checksum: &Checksum,
    url: &str,
) -> Result<()> {
    let actual = hex::encode(hasher.finalize_reset());

    if checksum.matches_hex(&actual) {
        info!("verified {} digest of {}", checksum.algorithm, url);
        Ok(())
    } else {
        Err(FetchError::ChecksumMismatch {
            url: url.to_string(),
            algorithm: checksum.algorithm.to_string(),
            expected: checksum.digest_hex().to_string(),
            actual,
        })
    }
}

fn is_retryable(error: &FetchError) -> bool {
    !matches!(
        error,
        FetchError::NotFound(_) | FetchError::ChecksumMismatch { .. }
    )
}
