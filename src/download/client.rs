// file: src/download/client.rs
// description: reqwest wrapper streaming downloads to disk, with retry support
// reference: https://docs.rs/reqwest

use crate::config::DownloadConfig;
use crate::error::{BnaError, Result};
use crate::utils::files::remove_or_warn;
use reqwest::Client;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    retries: u32,
}

impl HttpClient {
    pub fn new(config: &DownloadConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            retries: config.retries,
        })
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub async fn fetch_text(&self, url: &str, params: &[(&str, &str)]) -> Result<String> {
        debug!("GET {url} {params:?}");
        let response = self.client.get(url).query(params).send().await?;

        if !response.status().is_success() {
            return Err(BnaError::Download {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }
        Ok(response.text().await?)
    }

    pub async fn fetch_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        params: &[(&str, &str)],
    ) -> Result<T> {
        let text = self.fetch_text(url, params).await?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Streams `url` into `output` through a `.part` file so partial downloads never look complete.
    pub async fn download_file(&self, url: &str, output: &Path, skip_existing: bool) -> Result<()> {
        if skip_existing && output.exists() {
            debug!("{} already exists, skipping download", output.display());
            return Ok(());
        }

        if let Some(parent) = output.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| BnaError::file(parent, e))?;
        }

        debug!("Downloading {url} to {}", output.display());
        let partial = partial_path(output);
        match self.stream_to(url, &partial).await {
            Ok(written) => {
                fs::rename(&partial, output)
                    .await
                    .map_err(|e| BnaError::file(output, e))?;
                debug!("Downloaded {written} bytes from {url}");
                Ok(())
            }
            Err(e) => {
                remove_or_warn(&partial);
                Err(e)
            }
        }
    }

    async fn stream_to(&self, url: &str, partial: &Path) -> Result<u64> {
        let mut response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(BnaError::Download {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        let mut file = fs::File::create(partial)
            .await
            .map_err(|e| BnaError::file(partial, e))?;
        let mut written: u64 = 0;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk)
                .await
                .map_err(|e| BnaError::file(partial, e))?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(|e| BnaError::file(partial, e))?;
        Ok(written)
    }

    pub async fn download_with_retries(
        &self,
        url: &str,
        output: &Path,
        skip_existing: bool,
    ) -> Result<()> {
        with_retries(self.retries, url, move || {
            self.download_file(url, output, skip_existing)
        })
        .await
    }
}

fn partial_path(output: &Path) -> PathBuf {
    let mut name = output.as_os_str().to_os_string();
    name.push(".part");
    PathBuf::from(name)
}

/// Runs `op` until it succeeds or `attempts` is exhausted, returning the last error.
pub async fn with_retries<T, F, Fut>(attempts: u32, label: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        debug!("{label}: attempt {attempt}/{attempts}");
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < attempts => {
                warn!("{label}: attempt {attempt} failed: {e}");
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
