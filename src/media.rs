use anyhow::{anyhow, Result};
use reqwest::Client;
use tracing::{debug, warn};
use url::Url;

const MAX_DISCORD_FILE_SIZE: usize = 8 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct MediaInfo {
    pub data: Vec<u8>,
    pub content_type: String,
    pub filename: String,
    pub size: usize,
}

/// Downloads WhatsApp attachment URLs so they can be re-uploaded to Discord.
pub struct MediaHandler {
    client: Client,
}

impl MediaHandler {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    pub async fn download_from_url(&self, url: &str) -> Result<MediaInfo> {
        debug!("downloading media from {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| anyhow!("failed to download from {}: {}", url, e))?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "failed to download from {}: status {}",
                url,
                response.status()
            ));
        }

        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();

        let data = response
            .bytes()
            .await
            .map_err(|e| anyhow!("failed to read response body: {}", e))?
            .to_vec();

        let size = data.len();
        let filename = filename_from_url(url);

        debug!("downloaded {} bytes from {}", size, url);

        Ok(MediaInfo {
            data,
            content_type,
            filename,
            size,
        })
    }

    pub fn check_discord_file_size(size: usize) -> Result<()> {
        if size > MAX_DISCORD_FILE_SIZE {
            warn!(
                "file too large for Discord: {} bytes (max {})",
                size, MAX_DISCORD_FILE_SIZE
            );
            Err(anyhow!(
                "file too large for Discord: {} bytes (max {})",
                size,
                MAX_DISCORD_FILE_SIZE
            ))
        } else {
            Ok(())
        }
    }
}

impl Default for MediaHandler {
    fn default() -> Self {
        Self::new()
    }
}

fn filename_from_url(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|parsed| {
            parsed
                .path_segments()
                .and_then(|segments| segments.last().map(ToOwned::to_owned))
        })
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "attachment".to_string())
}
