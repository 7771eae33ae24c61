use std::path::{Path, PathBuf};

use reqwest::{Client, StatusCode};
use url::Url;

pub const DEFAULT_FILE_NAME: &str = "ai-generated-image.png";

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("{0}")]
    InvalidUrl(String),
    #[error("{0}")]
    InvalidFileName(String),
    #[error("image host returned {0}")]
    Upstream(StatusCode),
    #[error("{0}")]
    Request(String),
    #[error("failed to write image: {0}")]
    Io(#[from] std::io::Error),
}

/// Fetch `image_url` and write it to `dir/file_name`, returning the written path.
pub async fn save_image(
    client: &Client,
    image_url: &str,
    dir: &Path,
    file_name: Option<&str>,
) -> Result<PathBuf, DownloadError> {
    validate_url(image_url)?;
    let file_name = validate_file_name(file_name.unwrap_or(DEFAULT_FILE_NAME))?;

    let response = client
        .get(image_url)
        .send()
        .await
        .map_err(|e| DownloadError::Request(e.to_string()))?;

    if !response.status().is_success() {
        return Err(DownloadError::Upstream(response.status()));
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| DownloadError::Request(e.to_string()))?;

    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(file_name);
    tokio::fs::write(&path, &bytes).await?;

    tracing::info!(path = %path.display(), bytes = bytes.len(), "image saved");
    Ok(path)
}

fn validate_url(url: &str) -> Result<(), DownloadError> {
    let parsed =
        Url::parse(url).map_err(|_| DownloadError::InvalidUrl("Invalid URL".to_string()))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        _ => Err(DownloadError::InvalidUrl(
            "Only http and https URLs are allowed".to_string(),
        )),
    }
}

fn validate_file_name(name: &str) -> Result<&str, DownloadError> {
    let name = name.trim();
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(DownloadError::InvalidFileName(format!(
            "'{}' is not a plain file name",
            name
        )));
    }
    Ok(name)
}
