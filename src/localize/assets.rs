//! Stylesheet and image sub-fetches.
//!
//! Assets are fetched through the same resilience chain as chapters, with the
//! asset User-Agent. Stylesheets are shared per host; images belong to one
//! work. Files are never overwritten.

use std::io::{self, Cursor};
use std::path::Path;

use bytes::Bytes;
use image::{DynamicImage, ImageFormat};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use super::LocalizeError;
use crate::fetch::{FetchRequest, Transport};

/// What happened to one asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum AssetOutcome {
    /// Fetched and written; the reference becomes the contained relative path.
    Saved(String),
    /// Already on disk; no fetch was made.
    Reused(String),
    /// Could not be fetched, decoded or written.
    Failed,
}

impl AssetOutcome {
    pub(crate) fn local_ref(&self) -> Option<&str> {
        match self {
            Self::Saved(path) | Self::Reused(path) => Some(path),
            Self::Failed => None,
        }
    }
}

pub(crate) struct AssetFetcher<'a> {
    transport: &'a dyn Transport,
    user_agent: &'a str,
    cancel: Option<&'a CancellationToken>,
}

impl<'a> AssetFetcher<'a> {
    pub(crate) fn new(
        transport: &'a dyn Transport,
        user_agent: &'a str,
        cancel: Option<&'a CancellationToken>,
    ) -> Self {
        Self {
            transport,
            user_agent,
            cancel,
        }
    }

    /// Saves a stylesheet as `host_dir/name`, referenced as `../name`.
    pub(crate) async fn stylesheet(&self, url: &Url, host_dir: &Path, name: &str) -> AssetOutcome {
        let path = host_dir.join(name);
        let local = format!("../{name}");
        if exists(&path).await {
            return AssetOutcome::Reused(local);
        }
        let Some(body) = self.fetch(url).await else {
            return AssetOutcome::Failed;
        };
        match write_if_absent(&path, &body).await {
            Ok(_) => AssetOutcome::Saved(local),
            Err(error) => {
                warn!(path = %path.display(), error = %error, "failed to write stylesheet");
                AssetOutcome::Failed
            }
        }
    }

    /// Saves an image re-encoded as JPEG at `item_dir/name`, referenced as `./name`.
    pub(crate) async fn image(&self, url: &Url, item_dir: &Path, name: &str) -> AssetOutcome {
        let path = item_dir.join(name);
        let local = format!("./{name}");
        if exists(&path).await {
            return AssetOutcome::Reused(local);
        }
        let Some(body) = self.fetch(url).await else {
            return AssetOutcome::Failed;
        };
        let jpeg = match to_jpeg(url, body).await {
            Ok(jpeg) => jpeg,
            Err(error) => {
                warn!(error = %error, "image could not be converted");
                return AssetOutcome::Failed;
            }
        };
        match write_if_absent(&path, &jpeg).await {
            Ok(_) => AssetOutcome::Saved(local),
            Err(error) => {
                warn!(path = %path.display(), error = %error, "failed to write image");
                AssetOutcome::Failed
            }
        }
    }

    async fn fetch(&self, url: &Url) -> Option<Bytes> {
        let mut request = FetchRequest::get(url.clone()).with_user_agent(self.user_agent);
        if let Some(token) = self.cancel {
            if token.is_cancelled() {
                return None;
            }
            request = request.with_cancellation(token.clone());
        }
        match self.transport.execute(request).await {
            Ok(response) if response.is_success() => Some(response.body().clone()),
            Ok(response) => {
                debug!(url = %url, status = response.status().as_u16(), "asset fetch rejected");
                None
            }
            Err(error) => {
                debug!(url = %url, error = %error, "asset fetch failed");
                None
            }
        }
    }
}

/// Decodes any supported raster format and re-encodes it as JPEG off the async runtime.
async fn to_jpeg(url: &Url, body: Bytes) -> Result<Vec<u8>, LocalizeError> {
    tokio::task::spawn_blocking(move || encode_jpeg(&body))
        .await
        .map_err(|e| LocalizeError::image(url.as_str(), e.to_string()))?
        .map_err(|e| LocalizeError::image(url.as_str(), e.to_string()))
}

pub(crate) fn encode_jpeg(bytes: &[u8]) -> Result<Vec<u8>, image::ImageError> {
    let rgb = image::load_from_memory(bytes)?.to_rgb8();
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(rgb).write_to(&mut out, ImageFormat::Jpeg)?;
    Ok(out.into_inner())
}

async fn exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

/// Creates `path` with `contents` unless it already exists. Returns whether it was written.
///
/// # Errors
///
/// Returns the I/O error for anything other than the file already existing.
pub(crate) async fn write_if_absent(path: &Path, contents: &[u8]) -> io::Result<bool> {
    let file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await;
    let mut file = match file {
        Ok(file) => file,
        Err(error) if error.kind() == io::ErrorKind::AlreadyExists => return Ok(false),
        Err(error) => return Err(error),
    };
    if let Err(error) = write_all(&mut file, contents).await {
        drop(file);
        let _ = tokio::fs::remove_file(path).await;
        return Err(error);
    }
    Ok(true)
}

async fn write_all(file: &mut tokio::fs::File, contents: &[u8]) -> io::Result<()> {
    file.write_all(contents).await?;
    file.flush().await?;
    file.sync_all().await
}

/// Ensures `dir` exists.
pub(crate) async fn ensure_dir(dir: &Path) -> Result<(), LocalizeError> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|source| LocalizeError::io(dir, source))
}
