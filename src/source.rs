//! Resolving a path or URL into a decoded image.

use std::fmt;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use image::{DynamicImage, ImageReader};
use log::{debug, info};
use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;

use crate::error::Error;

/// Where an image comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageRef {
    Path(PathBuf),
    Url(String),
}

impl FromStr for ImageRef {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::InvalidConfig("empty image reference".to_string()));
        }
        if s.starts_with("http://") || s.starts_with("https://") {
            Ok(ImageRef::Url(s.to_string()))
        } else {
            Ok(ImageRef::Path(PathBuf::from(s)))
        }
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageRef::Path(path) => write!(f, "{}", path.display()),
            ImageRef::Url(url) => f.write_str(url),
        }
    }
}

/// Loads images from disk or over HTTP.
pub struct ImageSource {
    timeout: Duration,
}

impl ImageSource {
    pub fn new(timeout: Duration) -> Self {
        ImageSource { timeout }
    }

    pub fn load(&self, image: &ImageRef) -> Result<DynamicImage, Error> {
        match image {
            ImageRef::Path(path) => load_path(path),
            ImageRef::Url(url) => self.fetch(url),
        }
    }

    /// Download `url` into a temporary file and decode it.
    ///
    /// The temporary file is removed when this returns, whatever the outcome.
    fn fetch(&self, url: &str) -> Result<DynamicImage, Error> {
        info!("Downloading image from {}", url);
        let client = Client::builder().timeout(self.timeout).build()?;
        let response = client.get(url).send()?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::FetchStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let extension = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(extension_for_content_type)
            .or_else(|| extension_for_url(url))
            .unwrap_or("img");
        let bytes = response.bytes()?;
        debug!("fetched {} bytes, storing as .{}", bytes.len(), extension);

        let mut file = tempfile::Builder::new()
            .prefix("ql-labeler-")
            .suffix(&format!(".{}", extension))
            .tempfile()?;
        file.write_all(&bytes)?;
        file.flush()?;

        load_path(file.path())
    }
}

impl Default for ImageSource {
    fn default() -> Self {
        ImageSource::new(Duration::from_secs(30))
    }
}

/// Decode an image file, sniffing the format when the extension lies.
pub fn load_path(path: &Path) -> Result<DynamicImage, Error> {
    if !path.is_file() {
        return Err(Error::ImageNotFound(path.to_path_buf()));
    }
    let image = ImageReader::open(path)?
        .with_guessed_format()?
        .decode()
        .map_err(Error::Decode)?;
    debug!("decoded {:?}: {}x{}", path, image.width(), image.height());
    Ok(image)
}

/// Decode in-memory image bytes.
pub fn decode_bytes(bytes: &[u8]) -> Result<DynamicImage, Error> {
    ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()?
        .decode()
        .map_err(Error::Decode)
}

fn extension_for_content_type(content_type: &str) -> Option<&'static str> {
    let mime = content_type.split(';').next()?.trim().to_lowercase();
    match mime.as_str() {
        "image/png" => Some("png"),
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/gif" => Some("gif"),
        "image/bmp" => Some("bmp"),
        "image/webp" => Some("webp"),
        _ => None,
    }
}

fn extension_for_url(url: &str) -> Option<&'static str> {
    let path = url.split(['?', '#']).next()?.to_lowercase();
    ["png", "jpg", "jpeg", "gif", "bmp", "webp"]
        .into_iter()
        .find(|ext| path.ends_with(&format!(".{}", ext)))
}
