//! Artwork resolution.
//!
//! Candidates are probed one at a time, best quality first.  The first one
//! that loads and is not a known placeholder wins; later candidates are
//! never fetched.  Every failure simply moves on to the next candidate.

use std::future::Future;
use std::io::Cursor;
use std::time::Duration;

use reqwest::Client;
use tracing::debug;

pub const YOUTUBE_THUMBNAIL_BASE: &str = "https://i.ytimg.com/vi";

/// Thumbnail files YouTube may have for a video, best first.
const YOUTUBE_THUMBNAILS: [&str; 4] = ["maxresdefault.jpg", "sddefault.jpg", "hqdefault.jpg", "0.jpg"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageDimensions {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server answered {0}")]
    Status(u16),
    #[error("not a readable image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Loads one candidate far enough to know its size.
pub trait ImageProbe: Send + Sync {
    fn probe(&self, url: &str) -> impl Future<Output = Result<ImageDimensions, ProbeError>> + Send;
}

/// Recognises "no real image" responses that still load successfully.
pub trait PlaceholderDetector: Send + Sync {
    fn is_placeholder(&self, dims: ImageDimensions) -> bool;
}

/// A placeholder identified by its exact size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaceholderSignature {
    pub width: u32,
    pub height: u32,
}

impl PlaceholderSignature {
    /// YouTube's grey "no thumbnail" image.
    pub const YOUTUBE: PlaceholderSignature = PlaceholderSignature {
        width: 120,
        height: 90,
    };
}

impl PlaceholderDetector for PlaceholderSignature {
    fn is_placeholder(&self, dims: ImageDimensions) -> bool {
        dims.width == self.width && dims.height == self.height
    }
}

/// Accepts every image that loads.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPlaceholder;

impl PlaceholderDetector for NoPlaceholder {
    fn is_placeholder(&self, _dims: ImageDimensions) -> bool {
        false
    }
}

/// Probe `candidates` in order and return the first genuine hit.
pub async fn resolve<P, D>(candidates: &[String], probe: &P, detector: &D) -> Option<String>
where
    P: ImageProbe,
    D: PlaceholderDetector,
{
    for url in candidates {
        match probe.probe(url).await {
            Ok(dims) if detector.is_placeholder(dims) => {
                debug!("artwork: {} is a {}x{} placeholder", url, dims.width, dims.height);
            }
            Ok(_) => return Some(url.clone()),
            Err(e) => {
                debug!("artwork: {} failed: {}", url, e);
            }
        }
    }
    debug!("artwork: no usable candidate among {}", candidates.len());
    None
}

/// Fallback chain for a YouTube video, highest resolution first.
pub fn youtube_candidates(base_url: &str, video_id: &str) -> Vec<String> {
    let base = base_url.trim_end_matches('/');
    YOUTUBE_THUMBNAILS
        .iter()
        .map(|file| format!("{}/{}/{}", base, video_id, file))
        .collect()
}

/// Probes over HTTP and sniffs the image header for its size.
#[derive(Debug, Clone)]
pub struct HttpImageProbe {
    client: Client,
}

impl HttpImageProbe {
    pub fn new(timeout: Duration) -> Result<Self, ProbeError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

impl ImageProbe for HttpImageProbe {
    async fn probe(&self, url: &str) -> Result<ImageDimensions, ProbeError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ProbeError::Status(status.as_u16()));
        }
        let body = response.bytes().await?;
        let (width, height) = image::ImageReader::new(Cursor::new(&body[..]))
            .with_guessed_format()?
            .into_dimensions()?;
        Ok(ImageDimensions { width, height })
    }
}
