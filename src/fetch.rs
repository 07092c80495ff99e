//! Source image retrieval.
//!
//! [`FileFetcher`] resolves plain paths and `file://` URLs. The MIME type is
//! sniffed from the bytes, never taken from the file name.
//!
//! [`HttpFetcher`] downloads `http://` and `https://` sources with a blocking
//! client. The MIME type comes from the `Content-Type` header, falling back
//! to sniffing when the server sends none. Anything but `200 OK` is final;
//! transport failures (refused connections, timeouts, cut bodies) are worth
//! another attempt.
//!
//! [`SourceRouter`] picks between the two by URL scheme.

use crate::transform::codec;
use reqwest::StatusCode;
use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("source not found: {0}")]
    NotFound(String),
    #[error("unsupported source scheme {scheme:?} in {url}")]
    UnsupportedScheme { url: String, scheme: String },
    #[error("source is not a recognized image: {0}")]
    UnrecognizedFormat(String),
    #[error("failed to read {url}")]
    Io {
        url: String,
        #[source]
        source: io::Error,
    },
    #[error("{url} answered HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("request to {url} failed")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("failed to build HTTP client")]
    Client(#[source] reqwest::Error),
}

impl FetchError {
    /// Only transient read failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Io { source, .. } => !matches!(
                source.kind(),
                io::ErrorKind::PermissionDenied | io::ErrorKind::IsADirectory
            ),
            Self::Http { .. } => true,
            _ => false,
        }
    }
}

/// Bytes of a source image and what they were sniffed as.
#[derive(Debug, Clone)]
pub struct FetchedImage {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    /// Preferred extension with leading dot, e.g. `.png`.
    pub extension: String,
}

pub trait SourceFetcher: Send + Sync {
    fn fetch(&self, url: &str) -> Result<FetchedImage, FetchError>;
}

#[derive(Debug, Clone, Default)]
pub struct FileFetcher {
    /// Base for relative paths; the working directory when unset.
    base_dir: Option<PathBuf>,
}

impl FileFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: Some(base_dir.into()),
        }
    }

    fn resolve(&self, url: &str) -> Result<PathBuf, FetchError> {
        let raw = match url.split_once("://") {
            Some(("file", rest)) => rest,
            Some((scheme, _)) => {
                return Err(FetchError::UnsupportedScheme {
                    url: url.to_string(),
                    scheme: scheme.to_string(),
                });
            }
            None => url,
        };
        let path = PathBuf::from(raw);
        Ok(match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path,
        })
    }
}

impl SourceFetcher for FileFetcher {
    fn fetch(&self, url: &str) -> Result<FetchedImage, FetchError> {
        let path = self.resolve(url)?;
        let bytes = std::fs::read(&path).map_err(|source| match source.kind() {
            io::ErrorKind::NotFound => FetchError::NotFound(url.to_string()),
            _ => FetchError::Io {
                url: url.to_string(),
                source,
            },
        })?;
        let format = codec::detect_format(&bytes)
            .map_err(|_| FetchError::UnrecognizedFormat(url.to_string()))?;
        debug!(url, bytes = bytes.len(), format = ?format, "fetched source image");
        Ok(FetchedImage {
            bytes,
            mime_type: codec::mime_type(format).to_string(),
            extension: codec::extension(format),
        })
    }
}

/// Media type of a `Content-Type` value: parameters dropped, lowercased.
fn media_type(header: &str) -> Option<String> {
    let essence = header.split(';').next()?.trim();
    (!essence.is_empty()).then(|| essence.to_ascii_lowercase())
}

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Client whose every request must finish within `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(FetchError::Client)?;
        Ok(Self::with_client(client))
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

impl SourceFetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<FetchedImage, FetchError> {
        let transport = |source| FetchError::Http {
            url: url.to_string(),
            source,
        };
        let response = self.client.get(url).send().map_err(transport)?;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let declared = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .and_then(media_type);
        let bytes = response.bytes().map_err(transport)?.to_vec();
        let sniffed = codec::detect_format(&bytes).ok();

        let mime_type = match (declared, sniffed) {
            (Some(declared), _) => declared,
            (None, Some(format)) => codec::mime_type(format).to_string(),
            (None, None) => return Err(FetchError::UnrecognizedFormat(url.to_string())),
        };
        let extension = codec::extension_for_mime(&mime_type)
            .or_else(|| sniffed.map(codec::extension))
            .unwrap_or_default();
        debug!(url, bytes = bytes.len(), %mime_type, "downloaded source image");
        Ok(FetchedImage {
            bytes,
            mime_type,
            extension,
        })
    }
}

/// Sends `http(s)://` URLs to [`HttpFetcher`] and everything else to
/// [`FileFetcher`].
#[derive(Debug, Clone)]
pub struct SourceRouter {
    file: FileFetcher,
    http: HttpFetcher,
}

impl SourceRouter {
    pub fn new(file: FileFetcher, http: HttpFetcher) -> Self {
        Self { file, http }
    }
}

impl SourceFetcher for SourceRouter {
    fn fetch(&self, url: &str) -> Result<FetchedImage, FetchError> {
        match url.split_once("://") {
            Some((scheme, _))
                if scheme.eq_ignore_ascii_case("http") || scheme.eq_ignore_ascii_case("https") =>
            {
                self.http.fetch(url)
            }
            _ => self.file.fetch(url),
        }
    }
}
