use http::StatusCode;
use thiserror::Error;

/// Why a request to the store did not go through.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid store url: {0}")]
    InvalidUri(#[from] http::uri::InvalidUri),
    #[error("failed to build request: {0}")]
    Http(#[from] http::Error),
    #[error("http error: {0}")]
    Hyper(#[from] hyper::Error),
    #[error("malformed store data: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to encode query: {0}")]
    Query(#[from] serde_urlencoded::ser::Error),
    #[error("invalid tls server name: {0}")]
    ServerName(String),
    #[error("permission denied by the record store")]
    PermissionDenied,
    #[error("record store responded with {status}: {message}")]
    Status { status: StatusCode, message: String },
    #[error("too many redirects")]
    TooManyRedirects,
    #[error("record store closed the event stream: {0}")]
    StreamClosed(String),
    #[error("record store is unavailable")]
    Unavailable,
}

#[derive(Error, Debug)]
pub enum StoreError {
    /// Creating or deleting a record failed.
    #[error("writing {path} failed: {source}")]
    Write {
        path: String,
        #[source]
        source: TransportError,
    },
    /// Reading or subscribing failed.
    #[error("reading {path} failed: {source}")]
    Read {
        path: String,
        #[source]
        source: TransportError,
    },
    #[error("invalid record key {0:?}")]
    InvalidKey(String),
}

impl StoreError {
    pub(crate) fn write(path: impl Into<String>, source: impl Into<TransportError>) -> Self {
        Self::Write {
            path: path.into(),
            source: source.into(),
        }
    }

    pub(crate) fn read(path: impl Into<String>, source: impl Into<TransportError>) -> Self {
        Self::Read {
            path: path.into(),
            source: source.into(),
        }
    }
}
