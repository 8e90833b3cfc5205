use thiserror::Error;

/// Failure to obtain the channel catalog.  Fatal to the initial channel
/// listing only; nothing retries it.
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("catalog request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("catalog server returned status {0}")]
    Status(reqwest::StatusCode),

    #[error("failed to read catalog file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Failure to fetch a metadata document.  Always recoverable: the resolver
/// logs it and falls back to channel identity.
#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("metadata request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("metadata server returned status {0}")]
    Status(reqwest::StatusCode),

    #[error("metadata body is not JSON: {0}")]
    Decode(#[from] serde_json::Error),
}
