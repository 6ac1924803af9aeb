use thiserror::Error;

#[derive(Debug, Error)]
pub enum MarketError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{upstream} returned status {status}")]
    Status { upstream: &'static str, status: u16 },

    #[error("{0} response had no usable price")]
    MissingPrice(&'static str),

    #[error("Unknown time frame: {0}")]
    UnknownTimeFrame(String),

    #[error("Invalid stream URL: {0}")]
    InvalidUri(#[from] http::uri::InvalidUri),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_websockets::Error),
}
