//! Error types for the contour tile engine

/// Result type alias for contour tile operations
pub type Result<T> = std::result::Result<T, Error>;

/// Contour tile engine error types
///
/// Cloneable so a single producer's outcome can be broadcast to every
/// waiter sharing its `AsyncCache` entry (see `cache::AsyncCache`).
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// Non-2xx response or network error fetching a DEM or terrain tile
    #[error("fetch failed: {0}")]
    FetchFailed(String),

    /// DEM raster tile failed to decode
    #[error("DEM decode failed: {0}")]
    DecodeFailed(String),

    /// A fetch did not complete before its deadline
    #[error("request timed out")]
    Timeout,

    /// The caller's cancellation token fired before the request completed
    #[error("request cancelled")]
    Cancelled,

    /// MVT parse error reading terrain polygons. Treated as "no polygons
    /// for this tile" at the call site; kept as its own variant for logging.
    #[error("vector tile parse failed: {0}")]
    VectorParseFailed(String),

    /// A geometry predicate failed during simplification or terrain
    /// splitting. Swallowed at the call site (original geometry is kept);
    /// kept as its own variant for logging.
    #[error("geometry operation failed: {0}")]
    GeometryFailed(String),

    /// Resolved to zero contour segments and zero terrain polygons. Not an
    /// error at the API boundary — `fetch_contour_tile` returns an empty
    /// tile body for it.
    #[error("empty result")]
    EmptyResult,

    /// A neighboring DEM tile needed to stitch borders could not be
    /// resolved. Non-fatal: the affected border is treated as absent.
    #[error("missing neighbor tile: {0}")]
    MissingNeighbor(String),

    /// Invalid or self-contradictory request configuration
    #[error("invalid configuration: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(String),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(String),

    /// Protocol buffer encode/decode error
    #[error("protobuf error: {0}")]
    Protobuf(String),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json(err.to_string())
    }
}

impl Error {
    /// Create a new fetch-failed error
    pub fn fetch_failed<S: Into<String>>(msg: S) -> Self {
        Error::FetchFailed(msg.into())
    }

    /// Create a new decode-failed error
    pub fn decode_failed<S: Into<String>>(msg: S) -> Self {
        Error::DecodeFailed(msg.into())
    }

    /// Create a new vector-parse-failed error
    pub fn vector_parse_failed<S: Into<String>>(msg: S) -> Self {
        Error::VectorParseFailed(msg.into())
    }

    /// Create a new geometry-failed error
    pub fn geometry_failed<S: Into<String>>(msg: S) -> Self {
        Error::GeometryFailed(msg.into())
    }

    /// Create a new missing-neighbor error
    pub fn missing_neighbor<S: Into<String>>(msg: S) -> Self {
        Error::MissingNeighbor(msg.into())
    }

    /// Create a new config error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }

    /// Create a new protobuf error
    pub fn protobuf<S: Into<String>>(msg: S) -> Self {
        Error::Protobuf(msg.into())
    }

    /// True for errors that represent "caller withdrew" rather than a real
    /// failure. `AsyncCache` uses this to decide whether to memoize a
    /// producer's outcome for other waiters.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// True for the two non-fatal outcomes that `fetch_contour_tile`
    /// resolves to `Ok` rather than propagating.
    pub fn is_benign(&self) -> bool {
        matches!(self, Error::EmptyResult | Error::MissingNeighbor(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = Error::decode_failed("bad PNG header");
        assert_eq!(err.to_string(), "DEM decode failed: bad PNG header");

        let err = Error::Timeout;
        assert_eq!(err.to_string(), "request timed out");
    }

    #[test]
    fn test_is_cancelled() {
        assert!(Error::Cancelled.is_cancelled());
        assert!(!Error::Timeout.is_cancelled());
    }

    #[test]
    fn test_is_benign() {
        assert!(Error::EmptyResult.is_benign());
        assert!(Error::missing_neighbor("nw").is_benign());
        assert!(!Error::Timeout.is_benign());
    }
}
