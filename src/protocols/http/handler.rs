//! Request dispatch: the request path selects the response body size.
//!
//! `/2048` yields exactly 2048 bytes of `X`. An empty path or a path that is
//! not a decimal number falls back to the default size. A decimal size that
//! cannot be served (above the optional ceiling, or too large to allocate)
//! is an error, and the connection is closed without a response.

use super::request::Request;
use super::response::Response;
use crate::cache::{CacheStats, ResponseCache};
use std::fmt;

/// Body size used when the path does not name one.
pub const DEFAULT_PAYLOAD_SIZE: usize = 1024;

/// A request whose path named a size that cannot be served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadError {
    /// Above the configured ceiling, or not representable as `usize`.
    TooLarge {
        requested: String,
        limit: Option<usize>,
    },
    /// The body buffer could not be allocated.
    Alloc { size: usize },
}

impl fmt::Display for PayloadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayloadError::TooLarge {
                requested,
                limit: Some(limit),
            } => write!(f, "payload size {requested} exceeds limit {limit}"),
            PayloadError::TooLarge {
                requested,
                limit: None,
            } => write!(f, "payload size {requested} is out of range"),
            PayloadError::Alloc { size } => {
                write!(f, "failed to allocate a {size}-byte payload")
            }
        }
    }
}

impl std::error::Error for PayloadError {}

/// Turns requests into responses, memoizing bodies by size.
#[derive(Debug)]
pub struct PayloadHandler {
    cache: ResponseCache,
    default_size: usize,
    max_size: Option<usize>,
}

impl Default for PayloadHandler {
    fn default() -> Self {
        Self::new(DEFAULT_PAYLOAD_SIZE, None)
    }
}

impl PayloadHandler {
    /// `max_size` of `None` serves any size the path names.
    pub fn new(default_size: usize, max_size: Option<usize>) -> Self {
        Self {
            cache: ResponseCache::new(),
            default_size,
            max_size,
        }
    }

    /// Build the response for `request`.
    pub fn handle(&mut self, request: &Request) -> Result<Response, PayloadError> {
        let size = self.payload_size(request.path())?;
        let body = self
            .cache
            .get_or_build(size)
            .map_err(|_| PayloadError::Alloc { size })?;
        Ok(Response::new(request.version(), body))
    }

    /// Body size selected by `path`.
    pub fn payload_size(&self, path: &[u8]) -> Result<usize, PayloadError> {
        let digits = path.strip_prefix(b"/").unwrap_or(path);
        if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
            return Ok(self.default_size);
        }

        let too_large = || PayloadError::TooLarge {
            requested: String::from_utf8_lossy(digits).into_owned(),
            limit: self.max_size,
        };
        let size = std::str::from_utf8(digits)
            .ok()
            .and_then(|d| d.parse::<usize>().ok())
            .ok_or_else(too_large)?;
        match self.max_size {
            Some(limit) if size > limit => Err(too_large()),
            _ => Ok(size),
        }
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}
