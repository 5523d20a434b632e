//! Request values and the callback sink that builds them.

use super::parser::{Parser, ParserCallbacks, Version};

/// A parsed request head. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    method: Vec<u8>,
    url: Vec<u8>,
    headers: Vec<(Vec<u8>, Vec<u8>)>,
    version: Version,
    keep_alive: bool,
}

impl Request {
    pub fn method(&self) -> &[u8] {
        &self.method
    }

    /// The raw request target.
    pub fn url(&self) -> &[u8] {
        &self.url
    }

    /// Path component of the target, without query or fragment.
    ///
    /// Absolute-form targets (`http://host/path`) yield the path after the
    /// authority, or `/` when there is none.
    pub fn path(&self) -> &[u8] {
        let mut target = self.url.as_slice();

        const SCHEMES: [&[u8]; 2] = [b"http://", b"https://"];
        for scheme in SCHEMES {
            if target.len() >= scheme.len() && target[..scheme.len()].eq_ignore_ascii_case(scheme) {
                let after = &target[scheme.len()..];
                target = match after.iter().position(|&b| b == b'/') {
                    Some(slash) => &after[slash..],
                    None => b"/",
                };
                break;
            }
        }

        let end = target
            .iter()
            .position(|&b| b == b'?' || b == b'#')
            .unwrap_or(target.len());
        &target[..end]
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// Whether the connection stays open after the response.
    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// Number of header lines, duplicates included.
    pub fn header_count(&self) -> usize {
        self.headers.len()
    }
}

#[cfg(test)]
impl Request {
    /// First value of the named header, compared case-insensitively.
    fn header(&self, name: &str) -> Option<&[u8]> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name.as_bytes()))
            .map(|(_, v)| v.as_slice())
    }
}

/// Collects parser events for the request currently being parsed.
#[derive(Debug, Default)]
pub struct RequestAssembler {
    url: Option<Vec<u8>>,
    headers: Vec<(Vec<u8>, Vec<u8>)>,
    headers_complete: bool,
}

impl RequestAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop everything collected so far.
    pub fn reset(&mut self) {
        self.url = None;
        self.headers.clear();
        self.headers_complete = false;
    }

    /// Build the request once `parser` has consumed the whole message.
    ///
    /// Returns `None` while the header block or a declared body is still
    /// arriving. On success the assembler is left empty.
    pub fn take_request(&mut self, parser: &Parser) -> Option<Request> {
        if !self.headers_complete || !parser.is_complete() {
            return None;
        }
        let version = parser.http_version()?;
        let url = self.url.take()?;

        let request = Request {
            method: parser.method().to_vec(),
            url,
            headers: std::mem::take(&mut self.headers),
            version,
            keep_alive: parser.should_keep_alive(),
        };
        self.headers_complete = false;
        Some(request)
    }
}

#[cfg(test)]
impl RequestAssembler {
    /// True when nothing has been collected since the last reset.
    fn is_empty(&self) -> bool {
        self.url.is_none() && self.headers.is_empty() && !self.headers_complete
    }
}

impl ParserCallbacks for RequestAssembler {
    fn on_url(&mut self, url: &[u8]) {
        self.url = Some(url.to_vec());
    }

    fn on_header(&mut self, name: &[u8], value: &[u8]) {
        self.headers.push((name.to_vec(), value.to_vec()));
    }

    fn on_headers_complete(&mut self) {
        self.headers_complete = true;
    }
}
