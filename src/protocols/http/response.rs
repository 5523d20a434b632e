//! Response serialization.
//!
//! Every response is a `200 OK` with a plain-text body:
//!
//! ```text
//! HTTP/<version> 200 OK\r\n
//! Content-Type: text/plain\r\n
//! Content-Length: <N>\r\n
//! \r\n
//! <N body bytes>
//! ```

use super::parser::Version;
use bytes::{BufMut, Bytes, BytesMut};

/// A response ready to be written.
///
/// The body is a shared, read-only buffer (usually straight from the
/// response cache); headers are synthesized when the response is written.
#[derive(Debug, Clone)]
pub struct Response {
    version: Version,
    body: Bytes,
}

impl Response {
    pub fn new(version: Version, body: Bytes) -> Self {
        Self { version, body }
    }

    /// Value of the `Content-Length` header; always the body length.
    pub fn content_length(&self) -> usize {
        self.body.len()
    }

    /// Append the full response (head and body) to `out` as one contiguous run.
    pub fn write_to(&self, out: &mut BytesMut) {
        let length = self.content_length().to_string();

        out.reserve(HEAD_OVERHEAD + length.len() + self.body.len());
        out.put_slice(b"HTTP/");
        out.put_slice(self.version.as_str().as_bytes());
        out.put_slice(b" 200 OK\r\nContent-Type: text/plain\r\nContent-Length: ");
        out.put_slice(length.as_bytes());
        out.put_slice(b"\r\n\r\n");
        out.put_slice(&self.body);
    }
}

#[cfg(test)]
impl Response {
    pub(crate) fn body(&self) -> &Bytes {
        &self.body
    }

    /// Encode into a fresh buffer.
    fn encode(&self) -> BytesMut {
        let mut out = BytesMut::new();
        self.write_to(&mut out);
        out
    }
}

/// Bytes of the response head excluding the length digits.
const HEAD_OVERHEAD: usize = 64;
