//! Incremental HTTP/1.x request parser.
//!
//! Bytes are pushed in with [`Parser::feed`] in chunks of any size. As each
//! syntactic unit is recognized the parser calls back into a
//! [`ParserCallbacks`] implementation:
//!
//! - `on_url` once the request line is complete
//! - `on_header` once per header line, in arrival order
//! - `on_headers_complete` at the blank line ending the header block
//!
//! Lines that arrive whole inside one chunk are handed to the callbacks
//! straight from the caller's buffer. Only a line split across chunks is
//! copied into the parser's carry buffer until its terminator shows up.
//!
//! A declared `Content-Length` body is skipped so the next request on the
//! connection starts at the right byte. `Transfer-Encoding` is rejected.

use std::fmt;

/// Longest request line or header line accepted, in bytes.
pub const MAX_LINE_LEN: usize = 8 * 1024;

/// Most header lines accepted in one request.
pub const MAX_HEADERS: usize = 100;

/// Receiver of parser events.
pub trait ParserCallbacks {
    /// The request target, exactly as it appeared on the request line.
    fn on_url(&mut self, url: &[u8]);

    /// One header line. `value` has surrounding whitespace removed.
    fn on_header(&mut self, name: &[u8], value: &[u8]);

    /// The blank line terminating the header block was seen.
    fn on_headers_complete(&mut self);
}

/// HTTP protocol version of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    Http10,
    Http11,
}

impl Version {
    /// Version number as written in a status line, e.g. `"1.1"`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Version::Http10 => "1.0",
            Version::Http11 => "1.1",
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of feeding a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// The message is not finished yet; feed more bytes.
    Partial,
    /// The message is finished. `consumed` bytes of the last chunk belong to
    /// it; anything after that belongs to the next request.
    Complete { consumed: usize },
}

/// Malformed or unsupported input. Always fatal for the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Request line is not `METHOD SP TARGET SP HTTP/x.y`.
    InvalidRequestLine,
    /// Method token contains non-token characters.
    InvalidMethod,
    /// HTTP version other than 1.0 or 1.1.
    UnsupportedVersion,
    /// Header line without a `:` separator or with an invalid name.
    InvalidHeader,
    /// Content-Length is not a decimal number, or repeated with a different value.
    InvalidContentLength,
    /// Transfer-Encoding is not supported.
    UnsupportedTransferEncoding,
    /// A line exceeded [`MAX_LINE_LEN`].
    LineTooLong,
    /// More than [`MAX_HEADERS`] header lines.
    TooManyHeaders,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::InvalidRequestLine => write!(f, "invalid request line"),
            ParseError::InvalidMethod => write!(f, "invalid method"),
            ParseError::UnsupportedVersion => write!(f, "unsupported HTTP version"),
            ParseError::InvalidHeader => write!(f, "invalid header line"),
            ParseError::InvalidContentLength => write!(f, "invalid content-length"),
            ParseError::UnsupportedTransferEncoding => {
                write!(f, "transfer-encoding is not supported")
            }
            ParseError::LineTooLong => write!(f, "line exceeds {MAX_LINE_LEN} bytes"),
            ParseError::TooManyHeaders => write!(f, "more than {MAX_HEADERS} headers"),
        }
    }
}

impl std::error::Error for ParseError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    RequestLine,
    Headers,
    Body { remaining: usize },
    Done,
}

/// Value of the `Connection` header, as far as persistence is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Persistence {
    Unspecified,
    Close,
    KeepAlive,
}

/// Push parser for a single request.
///
/// One instance handles exactly one message; create a fresh parser for the
/// next request on the same connection.
#[derive(Debug)]
pub struct Parser {
    state: State,
    /// Partial line carried over from the previous chunk.
    carry: Vec<u8>,
    method: Vec<u8>,
    version: Option<Version>,
    persistence: Persistence,
    content_length: Option<usize>,
    header_count: usize,
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser {
    pub fn new() -> Self {
        Self {
            state: State::RequestLine,
            carry: Vec::new(),
            method: Vec::new(),
            version: None,
            persistence: Persistence::Unspecified,
            content_length: None,
            header_count: 0,
        }
    }

    /// Push a chunk of input through the parser.
    ///
    /// Callbacks fire before this returns. After `Status::Complete` further
    /// calls consume nothing.
    pub fn feed<C: ParserCallbacks>(
        &mut self,
        chunk: &[u8],
        callbacks: &mut C,
    ) -> Result<Status, ParseError> {
        let mut pos = 0;

        loop {
            match self.state {
                State::Done => return Ok(Status::Complete { consumed: pos }),
                State::Body { remaining } => {
                    let take = remaining.min(chunk.len() - pos);
                    pos += take;
                    if take == remaining {
                        self.state = State::Done;
                        continue;
                    }
                    self.state = State::Body {
                        remaining: remaining - take,
                    };
                    return Ok(Status::Partial);
                }
                State::RequestLine | State::Headers => {
                    if pos == chunk.len() {
                        return Ok(Status::Partial);
                    }

                    let rest = &chunk[pos..];
                    let Some(lf) = rest.iter().position(|&b| b == b'\n') else {
                        if self.carry.len() + rest.len() > MAX_LINE_LEN {
                            return Err(ParseError::LineTooLong);
                        }
                        self.carry.extend_from_slice(rest);
                        return Ok(Status::Partial);
                    };
                    pos += lf + 1;

                    if self.carry.is_empty() {
                        self.line(&rest[..lf], callbacks)?;
                    } else {
                        if self.carry.len() + lf > MAX_LINE_LEN {
                            return Err(ParseError::LineTooLong);
                        }
                        let mut line = std::mem::take(&mut self.carry);
                        line.extend_from_slice(&rest[..lf]);
                        self.line(&line, callbacks)?;
                    }
                }
            }
        }
    }

    /// Version from the request line, once it has been parsed.
    pub fn http_version(&self) -> Option<Version> {
        self.version
    }

    /// Method token from the request line; empty until it has been parsed.
    pub fn method(&self) -> &[u8] {
        &self.method
    }

    /// Whether the connection may carry another request after this one.
    ///
    /// HTTP/1.1 persists unless the client sent `Connection: close`;
    /// HTTP/1.0 persists only with `Connection: keep-alive`.
    pub fn should_keep_alive(&self) -> bool {
        match (self.version, self.persistence) {
            (None, _) => false,
            (Some(_), Persistence::Close) => false,
            (Some(Version::Http11), _) => true,
            (Some(Version::Http10), Persistence::KeepAlive) => true,
            (Some(Version::Http10), Persistence::Unspecified) => false,
        }
    }

    /// True once the whole message, body included, has been consumed.
    pub fn is_complete(&self) -> bool {
        self.state == State::Done
    }

    fn line<C: ParserCallbacks>(&mut self, line: &[u8], callbacks: &mut C) -> Result<(), ParseError> {
        if line.len() > MAX_LINE_LEN {
            return Err(ParseError::LineTooLong);
        }
        let line = line.strip_suffix(b"\r").unwrap_or(line);

        match self.state {
            State::RequestLine => {
                // Stray empty lines ahead of a request are tolerated.
                if line.is_empty() {
                    return Ok(());
                }
                self.request_line(line, callbacks)?;
                self.state = State::Headers;
            }
            State::Headers => {
                if line.is_empty() {
                    callbacks.on_headers_complete();
                    self.state = match self.content_length {
                        Some(len) if len > 0 => State::Body { remaining: len },
                        _ => State::Done,
                    };
                } else {
                    self.header_line(line, callbacks)?;
                }
            }
            State::Body { .. } | State::Done => {}
        }
        Ok(())
    }

    fn request_line<C: ParserCallbacks>(
        &mut self,
        line: &[u8],
        callbacks: &mut C,
    ) -> Result<(), ParseError> {
        let mut parts = line.split(|&b| b == b' ');
        let (Some(method), Some(target), Some(version), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(ParseError::InvalidRequestLine);
        };

        if method.is_empty() || !method.iter().all(|&b| is_token(b)) {
            return Err(ParseError::InvalidMethod);
        }
        if target.is_empty() || target.iter().any(|b| b.is_ascii_control()) {
            return Err(ParseError::InvalidRequestLine);
        }

        self.version = Some(match version {
            b"HTTP/1.1" => Version::Http11,
            b"HTTP/1.0" => Version::Http10,
            v if v.starts_with(b"HTTP/") => return Err(ParseError::UnsupportedVersion),
            _ => return Err(ParseError::InvalidRequestLine),
        });
        self.method = method.to_vec();

        callbacks.on_url(target);
        Ok(())
    }

    fn header_line<C: ParserCallbacks>(
        &mut self,
        line: &[u8],
        callbacks: &mut C,
    ) -> Result<(), ParseError> {
        if self.header_count == MAX_HEADERS {
            return Err(ParseError::TooManyHeaders);
        }

        let colon = line
            .iter()
            .position(|&b| b == b':')
            .ok_or(ParseError::InvalidHeader)?;
        let name = &line[..colon];
        let value = line[colon + 1..].trim_ascii();

        // Also rejects obsolete line folding, which starts with whitespace.
        if name.is_empty() || !name.iter().all(|&b| is_token(b)) {
            return Err(ParseError::InvalidHeader);
        }

        if name.eq_ignore_ascii_case(b"connection") {
            for option in value.split(|&b| b == b',').map(|o| o.trim_ascii()) {
                if option.eq_ignore_ascii_case(b"close") {
                    self.persistence = Persistence::Close;
                } else if option.eq_ignore_ascii_case(b"keep-alive")
                    && self.persistence != Persistence::Close
                {
                    self.persistence = Persistence::KeepAlive;
                }
            }
        } else if name.eq_ignore_ascii_case(b"content-length") {
            let len = parse_content_length(value)?;
            match self.content_length {
                Some(prev) if prev != len => return Err(ParseError::InvalidContentLength),
                _ => self.content_length = Some(len),
            }
        } else if name.eq_ignore_ascii_case(b"transfer-encoding") {
            return Err(ParseError::UnsupportedTransferEncoding);
        }

        self.header_count += 1;
        callbacks.on_header(name, value);
        Ok(())
    }
}

fn parse_content_length(value: &[u8]) -> Result<usize, ParseError> {
    if value.is_empty() || !value.iter().all(u8::is_ascii_digit) {
        return Err(ParseError::InvalidContentLength);
    }
    std::str::from_utf8(value)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(ParseError::InvalidContentLength)
}

/// RFC 9110 `tchar`.
fn is_token(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default, PartialEq)]
    struct Recorder {
        url: Vec<Vec<u8>>,
        headers: Vec<(Vec<u8>, Vec<u8>)>,
        complete: usize,
    }

    impl ParserCallbacks for Recorder {
        fn on_url(&mut self, url: &[u8]) {
            self.url.push(url.to_vec());
        }

        fn on_header(&mut self, name: &[u8], value: &[u8]) {
            self.headers.push((name.to_vec(), value.to_vec()));
        }

        fn on_headers_complete(&mut self) {
            self.complete += 1;
        }
    }

    const REQUEST: &[u8] = b"GET /2048 HTTP/1.1\r\nHost: localhost\r\nAccept: */*\r\n\r\n";

    fn parse_all(input: &[u8]) -> (Parser, Recorder, Result<Status, ParseError>) {
        let mut parser = Parser::new();
        let mut rec = Recorder::default();
        let result = parser.feed(input, &mut rec);
        (parser, rec, result)
    }

    #[test]
    fn test_parse_simple_request() {
        let (parser, rec, result) = parse_all(REQUEST);

        assert_eq!(
            result,
            Ok(Status::Complete {
                consumed: REQUEST.len()
            })
        );
        assert_eq!(rec.url, vec![b"/2048".to_vec()]);
        assert_eq!(
            rec.headers,
            vec![
                (b"Host".to_vec(), b"localhost".to_vec()),
                (b"Accept".to_vec(), b"*/*".to_vec()),
            ]
        );
        assert_eq!(rec.complete, 1);
        assert_eq!(parser.method(), b"GET");
        assert_eq!(parser.http_version(), Some(Version::Http11));
        assert!(parser.is_complete());
    }

    #[test]
    fn test_split_at_every_offset() {
        let (_, whole, _) = parse_all(REQUEST);

        for split in 1..REQUEST.len() {
            let mut parser = Parser::new();
            let mut rec = Recorder::default();

            let first = parser.feed(&REQUEST[..split], &mut rec).unwrap();
            assert_eq!(first, Status::Partial, "split at {split}");
            let second = parser.feed(&REQUEST[split..], &mut rec).unwrap();
            assert_eq!(
                second,
                Status::Complete {
                    consumed: REQUEST.len() - split
                },
                "split at {split}"
            );
            assert_eq!(rec, whole, "split at {split}");
        }
    }

    #[test]
    fn test_byte_at_a_time() {
        let mut parser = Parser::new();
        let mut rec = Recorder::default();
        let mut last = Status::Partial;
        for b in REQUEST {
            last = parser.feed(std::slice::from_ref(b), &mut rec).unwrap();
        }
        assert_eq!(last, Status::Complete { consumed: 1 });
        assert_eq!(rec.url, vec![b"/2048".to_vec()]);
        assert_eq!(rec.headers.len(), 2);
    }

    #[test]
    fn test_duplicate_headers_kept_in_order() {
        let (_, rec, _) = parse_all(b"GET / HTTP/1.1\r\nX-A: 1\r\nX-B: 2\r\nX-A: 3\r\n\r\n");
        assert_eq!(
            rec.headers,
            vec![
                (b"X-A".to_vec(), b"1".to_vec()),
                (b"X-B".to_vec(), b"2".to_vec()),
                (b"X-A".to_vec(), b"3".to_vec()),
            ]
        );
    }

    #[test]
    fn test_leftover_after_message() {
        let mut input = REQUEST.to_vec();
        input.extend_from_slice(b"GET /1 HTTP/1.1\r\n");
        let (_, _, result) = parse_all(&input);
        assert_eq!(
            result,
            Ok(Status::Complete {
                consumed: REQUEST.len()
            })
        );
    }

    #[test]
    fn test_bare_lf_and_leading_blank_lines() {
        let (parser, rec, result) = parse_all(b"\r\n\nGET /7 HTTP/1.0\nHost: x\n\n");
        assert!(matches!(result, Ok(Status::Complete { .. })));
        assert_eq!(rec.url, vec![b"/7".to_vec()]);
        assert_eq!(parser.http_version(), Some(Version::Http10));
    }

    #[test]
    fn test_keep_alive_rules() {
        let cases: &[(&[u8], bool)] = &[
            (b"GET / HTTP/1.1\r\n\r\n", true),
            (b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n", false),
            (b"GET / HTTP/1.1\r\nconnection: Keep-Alive, CLOSE\r\n\r\n", false),
            (b"GET / HTTP/1.0\r\n\r\n", false),
            (b"GET / HTTP/1.0\r\nConnection: keep-alive\r\n\r\n", true),
            (b"GET / HTTP/1.0\r\nConnection: close\r\n\r\n", false),
        ];

        for (input, expected) in cases {
            let (parser, _, result) = parse_all(input);
            assert!(result.is_ok());
            assert_eq!(
                parser.should_keep_alive(),
                *expected,
                "{}",
                String::from_utf8_lossy(input)
            );
        }
    }

    #[test]
    fn test_keep_alive_unknown_before_request_line() {
        let (parser, _, result) = parse_all(b"GET / HT");
        assert_eq!(result, Ok(Status::Partial));
        assert!(!parser.should_keep_alive());
    }

    #[test]
    fn test_content_length_body_is_skipped() {
        let input = b"POST /5 HTTP/1.1\r\nContent-Length: 4\r\n\r\nab";
        let mut parser = Parser::new();
        let mut rec = Recorder::default();

        assert_eq!(parser.feed(input, &mut rec), Ok(Status::Partial));
        assert_eq!(rec.complete, 1);
        assert!(!parser.is_complete());

        assert_eq!(
            parser.feed(b"cdGET", &mut rec),
            Ok(Status::Complete { consumed: 2 })
        );
    }

    #[test]
    fn test_any_method_token_accepted() {
        let (parser, _, result) = parse_all(b"PURGE /1 HTTP/1.1\r\n\r\n");
        assert!(result.is_ok());
        assert_eq!(parser.method(), b"PURGE");
    }

    #[test]
    fn test_header_without_separator() {
        let (_, rec, result) = parse_all(b"GET / HTTP/1.1\r\nBogus header\r\n\r\n");
        assert_eq!(result, Err(ParseError::InvalidHeader));
        assert_eq!(rec.complete, 0);
    }

    #[test]
    fn test_malformed_request_lines() {
        let cases: &[(&[u8], ParseError)] = &[
            (b"GET /\r\n", ParseError::InvalidRequestLine),
            (b"GET / HTTP/1.1 extra\r\n", ParseError::InvalidRequestLine),
            (b"GET  / HTTP/1.1\r\n", ParseError::InvalidRequestLine),
            (b"G(T / HTTP/1.1\r\n", ParseError::InvalidMethod),
            (b"GET / HTTP/2.0\r\n", ParseError::UnsupportedVersion),
            (b"GET / FTP/1.1\r\n", ParseError::InvalidRequestLine),
        ];

        for (input, expected) in cases {
            let (_, _, result) = parse_all(input);
            assert_eq!(result, Err(expected.clone()), "{}", String::from_utf8_lossy(input));
        }
    }

    #[test]
    fn test_folded_header_rejected() {
        let (_, _, result) = parse_all(b"GET / HTTP/1.1\r\nX-A: 1\r\n  continued\r\n\r\n");
        assert_eq!(result, Err(ParseError::InvalidHeader));
    }

    #[test]
    fn test_transfer_encoding_rejected() {
        let (_, _, result) =
            parse_all(b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n");
        assert_eq!(result, Err(ParseError::UnsupportedTransferEncoding));
    }

    #[test]
    fn test_conflicting_content_length() {
        let (_, _, result) =
            parse_all(b"POST / HTTP/1.1\r\nContent-Length: 1\r\nContent-Length: 2\r\n\r\n");
        assert_eq!(result, Err(ParseError::InvalidContentLength));

        let (_, _, result) = parse_all(b"POST / HTTP/1.1\r\nContent-Length: -1\r\n\r\n");
        assert_eq!(result, Err(ParseError::InvalidContentLength));
    }

    #[test]
    fn test_line_too_long_across_chunks() {
        let mut parser = Parser::new();
        let mut rec = Recorder::default();
        let chunk = vec![b'a'; MAX_LINE_LEN / 2 + 1];

        assert_eq!(parser.feed(b"GET /", &mut rec), Ok(Status::Partial));
        assert_eq!(parser.feed(&chunk, &mut rec), Ok(Status::Partial));
        assert_eq!(parser.feed(&chunk, &mut rec), Err(ParseError::LineTooLong));
    }

    #[test]
    fn test_too_many_headers() {
        let mut input = b"GET / HTTP/1.1\r\n".to_vec();
        for i in 0..=MAX_HEADERS {
            input.extend_from_slice(format!("X-{i}: v\r\n").as_bytes());
        }
        input.extend_from_slice(b"\r\n");

        let (_, _, result) = parse_all(&input);
        assert_eq!(result, Err(ParseError::TooManyHeaders));
    }
}
