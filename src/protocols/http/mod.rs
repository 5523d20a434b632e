//! HTTP/1.x payload protocol.
//!
//! A deliberately small subset of HTTP/1.1 aimed at benchmarking the runtime:
//!
//! - Requests are parsed incrementally by a push parser (`parser`) whose
//!   events are collected into an immutable `Request` (`request`).
//! - The request path picks the response body size (`handler`); bodies are
//!   memoized per size by the event loop's `ResponseCache`.
//! - Every response is `200 OK` with `Content-Type: text/plain` and an exact
//!   `Content-Length` (`response`).
//!
//! ## Protocol Format
//!
//! ```text
//! Request:  GET /5 HTTP/1.1\r\n\r\n
//! Response: HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: 5\r\n\r\nXXXXX
//! ```
//!
//! Chunked transfer coding, trailers and TLS are not supported.

pub mod handler;
pub mod parser;
pub mod request;
pub mod response;

pub use handler::PayloadHandler;
pub use parser::{Parser, Status};
pub use request::{Request, RequestAssembler};
