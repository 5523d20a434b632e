//! Protocol implementations.
//!
//! Each protocol has a parser module used by the runtime event loop.
//!
//! - `http`: HTTP/1.x payload protocol (incremental parser, fixed-body responses)

pub mod http;
