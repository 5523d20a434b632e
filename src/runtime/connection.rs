//! Per-connection HTTP state machine.
//!
//! ```text
//! Idle --bytes--> Parsing --request complete--> Dispatching --flushed--> Idle
//!                                                           \--close---> Closed
//! ```
//!
//! A connection owns its transport, at most one live parser and at most one
//! in-flight request. The parser is created lazily when the first byte of a
//! request arrives and dropped once that request is complete, so a fresh
//! parser is built for every request on a persistent connection.
//!
//! The transport is anything `Read + Write` in non-blocking mode; the event
//! loop drives it with [`Connection::drive`] whenever the socket is ready.

use crate::protocols::http::{PayloadHandler, Parser, Request, RequestAssembler, Status};
use bytes::{Buf, BytesMut};
use std::io::{self, Read, Write};
use tracing::trace;

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// No parser, no request in flight.
    Idle,
    /// Parser live, request head still arriving.
    Parsing,
    /// Request built, response queued or being written.
    Dispatching,
    /// Terminal; the transport should be dropped.
    Closed,
}

/// What the event loop should wait for next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// Wait for the socket to become readable.
    Read,
    /// Response bytes remain; wait for the socket to become writable.
    Write,
    /// Close the connection.
    Close,
}

/// A single client connection.
#[derive(Debug)]
pub struct Connection<S> {
    stream: S,
    state: ConnState,
    parser: Option<Parser>,
    assembler: RequestAssembler,
    request: Option<Request>,
    /// Bytes read past the end of the previous request.
    pending: BytesMut,
    /// Serialized response not yet accepted by the transport.
    outbound: BytesMut,
    requests_served: u64,
}

impl<S: Read + Write> Connection<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            state: ConnState::Idle,
            parser: None,
            assembler: RequestAssembler::new(),
            request: None,
            pending: BytesMut::new(),
            outbound: BytesMut::new(),
            requests_served: 0,
        }
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    pub fn stream_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    pub fn requests_served(&self) -> u64 {
        self.requests_served
    }

    /// Run the connection until the transport would block or it closes.
    ///
    /// Reads until the socket is drained, parses, dispatches complete
    /// requests to `handler` one at a time and flushes responses. `scratch`
    /// is the event loop's shared read buffer.
    ///
    /// An error means the connection is finished: parse errors, peer resets
    /// and write failures all end here. Partial state is cleared first.
    pub fn drive(&mut self, scratch: &mut [u8], handler: &mut PayloadHandler) -> io::Result<Progress> {
        match self.step(scratch, handler) {
            Ok(Progress::Close) => {
                self.close();
                Ok(Progress::Close)
            }
            Ok(progress) => Ok(progress),
            Err(e) => {
                self.close();
                Err(e)
            }
        }
    }

    fn step(&mut self, scratch: &mut [u8], handler: &mut PayloadHandler) -> io::Result<Progress> {
        loop {
            match self.state {
                ConnState::Closed => return Ok(Progress::Close),
                ConnState::Dispatching => {
                    if !self.flush()? {
                        return Ok(Progress::Write);
                    }

                    let keep_alive = self.request.take().is_some_and(|r| r.keep_alive());
                    self.requests_served += 1;
                    if !keep_alive {
                        trace!("Closing after response");
                        return Ok(Progress::Close);
                    }
                    self.state = ConnState::Idle;
                }
                ConnState::Idle | ConnState::Parsing => {
                    if !self.pending.is_empty() {
                        let chunk = self.pending.split().freeze();
                        self.feed(&chunk, handler)?;
                        continue;
                    }

                    match self.stream.read(scratch) {
                        Ok(0) => {
                            if self.state == ConnState::Parsing {
                                return Err(io::Error::new(
                                    io::ErrorKind::UnexpectedEof,
                                    "peer closed mid-request",
                                ));
                            }
                            return Ok(Progress::Close);
                        }
                        Ok(n) => self.feed(&scratch[..n], handler)?,
                        Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                            return Ok(Progress::Read);
                        }
                        Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                        Err(e) => return Err(e),
                    }
                }
            }
        }
    }

    /// Push one chunk into the current parser, creating it if needed.
    fn feed(&mut self, chunk: &[u8], handler: &mut PayloadHandler) -> io::Result<()> {
        debug_assert!(self.request.is_none(), "request already in flight");

        let parser = self.parser.get_or_insert_with(Parser::new);
        self.state = ConnState::Parsing;

        let consumed = match parser.feed(chunk, &mut self.assembler) {
            Ok(Status::Partial) => return Ok(()),
            Ok(Status::Complete { consumed }) => consumed,
            Err(e) => return Err(io::Error::new(io::ErrorKind::InvalidData, e)),
        };

        let request = self
            .assembler
            .take_request(parser)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "incomplete request head"))?;
        self.parser = None;

        // One request at a time; anything pipelined waits for the next cycle.
        self.pending.extend_from_slice(&chunk[consumed..]);

        trace!(
            method = %String::from_utf8_lossy(request.method()),
            url = %String::from_utf8_lossy(request.url()),
            headers = request.header_count(),
            "Dispatching request"
        );
        let response = handler
            .handle(&request)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        self.state = ConnState::Dispatching;
        response.write_to(&mut self.outbound);
        self.request = Some(request);
        Ok(())
    }

    /// Write queued response bytes. Returns `true` once all are written.
    fn flush(&mut self) -> io::Result<bool> {
        while !self.outbound.is_empty() {
            match self.stream.write(&self.outbound) {
                Ok(0) => return Err(io::Error::new(io::ErrorKind::WriteZero, "write returned 0")),
                Ok(n) => self.outbound.advance(n),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(true)
    }

    /// Drop all per-request state and enter `Closed`.
    fn close(&mut self) {
        self.parser = None;
        self.request = None;
        self.assembler.reset();
        self.pending.clear();
        self.outbound.clear();
        self.state = ConnState::Closed;
    }
}

#[cfg(test)]
impl<S> Connection<S> {
    fn stream(&self) -> &S {
        &self.stream
    }

    fn has_parser(&self) -> bool {
        self.parser.is_some()
    }

    fn in_flight(&self) -> Option<&Request> {
        self.request.as_ref()
    }
}
