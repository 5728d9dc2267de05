//! Blocking stream adapter over a non-blocking engine.
//!
//! `TlsStream` pairs an engine with any `Read + Write` transport and
//! turns the wrap/unwrap state machine into ordinary blocking I/O:
//! the handshake loop performs whichever relay operation the engine
//! asks for, runs delegated tasks inline, and backs off linearly when
//! a step makes no progress.

use std::io::{self, Read, Write};
use std::thread;
use std::time::Duration;

use log::debug;

use btls_types::EngineError;

use crate::coordinator::HandshakeState;
use crate::engine::{EngineStatus, TlsEngine};

/// Upper bound on consecutive no-progress passes before giving up.
pub const MAX_HANDSHAKE_ATTEMPTS: u32 = 100;
/// Per-attempt linear backoff increment while stalled.
pub const HANDSHAKE_RETRY_DELAY_STEP: Duration = Duration::from_millis(10);

/// Transport chunk size for a single relay pass.
const WIRE_CHUNK: usize = 1 << 14;

/// A blocking TLS connection over any byte transport.
pub struct TlsStream<S: Read + Write, E: TlsEngine> {
    transport: S,
    engine: E,
    /// Ciphertext received but not yet consumed by the engine.
    wire_in: Vec<u8>,
    /// Plaintext decrypted but not yet handed to the caller.
    plain_in: Vec<u8>,
}

fn into_io(err: EngineError) -> io::Error {
    match err {
        EngineError::Io(io) => io,
        EngineError::Closed => io::Error::new(io::ErrorKind::UnexpectedEof, err.to_string()),
        other => io::Error::new(io::ErrorKind::InvalidData, other.to_string()),
    }
}

impl<S: Read + Write, E: TlsEngine> TlsStream<S, E> {
    pub fn new(transport: S, engine: E) -> Self {
        Self {
            transport,
            engine,
            wire_in: Vec::new(),
            plain_in: Vec::new(),
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn transport(&self) -> &S {
        &self.transport
    }

    /// Drive the handshake to completion, blocking on the transport
    /// as needed.
    pub fn handshake(&mut self) -> Result<(), EngineError> {
        let mut state = self.engine.handshake_status();
        if state == HandshakeState::NotHandshaking && !self.engine.session().is_established() {
            self.engine.begin_handshake()?;
            state = self.engine.handshake_status();
        }
        let mut attempts = 0u32;
        loop {
            match state {
                HandshakeState::NotHandshaking | HandshakeState::Finished => return Ok(()),
                HandshakeState::NeedWrap => self.flush_wrap()?,
                HandshakeState::NeedUnwrap => self.pump_unwrap()?,
                HandshakeState::NeedTask => {
                    if let Some(task) = self.engine.delegated_task() {
                        task.run();
                    }
                }
            }
            let next = self.engine.handshake_status();
            if next == state {
                attempts += 1;
                if attempts >= MAX_HANDSHAKE_ATTEMPTS {
                    return Err(EngineError::Stalled(format!(
                        "handshake made no progress after {MAX_HANDSHAKE_ATTEMPTS} attempts"
                    )));
                }
                thread::sleep(HANDSHAKE_RETRY_DELAY_STEP * attempts);
            } else {
                attempts = 0;
            }
            state = next;
        }
    }

    /// Send the close_notify exchange and stop writing.
    pub fn shutdown(&mut self) -> Result<(), EngineError> {
        self.engine.close_outbound();
        loop {
            let mut out = vec![0u8; WIRE_CHUNK];
            let result = self.engine.wrap(&[], &mut out)?;
            if result.produced == 0 {
                break;
            }
            self.transport.write_all(&out[..result.produced])?;
        }
        self.transport.flush()?;
        Ok(())
    }

    /// One wrap pass: relay whatever ciphertext the engine holds.
    fn flush_wrap(&mut self) -> Result<(), EngineError> {
        let mut out = vec![0u8; WIRE_CHUNK];
        let result = self.engine.wrap(&[], &mut out)?;
        if result.produced > 0 {
            self.transport.write_all(&out[..result.produced])?;
            self.transport.flush()?;
        }
        Ok(())
    }

    /// One unwrap pass: feed buffered or freshly read ciphertext.
    fn pump_unwrap(&mut self) -> Result<(), EngineError> {
        if self.wire_in.is_empty() {
            let mut chunk = [0u8; WIRE_CHUNK];
            let n = self.transport.read(&mut chunk)?;
            if n == 0 {
                return Err(EngineError::Closed);
            }
            self.wire_in.extend_from_slice(&chunk[..n]);
        }
        let mut plain = [0u8; WIRE_CHUNK];
        let result = {
            let mut dsts: [&mut [u8]; 1] = [&mut plain];
            self.engine.unwrap(&self.wire_in, &mut dsts)?
        };
        self.wire_in.drain(..result.consumed);
        if result.produced > 0 {
            self.plain_in.extend_from_slice(&plain[..result.produced]);
        }
        Ok(())
    }

    /// Decrypt at least one more byte into the plaintext buffer, or
    /// learn that the receive direction is done. Returns the engine's
    /// status so the caller can tell a byte-starved pass from a stall.
    fn fill_plain(&mut self) -> io::Result<EngineStatus> {
        if self.wire_in.is_empty() {
            let mut chunk = [0u8; WIRE_CHUNK];
            let n = self.transport.read(&mut chunk)?;
            if n == 0 {
                debug!("transport eof, closing receive direction");
                self.engine.close_inbound();
                return Ok(EngineStatus::Ok);
            }
            self.wire_in.extend_from_slice(&chunk[..n]);
        }
        let mut plain = [0u8; WIRE_CHUNK];
        let result = {
            let mut dsts: [&mut [u8]; 1] = [&mut plain];
            self.engine
                .unwrap(&self.wire_in, &mut dsts)
                .map_err(into_io)?
        };
        self.wire_in.drain(..result.consumed);
        self.plain_in.extend_from_slice(&plain[..result.produced]);
        // service a rehandshake the peer may have started
        match result.handshake {
            HandshakeState::NeedTask => {
                if let Some(task) = self.engine.delegated_task() {
                    task.run();
                }
            }
            HandshakeState::NeedWrap => self.flush_wrap().map_err(into_io)?,
            _ => {}
        }
        Ok(result.status)
    }
}

impl<S: Read + Write, E: TlsEngine> Read for TlsStream<S, E> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut attempts = 0u32;
        loop {
            if !self.plain_in.is_empty() {
                let n = buf.len().min(self.plain_in.len());
                buf[..n].copy_from_slice(&self.plain_in[..n]);
                self.plain_in.drain(..n);
                return Ok(n);
            }
            if self.engine.is_inbound_done() {
                return Ok(0);
            }
            let wire_before = self.wire_in.len();
            let status = self.fill_plain()?;
            if status == EngineStatus::BufferUnderflow {
                // buffered ciphertext was consumed but more is needed:
                // read again rather than count a stall
                attempts = 0;
                continue;
            }
            if self.plain_in.is_empty() && self.wire_in.len() == wire_before && wire_before > 0 {
                // buffered ciphertext the engine will not consume yet
                attempts += 1;
                if attempts >= MAX_HANDSHAKE_ATTEMPTS {
                    return Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        "tls stream made no read progress",
                    ));
                }
                thread::sleep(HANDSHAKE_RETRY_DELAY_STEP * attempts);
            } else {
                attempts = 0;
            }
        }
    }
}

impl<S: Read + Write, E: TlsEngine> Write for TlsStream<S, E> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut written = 0usize;
        let mut attempts = 0u32;
        let mut out = vec![0u8; WIRE_CHUNK];
        while written < buf.len() {
            let result = self
                .engine
                .wrap(&[&buf[written..]], &mut out)
                .map_err(into_io)?;
            if result.produced > 0 {
                self.transport.write_all(&out[..result.produced])?;
            }
            written += result.consumed;
            if self.engine.is_outbound_done() {
                if written == 0 {
                    return Err(io::Error::new(
                        io::ErrorKind::BrokenPipe,
                        "tls send direction closed",
                    ));
                }
                break;
            }
            if result.status == EngineStatus::BufferOverflow {
                // ciphertext beyond this pass stays queued: wrap again
                attempts = 0;
                continue;
            }
            if result.consumed == 0 && result.produced == 0 {
                match result.handshake {
                    HandshakeState::NeedUnwrap => {
                        self.fill_plain()?;
                    }
                    HandshakeState::NeedTask => {
                        if let Some(task) = self.engine.delegated_task() {
                            task.run();
                        }
                    }
                    _ => {
                        attempts += 1;
                        if attempts >= MAX_HANDSHAKE_ATTEMPTS {
                            return Err(io::Error::new(
                                io::ErrorKind::TimedOut,
                                "tls stream made no write progress",
                            ));
                        }
                        thread::sleep(HANDSHAKE_RETRY_DELAY_STEP * attempts);
                    }
                }
            } else {
                attempts = 0;
            }
        }
        self.transport.flush()?;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.transport.flush()
    }
}
