//! The boundary to the underlying TLS protocol engine.
//!
//! Record framing, cryptography, and certificate parsing live behind
//! `TlsBackend`. The backend performs all of its wire I/O against a
//! [`BufferFd`](crate::relay::BufferFd): it reads ciphertext from the
//! inbound relay, writes ciphertext to the outbound relay, and records
//! every alert it sends or receives in the ledger. It must never block
//! and never perform real I/O.

use btls_types::{EngineError, KeyAlgorithm};

use crate::config::EngineConfig;
use crate::relay::BufferFd;
use crate::{CipherSuite, Direction, TlsVersion};

/// A peer certificate as surfaced by the backend: raw DER plus the
/// already-extracted public key algorithm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerCert {
    pub der: Vec<u8>,
    pub key_algorithm: KeyAlgorithm,
}

/// Version and cipher suite fixed by the handshake so far, available
/// before the handshake completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NegotiatedParams {
    pub version: TlsVersion,
    pub suite: CipherSuite,
}

/// Negotiated channel metadata, available once the handshake completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    pub version: TlsVersion,
    pub suite: CipherSuite,
    pub session_id: Vec<u8>,
}

/// Result of driving the handshake one step.
#[derive(Debug)]
pub enum StepOutcome {
    /// The backend made progress (consumed or produced bytes, or
    /// advanced its internal state).
    Progress,
    /// The backend needs relay capacity or more peer bytes.
    WouldBlock,
    /// The handshake failed. Any closing alert has already been
    /// written to the outbound relay and recorded in the ledger.
    Fatal(EngineError),
}

/// Result of submitting application data for encryption.
#[derive(Debug)]
pub enum WriteOutcome {
    /// `n` plaintext bytes were encrypted into the outbound relay.
    Wrote(usize),
    /// No outbound relay capacity, or the handshake is still running.
    WouldBlock,
    /// The send direction has been shut down.
    Shutdown,
    Fatal(EngineError),
}

/// Result of requesting decrypted application data.
#[derive(Debug)]
pub enum ReadOutcome {
    /// Decrypted plaintext, at most the requested length, never empty.
    Data(Vec<u8>),
    /// Nothing decryptable buffered yet.
    WouldBlock,
    /// The peer has cleanly ended the receive direction.
    Shutdown,
    Fatal(EngineError),
}

/// The underlying TLS protocol engine.
pub trait TlsBackend {
    /// Apply connection configuration. Called exactly once, before
    /// `reset_handshake`.
    fn configure(&mut self, config: &EngineConfig) -> Result<(), EngineError>;

    /// Reset handshake state for a fresh handshake in the given role.
    fn reset_handshake(&mut self, as_server: bool) -> Result<(), EngineError>;

    /// Drive the handshake as far as the relay buffers allow.
    fn step_handshake(&mut self, fd: &mut BufferFd) -> StepOutcome;

    /// Whether the current handshake has completed.
    fn handshake_complete(&self) -> bool;

    /// Whether the handshake is paused waiting for the caller to
    /// validate the peer's certificate chain.
    fn needs_cert_validation(&self) -> bool;

    /// Deliver the certificate validation verdict: 0 accepts the
    /// chain, any other value rejects it and fails the handshake.
    fn complete_cert_validation(&mut self, result: i32) -> Result<(), EngineError>;

    /// Parameters fixed so far by an in-flight handshake.
    fn preliminary_info(&self) -> Option<NegotiatedParams>;

    /// Negotiated metadata of a completed handshake.
    fn channel_info(&self) -> Option<ChannelInfo>;

    /// The peer's certificate chain, leaf first. Empty until received.
    fn peer_chain(&self) -> Vec<PeerCert>;

    /// Encrypt application plaintext into the outbound relay. An empty
    /// `data` is a flush opportunity: the backend moves any internally
    /// queued records into the relay and reports `WouldBlock`.
    fn write_app(&mut self, data: &[u8], fd: &mut BufferFd) -> WriteOutcome;

    /// Decrypt up to `max` bytes of application plaintext from the
    /// inbound relay.
    fn read_app(&mut self, max: usize, fd: &mut BufferFd) -> ReadOutcome;

    /// Start a full renegotiation (TLS 1.2 and below).
    fn renegotiate(&mut self) -> Result<(), EngineError>;

    /// Request post-handshake client authentication (TLS 1.3 server).
    fn request_client_auth(&mut self) -> Result<(), EngineError>;

    /// Issue a key update (TLS 1.3).
    fn key_update(&mut self) -> Result<(), EngineError>;

    /// Cleanly shut down one direction. An outbound shutdown writes
    /// the close_notify alert to the outbound relay and records it.
    fn shutdown(&mut self, direction: Direction, fd: &mut BufferFd) -> Result<(), EngineError>;

    /// Release backend resources. The backend is unusable afterwards.
    fn close(&mut self);
}
