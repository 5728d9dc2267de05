//! Engine facades: the non-blocking wrap/unwrap relay surface.
//!
//! `wrap` moves application plaintext in and ciphertext out; `unwrap`
//! moves ciphertext in and plaintext out. Neither blocks: when an
//! operation cannot progress, the returned handshake state names the
//! operation that can. All handshake sequencing lives in the
//! coordinator; the facades only relay bytes and apply its effects.

use std::sync::Arc;

use log::debug;

use btls_types::EngineError;

use crate::backend::{ReadOutcome, StepOutcome, TlsBackend, WriteOutcome};
use crate::config::{ClientAuth, EngineConfig, KeyMaterial};
use crate::coordinator::{HandshakeCoordinator, HandshakeState, StepEffects};
use crate::relay::BufferFd;
use crate::session::{self, ResumptionEntry, Session};
use crate::task::{DelegatedTask, ValidationSlot};
use crate::trust::TrustVerifier;
use crate::{CipherSuite, Direction, TlsRole, TlsVersion, BUFFER_SIZE};

/// Relay buffer capacity used by [`StreamlinedEngine`].
pub const STREAMLINED_BUFFER_SIZE: usize = 1 << 14;

/// Overall status of a relay operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStatus {
    Ok,
    /// Both directions are closed.
    Closed,
    /// More source bytes are needed before anything can be produced.
    /// Reported by single-pass engines; the fixpoint engine retries
    /// internally instead.
    BufferUnderflow,
    /// Outbound ciphertext remains queued beyond what the destination
    /// could hold. Reported by single-pass engines.
    BufferOverflow,
}

/// Result of one wrap or unwrap call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineResult {
    /// Source bytes consumed.
    pub consumed: usize,
    /// Destination bytes produced.
    pub produced: usize,
    pub status: EngineStatus,
    pub handshake: HandshakeState,
}

/// Point-in-time security status of the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityStatus {
    pub secure: bool,
    pub version: Option<TlsVersion>,
    pub suite: Option<CipherSuite>,
    pub session_id: Option<Vec<u8>>,
}

/// The non-blocking TLS engine contract.
///
/// Engines are single-threaded per connection: `Send` but not
/// internally synchronized. A latched fatal condition is delivered as
/// an error exactly once, from the first wrap or unwrap after it was
/// recorded; a follow-up wrap flushes the closing alert bytes and then
/// reports both directions closed.
pub trait TlsEngine {
    /// Start the handshake, or a rehandshake on a live connection.
    /// Implicit on the first wrap or unwrap.
    fn begin_handshake(&mut self) -> Result<(), EngineError>;

    /// Encrypt plaintext from `srcs` (gathered in order) and move
    /// outbound ciphertext into `dst`.
    fn wrap(&mut self, srcs: &[&[u8]], dst: &mut [u8]) -> Result<EngineResult, EngineError>;

    /// Move ciphertext from `src` inward and scatter decrypted
    /// plaintext into `dsts` in order.
    fn unwrap(&mut self, src: &[u8], dsts: &mut [&mut [u8]]) -> Result<EngineResult, EngineError>;

    fn handshake_status(&mut self) -> HandshakeState;

    /// Hand out the pending validation task, at most once per
    /// validation event.
    fn delegated_task(&mut self) -> Option<DelegatedTask>;

    fn session(&self) -> &Session;

    fn status(&self) -> SecurityStatus;

    /// Mark the receive direction closed.
    fn close_inbound(&mut self);

    /// Queue a close_notify and mark the send direction closed. The
    /// alert leaves through a subsequent wrap.
    fn close_outbound(&mut self);

    fn is_inbound_done(&self) -> bool;

    fn is_outbound_done(&self) -> bool;

    /// Release all resources. Idempotent.
    fn cleanup(&mut self);

    // Configuration setters. Each fails once the connection is live.
    fn set_peer(&mut self, host: &str, port: u16) -> Result<(), EngineError>;
    fn set_cipher_suites(&mut self, suites: &[CipherSuite]) -> Result<(), EngineError>;
    fn set_protocol_range(&mut self, min: TlsVersion, max: TlsVersion)
        -> Result<(), EngineError>;
    fn set_client_auth(&mut self, mode: ClientAuth) -> Result<(), EngineError>;
    fn set_key_material(&mut self, material: KeyMaterial) -> Result<(), EngineError>;
    fn set_trust_verifiers(
        &mut self,
        verifiers: Vec<Arc<dyn TrustVerifier>>,
    ) -> Result<(), EngineError>;
}

/// Shared engine state and relay mechanics; the facades choose the
/// looping strategy and buffer sizing on top.
pub(crate) struct EngineCore<B: TlsBackend> {
    backend: B,
    config: EngineConfig,
    buffer_size: usize,
    fd: Option<BufferFd>,
    coordinator: HandshakeCoordinator,
    validation: ValidationSlot,
    session: Session,
    started: bool,
    released: bool,
    inbound_closed: bool,
    outbound_closed: bool,
}

impl<B: TlsBackend> EngineCore<B> {
    pub(crate) fn new(backend: B, config: EngineConfig, buffer_size: usize) -> Self {
        Self {
            backend,
            config,
            buffer_size,
            fd: None,
            coordinator: HandshakeCoordinator::new(),
            validation: ValidationSlot::default(),
            session: Session::default(),
            started: false,
            released: false,
            inbound_closed: false,
            outbound_closed: false,
        }
    }

    fn ensure_mutable(&self) -> Result<(), EngineError> {
        if self.started {
            return Err(EngineError::Config(
                "configuration is frozen once the connection is live".into(),
            ));
        }
        Ok(())
    }

    pub(crate) fn set_peer(&mut self, host: &str, port: u16) -> Result<(), EngineError> {
        self.ensure_mutable()?;
        self.config.peer_host = Some(host.to_string());
        self.config.peer_port = port;
        Ok(())
    }

    pub(crate) fn set_cipher_suites(&mut self, suites: &[CipherSuite]) -> Result<(), EngineError> {
        self.ensure_mutable()?;
        self.config.cipher_suites = suites.to_vec();
        Ok(())
    }

    pub(crate) fn set_protocol_range(
        &mut self,
        min: TlsVersion,
        max: TlsVersion,
    ) -> Result<(), EngineError> {
        self.ensure_mutable()?;
        if min > max {
            return Err(EngineError::Config(format!(
                "invalid protocol range: {min:?} > {max:?}"
            )));
        }
        self.config.min_version = min;
        self.config.max_version = max;
        Ok(())
    }

    pub(crate) fn set_client_auth(&mut self, mode: ClientAuth) -> Result<(), EngineError> {
        self.ensure_mutable()?;
        self.config.client_auth = mode;
        Ok(())
    }

    pub(crate) fn set_key_material(&mut self, material: KeyMaterial) -> Result<(), EngineError> {
        self.ensure_mutable()?;
        self.config.key_material = Some(material);
        Ok(())
    }

    pub(crate) fn set_trust_verifiers(
        &mut self,
        verifiers: Vec<Arc<dyn TrustVerifier>>,
    ) -> Result<(), EngineError> {
        self.ensure_mutable()?;
        self.config.trust_verifiers = verifiers;
        Ok(())
    }

    pub(crate) fn begin_handshake(&mut self) -> Result<(), EngineError> {
        if self.released {
            return Err(EngineError::Closed);
        }
        if self.inbound_closed || self.outbound_closed {
            return Err(EngineError::Closed);
        }
        let as_server = self.config.role == TlsRole::Server;
        let start_with_unwrap;
        if !self.started {
            let resolved = self.config.resolve_key_material()?;
            if as_server && resolved.is_none() {
                return Err(EngineError::Config(
                    "server role requires a certificate and private key".into(),
                ));
            }
            if self.config.key_material.is_none() {
                self.config.key_material = resolved;
            }
            self.backend.configure(&self.config)?;
            let fd = BufferFd::new(self.buffer_size)?;
            if as_server {
                session::initialize_server_cache(
                    session::DEFAULT_CACHE_SIZE,
                    session::DEFAULT_SESSION_LIFETIME,
                );
            }
            self.backend.reset_handshake(as_server)?;
            self.session = Session::new(
                &self.config,
                self.config.key_material.as_ref(),
                self.buffer_size,
            );
            self.fd = Some(fd);
            self.started = true;
            // servers wait for the client's first flight
            start_with_unwrap = as_server;
            debug!("handshake started as {:?}", self.config.role);
        } else {
            // rehandshake: the initiating side speaks first, so the
            // initial direction inverts relative to the first handshake
            start_with_unwrap = !as_server;
            let tls13 = matches!(self.session.protocol, Some(v) if v >= TlsVersion::Tls13);
            if tls13 {
                if as_server && self.config.client_auth == ClientAuth::Need {
                    self.backend.request_client_auth()?;
                } else {
                    self.backend.key_update()?;
                }
            } else {
                self.backend.renegotiate()?;
            }
            if let Some(fd) = self.fd.as_mut() {
                // prime the first flight into the outbound relay
                match self.backend.step_handshake(fd) {
                    StepOutcome::Fatal(err) => self.coordinator.record_fault(err),
                    StepOutcome::Progress | StepOutcome::WouldBlock => {}
                }
            }
            debug!("rehandshake requested");
        }
        let initial = if start_with_unwrap {
            HandshakeState::NeedUnwrap
        } else {
            HandshakeState::NeedWrap
        };
        self.coordinator.begin(initial);
        Ok(())
    }

    fn update_state(&mut self) {
        let Some(fd) = self.fd.as_mut() else { return };
        let effects =
            self.coordinator
                .evaluate(&mut self.backend, fd, &mut self.validation, &self.config);
        self.apply_effects(effects);
    }

    fn apply_effects(&mut self, effects: StepEffects) {
        if effects.refresh_session {
            self.refresh_session();
        }
        if effects.close_inbound {
            self.inbound_closed = true;
        }
        if effects.close_outbound {
            self.outbound_closed = true;
        }
    }

    fn refresh_session(&mut self) {
        let Some(info) = self.backend.channel_info() else {
            return;
        };
        let newly_established = !self.session.is_established();
        self.session.refresh(info, self.backend.peer_chain());
        if newly_established && self.config.role == TlsRole::Server {
            if let Some(cache) = session::server_cache() {
                if let Ok(mut cache) = cache.write() {
                    if let (Some(protocol), Some(suite)) =
                        (self.session.protocol, self.session.cipher_suite)
                    {
                        let peer_hint = self
                            .session
                            .peer_host
                            .as_deref()
                            .map(|host| (host, self.session.peer_port));
                        cache.insert(
                            ResumptionEntry::new(
                                self.session.session_id.clone(),
                                protocol,
                                suite,
                            ),
                            peer_hint,
                        );
                    }
                }
            }
        }
    }

    pub(crate) fn wrap(
        &mut self,
        srcs: &[&[u8]],
        dst: &mut [u8],
        multi_pass: bool,
    ) -> Result<EngineResult, EngineError> {
        if self.released {
            return Err(EngineError::Closed);
        }
        if !self.started {
            self.begin_handshake()?;
        }
        let mut consumed = 0usize;
        let mut produced = 0usize;
        loop {
            self.update_state();
            if self.coordinator.has_pending_fault() {
                break;
            }
            self.coordinator.pin_flush_finished();
            let pass_consumed = if self.outbound_closed {
                0
            } else {
                self.push_app_data(srcs, consumed)
            };
            let pass_produced = self.drain_outbound(&mut dst[produced..]);
            consumed += pass_consumed;
            produced += pass_produced;
            if !multi_pass || (pass_consumed == 0 && pass_produced == 0) {
                break;
            }
        }
        let hint = if !multi_pass
            && produced == dst.len()
            && self
                .fd
                .as_ref()
                .map(|fd| !fd.outbound.is_empty())
                .unwrap_or(false)
        {
            EngineStatus::BufferOverflow
        } else {
            EngineStatus::Ok
        };
        self.scan_alerts();
        self.finish_relay(consumed, produced, hint, "wrap")
    }

    pub(crate) fn unwrap(
        &mut self,
        src: &[u8],
        dsts: &mut [&mut [u8]],
        multi_pass: bool,
    ) -> Result<EngineResult, EngineError> {
        if self.released {
            return Err(EngineError::Closed);
        }
        if !self.started {
            self.begin_handshake()?;
        }
        let mut consumed = 0usize;
        let mut produced = 0usize;
        loop {
            if self.coordinator.has_pending_fault() {
                break;
            }
            let pass_in = self.feed_inbound(&src[consumed..]);
            consumed += pass_in;
            self.update_state();
            if self.coordinator.has_pending_fault() {
                break;
            }
            let pass_out = self.pull_app_data(dsts, produced);
            produced += pass_out;
            if !multi_pass || (pass_in == 0 && pass_out == 0) {
                break;
            }
        }
        let hint = if !multi_pass
            && produced == 0
            && consumed == src.len()
            && self.coordinator.state() == HandshakeState::NeedUnwrap
        {
            EngineStatus::BufferUnderflow
        } else {
            EngineStatus::Ok
        };
        self.scan_alerts();
        self.finish_relay(consumed, produced, hint, "unwrap")
    }

    /// Submit plaintext after skipping the `skip` bytes already
    /// consumed, returning how many more were accepted. With nothing
    /// left to submit, the backend is still offered one empty write so
    /// it can flush internally queued records, closing alerts in
    /// particular.
    fn push_app_data(&mut self, srcs: &[&[u8]], skip: usize) -> usize {
        let Some(fd) = self.fd.as_mut() else { return 0 };
        let mut remaining_skip = skip;
        let mut written = 0usize;
        let mut submitted = false;
        for src in srcs {
            if remaining_skip >= src.len() {
                remaining_skip -= src.len();
                continue;
            }
            submitted = true;
            let chunk = &src[remaining_skip..];
            remaining_skip = 0;
            match self.backend.write_app(chunk, fd) {
                WriteOutcome::Wrote(n) => {
                    written += n;
                    if n < chunk.len() {
                        return written;
                    }
                }
                WriteOutcome::WouldBlock => return written,
                WriteOutcome::Shutdown => {
                    self.outbound_closed = true;
                    return written;
                }
                WriteOutcome::Fatal(err) => {
                    self.coordinator.record_fault(err);
                    return written;
                }
            }
        }
        if !submitted {
            match self.backend.write_app(&[], fd) {
                WriteOutcome::Shutdown => self.outbound_closed = true,
                WriteOutcome::Fatal(err) => self.coordinator.record_fault(err),
                WriteOutcome::Wrote(_) | WriteOutcome::WouldBlock => {}
            }
        }
        written
    }

    /// Move outbound ciphertext into `dst`.
    fn drain_outbound(&mut self, dst: &mut [u8]) -> usize {
        let Some(fd) = self.fd.as_mut() else { return 0 };
        let take = dst.len().min(fd.outbound.read_capacity());
        if take == 0 {
            return 0;
        }
        let bytes = fd.outbound.read(take);
        dst[..bytes.len()].copy_from_slice(&bytes);
        bytes.len()
    }

    /// Move peer ciphertext into the inbound relay.
    fn feed_inbound(&mut self, src: &[u8]) -> usize {
        if self.inbound_closed || src.is_empty() {
            return 0;
        }
        let Some(fd) = self.fd.as_mut() else { return 0 };
        fd.inbound.write(src)
    }

    /// Pull decrypted plaintext into `dsts`, skipping the `skip` bytes
    /// already produced.
    fn pull_app_data(&mut self, dsts: &mut [&mut [u8]], skip: usize) -> usize {
        let Some(fd) = self.fd.as_mut() else { return 0 };
        let mut remaining_skip = skip;
        let mut produced = 0usize;
        for dst in dsts.iter_mut() {
            if remaining_skip >= dst.len() {
                remaining_skip -= dst.len();
                continue;
            }
            let space = dst.len() - remaining_skip;
            match self.backend.read_app(space, fd) {
                ReadOutcome::Data(bytes) => {
                    let n = bytes.len();
                    dst[remaining_skip..remaining_skip + n].copy_from_slice(&bytes);
                    produced += n;
                    if n < space {
                        return produced;
                    }
                    remaining_skip = 0;
                }
                ReadOutcome::WouldBlock => return produced,
                ReadOutcome::Shutdown => {
                    self.inbound_closed = true;
                    return produced;
                }
                ReadOutcome::Fatal(err) => {
                    self.coordinator.record_fault(err);
                    return produced;
                }
            }
        }
        produced
    }

    fn scan_alerts(&mut self) {
        let Some(fd) = self.fd.as_mut() else { return };
        let scan = fd.alerts.scan();
        let mut effects = StepEffects::default();
        self.coordinator.apply_scan(scan, &mut effects);
        self.apply_effects(effects);
    }

    fn finish_relay(
        &mut self,
        consumed: usize,
        produced: usize,
        hint: EngineStatus,
        op: &'static str,
    ) -> Result<EngineResult, EngineError> {
        if let Some(err) = self.coordinator.take_fault() {
            debug!("{op} delivering latched fault: {err}");
            return Err(err);
        }
        if self.coordinator.fault_observed() {
            // fault already delivered: once the closing flight has
            // fully left the relay, both directions are done
            let flushed = self
                .fd
                .as_ref()
                .map(|fd| fd.outbound.is_empty())
                .unwrap_or(true);
            if flushed {
                self.inbound_closed = true;
                self.outbound_closed = true;
            }
        }
        let handshake = self.coordinator.state();
        self.coordinator.note_returned_finished();
        let status = if self.inbound_closed && self.outbound_closed {
            EngineStatus::Closed
        } else {
            hint
        };
        self.try_cleanup();
        Ok(EngineResult {
            consumed,
            produced,
            status,
            handshake,
        })
    }

    pub(crate) fn handshake_status(&mut self) -> HandshakeState {
        if self.started && !self.released {
            if self
                .coordinator
                .poll_validation(&mut self.backend, &mut self.validation, &self.config)
            {
                return HandshakeState::NeedTask;
            }
            self.update_state();
        }
        self.coordinator.state()
    }

    pub(crate) fn delegated_task(&mut self) -> Option<DelegatedTask> {
        if !self.started || self.released {
            return None;
        }
        self.coordinator
            .poll_validation(&mut self.backend, &mut self.validation, &self.config);
        self.validation.take_task()
    }

    pub(crate) fn session(&self) -> &Session {
        &self.session
    }

    pub(crate) fn status(&self) -> SecurityStatus {
        match self.backend.channel_info() {
            Some(info) => SecurityStatus {
                secure: true,
                version: Some(info.version),
                suite: Some(info.suite),
                session_id: Some(info.session_id),
            },
            None => SecurityStatus {
                secure: false,
                version: None,
                suite: None,
                session_id: None,
            },
        }
    }

    pub(crate) fn close_inbound(&mut self) {
        if !self.inbound_closed && self.started && !self.released {
            if let Some(fd) = self.fd.as_mut() {
                if let Err(err) = self.backend.shutdown(Direction::Inbound, fd) {
                    debug!("inbound shutdown: {err}");
                }
            }
        }
        self.inbound_closed = true;
    }

    pub(crate) fn close_outbound(&mut self) {
        if !self.outbound_closed && self.started && !self.released {
            if let Some(fd) = self.fd.as_mut() {
                if let Err(err) = self.backend.shutdown(Direction::Outbound, fd) {
                    debug!("outbound shutdown: {err}");
                }
            }
        }
        self.outbound_closed = true;
    }

    pub(crate) fn is_inbound_done(&self) -> bool {
        self.inbound_closed
    }

    pub(crate) fn is_outbound_done(&self) -> bool {
        self.outbound_closed
            && self
                .fd
                .as_ref()
                .map(|fd| fd.outbound.is_empty())
                .unwrap_or(true)
    }

    pub(crate) fn cleanup(&mut self) {
        if self.released {
            return;
        }
        if self.started {
            if let Some(fd) = self.fd.as_mut() {
                if !self.inbound_closed {
                    if let Err(err) = self.backend.shutdown(Direction::Inbound, fd) {
                        debug!("inbound shutdown during cleanup: {err}");
                    }
                }
                if !self.outbound_closed {
                    if let Err(err) = self.backend.shutdown(Direction::Outbound, fd) {
                        debug!("outbound shutdown during cleanup: {err}");
                    }
                }
            }
            self.backend.close();
        }
        self.inbound_closed = true;
        self.outbound_closed = true;
        self.released = true;
        self.fd = None;
        debug!("engine released");
    }

    /// Release resources once both directions have closed.
    fn try_cleanup(&mut self) {
        if self.inbound_closed && self.outbound_closed && self.is_outbound_done() {
            self.cleanup();
        }
    }
}

/// Fixpoint-looping engine: every wrap and unwrap repeats its relay
/// pass until nothing moves, so a single call makes all the progress
/// the buffers allow.
pub struct ReferenceEngine<B: TlsBackend> {
    core: EngineCore<B>,
}

impl<B: TlsBackend> ReferenceEngine<B> {
    pub fn new(backend: B, config: EngineConfig) -> Self {
        Self {
            core: EngineCore::new(backend, config, BUFFER_SIZE),
        }
    }
}

/// Single-pass engine with larger relay buffers. Each call performs
/// one relay pass and relies on the caller retrying, trading calls for
/// predictable per-call work.
pub struct StreamlinedEngine<B: TlsBackend> {
    core: EngineCore<B>,
}

impl<B: TlsBackend> StreamlinedEngine<B> {
    pub fn new(backend: B, config: EngineConfig) -> Self {
        Self {
            core: EngineCore::new(backend, config, STREAMLINED_BUFFER_SIZE),
        }
    }
}

macro_rules! delegate_engine {
    ($engine:ident, $multi_pass:expr) => {
        impl<B: TlsBackend> TlsEngine for $engine<B> {
            fn begin_handshake(&mut self) -> Result<(), EngineError> {
                self.core.begin_handshake()
            }

            fn wrap(
                &mut self,
                srcs: &[&[u8]],
                dst: &mut [u8],
            ) -> Result<EngineResult, EngineError> {
                self.core.wrap(srcs, dst, $multi_pass)
            }

            fn unwrap(
                &mut self,
                src: &[u8],
                dsts: &mut [&mut [u8]],
            ) -> Result<EngineResult, EngineError> {
                self.core.unwrap(src, dsts, $multi_pass)
            }

            fn handshake_status(&mut self) -> HandshakeState {
                self.core.handshake_status()
            }

            fn delegated_task(&mut self) -> Option<DelegatedTask> {
                self.core.delegated_task()
            }

            fn session(&self) -> &Session {
                self.core.session()
            }

            fn status(&self) -> SecurityStatus {
                self.core.status()
            }

            fn close_inbound(&mut self) {
                self.core.close_inbound()
            }

            fn close_outbound(&mut self) {
                self.core.close_outbound()
            }

            fn is_inbound_done(&self) -> bool {
                self.core.is_inbound_done()
            }

            fn is_outbound_done(&self) -> bool {
                self.core.is_outbound_done()
            }

            fn cleanup(&mut self) {
                self.core.cleanup()
            }

            fn set_peer(&mut self, host: &str, port: u16) -> Result<(), EngineError> {
                self.core.set_peer(host, port)
            }

            fn set_cipher_suites(&mut self, suites: &[CipherSuite]) -> Result<(), EngineError> {
                self.core.set_cipher_suites(suites)
            }

            fn set_protocol_range(
                &mut self,
                min: TlsVersion,
                max: TlsVersion,
            ) -> Result<(), EngineError> {
                self.core.set_protocol_range(min, max)
            }

            fn set_client_auth(&mut self, mode: ClientAuth) -> Result<(), EngineError> {
                self.core.set_client_auth(mode)
            }

            fn set_key_material(&mut self, material: KeyMaterial) -> Result<(), EngineError> {
                self.core.set_key_material(material)
            }

            fn set_trust_verifiers(
                &mut self,
                verifiers: Vec<Arc<dyn TrustVerifier>>,
            ) -> Result<(), EngineError> {
                self.core.set_trust_verifiers(verifiers)
            }
        }
    };
}

delegate_engine!(ReferenceEngine, true);
delegate_engine!(StreamlinedEngine, false);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ChannelInfo, NegotiatedParams, PeerCert, StepOutcome};
    use crate::config::EngineConfig;

    /// Backend that never progresses by default: enough to exercise
    /// lifecycle and configuration guards. One-shot behaviors can be
    /// scripted per test.
    #[derive(Default)]
    struct InertBackend {
        configured: bool,
        closed: bool,
        /// Fail the next handshake step, once.
        fail_first_step: bool,
        /// Emit this many ciphertext bytes on the next step, once.
        flood: usize,
    }

    impl TlsBackend for InertBackend {
        fn configure(&mut self, _: &EngineConfig) -> Result<(), EngineError> {
            self.configured = true;
            Ok(())
        }

        fn reset_handshake(&mut self, _: bool) -> Result<(), EngineError> {
            Ok(())
        }

        fn step_handshake(&mut self, fd: &mut BufferFd) -> StepOutcome {
            if self.fail_first_step {
                self.fail_first_step = false;
                return StepOutcome::Fatal(EngineError::Handshake(
                    "rehandshake flight rejected".into(),
                ));
            }
            if self.flood > 0 {
                let n = fd.outbound.write(&vec![0xAB; self.flood]);
                self.flood = 0;
                if n > 0 {
                    return StepOutcome::Progress;
                }
            }
            StepOutcome::WouldBlock
        }

        fn handshake_complete(&self) -> bool {
            false
        }

        fn needs_cert_validation(&self) -> bool {
            false
        }

        fn complete_cert_validation(&mut self, _: i32) -> Result<(), EngineError> {
            Ok(())
        }

        fn preliminary_info(&self) -> Option<NegotiatedParams> {
            None
        }

        fn channel_info(&self) -> Option<ChannelInfo> {
            None
        }

        fn peer_chain(&self) -> Vec<PeerCert> {
            Vec::new()
        }

        fn write_app(&mut self, _: &[u8], _: &mut BufferFd) -> WriteOutcome {
            WriteOutcome::WouldBlock
        }

        fn read_app(&mut self, _: usize, _: &mut BufferFd) -> ReadOutcome {
            ReadOutcome::WouldBlock
        }

        fn renegotiate(&mut self) -> Result<(), EngineError> {
            Ok(())
        }

        fn request_client_auth(&mut self) -> Result<(), EngineError> {
            Ok(())
        }

        fn key_update(&mut self) -> Result<(), EngineError> {
            Ok(())
        }

        fn shutdown(&mut self, _: Direction, _: &mut BufferFd) -> Result<(), EngineError> {
            Ok(())
        }

        fn close(&mut self) {
            self.closed = true;
        }
    }

    fn client_engine() -> ReferenceEngine<InertBackend> {
        ReferenceEngine::new(InertBackend::default(), EngineConfig::builder().build())
    }

    #[test]
    fn test_setters_frozen_after_start() {
        let mut engine = client_engine();
        engine.set_peer("example.com", 443).unwrap();
        engine
            .set_cipher_suites(&[CipherSuite::TLS_AES_128_GCM_SHA256])
            .unwrap();
        engine
            .set_protocol_range(TlsVersion::Tls12, TlsVersion::Tls13)
            .unwrap();
        engine.set_client_auth(ClientAuth::Want).unwrap();

        engine.begin_handshake().unwrap();

        assert!(engine.set_peer("other.com", 443).is_err());
        assert!(engine
            .set_cipher_suites(&[CipherSuite::TLS_AES_256_GCM_SHA384])
            .is_err());
        assert!(engine
            .set_protocol_range(TlsVersion::Tls10, TlsVersion::Tls13)
            .is_err());
        assert!(engine.set_client_auth(ClientAuth::Need).is_err());
        assert!(engine
            .set_key_material(KeyMaterial::new(vec![], vec![]))
            .is_err());
        assert!(engine.set_trust_verifiers(Vec::new()).is_err());
    }

    #[test]
    fn test_invalid_protocol_range_rejected() {
        let mut engine = client_engine();
        assert!(engine
            .set_protocol_range(TlsVersion::Tls13, TlsVersion::Tls12)
            .is_err());
    }

    #[test]
    fn test_server_without_key_material_fails() {
        let mut engine = ReferenceEngine::new(
            InertBackend::default(),
            EngineConfig::builder().role(TlsRole::Server).build(),
        );
        let err = engine.begin_handshake().unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[test]
    fn test_wrap_lazily_begins_handshake() {
        let mut engine = client_engine();
        let mut dst = [0u8; 64];
        let result = engine.wrap(&[], &mut dst).unwrap();
        assert_eq!(result.consumed, 0);
        assert_eq!(result.produced, 0);
        // a client speaks first but the inert backend produced
        // nothing, so the engine waits on the peer
        assert_eq!(result.handshake, HandshakeState::NeedUnwrap);
        assert_eq!(result.status, EngineStatus::Ok);
    }

    #[test]
    fn test_streamlined_wrap_reports_overflow() {
        let mut engine = StreamlinedEngine::new(
            InertBackend {
                flood: 32,
                ..Default::default()
            },
            EngineConfig::builder().build(),
        );
        // the backend queues more ciphertext than the destination holds
        let mut dst = [0u8; 8];
        let result = engine.wrap(&[], &mut dst).unwrap();
        assert_eq!(result.produced, 8);
        assert_eq!(result.status, EngineStatus::BufferOverflow);

        // a roomier destination drains the remainder
        let mut dst = [0u8; 64];
        let result = engine.wrap(&[], &mut dst).unwrap();
        assert_eq!(result.produced, 24);
        assert_eq!(result.status, EngineStatus::Ok);
    }

    #[test]
    fn test_streamlined_unwrap_reports_underflow() {
        let mut engine =
            StreamlinedEngine::new(InertBackend::default(), EngineConfig::builder().build());
        let mut plain = [0u8; 16];
        let result = {
            let mut dsts: [&mut [u8]; 1] = [&mut plain];
            engine.unwrap(&[], &mut dsts).unwrap()
        };
        assert_eq!(result.consumed, 0);
        assert_eq!(result.produced, 0);
        assert_eq!(result.handshake, HandshakeState::NeedUnwrap);
        assert_eq!(result.status, EngineStatus::BufferUnderflow);

        // the fixpoint engine reports Ok for the same shape
        let mut engine = client_engine();
        let result = {
            let mut dsts: [&mut [u8]; 1] = [&mut plain];
            engine.unwrap(&[], &mut dsts).unwrap()
        };
        assert_eq!(result.status, EngineStatus::Ok);
    }

    #[test]
    fn test_rehandshake_prime_fault_latched() {
        let mut engine = ReferenceEngine::new(
            InertBackend {
                fail_first_step: true,
                ..Default::default()
            },
            EngineConfig::builder().build(),
        );
        engine.begin_handshake().unwrap();
        // the second begin primes the rehandshake flight; its failure
        // must surface on the next relay call
        engine.begin_handshake().unwrap();
        let mut dst = [0u8; 16];
        let err = engine.wrap(&[], &mut dst).unwrap_err();
        assert!(matches!(err, EngineError::Handshake(_)));
    }

    #[test]
    fn test_close_both_directions_releases() {
        let mut engine = client_engine();
        engine.begin_handshake().unwrap();
        engine.close_inbound();
        engine.close_outbound();
        let mut dst = [0u8; 64];
        let result = engine.wrap(&[], &mut dst).unwrap();
        assert_eq!(result.status, EngineStatus::Closed);
        assert!(engine.is_inbound_done());
        assert!(engine.is_outbound_done());
        // released: further relaying is refused
        assert!(engine.wrap(&[], &mut dst).is_err());
    }

    #[test]
    fn test_cleanup_idempotent() {
        let mut engine = client_engine();
        engine.begin_handshake().unwrap();
        engine.cleanup();
        engine.cleanup();
        assert!(engine.is_inbound_done());
        assert!(engine.is_outbound_done());
        assert!(engine.begin_handshake().is_err());
    }

    #[test]
    fn test_status_before_establishment() {
        let engine = client_engine();
        let status = engine.status();
        assert!(!status.secure);
        assert!(status.version.is_none());
        assert!(status.suite.is_none());
    }
}
