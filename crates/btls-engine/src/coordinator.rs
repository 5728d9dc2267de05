//! Handshake state coordination.
//!
//! One evaluation of the coordinator reconciles four inputs: the
//! backend's handshake progress, relay buffer occupancy, the alert
//! ledger, and the delegated validation slot. The resulting state
//! tells the caller which relay operation can make progress next.

use log::{debug, warn};

use btls_types::EngineError;

use crate::alert::AlertScan;
use crate::backend::{StepOutcome, TlsBackend};
use crate::config::EngineConfig;
use crate::relay::BufferFd;
use crate::task::{ValidationPoll, ValidationSlot};

/// Number of consecutive evaluations with no observable progress
/// before the advertised direction is flipped. A liveness valve for
/// asymmetric buffering, not a correctness mechanism.
pub const STALL_FLIP_THRESHOLD: u32 = 4;

/// What the engine should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// No handshake in progress.
    NotHandshaking,
    /// Ciphertext waits in the outbound relay; the caller must wrap.
    NeedWrap,
    /// The backend needs more peer bytes; the caller must unwrap.
    NeedUnwrap,
    /// A delegated validation task must run before progress resumes.
    NeedTask,
    /// The handshake just completed. Reported once, then collapses to
    /// `NotHandshaking`.
    Finished,
}

/// Side effects of one evaluation, applied by the engine.
#[derive(Debug, Default, Clone, Copy)]
pub struct StepEffects {
    /// Negotiated session metadata should be re-read from the backend.
    pub refresh_session: bool,
    /// A close_notify was received; mark the receive direction done.
    pub close_inbound: bool,
    /// A close_notify was sent; mark the send direction done.
    pub close_outbound: bool,
}

/// The handshake transition function and its sticky fault latch.
pub struct HandshakeCoordinator {
    state: HandshakeState,
    /// Whether evaluations should still drive the backend handshake.
    stepping: bool,
    /// Whether a `Finished` state has been returned to the caller.
    returned_finished: bool,
    /// Consecutive evaluations without a direction change.
    unknown_state_count: u32,
    /// First fatal condition, awaiting delivery.
    pending_fault: Option<EngineError>,
    /// Set when the first fault is recorded; never reset. Freezes the
    /// transition function.
    seen_fault: bool,
}

impl Default for HandshakeCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl HandshakeCoordinator {
    pub fn new() -> Self {
        Self {
            state: HandshakeState::NotHandshaking,
            stepping: false,
            returned_finished: false,
            unknown_state_count: 0,
            pending_fault: None,
            seen_fault: false,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Start (or restart) a handshake in the given initial direction.
    /// A previously latched fault stays latched.
    pub fn begin(&mut self, initial: HandshakeState) {
        self.transition(initial);
        self.stepping = true;
        self.returned_finished = false;
        self.unknown_state_count = 0;
    }

    /// Record a fatal condition. The first one wins and pins the state
    /// to `NeedWrap` so the closing alert can still be flushed.
    pub fn record_fault(&mut self, err: EngineError) {
        if self.seen_fault {
            debug!("fault dropped, one already latched: {err}");
            return;
        }
        warn!("fault latched: {err}");
        self.seen_fault = true;
        self.pending_fault = Some(err);
        self.transition(HandshakeState::NeedWrap);
    }

    /// Take the latched fault for delivery to the caller. The latch
    /// stays marked so the transition function remains frozen.
    pub fn take_fault(&mut self) -> Option<EngineError> {
        self.pending_fault.take()
    }

    pub fn has_pending_fault(&self) -> bool {
        self.pending_fault.is_some()
    }

    /// Whether a fault was recorded and already delivered.
    pub fn fault_observed(&self) -> bool {
        self.seen_fault && self.pending_fault.is_none()
    }

    /// After a delivered fault, wrap reports `Finished` while the
    /// closing flight drains.
    pub fn pin_flush_finished(&mut self) {
        if self.fault_observed() && self.state != HandshakeState::NotHandshaking {
            self.transition(HandshakeState::Finished);
        }
    }

    /// Mark that the caller has observed a `Finished` state, so the
    /// next evaluation collapses it to `NotHandshaking`.
    pub fn note_returned_finished(&mut self) {
        if self.state == HandshakeState::Finished {
            self.returned_finished = true;
        }
    }

    /// Reconcile the validation slot with the backend. Returns true
    /// while a task is pending and handshake stepping must wait.
    pub fn poll_validation<B: TlsBackend>(
        &mut self,
        backend: &mut B,
        validation: &mut ValidationSlot,
        config: &EngineConfig,
    ) -> bool {
        match validation.poll() {
            ValidationPoll::Pending => {
                self.transition(HandshakeState::NeedTask);
                true
            }
            ValidationPoll::Ready { code, message } => {
                if let Err(err) = backend.complete_cert_validation(code) {
                    self.record_fault(err);
                } else if code != 0 {
                    let message =
                        message.unwrap_or_else(|| "peer certificate rejected".to_string());
                    self.record_fault(EngineError::CertValidation(message));
                }
                validation.clear();
                if !self.seen_fault {
                    // the backend now holds a response flight to flush
                    self.transition(HandshakeState::NeedWrap);
                }
                false
            }
            ValidationPoll::Idle => {
                if backend.needs_cert_validation() {
                    validation.arm(backend.peer_chain(), backend.preliminary_info(), config);
                    self.transition(HandshakeState::NeedTask);
                    true
                } else {
                    false
                }
            }
        }
    }

    /// One full evaluation of the transition function.
    pub fn evaluate<B: TlsBackend>(
        &mut self,
        backend: &mut B,
        fd: &mut BufferFd,
        validation: &mut ValidationSlot,
        config: &EngineConfig,
    ) -> StepEffects {
        let mut effects = StepEffects::default();
        if self.seen_fault {
            return effects;
        }
        effects.refresh_session = backend.handshake_complete();

        if self.poll_validation(backend, validation, config) {
            return effects;
        }
        if self.seen_fault {
            return effects;
        }

        if !self.stepping {
            // idle between handshakes: only collapse a seen Finished
            // and surface alerts
            if self.state == HandshakeState::Finished && self.returned_finished {
                self.transition(HandshakeState::NotHandshaking);
                self.returned_finished = false;
            }
            self.unknown_state_count = 0;
            self.apply_scan(fd.alerts.scan(), &mut effects);
            return effects;
        }

        match backend.step_handshake(fd) {
            StepOutcome::Fatal(err) => {
                self.record_fault(err);
                return effects;
            }
            StepOutcome::Progress | StepOutcome::WouldBlock => {}
        }

        // direction follows relay occupancy: unread outbound ciphertext
        // must leave before anything else matters
        if fd.outbound.read_capacity() > 0 {
            if self.state != HandshakeState::NeedWrap {
                self.transition(HandshakeState::NeedWrap);
                self.unknown_state_count = 0;
            }
            return effects;
        }

        if backend.handshake_complete() {
            self.stepping = false;
            self.transition(HandshakeState::Finished);
            self.unknown_state_count = 0;
            effects.refresh_session = true;
            return effects;
        }

        if fd.inbound.read_capacity() == 0 && self.state != HandshakeState::NeedUnwrap {
            self.transition(HandshakeState::NeedUnwrap);
            self.unknown_state_count = 0;
            return effects;
        }

        // no transition presented itself: inbound bytes sit unconsumed,
        // or both relays are drained while the peer stays silent.
        // Count the stall, eventually flip
        self.unknown_state_count += 1;
        if self.unknown_state_count >= STALL_FLIP_THRESHOLD {
            let flipped = match self.state {
                HandshakeState::NeedWrap => HandshakeState::NeedUnwrap,
                _ => HandshakeState::NeedWrap,
            };
            warn!(
                "no handshake progress after {} evaluations, flipping to {:?}",
                self.unknown_state_count, flipped
            );
            self.transition(flipped);
            self.unknown_state_count = 1;
        }
        effects
    }

    /// Drain the ledger and fold its effects in.
    pub fn apply_scan(&mut self, scan: AlertScan, effects: &mut StepEffects) {
        effects.close_inbound |= scan.close_inbound;
        effects.close_outbound |= scan.close_outbound;
        if let Some(err) = scan.fault {
            self.record_fault(err);
        }
    }

    fn transition(&mut self, next: HandshakeState) {
        if self.state != next {
            debug!("handshake state {:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }
}
