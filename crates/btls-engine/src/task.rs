//! Delegated certificate validation.
//!
//! When the backend pauses the handshake on the peer's certificate
//! chain, the engine snapshots the chain and negotiated parameters
//! into a one-shot task the caller may run on any thread. The verdict
//! flows back through a shared slot; the engine delivers it to the
//! backend on its next evaluation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::backend::{NegotiatedParams, PeerCert};
use crate::config::{ClientAuth, EngineConfig};
use crate::trust::{TrustError, TrustFailure, TrustVerifier};
use crate::{TlsRole, TlsVersion};

#[derive(Debug, Clone)]
struct TaskVerdict {
    code: i32,
    message: Option<String>,
}

#[derive(Debug)]
struct TaskShared {
    finished: AtomicBool,
    verdict: Mutex<Option<TaskVerdict>>,
}

/// Observed state of the validation slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationPoll {
    /// A task is armed and has not finished yet.
    Pending,
    /// The task finished; the verdict awaits delivery to the backend.
    Ready { code: i32, message: Option<String> },
    /// No validation in flight.
    Idle,
}

/// Engine-side holder for at most one validation event.
#[derive(Default)]
pub struct ValidationSlot {
    shared: Option<Arc<TaskShared>>,
    task: Option<DelegatedTask>,
}

impl ValidationSlot {
    /// Arm a new validation event from a chain snapshot. Panics are
    /// not possible on double-arm: the caller must check `poll()`
    /// first, and an armed slot simply keeps its existing task.
    pub fn arm(&mut self, chain: Vec<PeerCert>, params: Option<NegotiatedParams>, config: &EngineConfig) {
        if self.shared.is_some() {
            return;
        }
        let shared = Arc::new(TaskShared {
            finished: AtomicBool::new(false),
            verdict: Mutex::new(None),
        });
        self.task = Some(DelegatedTask {
            shared: Arc::clone(&shared),
            chain,
            params,
            verifiers: config.trust_verifiers.clone(),
            role: config.role,
            client_auth: config.client_auth,
        });
        self.shared = Some(shared);
    }

    /// Hand the armed task out, at most once per validation event.
    pub fn take_task(&mut self) -> Option<DelegatedTask> {
        self.task.take()
    }

    pub fn poll(&self) -> ValidationPoll {
        let Some(shared) = &self.shared else {
            return ValidationPoll::Idle;
        };
        if !shared.finished.load(Ordering::Acquire) {
            return ValidationPoll::Pending;
        }
        let verdict = shared
            .verdict
            .lock()
            .ok()
            .and_then(|guard| guard.clone())
            .unwrap_or(TaskVerdict {
                code: TrustFailure::Other.code(),
                message: Some("validation task lost its verdict".to_string()),
            });
        ValidationPoll::Ready {
            code: verdict.code,
            message: verdict.message,
        }
    }

    /// Forget the current event after its verdict was delivered.
    pub fn clear(&mut self) {
        self.shared = None;
        self.task = None;
    }
}

/// A runnable, run-once certificate validation.
pub struct DelegatedTask {
    shared: Arc<TaskShared>,
    chain: Vec<PeerCert>,
    params: Option<NegotiatedParams>,
    verifiers: Vec<Arc<dyn TrustVerifier>>,
    role: TlsRole,
    client_auth: ClientAuth,
}

impl DelegatedTask {
    /// Validate the chain and publish the verdict. Consumes the task;
    /// it cannot run twice.
    pub fn run(self) {
        let verdict = match self.validate() {
            Ok(()) => TaskVerdict {
                code: 0,
                message: None,
            },
            Err(err) => TaskVerdict {
                code: err.kind.code(),
                message: Some(err.message),
            },
        };
        if let Ok(mut guard) = self.shared.verdict.lock() {
            *guard = Some(verdict);
        }
        self.shared.finished.store(true, Ordering::Release);
    }

    fn validate(&self) -> Result<(), TrustError> {
        if self.chain.is_empty() {
            // a server may tolerate a certificate-less client unless
            // client auth is mandatory
            if self.role == TlsRole::Server && self.client_auth != ClientAuth::Need {
                return Ok(());
            }
            return Err(TrustError::new(
                TrustFailure::Incomplete,
                "peer provided no certificate chain",
            ));
        }
        let auth_type = self.derive_auth_type()?;
        for verifier in &self.verifiers {
            match self.role {
                TlsRole::Server => verifier.check_client_trusted(&self.chain, &auth_type)?,
                TlsRole::Client => verifier.check_server_trusted(&self.chain, &auth_type)?,
            }
        }
        Ok(())
    }

    /// Below TLS 1.3 the cipher suite pins the certificate signature
    /// algorithm; from TLS 1.3 on it comes from the leaf certificate.
    fn derive_auth_type(&self) -> Result<String, TrustError> {
        let params = self.params.ok_or_else(|| {
            TrustError::new(
                TrustFailure::Other,
                "handshake parameters unavailable for auth type derivation",
            )
        })?;
        if params.version >= TlsVersion::Tls13 {
            return Ok(self.chain[0].key_algorithm.name().to_string());
        }
        params
            .suite
            .auth_type()
            .map(str::to_string)
            .ok_or_else(|| {
                TrustError::new(
                    TrustFailure::Other,
                    format!(
                        "cipher suite {:#06x} pins no certificate authentication",
                        params.suite.0
                    ),
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CipherSuite;
    use btls_types::KeyAlgorithm;
    use std::sync::Mutex as StdMutex;

    fn cert(key_algorithm: KeyAlgorithm) -> PeerCert {
        PeerCert {
            der: vec![0x30, 0x82, 0x01, 0x00],
            key_algorithm,
        }
    }

    fn params(version: TlsVersion, suite: CipherSuite) -> Option<NegotiatedParams> {
        Some(NegotiatedParams { version, suite })
    }

    /// Records the auth type it was called with.
    struct Recording {
        seen: StdMutex<Vec<String>>,
        verdict: Result<(), TrustError>,
    }

    impl Recording {
        fn ok() -> Arc<Self> {
            Arc::new(Self {
                seen: StdMutex::new(Vec::new()),
                verdict: Ok(()),
            })
        }

        fn failing(kind: TrustFailure, message: &str) -> Arc<Self> {
            Arc::new(Self {
                seen: StdMutex::new(Vec::new()),
                verdict: Err(TrustError::new(kind, message)),
            })
        }
    }

    impl TrustVerifier for Recording {
        fn check_client_trusted(&self, _: &[PeerCert], auth_type: &str) -> Result<(), TrustError> {
            self.seen.lock().unwrap().push(auth_type.to_string());
            self.verdict.clone()
        }

        fn check_server_trusted(&self, _: &[PeerCert], auth_type: &str) -> Result<(), TrustError> {
            self.seen.lock().unwrap().push(auth_type.to_string());
            self.verdict.clone()
        }
    }

    fn armed_slot(
        chain: Vec<PeerCert>,
        params: Option<NegotiatedParams>,
        config: &EngineConfig,
    ) -> ValidationSlot {
        let mut slot = ValidationSlot::default();
        slot.arm(chain, params, config);
        slot
    }

    #[test]
    fn test_task_hands_out_once() {
        let config = EngineConfig::builder().build();
        let mut slot = armed_slot(vec![], None, &config);
        assert!(slot.take_task().is_some());
        assert!(slot.take_task().is_none());
        // re-arming while pending keeps the event, no new task
        slot.arm(vec![], None, &config);
        assert!(slot.take_task().is_none());
    }

    #[test]
    fn test_poll_lifecycle() {
        let config = EngineConfig::builder().build();
        let mut slot = ValidationSlot::default();
        assert_eq!(slot.poll(), ValidationPoll::Idle);

        slot.arm(
            vec![],
            None,
            &EngineConfig::builder()
                .role(TlsRole::Server)
                .client_auth(ClientAuth::Want)
                .build(),
        );
        assert_eq!(slot.poll(), ValidationPoll::Pending);

        slot.take_task().unwrap().run();
        assert_eq!(
            slot.poll(),
            ValidationPoll::Ready {
                code: 0,
                message: None
            }
        );

        slot.clear();
        assert_eq!(slot.poll(), ValidationPoll::Idle);
        drop(config);
    }

    #[test]
    fn test_empty_chain_tolerated_unless_auth_mandatory() {
        // server, Want: success
        let config = EngineConfig::builder()
            .role(TlsRole::Server)
            .client_auth(ClientAuth::Want)
            .build();
        let mut slot = armed_slot(vec![], None, &config);
        slot.take_task().unwrap().run();
        assert_eq!(
            slot.poll(),
            ValidationPoll::Ready {
                code: 0,
                message: None
            }
        );

        // server, Need: failure
        let config = EngineConfig::builder()
            .role(TlsRole::Server)
            .client_auth(ClientAuth::Need)
            .build();
        let mut slot = armed_slot(vec![], None, &config);
        slot.take_task().unwrap().run();
        match slot.poll() {
            ValidationPoll::Ready { code, message } => {
                assert_eq!(code, TrustFailure::Incomplete.code());
                assert!(message.unwrap().contains("no certificate chain"));
            }
            other => panic!("unexpected poll: {other:?}"),
        }

        // client: a server must always present a certificate
        let config = EngineConfig::builder().role(TlsRole::Client).build();
        let mut slot = armed_slot(vec![], None, &config);
        slot.take_task().unwrap().run();
        match slot.poll() {
            ValidationPoll::Ready { code, .. } => {
                assert_eq!(code, TrustFailure::Incomplete.code())
            }
            other => panic!("unexpected poll: {other:?}"),
        }
    }

    #[test]
    fn test_auth_type_from_suite_below_tls13() {
        let verifier = Recording::ok();
        let config = EngineConfig::builder()
            .role(TlsRole::Client)
            .trust_verifier(verifier.clone())
            .build();
        let mut slot = armed_slot(
            vec![cert(KeyAlgorithm::Rsa)],
            params(
                TlsVersion::Tls12,
                CipherSuite::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
            ),
            &config,
        );
        slot.take_task().unwrap().run();
        assert_eq!(verifier.seen.lock().unwrap().as_slice(), ["ECDSA"]);
    }

    #[test]
    fn test_auth_type_from_leaf_key_at_tls13() {
        let verifier = Recording::ok();
        let config = EngineConfig::builder()
            .role(TlsRole::Client)
            .trust_verifier(verifier.clone())
            .build();
        let mut slot = armed_slot(
            vec![cert(KeyAlgorithm::Ed25519)],
            params(TlsVersion::Tls13, CipherSuite::TLS_AES_128_GCM_SHA256),
            &config,
        );
        slot.take_task().unwrap().run();
        assert_eq!(verifier.seen.lock().unwrap().as_slice(), ["Ed25519"]);
    }

    #[test]
    fn test_verifier_rejection_maps_code_and_message() {
        let verifier = Recording::failing(TrustFailure::Untrusted, "unknown issuer CN=EvilCA");
        let config = EngineConfig::builder()
            .role(TlsRole::Server)
            .client_auth(ClientAuth::Need)
            .trust_verifier(verifier)
            .build();
        let mut slot = armed_slot(
            vec![cert(KeyAlgorithm::Ecdsa)],
            params(TlsVersion::Tls13, CipherSuite::TLS_AES_256_GCM_SHA384),
            &config,
        );
        slot.take_task().unwrap().run();
        match slot.poll() {
            ValidationPoll::Ready { code, message } => {
                assert_eq!(code, TrustFailure::Untrusted.code());
                assert_eq!(message.unwrap(), "unknown issuer CN=EvilCA");
            }
            other => panic!("unexpected poll: {other:?}"),
        }
    }

    #[test]
    fn test_missing_params_is_failure() {
        let config = EngineConfig::builder()
            .role(TlsRole::Client)
            .trust_verifier(Recording::ok())
            .build();
        let mut slot = armed_slot(vec![cert(KeyAlgorithm::Rsa)], None, &config);
        slot.take_task().unwrap().run();
        match slot.poll() {
            ValidationPoll::Ready { code, .. } => assert_eq!(code, TrustFailure::Other.code()),
            other => panic!("unexpected poll: {other:?}"),
        }
    }

    #[test]
    fn test_run_on_another_thread() {
        let config = EngineConfig::builder()
            .role(TlsRole::Server)
            .client_auth(ClientAuth::Want)
            .build();
        let mut slot = armed_slot(vec![], None, &config);
        let task = slot.take_task().unwrap();
        let handle = std::thread::spawn(move || task.run());
        handle.join().unwrap();
        assert_eq!(
            slot.poll(),
            ValidationPoll::Ready {
                code: 0,
                message: None
            }
        );
    }
}
