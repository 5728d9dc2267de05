//! Session metadata and the process-wide resumption cache.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{OnceLock, RwLock};
use std::time::{Duration, Instant};

use log::debug;

use crate::backend::{ChannelInfo, PeerCert};
use crate::config::{EngineConfig, KeyMaterial};
use crate::{CipherSuite, TlsVersion};

/// Default capacity of the server resumption cache.
pub const DEFAULT_CACHE_SIZE: usize = 256;
/// Default lifetime of a cached resumption entry.
pub const DEFAULT_SESSION_LIFETIME: Duration = Duration::from_secs(86_400);

/// Per-connection session metadata. Partially populated until the
/// handshake finishes, then refreshed from the backend.
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub protocol: Option<TlsVersion>,
    pub cipher_suite: Option<CipherSuite>,
    pub session_id: Vec<u8>,
    pub peer_chain: Vec<PeerCert>,
    pub local_certs: Vec<Vec<u8>>,
    pub peer_host: Option<String>,
    pub peer_port: u16,
    /// Largest plaintext a single unwrap can produce.
    pub application_buffer_size: usize,
    /// Largest ciphertext a single wrap can produce.
    pub packet_buffer_size: usize,
}

impl Session {
    pub(crate) fn new(
        config: &EngineConfig,
        material: Option<&KeyMaterial>,
        buffer_size: usize,
    ) -> Self {
        Self {
            peer_host: config.peer_host.clone(),
            peer_port: config.peer_port,
            local_certs: material
                .map(|m| m.certificate_chain.clone())
                .unwrap_or_default(),
            application_buffer_size: buffer_size,
            packet_buffer_size: buffer_size,
            ..Self::default()
        }
    }

    pub(crate) fn refresh(&mut self, info: ChannelInfo, peer_chain: Vec<PeerCert>) {
        self.protocol = Some(info.version);
        self.cipher_suite = Some(info.suite);
        self.session_id = info.session_id;
        self.peer_chain = peer_chain;
    }

    pub fn is_established(&self) -> bool {
        self.protocol.is_some()
    }
}

/// A completed handshake eligible for resumption.
#[derive(Debug, Clone)]
pub struct ResumptionEntry {
    pub session_id: Vec<u8>,
    pub protocol: TlsVersion,
    pub cipher_suite: CipherSuite,
    created: Instant,
}

impl ResumptionEntry {
    pub fn new(session_id: Vec<u8>, protocol: TlsVersion, cipher_suite: CipherSuite) -> Self {
        Self {
            session_id,
            protocol,
            cipher_suite,
            created: Instant::now(),
        }
    }
}

/// Bounded, expiring map of resumable sessions, keyed by session id
/// and optionally by a `host:port` peer hint.
pub struct SessionCache {
    max_entries: usize,
    lifetime: Duration,
    by_id: HashMap<Vec<u8>, ResumptionEntry>,
    by_peer: HashMap<String, Vec<u8>>,
}

impl SessionCache {
    pub fn new(max_entries: usize, lifetime: Duration) -> Self {
        Self {
            max_entries: max_entries.max(1),
            lifetime,
            by_id: HashMap::new(),
            by_peer: HashMap::new(),
        }
    }

    fn peer_key(host: &str, port: u16) -> String {
        format!("{host}:{port}")
    }

    pub fn insert(&mut self, entry: ResumptionEntry, peer_hint: Option<(&str, u16)>) {
        if entry.session_id.is_empty() {
            return;
        }
        self.expire();
        if self.by_id.len() >= self.max_entries && !self.by_id.contains_key(&entry.session_id) {
            self.evict_oldest();
        }
        if let Some((host, port)) = peer_hint {
            self.by_peer
                .insert(Self::peer_key(host, port), entry.session_id.clone());
        }
        self.by_id.insert(entry.session_id.clone(), entry);
    }

    pub fn lookup(&self, session_id: &[u8]) -> Option<ResumptionEntry> {
        self.by_id
            .get(session_id)
            .filter(|e| e.created.elapsed() < self.lifetime)
            .cloned()
    }

    pub fn lookup_peer(&self, host: &str, port: u16) -> Option<ResumptionEntry> {
        let id = self.by_peer.get(&Self::peer_key(host, port))?;
        self.lookup(id)
    }

    pub fn remove(&mut self, session_id: &[u8]) {
        self.by_id.remove(session_id);
        self.by_peer.retain(|_, id| id.as_slice() != session_id);
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    fn expire(&mut self) {
        let lifetime = self.lifetime;
        self.by_id.retain(|_, e| e.created.elapsed() < lifetime);
        let by_id = &self.by_id;
        self.by_peer.retain(|_, id| by_id.contains_key(id));
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .by_id
            .values()
            .min_by_key(|e| e.created)
            .map(|e| e.session_id.clone());
        if let Some(id) = oldest {
            self.remove(&id);
        }
    }
}

static CACHE_READY: AtomicBool = AtomicBool::new(false);
static SERVER_CACHE: OnceLock<RwLock<SessionCache>> = OnceLock::new();

/// Initialize the process-wide server resumption cache. The first
/// caller wins and configures it for every later connection; repeat
/// calls are no-ops. Returns whether this call performed the
/// initialization.
pub fn initialize_server_cache(max_entries: usize, lifetime: Duration) -> bool {
    if CACHE_READY
        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .is_ok()
    {
        debug!("server session cache initialized: {max_entries} entries, {lifetime:?} lifetime");
        let _ = SERVER_CACHE.set(RwLock::new(SessionCache::new(max_entries, lifetime)));
        return true;
    }
    false
}

/// The process-wide server resumption cache, if initialized.
pub fn server_cache() -> Option<&'static RwLock<SessionCache>> {
    SERVER_CACHE.get()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn entry(id: &[u8]) -> ResumptionEntry {
        ResumptionEntry::new(
            id.to_vec(),
            TlsVersion::Tls13,
            CipherSuite::TLS_AES_128_GCM_SHA256,
        )
    }

    #[test]
    fn test_insert_and_lookup() {
        let mut cache = SessionCache::new(8, Duration::from_secs(60));
        cache.insert(entry(b"abc"), Some(("example.com", 443)));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.lookup(b"abc").unwrap().session_id, b"abc");
        assert_eq!(
            cache.lookup_peer("example.com", 443).unwrap().session_id,
            b"abc"
        );
        assert!(cache.lookup(b"nope").is_none());
        assert!(cache.lookup_peer("example.com", 8443).is_none());
    }

    #[test]
    fn test_empty_session_id_not_cached() {
        let mut cache = SessionCache::new(8, Duration::from_secs(60));
        cache.insert(entry(b""), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_expired_entries_invisible() {
        let mut cache = SessionCache::new(8, Duration::ZERO);
        cache.insert(entry(b"abc"), None);
        assert!(cache.lookup(b"abc").is_none());
    }

    #[test]
    fn test_eviction_at_capacity() {
        let mut cache = SessionCache::new(2, Duration::from_secs(60));
        cache.insert(entry(b"a"), None);
        thread::sleep(Duration::from_millis(2));
        cache.insert(entry(b"b"), None);
        thread::sleep(Duration::from_millis(2));
        cache.insert(entry(b"c"), None);
        assert_eq!(cache.len(), 2);
        assert!(cache.lookup(b"a").is_none());
        assert!(cache.lookup(b"b").is_some());
        assert!(cache.lookup(b"c").is_some());
    }

    #[test]
    fn test_remove_clears_peer_hint() {
        let mut cache = SessionCache::new(8, Duration::from_secs(60));
        cache.insert(entry(b"abc"), Some(("host", 443)));
        cache.remove(b"abc");
        assert!(cache.lookup_peer("host", 443).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_global_init_is_idempotent() {
        // state is process-global: only the aggregate behavior can be
        // asserted, not which call wins
        let first = initialize_server_cache(16, Duration::from_secs(60));
        let second = initialize_server_cache(999, Duration::from_secs(1));
        assert!(!(first && second));
        assert!(server_cache().is_some());
    }

    #[test]
    fn test_session_refresh() {
        let mut session = Session::default();
        assert!(!session.is_established());
        session.refresh(
            ChannelInfo {
                version: TlsVersion::Tls13,
                suite: CipherSuite::TLS_AES_256_GCM_SHA384,
                session_id: vec![1, 2, 3],
            },
            Vec::new(),
        );
        assert!(session.is_established());
        assert_eq!(session.protocol, Some(TlsVersion::Tls13));
        assert_eq!(session.session_id, vec![1, 2, 3]);
    }
}
