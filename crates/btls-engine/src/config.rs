//! Engine configuration with builder pattern.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use btls_types::EngineError;
use zeroize::Zeroize;

use crate::trust::TrustVerifier;
use crate::{CipherSuite, TlsRole, TlsVersion};

/// Client certificate requirement mode (server side).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientAuth {
    /// Never request a client certificate.
    None,
    /// Request one but tolerate its absence.
    Want,
    /// Request one and fail the handshake without it.
    Need,
}

/// Local certificate chain and private key, DER-encoded. The private
/// key is wiped on drop.
#[derive(Clone)]
pub struct KeyMaterial {
    pub certificate_chain: Vec<Vec<u8>>,
    private_key: Vec<u8>,
}

impl KeyMaterial {
    pub fn new(certificate_chain: Vec<Vec<u8>>, private_key: Vec<u8>) -> Self {
        Self {
            certificate_chain,
            private_key,
        }
    }

    pub fn private_key(&self) -> &[u8] {
        &self.private_key
    }
}

impl Drop for KeyMaterial {
    fn drop(&mut self) {
        self.private_key.zeroize();
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("certificate_chain", &self.certificate_chain.len())
            .field(
                "private_key",
                &format!("[{} bytes]", self.private_key.len()),
            )
            .finish()
    }
}

/// Alias-addressed store of certificates and private keys.
pub trait KeySource: Send + Sync {
    fn certificate_chain(&self, alias: &str) -> Option<Vec<Vec<u8>>>;
    fn private_key(&self, alias: &str) -> Option<Vec<u8>>;
}

/// Connection configuration. Frozen once the backend is instantiated;
/// mutations after that point are configuration errors.
#[derive(Clone)]
pub struct EngineConfig {
    /// The role (client or server).
    pub role: TlsRole,
    /// Peer hostname hint, for session resumption and verification.
    pub peer_host: Option<String>,
    /// Peer port hint.
    pub peer_port: u16,
    /// Minimum supported TLS version.
    pub min_version: TlsVersion,
    /// Maximum supported TLS version.
    pub max_version: TlsVersion,
    /// Enabled cipher suites (in preference order).
    pub cipher_suites: Vec<CipherSuite>,
    /// Client certificate requirement mode (server side).
    pub client_auth: ClientAuth,
    /// Explicit local certificate and key.
    pub key_material: Option<KeyMaterial>,
    /// Alias to resolve through the key sources when no explicit key
    /// material is set.
    pub certificate_alias: Option<String>,
    /// Alias-addressed key stores, searched in order.
    pub key_sources: Vec<Arc<dyn KeySource>>,
    /// Chain verification callbacks, invoked in order from the
    /// delegated validation task. Empty means backend-default trust.
    pub trust_verifiers: Vec<Arc<dyn TrustVerifier>>,
    /// Passthrough backend tunables keyed by backend-defined option id.
    pub extra_options: HashMap<i32, i32>,
}

impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("role", &self.role)
            .field("peer_host", &self.peer_host)
            .field("peer_port", &self.peer_port)
            .field("min_version", &self.min_version)
            .field("max_version", &self.max_version)
            .field("cipher_suites", &self.cipher_suites)
            .field("client_auth", &self.client_auth)
            .field("key_material", &self.key_material)
            .field("certificate_alias", &self.certificate_alias)
            .field("key_sources", &self.key_sources.len())
            .field("trust_verifiers", &self.trust_verifiers.len())
            .field("extra_options", &self.extra_options)
            .finish()
    }
}

impl EngineConfig {
    /// Create a builder for engine configuration.
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    /// Resolve the local key material: explicit material wins,
    /// otherwise the certificate alias is looked up through the key
    /// sources in order. An alias that resolves nowhere is an error.
    pub fn resolve_key_material(&self) -> Result<Option<KeyMaterial>, EngineError> {
        if let Some(material) = &self.key_material {
            return Ok(Some(material.clone()));
        }
        let Some(alias) = &self.certificate_alias else {
            return Ok(None);
        };
        for source in &self.key_sources {
            if let (Some(chain), Some(key)) =
                (source.certificate_chain(alias), source.private_key(alias))
            {
                return Ok(Some(KeyMaterial::new(chain, key)));
            }
        }
        Err(EngineError::Config(format!(
            "no key source provides certificate alias {alias:?}"
        )))
    }
}

/// Builder for `EngineConfig`.
pub struct EngineConfigBuilder {
    role: TlsRole,
    peer_host: Option<String>,
    peer_port: u16,
    min_version: TlsVersion,
    max_version: TlsVersion,
    cipher_suites: Vec<CipherSuite>,
    client_auth: ClientAuth,
    key_material: Option<KeyMaterial>,
    certificate_alias: Option<String>,
    key_sources: Vec<Arc<dyn KeySource>>,
    trust_verifiers: Vec<Arc<dyn TrustVerifier>>,
    extra_options: HashMap<i32, i32>,
}

impl Default for EngineConfigBuilder {
    fn default() -> Self {
        Self {
            role: TlsRole::Client,
            peer_host: None,
            peer_port: 0,
            min_version: TlsVersion::Tls12,
            max_version: TlsVersion::Tls13,
            cipher_suites: vec![
                CipherSuite::TLS_AES_256_GCM_SHA384,
                CipherSuite::TLS_AES_128_GCM_SHA256,
                CipherSuite::TLS_CHACHA20_POLY1305_SHA256,
                CipherSuite::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
                CipherSuite::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
            ],
            client_auth: ClientAuth::None,
            key_material: None,
            certificate_alias: None,
            key_sources: Vec::new(),
            trust_verifiers: Vec::new(),
            extra_options: HashMap::new(),
        }
    }
}

impl EngineConfigBuilder {
    pub fn role(mut self, role: TlsRole) -> Self {
        self.role = role;
        self
    }

    pub fn peer(mut self, host: &str, port: u16) -> Self {
        self.peer_host = Some(host.to_string());
        self.peer_port = port;
        self
    }

    pub fn min_version(mut self, version: TlsVersion) -> Self {
        self.min_version = version;
        self
    }

    pub fn max_version(mut self, version: TlsVersion) -> Self {
        self.max_version = version;
        self
    }

    pub fn cipher_suites(mut self, suites: &[CipherSuite]) -> Self {
        self.cipher_suites = suites.to_vec();
        self
    }

    pub fn client_auth(mut self, mode: ClientAuth) -> Self {
        self.client_auth = mode;
        self
    }

    pub fn key_material(mut self, material: KeyMaterial) -> Self {
        self.key_material = Some(material);
        self
    }

    pub fn certificate_alias(mut self, alias: &str) -> Self {
        self.certificate_alias = Some(alias.to_string());
        self
    }

    pub fn key_source(mut self, source: Arc<dyn KeySource>) -> Self {
        self.key_sources.push(source);
        self
    }

    pub fn trust_verifier(mut self, verifier: Arc<dyn TrustVerifier>) -> Self {
        self.trust_verifiers.push(verifier);
        self
    }

    pub fn extra_option(mut self, option: i32, value: i32) -> Self {
        self.extra_options.insert(option, value);
        self
    }

    pub fn build(self) -> EngineConfig {
        EngineConfig {
            role: self.role,
            peer_host: self.peer_host,
            peer_port: self.peer_port,
            min_version: self.min_version,
            max_version: self.max_version,
            cipher_suites: self.cipher_suites,
            client_auth: self.client_auth,
            key_material: self.key_material,
            certificate_alias: self.certificate_alias,
            key_sources: self.key_sources,
            trust_verifiers: self.trust_verifiers,
            extra_options: self.extra_options,
        }
    }
}
