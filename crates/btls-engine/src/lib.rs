#![forbid(unsafe_code)]
#![doc = "Non-blocking buffer-relay TLS engine for btls."]

pub mod alert;
pub mod backend;
pub mod config;
pub mod coordinator;
pub mod engine;
pub mod relay;
pub mod session;
pub mod stream;
pub mod task;
pub mod trust;

/// Default capacity of each relay buffer, in bytes.
pub const BUFFER_SIZE: usize = 1 << 12;

/// TLS protocol version, ordered oldest to newest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TlsVersion {
    Tls10,
    Tls11,
    Tls12,
    Tls13,
}

/// TLS cipher suite identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CipherSuite(pub u16);

impl CipherSuite {
    // TLS 1.3 cipher suites
    pub const TLS_AES_128_GCM_SHA256: Self = Self(0x1301);
    pub const TLS_AES_256_GCM_SHA384: Self = Self(0x1302);
    pub const TLS_CHACHA20_POLY1305_SHA256: Self = Self(0x1303);
    pub const TLS_AES_128_CCM_SHA256: Self = Self(0x1304);

    // TLS 1.2 cipher suites (representative)
    pub const TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256: Self = Self(0xC02F);
    pub const TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384: Self = Self(0xC030);
    pub const TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256: Self = Self(0xC02B);
    pub const TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384: Self = Self(0xC02C);
    pub const TLS_DHE_RSA_WITH_AES_128_GCM_SHA256: Self = Self(0x009E);
    pub const TLS_DHE_DSS_WITH_AES_128_GCM_SHA256: Self = Self(0x00A2);
    pub const TLS_RSA_WITH_AES_128_GCM_SHA256: Self = Self(0x009C);
    pub const TLS_RSA_WITH_AES_256_GCM_SHA384: Self = Self(0x009D);

    /// Certificate authentication type required by this suite's key
    /// exchange, for handshakes below TLS 1.3. Returns `None` for
    /// suites that do not pin a certificate signature algorithm
    /// (TLS 1.3 suites determine it from the certificate instead).
    pub fn auth_type(&self) -> Option<&'static str> {
        match self.0 {
            0xC02B | 0xC02C => Some("ECDSA"),
            0x009C | 0x009D | 0x009E | 0xC02F | 0xC030 => Some("RSA"),
            0x00A2 => Some("DSA"),
            _ => None,
        }
    }
}

/// The role of a TLS endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsRole {
    Client,
    Server,
}

/// Traffic direction relative to this endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}
