/// Public key algorithm identifiers, as extracted from a certificate's
/// SubjectPublicKeyInfo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyAlgorithm {
    Rsa,
    Ecdsa,
    Dsa,
    Ed25519,
}

impl KeyAlgorithm {
    /// Standard authentication-type name for this algorithm, as handed
    /// to trust verifiers.
    pub fn name(&self) -> &'static str {
        match self {
            KeyAlgorithm::Rsa => "RSA",
            KeyAlgorithm::Ecdsa => "EC",
            KeyAlgorithm::Dsa => "DSA",
            KeyAlgorithm::Ed25519 => "Ed25519",
        }
    }
}
