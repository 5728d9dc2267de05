//! TLS alert bookkeeping.
//!
//! The backend appends every alert it sends or receives to a ledger;
//! the engine drains the ledger between relay passes and turns fatal
//! alerts into faults and warning-level close_notify into direction
//! closes. Alerts are never removed, only marked consumed, so a scan
//! is idempotent over already-consumed entries.

use btls_types::EngineError;

/// Alert severity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AlertLevel {
    Warning = 1,
    Fatal = 2,
}

/// Alert description codes (RFC 8446 Section 6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AlertDescription {
    CloseNotify = 0,
    UnexpectedMessage = 10,
    BadRecordMac = 20,
    RecordOverflow = 22,
    HandshakeFailure = 40,
    BadCertificate = 42,
    UnsupportedCertificate = 43,
    CertificateRevoked = 44,
    CertificateExpired = 45,
    CertificateUnknown = 46,
    IllegalParameter = 47,
    UnknownCa = 48,
    AccessDenied = 49,
    DecodeError = 50,
    DecryptError = 51,
    ProtocolVersion = 70,
    InsufficientSecurity = 71,
    InternalError = 80,
    UserCanceled = 90,
    NoRenegotiation = 100,
    MissingExtension = 109,
    UnsupportedExtension = 110,
    UnrecognizedName = 112,
    UnknownPskIdentity = 115,
    CertificateRequired = 116,
    NoApplicationProtocol = 120,
}

impl AlertLevel {
    /// Convert from u8 to AlertLevel.
    pub fn from_u8(v: u8) -> Result<Self, u8> {
        match v {
            1 => Ok(AlertLevel::Warning),
            2 => Ok(AlertLevel::Fatal),
            _ => Err(v),
        }
    }
}

impl AlertDescription {
    /// Convert from u8 to AlertDescription.
    pub fn from_u8(v: u8) -> Result<Self, u8> {
        match v {
            0 => Ok(AlertDescription::CloseNotify),
            10 => Ok(AlertDescription::UnexpectedMessage),
            20 => Ok(AlertDescription::BadRecordMac),
            22 => Ok(AlertDescription::RecordOverflow),
            40 => Ok(AlertDescription::HandshakeFailure),
            42 => Ok(AlertDescription::BadCertificate),
            43 => Ok(AlertDescription::UnsupportedCertificate),
            44 => Ok(AlertDescription::CertificateRevoked),
            45 => Ok(AlertDescription::CertificateExpired),
            46 => Ok(AlertDescription::CertificateUnknown),
            47 => Ok(AlertDescription::IllegalParameter),
            48 => Ok(AlertDescription::UnknownCa),
            49 => Ok(AlertDescription::AccessDenied),
            50 => Ok(AlertDescription::DecodeError),
            51 => Ok(AlertDescription::DecryptError),
            70 => Ok(AlertDescription::ProtocolVersion),
            71 => Ok(AlertDescription::InsufficientSecurity),
            80 => Ok(AlertDescription::InternalError),
            90 => Ok(AlertDescription::UserCanceled),
            100 => Ok(AlertDescription::NoRenegotiation),
            109 => Ok(AlertDescription::MissingExtension),
            110 => Ok(AlertDescription::UnsupportedExtension),
            112 => Ok(AlertDescription::UnrecognizedName),
            115 => Ok(AlertDescription::UnknownPskIdentity),
            116 => Ok(AlertDescription::CertificateRequired),
            120 => Ok(AlertDescription::NoApplicationProtocol),
            _ => Err(v),
        }
    }
}

/// A TLS alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Alert {
    pub level: AlertLevel,
    pub description: AlertDescription,
}

impl Alert {
    /// Fault produced by this alert, if any. Warnings never fault.
    fn to_error(self) -> Option<EngineError> {
        match self.level {
            AlertLevel::Fatal => Some(EngineError::Alert(format!("{:?}", self.description))),
            AlertLevel::Warning => None,
        }
    }
}

/// Effects of one ledger scan.
#[derive(Debug, Default)]
pub struct AlertScan {
    /// A warning close_notify was received.
    pub close_inbound: bool,
    /// A warning close_notify was sent.
    pub close_outbound: bool,
    /// The first unconsumed fatal alert, as a fault. Later fatal
    /// alerts stay queued for the next scan.
    pub fault: Option<EngineError>,
}

/// Per-direction alert history with monotonic consumed offsets.
#[derive(Debug, Default)]
pub struct AlertLedger {
    inbound: Vec<Alert>,
    outbound: Vec<Alert>,
    inbound_consumed: usize,
    outbound_consumed: usize,
}

impl AlertLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an alert received from the peer.
    pub fn record_inbound(&mut self, alert: Alert) {
        self.inbound.push(alert);
    }

    /// Record an alert sent to the peer.
    pub fn record_outbound(&mut self, alert: Alert) {
        self.outbound.push(alert);
    }

    /// Consume unread alerts oldest-first, inbound before outbound.
    /// Consumption stops at the second fatal alert so that exactly one
    /// fault surfaces per scan.
    pub fn scan(&mut self) -> AlertScan {
        let mut scan = AlertScan::default();
        Self::scan_direction(
            &self.inbound,
            &mut self.inbound_consumed,
            &mut scan.close_inbound,
            &mut scan.fault,
        );
        Self::scan_direction(
            &self.outbound,
            &mut self.outbound_consumed,
            &mut scan.close_outbound,
            &mut scan.fault,
        );
        scan
    }

    fn scan_direction(
        alerts: &[Alert],
        consumed: &mut usize,
        close: &mut bool,
        fault: &mut Option<EngineError>,
    ) {
        while *consumed < alerts.len() {
            let alert = alerts[*consumed];
            match alert.to_error() {
                Some(err) => {
                    if fault.is_some() {
                        return;
                    }
                    *fault = Some(err);
                }
                None => {
                    if alert.description == AlertDescription::CloseNotify {
                        *close = true;
                    }
                }
            }
            *consumed += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn warning(description: AlertDescription) -> Alert {
        Alert {
            level: AlertLevel::Warning,
            description,
        }
    }

    fn fatal(description: AlertDescription) -> Alert {
        Alert {
            level: AlertLevel::Fatal,
            description,
        }
    }

    #[test]
    fn test_level_and_description_codes() {
        assert_eq!(AlertLevel::Warning as u8, 1);
        assert_eq!(AlertLevel::Fatal as u8, 2);
        assert_eq!(AlertDescription::CloseNotify as u8, 0);
        assert_eq!(AlertDescription::HandshakeFailure as u8, 40);
        assert_eq!(AlertDescription::BadCertificate as u8, 42);
        assert_eq!(AlertDescription::InternalError as u8, 80);
        assert_eq!(AlertDescription::CertificateRequired as u8, 116);
    }

    #[test]
    fn test_from_u8_roundtrip() {
        let codes: &[u8] = &[
            0, 10, 20, 22, 40, 42, 43, 44, 45, 46, 47, 48, 49, 50, 51, 70, 71, 80, 90, 100, 109,
            110, 112, 115, 116, 120,
        ];
        for &code in codes {
            assert_eq!(AlertDescription::from_u8(code).unwrap() as u8, code);
        }
        assert!(AlertDescription::from_u8(1).is_err());
        assert!(AlertDescription::from_u8(255).is_err());
        assert_eq!(AlertLevel::from_u8(1).unwrap(), AlertLevel::Warning);
        assert!(AlertLevel::from_u8(0).is_err());
    }

    #[test]
    fn test_scan_is_idempotent() {
        let mut ledger = AlertLedger::new();
        ledger.record_inbound(warning(AlertDescription::CloseNotify));

        let scan = ledger.scan();
        assert!(scan.close_inbound);
        assert!(scan.fault.is_none());

        // already consumed: no effects
        let scan = ledger.scan();
        assert!(!scan.close_inbound);
        assert!(scan.fault.is_none());
    }

    #[test]
    fn test_close_notify_direction_side_effects() {
        let mut ledger = AlertLedger::new();
        ledger.record_outbound(warning(AlertDescription::CloseNotify));
        let scan = ledger.scan();
        assert!(!scan.close_inbound);
        assert!(scan.close_outbound);
    }

    #[test]
    fn test_inbound_fatal_wins_tie_break() {
        let mut ledger = AlertLedger::new();
        ledger.record_outbound(fatal(AlertDescription::InternalError));
        ledger.record_inbound(fatal(AlertDescription::BadCertificate));

        let scan = ledger.scan();
        let fault = scan.fault.unwrap();
        assert!(fault.to_string().contains("BadCertificate"));

        // the outbound fatal stayed queued
        let scan = ledger.scan();
        let fault = scan.fault.unwrap();
        assert!(fault.to_string().contains("InternalError"));
    }

    #[test]
    fn test_one_fault_per_scan() {
        let mut ledger = AlertLedger::new();
        ledger.record_inbound(fatal(AlertDescription::HandshakeFailure));
        ledger.record_inbound(fatal(AlertDescription::DecodeError));
        ledger.record_inbound(fatal(AlertDescription::DecryptError));

        let mut seen = Vec::new();
        for _ in 0..3 {
            if let Some(fault) = ledger.scan().fault {
                seen.push(fault.to_string());
            }
        }
        assert_eq!(seen.len(), 3);
        assert!(seen[0].contains("HandshakeFailure"));
        assert!(seen[1].contains("DecodeError"));
        assert!(seen[2].contains("DecryptError"));
        assert!(ledger.scan().fault.is_none());
    }

    #[test]
    fn test_warnings_before_queued_fatal_are_consumed() {
        let mut ledger = AlertLedger::new();
        ledger.record_inbound(fatal(AlertDescription::InternalError));
        ledger.record_outbound(warning(AlertDescription::CloseNotify));
        ledger.record_outbound(fatal(AlertDescription::UserCanceled));

        let scan = ledger.scan();
        assert!(scan.fault.unwrap().to_string().contains("InternalError"));
        // the outbound warning was consumed even though the outbound
        // fatal stayed queued
        assert!(scan.close_outbound);

        let scan = ledger.scan();
        assert!(scan.fault.unwrap().to_string().contains("UserCanceled"));
    }

    #[test]
    fn test_non_close_warnings_have_no_effect() {
        let mut ledger = AlertLedger::new();
        ledger.record_inbound(warning(AlertDescription::NoRenegotiation));
        let scan = ledger.scan();
        assert!(!scan.close_inbound);
        assert!(scan.fault.is_none());
    }
}
