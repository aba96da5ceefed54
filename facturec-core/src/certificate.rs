//! Digital certificate key material and derived metadata.
//!
//! The signing certificate is an opaque container (typically a `.p12`/`.pfx`
//! issued by an Ecuadorian certification entity) plus its passphrase. The core
//! reads it and never mutates it.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use x509_cert::{der::Decode, Certificate};

/// Errors raised while loading or unlocking certificate material.
#[derive(Debug, Error)]
pub enum CertificateError {
    #[error("certificate container is empty")]
    EmptyContainer,
    #[error("passphrase does not unlock the certificate")]
    WrongPassphrase,
    #[error("certificate metadata unavailable and container is not a DER certificate: {0}")]
    Metadata(String),
}

/// Subject/issuer/validity information derived from the certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateMetadata {
    pub subject: String,
    pub issuer: String,
    /// Serial number as a decimal string, as required by `X509SerialNumber`.
    pub serial: String,
    pub valid_from: DateTime<Utc>,
    pub valid_to: DateTime<Utc>,
}

impl CertificateMetadata {
    /// Derive metadata from a DER-encoded X.509 certificate.
    ///
    /// # Errors
    /// Returns [`CertificateError::Metadata`] if the bytes do not decode.
    pub fn from_der(der: &[u8]) -> Result<Self, CertificateError> {
        let cert =
            Certificate::from_der(der).map_err(|e| CertificateError::Metadata(format!("{e}")))?;
        let tbs = &cert.tbs_certificate;
        let serial = serial_bytes_to_decimal_string(tbs.serial_number.as_bytes());
        let issuer = normalize_dn(&tbs.issuer.to_string());
        let subject = normalize_dn(&tbs.subject.to_string());
        let valid_from = DateTime::<Utc>::from(tbs.validity.not_before.to_system_time());
        let valid_to = DateTime::<Utc>::from(tbs.validity.not_after.to_system_time());
        Ok(Self {
            subject,
            issuer,
            serial,
            valid_from,
            valid_to,
        })
    }

    pub fn is_valid_at(&self, at: DateTime<Utc>) -> bool {
        self.valid_from <= at && at <= self.valid_to
    }
}

fn normalize_dn(dn: &str) -> String {
    dn.split(',')
        .map(|part| part.trim())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Big-endian serial bytes to decimal, without a big-integer dependency.
pub(crate) fn serial_bytes_to_decimal_string(bytes: &[u8]) -> String {
    if bytes.is_empty() {
        return "0".to_string();
    }

    let mut digits: Vec<u8> = vec![0];
    for &byte in bytes {
        let mut carry = byte as u32;
        for digit in digits.iter_mut() {
            let value = (*digit as u32) * 256 + carry;
            *digit = (value % 10) as u8;
            carry = value / 10;
        }
        while carry > 0 {
            digits.push((carry % 10) as u8);
            carry /= 10;
        }
    }

    while digits.len() > 1 && matches!(digits.last(), Some(0)) {
        digits.pop();
    }

    digits.iter().rev().map(|d| (b'0' + *d) as char).collect()
}

/// Opaque signing certificate: container bytes, passphrase, and optionally
/// pre-derived metadata (stored alongside the container when the certificate
/// is registered).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DigitalCertificate {
    pub container: Vec<u8>,
    passphrase: String,
    pub metadata: Option<CertificateMetadata>,
}

impl DigitalCertificate {
    pub fn new(container: Vec<u8>, passphrase: impl Into<String>) -> Self {
        Self {
            container,
            passphrase: passphrase.into(),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: CertificateMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Check the caller-supplied passphrase against the container and hand
    /// back the certificate metadata.
    ///
    /// The container format is opaque to the core; a full implementation
    /// would open the PKCS#12 bag here. The check performed is that the
    /// passphrase matches the one registered with the container.
    ///
    /// # Errors
    /// [`CertificateError::WrongPassphrase`] on mismatch,
    /// [`CertificateError::EmptyContainer`] when no key material is present,
    /// [`CertificateError::Metadata`] when no metadata is stored and the
    /// container cannot be decoded as a DER certificate.
    pub fn unlock(&self, passphrase: &str) -> Result<CertificateMetadata, CertificateError> {
        if self.container.is_empty() {
            return Err(CertificateError::EmptyContainer);
        }
        if passphrase != self.passphrase {
            return Err(CertificateError::WrongPassphrase);
        }
        match &self.metadata {
            Some(metadata) => Ok(metadata.clone()),
            None => CertificateMetadata::from_der(&self.container),
        }
    }

    pub fn passphrase(&self) -> &str {
        &self.passphrase
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64ct::{Base64, Encoding};
    use chrono::TimeZone;

    // Self-signed P-256 certificate with serial 123456789 and subject
    // C=EC, O=SECURITY DATA S.A., CN=CONTRIBUYENTE PRUEBA.
    const TEST_CERT_DER_B64: &str = "MIIB2DCCAX2gAwIBAgIEB1vNFTAKBggqhkjOPQQDAjBJMQswCQYDVQQGEwJFQzEbMBkGA1UECgwSU0VDVVJJVFkgREFUQSBTLkEuMR0wGwYDVQQDDBRDT05UUklCVVlFTlRFIFBSVUVCQTAeFw0yNjA4MjQxNDE5NDVaFw0zNjA4MjExNDE5NDVaMEkxCzAJBgNVBAYTAkVDMRswGQYDVQQKDBJTRUNVUklUWSBEQVRBIFMuQS4xHTAbBgNVBAMMFENPTlRSSUJVWUVOVEUgUFJVRUJBMFkwEwYHKoZIzj0CAQYIKoZIzj0DAQcDQgAEDwooazBN/pmnVMzFYNbEPMHEPcw1MIyj89j6qqg/C+uIB49HkMdEgUZ3WTT9lTVCrjqNd4jmjsn9/E5GgGb3EaNTMFEwHQYDVR0OBBYEFBcM4uS1CjjB8bBuTvOTPoK01HVMMB8GA1UdIwQYMBaAFBcM4uS1CjjB8bBuTvOTPoK01HVMMA8GA1UdEwEB/wQFMAMBAf8wCgYIKoZIzj0EAwIDSQAwRgIhAPTIU0nLJYZqDVNoB1EfkTMcRF85R04prf4j0T0a05HEAiEAxHspJrXbVpo9vswnA33mr6EQk2WpdBlLYj0i3j9MSsQ=";

    fn metadata() -> CertificateMetadata {
        CertificateMetadata {
            subject: "CN=CONTRIBUYENTE PRUEBA, O=SECURITY DATA S.A., C=EC".into(),
            issuer: "CN=AUTORIDAD DE CERTIFICACION SUBCA-1, O=SECURITY DATA S.A., C=EC".into(),
            serial: "123456789".into(),
            valid_from: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            valid_to: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn serial_bytes_to_decimal_handles_large_values() {
        assert_eq!(serial_bytes_to_decimal_string(&[0x01]), "1");
        assert_eq!(serial_bytes_to_decimal_string(&[0x01, 0x00]), "256");
        assert_eq!(serial_bytes_to_decimal_string(&[0x00, 0x01]), "1");
        assert_eq!(serial_bytes_to_decimal_string(&[0xFF, 0xFF]), "65535");
        assert_eq!(serial_bytes_to_decimal_string(&[]), "0");
    }

    #[test]
    fn unlock_checks_passphrase_and_container() {
        let cert = DigitalCertificate::new(vec![1, 2, 3], "s3cret").with_metadata(metadata());
        assert!(cert.unlock("s3cret").is_ok());
        assert!(matches!(
            cert.unlock("wrong"),
            Err(CertificateError::WrongPassphrase)
        ));

        let empty = DigitalCertificate::new(Vec::new(), "s3cret");
        assert!(matches!(
            empty.unlock("s3cret"),
            Err(CertificateError::EmptyContainer)
        ));
    }

    #[test]
    fn metadata_derives_from_a_der_certificate() {
        let der = Base64::decode_vec(TEST_CERT_DER_B64).expect("decode fixture");
        let metadata = CertificateMetadata::from_der(&der).expect("metadata");
        assert_eq!(metadata.serial, "123456789");
        assert!(metadata.subject.contains("CN=CONTRIBUYENTE PRUEBA"));
        assert!(metadata.subject.contains("C=EC"));
        // Self-signed, so issuer and subject agree.
        assert_eq!(metadata.issuer, metadata.subject);
        assert!(metadata.valid_from < metadata.valid_to);
        assert!(metadata.is_valid_at(metadata.valid_from));
    }

    #[test]
    fn unlock_with_der_container_and_no_stored_metadata() {
        let der = Base64::decode_vec(TEST_CERT_DER_B64).expect("decode fixture");
        let cert = DigitalCertificate::new(der, "s3cret");
        let metadata = cert.unlock("s3cret").expect("unlock");
        assert_eq!(metadata.serial, "123456789");
    }

    #[test]
    fn unlock_without_metadata_requires_der_container() {
        let cert = DigitalCertificate::new(vec![0xde, 0xad], "s3cret");
        assert!(matches!(
            cert.unlock("s3cret"),
            Err(CertificateError::Metadata(_))
        ));
    }

    #[test]
    fn validity_window_is_inclusive() {
        let m = metadata();
        assert!(m.is_valid_at(Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap()));
        assert!(!m.is_valid_at(Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap()));
    }
}
