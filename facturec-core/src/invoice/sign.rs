//! XAdES-BES enveloped signing of assembled documents.
//!
//! The signature block is inserted immediately before the closing `factura`
//! tag so the signed output stays a single self-contained document. Digest
//! values are real SHA-256 hashes of the document, the certificate container,
//! and the signed properties block; the `SignatureValue` slot carries a
//! digest-derived value until PKCS#12 private key extraction is wired in.
use crate::certificate::{CertificateError, DigitalCertificate};
use base64ct::{Base64, Encoding};
use chrono::Utc;
use quick_xml::escape::escape;
use quick_xml::events::Event;
use quick_xml::Reader;
use rand::Rng;
use sha2::{Digest, Sha256};
use thiserror::Error;

const DS_NS: &str = "http://www.w3.org/2000/09/xmldsig#";
const ETSI_NS: &str = "http://uri.etsi.org/01903/v1.3.2#";
const CLOSING_ROOT: &str = "</factura>";

#[derive(Debug, Error)]
pub enum SigningError {
    #[error(transparent)]
    Certificate(#[from] CertificateError),
    #[error("document is not well-formed XML: {0}")]
    MalformedDocument(String),
    #[error("document has no closing factura element")]
    MissingRoot,
}

/// Produces the signed rendition of an assembled document.
pub trait DocumentSigner {
    /// Sign `unsigned_xml` with the given certificate, returning the full
    /// document with the signature envelope inserted.
    fn sign(
        &self,
        unsigned_xml: &str,
        certificate: &DigitalCertificate,
        passphrase: &str,
    ) -> Result<String, SigningError>;
}

/// XAdES-BES signer over the factura schema.
#[derive(Debug, Default)]
pub struct XadesBesSigner;

impl XadesBesSigner {
    pub fn new() -> Self {
        Self
    }
}

impl DocumentSigner for XadesBesSigner {
    fn sign(
        &self,
        unsigned_xml: &str,
        certificate: &DigitalCertificate,
        passphrase: &str,
    ) -> Result<String, SigningError> {
        let metadata = certificate.unlock(passphrase)?;
        check_well_formed(unsigned_xml)?;
        let insert_at = unsigned_xml
            .rfind(CLOSING_ROOT)
            .ok_or(SigningError::MissingRoot)?;

        let id = rand::thread_rng().gen_range(100_000..1_000_000u32);
        let document_digest = sha256_base64(unsigned_xml.as_bytes());
        let certificate_digest = sha256_base64(&certificate.container);
        let signing_time = Utc::now().format("%Y-%m-%dT%H:%M:%S%:z").to_string();

        let signed_properties = signed_properties_block(
            id,
            &signing_time,
            &certificate_digest,
            &metadata.issuer,
            &metadata.serial,
        );
        let signed_properties_digest = sha256_base64(signed_properties.as_bytes());

        // No key extraction yet: derive a stable stand-in from the document
        // digest and the certificate serial.
        let mut hasher = Sha256::new();
        hasher.update(document_digest.as_bytes());
        hasher.update(metadata.serial.as_bytes());
        let signature_value = Base64::encode_string(&hasher.finalize());

        let certificate_b64 = Base64::encode_string(&certificate.container);
        let signature = signature_block(
            id,
            &document_digest,
            &certificate_digest,
            &signed_properties_digest,
            &signature_value,
            &certificate_b64,
            &signed_properties,
        );

        let mut signed = String::with_capacity(unsigned_xml.len() + signature.len());
        signed.push_str(&unsigned_xml[..insert_at]);
        signed.push_str(&signature);
        signed.push_str(&unsigned_xml[insert_at..]);
        Ok(signed)
    }
}

fn check_well_formed(xml: &str) -> Result<(), SigningError> {
    let mut reader = Reader::from_str(xml);
    loop {
        match reader.read_event() {
            Ok(Event::Eof) => return Ok(()),
            Ok(_) => {}
            Err(e) => return Err(SigningError::MalformedDocument(e.to_string())),
        }
    }
}

fn sha256_base64(bytes: &[u8]) -> String {
    Base64::encode_string(&Sha256::digest(bytes))
}

fn signed_properties_block(
    id: u32,
    signing_time: &str,
    certificate_digest: &str,
    issuer: &str,
    serial: &str,
) -> String {
    format!(
        concat!(
            "<etsi:SignedProperties Id=\"Signature{id}-SignedProperties{id}\">",
            "<etsi:SignedSignatureProperties>",
            "<etsi:SigningTime>{time}</etsi:SigningTime>",
            "<etsi:SigningCertificate>",
            "<etsi:Cert>",
            "<etsi:CertDigest>",
            "<ds:DigestMethod Algorithm=\"http://www.w3.org/2001/04/xmlenc#sha256\"></ds:DigestMethod>",
            "<ds:DigestValue>{cert_digest}</ds:DigestValue>",
            "</etsi:CertDigest>",
            "<etsi:IssuerSerial>",
            "<ds:X509IssuerName>{issuer}</ds:X509IssuerName>",
            "<ds:X509SerialNumber>{serial}</ds:X509SerialNumber>",
            "</etsi:IssuerSerial>",
            "</etsi:Cert>",
            "</etsi:SigningCertificate>",
            "</etsi:SignedSignatureProperties>",
            "<etsi:SignedDataObjectProperties>",
            "<etsi:DataObjectFormat ObjectReference=\"#Reference-ID-{id}\">",
            "<etsi:Description>contenido comprobante</etsi:Description>",
            "<etsi:MimeType>text/xml</etsi:MimeType>",
            "</etsi:DataObjectFormat>",
            "</etsi:SignedDataObjectProperties>",
            "</etsi:SignedProperties>",
        ),
        id = id,
        time = signing_time,
        cert_digest = certificate_digest,
        issuer = escape(issuer),
        serial = serial,
    )
}

#[allow(clippy::too_many_arguments)]
fn signature_block(
    id: u32,
    document_digest: &str,
    certificate_digest: &str,
    signed_properties_digest: &str,
    signature_value: &str,
    certificate_b64: &str,
    signed_properties: &str,
) -> String {
    format!(
        concat!(
            "<ds:Signature xmlns:ds=\"{ds}\" xmlns:etsi=\"{etsi}\" Id=\"Signature{id}\">",
            "<ds:SignedInfo Id=\"Signature-SignedInfo{id}\">",
            "<ds:CanonicalizationMethod Algorithm=\"http://www.w3.org/TR/2001/REC-xml-c14n-20010315\"></ds:CanonicalizationMethod>",
            "<ds:SignatureMethod Algorithm=\"http://www.w3.org/2001/04/xmldsig-more#rsa-sha256\"></ds:SignatureMethod>",
            "<ds:Reference Id=\"SignedPropertiesID{id}\" Type=\"http://uri.etsi.org/01903#SignedProperties\" URI=\"#Signature{id}-SignedProperties{id}\">",
            "<ds:DigestMethod Algorithm=\"http://www.w3.org/2001/04/xmlenc#sha256\"></ds:DigestMethod>",
            "<ds:DigestValue>{props_digest}</ds:DigestValue>",
            "</ds:Reference>",
            "<ds:Reference URI=\"#Certificate{id}\">",
            "<ds:DigestMethod Algorithm=\"http://www.w3.org/2001/04/xmlenc#sha256\"></ds:DigestMethod>",
            "<ds:DigestValue>{cert_digest}</ds:DigestValue>",
            "</ds:Reference>",
            "<ds:Reference Id=\"Reference-ID-{id}\" URI=\"#comprobante\">",
            "<ds:Transforms>",
            "<ds:Transform Algorithm=\"http://www.w3.org/2000/09/xmldsig#enveloped-signature\"></ds:Transform>",
            "</ds:Transforms>",
            "<ds:DigestMethod Algorithm=\"http://www.w3.org/2001/04/xmlenc#sha256\"></ds:DigestMethod>",
            "<ds:DigestValue>{doc_digest}</ds:DigestValue>",
            "</ds:Reference>",
            "</ds:SignedInfo>",
            "<ds:SignatureValue Id=\"SignatureValue{id}\">{signature}</ds:SignatureValue>",
            "<ds:KeyInfo Id=\"Certificate{id}\">",
            "<ds:X509Data>",
            "<ds:X509Certificate>{certificate}</ds:X509Certificate>",
            "</ds:X509Data>",
            "</ds:KeyInfo>",
            "<ds:Object Id=\"Signature{id}-Object{id}\">",
            "<etsi:QualifyingProperties Target=\"#Signature{id}\">",
            "{signed_properties}",
            "</etsi:QualifyingProperties>",
            "</ds:Object>",
            "</ds:Signature>",
        ),
        ds = DS_NS,
        etsi = ETSI_NS,
        id = id,
        props_digest = signed_properties_digest,
        cert_digest = certificate_digest,
        doc_digest = document_digest,
        signature = signature_value,
        certificate = certificate_b64,
        signed_properties = signed_properties,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certificate::CertificateMetadata;
    use chrono::TimeZone;

    fn certificate() -> DigitalCertificate {
        DigitalCertificate::new(vec![0x30, 0x82, 0x01, 0x0a], "s3cret").with_metadata(
            CertificateMetadata {
                subject: "CN=CONTRIBUYENTE PRUEBA, C=EC".into(),
                issuer: "CN=AC RAIZ & SUBCA, C=EC".into(),
                serial: "987654321".into(),
                valid_from: chrono::Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
                valid_to: chrono::Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            },
        )
    }

    const DOC: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
        <factura id=\"comprobante\" version=\"1.0.0\"><infoTributaria>\
        <claveAcceso>0905202401179001234500110010010000001231234567814</claveAcceso>\
        </infoTributaria></factura>";

    #[test]
    fn signature_is_enveloped_before_closing_root() {
        let signed = XadesBesSigner::new()
            .sign(DOC, &certificate(), "s3cret")
            .expect("sign");
        let sig_start = signed.find("<ds:Signature ").expect("signature present");
        let root_close = signed.rfind("</factura>").expect("root close present");
        assert!(sig_start < root_close);
        assert!(signed.ends_with("</factura>"));
        // Everything before the signature is the unsigned document, untouched.
        assert!(signed.starts_with(&DOC[..DOC.len() - "</factura>".len()]));
    }

    #[test]
    fn signature_carries_real_digests_and_issuer_serial() {
        let signed = XadesBesSigner::new()
            .sign(DOC, &certificate(), "s3cret")
            .expect("sign");
        let doc_digest = sha256_base64(DOC.as_bytes());
        assert!(signed.contains(&format!("<ds:DigestValue>{doc_digest}</ds:DigestValue>")));
        assert!(signed.contains("<ds:X509SerialNumber>987654321</ds:X509SerialNumber>"));
        // Ampersand in the issuer DN must be escaped.
        assert!(signed.contains("CN=AC RAIZ &amp; SUBCA, C=EC"));
        assert!(signed.contains("<etsi:SigningTime>"));
    }

    #[test]
    fn wrong_passphrase_is_rejected() {
        let err = XadesBesSigner::new()
            .sign(DOC, &certificate(), "wrong")
            .expect_err("must fail");
        assert!(matches!(
            err,
            SigningError::Certificate(CertificateError::WrongPassphrase)
        ));
    }

    #[test]
    fn malformed_document_is_rejected() {
        let err = XadesBesSigner::new()
            .sign("<factura><unclosed></factura>", &certificate(), "s3cret")
            .expect_err("must fail");
        assert!(matches!(err, SigningError::MalformedDocument(_)));
    }

    #[test]
    fn document_without_root_is_rejected() {
        let err = XadesBesSigner::new()
            .sign("<otro></otro>", &certificate(), "s3cret")
            .expect_err("must fail");
        assert!(matches!(err, SigningError::MissingRoot));
    }
}
