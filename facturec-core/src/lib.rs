//! Core library for Ecuadorian SRI electronic invoicing: access keys,
//! factura XML assembly, XAdES-BES signing, and the offline
//! reception/authorization protocol.
//!
//! # Examples
//! ```rust
//! use facturec_core::config::{Environment, IssuerConfig};
//!
//! let config = IssuerConfig::new("1790012345001", "ACME CIA. LTDA.", "Av. Amazonas N34-111, Quito");
//! assert_eq!(config.environment, Environment::Test);
//! ```
pub mod access_key;
pub mod api;
pub mod certificate;
pub mod config;
pub mod invoice;
pub mod pipeline;
pub mod store;

use thiserror::Error;

/// Top-level error wrapper for core operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    AccessKey(#[from] access_key::AccessKeyError),
    #[error(transparent)]
    Certificate(#[from] certificate::CertificateError),
    #[error(transparent)]
    Invoice(#[from] invoice::InvoiceError),
    #[error(transparent)]
    Xml(#[from] invoice::xml::DocumentXmlError),
    #[error(transparent)]
    Signing(#[from] invoice::sign::SigningError),
    #[error(transparent)]
    Transport(#[from] api::TransportError),
    #[error(transparent)]
    Store(#[from] store::StoreError),
    #[error(transparent)]
    Pipeline(#[from] pipeline::PipelineError),
}

#[cfg(test)]
mod tests {
    use super::Error;
    use crate::access_key::AccessKeyError;
    use crate::api::TransportError;
    use crate::certificate::CertificateError;
    use crate::invoice::sign::SigningError;
    use crate::invoice::{InvoiceError, ValidationError};
    use crate::pipeline::PipelineError;
    use crate::store::StoreError;

    #[test]
    fn error_conversions_cover_variants() {
        let err: Error = AccessKeyError::NonNumeric.into();
        assert!(matches!(err, Error::AccessKey(_)));

        let err: Error = CertificateError::EmptyContainer.into();
        assert!(matches!(err, Error::Certificate(_)));

        let err: Error = InvoiceError::Validation(ValidationError::new(Vec::new())).into();
        assert!(matches!(err, Error::Invoice(_)));

        let err: Error = SigningError::MissingRoot.into();
        assert!(matches!(err, Error::Signing(_)));

        let err: Error = TransportError::InvalidResponse("bad".into()).into();
        assert!(matches!(err, Error::Transport(_)));

        let err: Error = StoreError::ConfigurationNotFound.into();
        assert!(matches!(err, Error::Store(_)));

        let err: Error = PipelineError::AlreadyAuthorized("inv".into()).into();
        assert!(matches!(err, Error::Pipeline(_)));
    }
}
