//! Persistence seam for invoices, issuer configuration, and certificates.
//!
//! The pipeline only talks to [`InvoiceStore`]; [`MemoryStore`] backs tests
//! and single-process deployments.
use crate::certificate::DigitalCertificate;
use crate::config::IssuerConfig;
use crate::invoice::Invoice;
use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("invoice {0} not found")]
    InvoiceNotFound(String),
    #[error("no active issuer configuration")]
    ConfigurationNotFound,
    #[error("certificate {0} not found")]
    CertificateNotFound(String),
    #[error("storage backend failure: {0}")]
    Backend(String),
}

/// Storage operations the pipeline depends on.
#[async_trait]
pub trait InvoiceStore: Send + Sync {
    async fn find_invoice(&self, id: &str) -> Result<Invoice, StoreError>;
    async fn save_invoice(&self, invoice: &Invoice) -> Result<(), StoreError>;
    async fn find_active_configuration(&self) -> Result<IssuerConfig, StoreError>;
    async fn find_certificate(&self, id: &str) -> Result<DigitalCertificate, StoreError>;
}

/// In-memory store over tokio `RwLock`s.
#[derive(Debug, Default)]
pub struct MemoryStore {
    invoices: RwLock<HashMap<String, Invoice>>,
    configuration: RwLock<Option<IssuerConfig>>,
    certificates: RwLock<HashMap<String, DigitalCertificate>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_configuration(&self, config: IssuerConfig) {
        *self.configuration.write().await = Some(config);
    }

    pub async fn insert_certificate(&self, id: impl Into<String>, cert: DigitalCertificate) {
        self.certificates.write().await.insert(id.into(), cert);
    }

    pub async fn invoice_count(&self) -> usize {
        self.invoices.read().await.len()
    }
}

#[async_trait]
impl InvoiceStore for MemoryStore {
    async fn find_invoice(&self, id: &str) -> Result<Invoice, StoreError> {
        self.invoices
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::InvoiceNotFound(id.to_string()))
    }

    async fn save_invoice(&self, invoice: &Invoice) -> Result<(), StoreError> {
        self.invoices
            .write()
            .await
            .insert(invoice.id().to_string(), invoice.clone());
        Ok(())
    }

    async fn find_active_configuration(&self) -> Result<IssuerConfig, StoreError> {
        self.configuration
            .read()
            .await
            .clone()
            .ok_or(StoreError::ConfigurationNotFound)
    }

    async fn find_certificate(&self, id: &str) -> Result<DigitalCertificate, StoreError> {
        self.certificates
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::CertificateNotFound(id.to_string()))
    }
}
