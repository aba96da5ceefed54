//! Orchestration of the issue / query / reprocess lifecycle.
//!
//! The pipeline walks one invoice through assemble, sign, reception, and
//! authorization, persisting after every transition so a crash leaves the
//! last observed state on record. Work on the same access key is serialized
//! through a per-key lock; distinct keys proceed in parallel.
use crate::access_key::AccessKey;
use crate::api::{AuthorityClient, ReceptionStatus, TransportError};
use crate::invoice::sign::{DocumentSigner, SigningError};
use crate::invoice::xml::{self, DocumentXmlError};
use crate::invoice::{AuthorizationResult, AuthorizationStatus, Invoice};
use crate::store::{InvoiceStore, StoreError};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Xml(#[from] DocumentXmlError),
    #[error(transparent)]
    Signing(#[from] SigningError),
    #[error("invoice {0} is already authorized")]
    AlreadyAuthorized(String),
    #[error("issuer configuration has no certificate reference")]
    MissingCertificateReference,
}

/// What happens to the access key when a rejected invoice is reprocessed.
///
/// Reusing the key retries the same document; minting a new key is the way
/// out of a `CLAVE ACCESO REGISTRADA` rejection, at the cost of the invoice
/// changing identity with the Authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReprocessKeyPolicy {
    #[default]
    ReuseExistingKey,
    MintNewKey,
}

/// Drives invoices through the submission lifecycle. Generic over storage,
/// the authority gateway, and the signer so tests can swap any seam.
pub struct SubmissionPipeline<S, A, D> {
    store: Arc<S>,
    authority: Arc<A>,
    signer: D,
    reprocess_policy: ReprocessKeyPolicy,
    key_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl<S, A, D> SubmissionPipeline<S, A, D>
where
    S: InvoiceStore,
    A: AuthorityClient,
    D: DocumentSigner,
{
    pub fn new(store: Arc<S>, authority: Arc<A>, signer: D) -> Self {
        Self {
            store,
            authority,
            signer,
            reprocess_policy: ReprocessKeyPolicy::default(),
            key_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_reprocess_policy(mut self, policy: ReprocessKeyPolicy) -> Self {
        self.reprocess_policy = policy;
        self
    }

    pub fn reprocess_policy(&self) -> ReprocessKeyPolicy {
        self.reprocess_policy
    }

    /// Run a freshly built invoice through the full lifecycle.
    ///
    /// # Errors
    /// Infrastructure failures surface as [`PipelineError`]; a DEVUELTA or
    /// NO AUTORIZADO verdict is not an error, it is recorded on the invoice.
    pub async fn issue(&self, invoice: Invoice) -> Result<Invoice, PipelineError> {
        tracing::info!(invoice = invoice.id(), access_key = %invoice.access_key(), "issuing invoice");
        self.store.save_invoice(&invoice).await?;
        let key = invoice.access_key().as_str().to_string();
        let lock = self.key_lock(&key).await;
        let result = {
            let _guard = lock.lock().await;
            self.process(invoice).await
        };
        self.prune_key_lock(&key, lock).await;
        result
    }

    /// Re-query the authorization service and replace the stored result in
    /// full, whatever the previous state was. Serialized with other work on
    /// the same access key so a poll cannot overwrite a newer result.
    pub async fn query(&self, invoice_id: &str) -> Result<Invoice, PipelineError> {
        let invoice = self.store.find_invoice(invoice_id).await?;
        let key = invoice.access_key().as_str().to_string();
        let lock = self.key_lock(&key).await;
        let result = {
            let _guard = lock.lock().await;
            self.query_under_lock(invoice_id).await
        };
        self.prune_key_lock(&key, lock).await;
        result
    }

    async fn query_under_lock(&self, invoice_id: &str) -> Result<Invoice, PipelineError> {
        let mut invoice = self.store.find_invoice(invoice_id).await?;
        let result = self
            .authority
            .query_authorization(invoice.access_key())
            .await?;
        tracing::info!(invoice = invoice.id(), status = result.status.as_wire(), "authorization queried");
        invoice.set_authorization(result);
        self.store.save_invoice(&invoice).await?;
        Ok(invoice)
    }

    /// Push a previously returned or rejected invoice through the lifecycle
    /// again. Refused outright for authorized invoices; nothing is mutated
    /// in that case.
    pub async fn reprocess(&self, invoice_id: &str) -> Result<Invoice, PipelineError> {
        let invoice = self.store.find_invoice(invoice_id).await?;
        let key = invoice.access_key().as_str().to_string();
        let lock = self.key_lock(&key).await;
        let result = {
            let _guard = lock.lock().await;
            self.reprocess_under_lock(invoice_id).await
        };
        self.prune_key_lock(&key, lock).await;
        result
    }

    async fn reprocess_under_lock(&self, invoice_id: &str) -> Result<Invoice, PipelineError> {
        // Re-read and re-check under the lock: a concurrent attempt may have
        // driven the invoice to AUTORIZADO after the caller last saw it.
        let mut invoice = self.store.find_invoice(invoice_id).await?;
        if invoice.status().is_final() {
            return Err(PipelineError::AlreadyAuthorized(invoice.id().to_string()));
        }
        if self.reprocess_policy == ReprocessKeyPolicy::MintNewKey {
            let config = self.store.find_active_configuration().await?;
            let key = AccessKey::generate(
                invoice.issue_date(),
                invoice.sequential(),
                &config.ruc,
                config.environment,
                config.emission_type,
            );
            tracing::info!(invoice = invoice.id(), new_key = %key, "minting new access key for reprocess");
            invoice.replace_access_key(key);
        } else {
            tracing::info!(invoice = invoice.id(), access_key = %invoice.access_key(), "reprocessing under existing access key");
        }
        self.process(invoice).await
    }

    /// Assemble, sign, submit, and (when received) query authorization.
    /// The caller holds the per-key lock.
    async fn process(&self, mut invoice: Invoice) -> Result<Invoice, PipelineError> {
        let config = self.store.find_active_configuration().await?;
        let certificate_id = config
            .certificate_id
            .clone()
            .ok_or(PipelineError::MissingCertificateReference)?;
        let certificate = self.store.find_certificate(&certificate_id).await?;

        let unsigned = xml::to_xml(&invoice, &config)?;
        let signed = self
            .signer
            .sign(&unsigned, &certificate, certificate.passphrase())?;
        invoice.set_documents(unsigned, signed.clone());
        self.store.save_invoice(&invoice).await?;

        let outcome = self.authority.submit(&signed).await?;
        match outcome.status {
            ReceptionStatus::Received => {
                invoice.set_authorization(AuthorizationResult::with_status(
                    AuthorizationStatus::Received,
                    outcome.messages,
                ));
                self.store.save_invoice(&invoice).await?;

                let result = self
                    .authority
                    .query_authorization(invoice.access_key())
                    .await?;
                tracing::info!(invoice = invoice.id(), status = result.status.as_wire(), "authorization verdict recorded");
                invoice.set_authorization(result);
                self.store.save_invoice(&invoice).await?;
            }
            ReceptionStatus::Returned => {
                tracing::warn!(
                    invoice = invoice.id(),
                    duplicate_key = outcome.duplicate_access_key(),
                    "document returned by reception"
                );
                invoice.set_authorization(AuthorizationResult::with_status(
                    AuthorizationStatus::Returned,
                    outcome.messages,
                ));
                self.store.save_invoice(&invoice).await?;
            }
        }
        Ok(invoice)
    }

    async fn key_lock(&self, access_key: &str) -> Arc<Mutex<()>> {
        let mut locks = self.key_locks.lock().await;
        locks
            .entry(access_key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Release our handle and evict the map entry once no other task holds
    /// it, so the lock map does not grow with every key ever processed.
    async fn prune_key_lock(&self, access_key: &str, lock: Arc<Mutex<()>>) {
        drop(lock);
        let mut locks = self.key_locks.lock().await;
        if let Some(entry) = locks.get(access_key) {
            if Arc::strong_count(entry) == 1 {
                locks.remove(access_key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::SimulatedAuthority;
    use crate::invoice::sign::XadesBesSigner;
    use crate::store::MemoryStore;

    #[test]
    fn default_policy_reuses_the_key() {
        let pipeline = SubmissionPipeline::new(
            Arc::new(MemoryStore::new()),
            Arc::new(SimulatedAuthority::new()),
            XadesBesSigner::new(),
        );
        assert_eq!(
            pipeline.reprocess_policy(),
            ReprocessKeyPolicy::ReuseExistingKey
        );
        let pipeline = pipeline.with_reprocess_policy(ReprocessKeyPolicy::MintNewKey);
        assert_eq!(pipeline.reprocess_policy(), ReprocessKeyPolicy::MintNewKey);
    }

    fn pipeline() -> SubmissionPipeline<MemoryStore, SimulatedAuthority, XadesBesSigner> {
        SubmissionPipeline::new(
            Arc::new(MemoryStore::new()),
            Arc::new(SimulatedAuthority::new()),
            XadesBesSigner::new(),
        )
    }

    #[tokio::test]
    async fn released_key_locks_are_pruned() {
        let pipeline = pipeline();
        let lock = pipeline.key_lock("k1").await;
        assert_eq!(pipeline.key_locks.lock().await.len(), 1);
        pipeline.prune_key_lock("k1", lock).await;
        assert!(pipeline.key_locks.lock().await.is_empty());
    }

    #[tokio::test]
    async fn contended_key_locks_survive_until_the_last_release() {
        let pipeline = pipeline();
        let first = pipeline.key_lock("k1").await;
        let second = pipeline.key_lock("k1").await;
        pipeline.prune_key_lock("k1", first).await;
        // Still held by the second handle.
        assert_eq!(pipeline.key_locks.lock().await.len(), 1);
        pipeline.prune_key_lock("k1", second).await;
        assert!(pipeline.key_locks.lock().await.is_empty());
    }
}
