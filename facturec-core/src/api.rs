//! SRI SOAP client for the offline reception and authorization services.
//!
//! Two operations cover the whole protocol: `validarComprobante` hands the
//! signed document to reception and answers RECIBIDA or DEVUELTA;
//! `autorizacionComprobante` looks up the authorization verdict by access
//! key. Responses are parsed leniently by local element name, ignoring
//! namespace prefixes.
use crate::access_key::AccessKey;
use crate::config::Environment;
use crate::invoice::{AuthorizationResult, AuthorizationStatus, MessageSeverity, SriMessage};
use async_trait::async_trait;
use base64ct::{Base64, Encoding};
use chrono::{DateTime, Utc};
use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::Client;
use std::collections::VecDeque;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors crossing the wire to the Authority. Transport failures are
/// retryable by the caller; an invalid response is not.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("network error talking to SRI: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid response from SRI: {0}")]
    InvalidResponse(String),
}

/// Verdict of the reception service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceptionStatus {
    Received,
    Returned,
}

impl ReceptionStatus {
    pub fn as_wire(&self) -> &'static str {
        match self {
            ReceptionStatus::Received => "RECIBIDA",
            ReceptionStatus::Returned => "DEVUELTA",
        }
    }
}

/// Outcome of one reception call: the verdict plus any messages the
/// Authority attached to it.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmissionOutcome {
    pub status: ReceptionStatus,
    pub messages: Vec<SriMessage>,
}

impl SubmissionOutcome {
    pub fn received() -> Self {
        Self {
            status: ReceptionStatus::Received,
            messages: Vec::new(),
        }
    }

    pub fn returned(messages: Vec<SriMessage>) -> Self {
        Self {
            status: ReceptionStatus::Returned,
            messages,
        }
    }

    /// True when the Authority flagged the access key as already registered
    /// (message identifier 43). The document itself may still be fine under
    /// a fresh key.
    pub fn duplicate_access_key(&self) -> bool {
        self.messages.iter().any(|m| m.identifier == "43")
    }
}

/// Gateway to the tax authority. Implemented by the SOAP client and by
/// scripted doubles in tests.
#[async_trait]
pub trait AuthorityClient: Send + Sync {
    /// Submit a signed document to the reception service.
    async fn submit(&self, signed_xml: &str) -> Result<SubmissionOutcome, TransportError>;

    /// Query the authorization service for the verdict on an access key.
    async fn query_authorization(
        &self,
        access_key: &AccessKey,
    ) -> Result<AuthorizationResult, TransportError>;
}

/// SOAP 1.1 client for the SRI offline web services.
#[derive(Debug)]
pub struct SriClient {
    client: Client,
    reception_url: String,
    authorization_url: String,
}

impl SriClient {
    /// Client against the endpoints of the given environment.
    ///
    /// # Errors
    /// Returns [`TransportError::Http`] if the HTTP client cannot be built.
    pub fn new(environment: Environment) -> Result<Self, TransportError> {
        Self::with_urls(
            environment.reception_url(),
            environment.authorization_url(),
        )
    }

    /// Client against explicit endpoint URLs.
    pub fn with_urls(
        reception_url: impl Into<String>,
        authorization_url: impl Into<String>,
    ) -> Result<Self, TransportError> {
        let client = Client::builder().timeout(DEFAULT_TIMEOUT).build()?;
        Ok(Self {
            client,
            reception_url: reception_url.into(),
            authorization_url: authorization_url.into(),
        })
    }

    async fn post_soap(&self, url: &str, envelope: String) -> Result<String, TransportError> {
        let response = self
            .client
            .post(url)
            .header("Content-Type", "text/xml; charset=utf-8")
            .header("SOAPAction", "")
            .body(envelope)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(TransportError::InvalidResponse(format!(
                "status {status}: {body}"
            )));
        }
        Ok(body)
    }
}

#[async_trait]
impl AuthorityClient for SriClient {
    async fn submit(&self, signed_xml: &str) -> Result<SubmissionOutcome, TransportError> {
        let envelope = reception_envelope(signed_xml);
        tracing::debug!(url = %self.reception_url, bytes = signed_xml.len(), "submitting document to reception");
        let body = self.post_soap(&self.reception_url, envelope).await?;
        let outcome = parse_reception_response(&body)?;
        tracing::debug!(status = outcome.status.as_wire(), messages = outcome.messages.len(), "reception answered");
        Ok(outcome)
    }

    async fn query_authorization(
        &self,
        access_key: &AccessKey,
    ) -> Result<AuthorizationResult, TransportError> {
        let envelope = authorization_envelope(access_key.as_str());
        tracing::debug!(url = %self.authorization_url, access_key = %access_key, "querying authorization");
        let body = self.post_soap(&self.authorization_url, envelope).await?;
        let result = parse_authorization_response(&body)?;
        tracing::debug!(status = result.status.as_wire(), "authorization answered");
        Ok(result)
    }
}

fn reception_envelope(signed_xml: &str) -> String {
    let encoded = Base64::encode_string(signed_xml.as_bytes());
    format!(
        concat!(
            "<soapenv:Envelope xmlns:soapenv=\"http://schemas.xmlsoap.org/soap/envelope/\" ",
            "xmlns:ec=\"http://ec.gob.sri.ws.recepcion\">",
            "<soapenv:Header/>",
            "<soapenv:Body>",
            "<ec:validarComprobante>",
            "<xml>{xml}</xml>",
            "</ec:validarComprobante>",
            "</soapenv:Body>",
            "</soapenv:Envelope>",
        ),
        xml = encoded,
    )
}

fn authorization_envelope(access_key: &str) -> String {
    format!(
        concat!(
            "<soapenv:Envelope xmlns:soapenv=\"http://schemas.xmlsoap.org/soap/envelope/\" ",
            "xmlns:ec=\"http://ec.gob.sri.ws.autorizacion\">",
            "<soapenv:Header/>",
            "<soapenv:Body>",
            "<ec:autorizacionComprobante>",
            "<claveAccesoComprobante>{key}</claveAccesoComprobante>",
            "</ec:autorizacionComprobante>",
            "</soapenv:Body>",
            "</soapenv:Envelope>",
        ),
        key = access_key,
    )
}

#[derive(Default)]
struct MessageDraft {
    identifier: String,
    message: String,
    additional_info: Option<String>,
    severity: Option<String>,
}

impl MessageDraft {
    fn finish(self) -> SriMessage {
        SriMessage {
            identifier: self.identifier,
            message: self.message,
            additional_info: self.additional_info,
            severity: self
                .severity
                .as_deref()
                .map(MessageSeverity::from_wire)
                .unwrap_or(MessageSeverity::Error),
        }
    }
}

/// Streaming walk over a response body. Calls `on_text(local_name, text)` for
/// every text node, with `mensaje` blocks collected separately.
fn walk_response<F>(body: &str, messages: &mut Vec<SriMessage>, mut on_text: F) -> Result<(), TransportError>
where
    F: FnMut(&str, &str),
{
    let mut reader = Reader::from_str(body);
    reader.config_mut().trim_text(true);
    let mut current_element = String::new();
    let mut draft: Option<MessageDraft> = None;
    let mut mensaje_depth = 0usize;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                current_element = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if current_element == "mensaje" {
                    if mensaje_depth == 0 {
                        draft = Some(MessageDraft::default());
                    }
                    mensaje_depth += 1;
                }
            }
            Ok(Event::End(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if name == "mensaje" && mensaje_depth > 0 {
                    mensaje_depth -= 1;
                    if mensaje_depth == 0 {
                        if let Some(d) = draft.take() {
                            messages.push(d.finish());
                        }
                    }
                }
                current_element.clear();
            }
            Ok(Event::Text(e)) => {
                let text = e
                    .unescape()
                    .map_err(|err| TransportError::InvalidResponse(err.to_string()))?;
                let text = text.trim();
                if text.is_empty() {
                    continue;
                }
                match (&mut draft, current_element.as_str()) {
                    (Some(d), "identificador") => d.identifier = text.to_string(),
                    (Some(d), "mensaje") => d.message = text.to_string(),
                    (Some(d), "informacionAdicional") => d.additional_info = Some(text.to_string()),
                    (Some(d), "tipo") => d.severity = Some(text.to_string()),
                    _ => on_text(&current_element, text),
                }
            }
            Ok(Event::Eof) => return Ok(()),
            Ok(_) => {}
            Err(err) => return Err(TransportError::InvalidResponse(err.to_string())),
        }
    }
}

fn parse_reception_response(body: &str) -> Result<SubmissionOutcome, TransportError> {
    let mut messages = Vec::new();
    let mut estado: Option<String> = None;
    walk_response(body, &mut messages, |name, text| {
        if name == "estado" && estado.is_none() {
            estado = Some(text.to_string());
        }
    })?;

    let status = match estado.as_deref() {
        Some("RECIBIDA") => ReceptionStatus::Received,
        Some("DEVUELTA") => ReceptionStatus::Returned,
        other => {
            return Err(TransportError::InvalidResponse(format!(
                "missing or unknown reception estado: {other:?}"
            )))
        }
    };
    Ok(SubmissionOutcome { status, messages })
}

fn parse_authorization_response(body: &str) -> Result<AuthorizationResult, TransportError> {
    let mut messages = Vec::new();
    let mut estado: Option<String> = None;
    let mut numero: Option<String> = None;
    let mut fecha: Option<String> = None;
    let mut ambiente: Option<String> = None;
    walk_response(body, &mut messages, |name, text| match name {
        "estado" if estado.is_none() => estado = Some(text.to_string()),
        "numeroAutorizacion" if numero.is_none() => numero = Some(text.to_string()),
        "fechaAutorizacion" if fecha.is_none() => fecha = Some(text.to_string()),
        "ambiente" if ambiente.is_none() => ambiente = Some(text.to_string()),
        _ => {}
    })?;

    // An empty autorizaciones list means the verdict is not out yet.
    let status = match estado.as_deref() {
        Some(value) => AuthorizationStatus::from_wire(value).ok_or_else(|| {
            TransportError::InvalidResponse(format!("unknown authorization estado: {value}"))
        })?,
        None => AuthorizationStatus::InProcess,
    };

    let authorization_date = fecha.and_then(|raw| {
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
    });

    Ok(AuthorizationResult {
        status,
        authorization_number: numero,
        authorization_date,
        environment: ambiente,
        messages,
    })
}

/// Scripted stand-in for the Authority. Outcomes are consumed in order; when
/// a queue runs dry, submissions are received and queries come back
/// authorized under the queried access key.
#[derive(Debug, Default)]
pub struct SimulatedAuthority {
    receptions: Mutex<VecDeque<SubmissionOutcome>>,
    authorizations: Mutex<VecDeque<AuthorizationResult>>,
    submitted: Mutex<Vec<String>>,
}

impl SimulatedAuthority {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn script_reception(&self, outcome: SubmissionOutcome) {
        self.receptions.lock().await.push_back(outcome);
    }

    pub async fn script_authorization(&self, result: AuthorizationResult) {
        self.authorizations.lock().await.push_back(result);
    }

    /// Signed documents received so far, in submission order.
    pub async fn submissions(&self) -> Vec<String> {
        self.submitted.lock().await.clone()
    }
}

#[async_trait]
impl AuthorityClient for SimulatedAuthority {
    async fn submit(&self, signed_xml: &str) -> Result<SubmissionOutcome, TransportError> {
        self.submitted.lock().await.push(signed_xml.to_string());
        let scripted = self.receptions.lock().await.pop_front();
        Ok(scripted.unwrap_or_else(SubmissionOutcome::received))
    }

    async fn query_authorization(
        &self,
        access_key: &AccessKey,
    ) -> Result<AuthorizationResult, TransportError> {
        let scripted = self.authorizations.lock().await.pop_front();
        Ok(scripted.unwrap_or_else(|| AuthorizationResult {
            status: AuthorizationStatus::Authorized,
            authorization_number: Some(access_key.as_str().to_string()),
            authorization_date: Some(Utc::now()),
            environment: Some("PRUEBAS".to_string()),
            messages: Vec::new(),
        }))
    }
}
