//! Invoice domain types, validation, and the authorization lifecycle model.
mod builder;
pub mod sign;
pub mod xml;

pub use builder::{InvoiceBuilder, ProvidedTotals, RequiredInvoiceFields};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::access_key::AccessKey;

type Result<T> = std::result::Result<T, InvoiceError>;

/// Tolerance for monetary comparisons, two decimal places.
pub(crate) const MONEY_EPSILON: f64 = 0.01;

/// Invoice-related errors.
#[derive(Debug, Error)]
pub enum InvoiceError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("sequential number must be exactly 9 digits, found {found:?}")]
    InvalidSequential { found: String },
    #[error("unknown buyer identification code: {0}")]
    UnknownIdentificationCode(String),
}

/// Structured validation error with field-level issues. Raised before any
/// pipeline step runs.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("invoice validation failed")]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationError {
    pub fn new(issues: Vec<ValidationIssue>) -> Self {
        Self { issues }
    }
}

/// Single validation issue.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationIssue {
    pub field: InvoiceField,
    pub kind: ValidationKind,
    pub line_item_index: Option<usize>,
}

#[non_exhaustive]
/// Field associated with a validation issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvoiceField {
    Sequential,
    BuyerName,
    BuyerIdentification,
    LineItems,
    LineItemQuantity,
    LineItemUnitPrice,
    LineItemTotal,
    LineItemTaxValue,
    PaymentMethods,
    TotalWithoutTax,
    TotalDiscount,
    TaxTotals,
    Tip,
    GrandTotal,
}

#[non_exhaustive]
/// Classification of validation issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationKind {
    Missing,
    Empty,
    InvalidFormat,
    OutOfRange,
    Mismatch,
}

/// 9-digit identifier: establishment (3) + emission point (3) + sequence (3),
/// zero-padded.
///
/// # Examples
/// ```rust
/// use facturec_core::invoice::SequentialNumber;
///
/// let seq = SequentialNumber::parse("001001123")?;
/// assert_eq!(seq.establishment(), "001");
/// assert_eq!(seq.sequence(), "123");
/// # Ok::<(), facturec_core::invoice::InvoiceError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SequentialNumber(String);

impl SequentialNumber {
    pub fn parse<S: Into<String>>(s: S) -> Result<Self> {
        let s = s.into();
        if s.len() != 9 || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(InvoiceError::InvalidSequential { found: s });
        }
        Ok(SequentialNumber(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn establishment(&self) -> &str {
        &self.0[0..3]
    }

    pub fn emission_point(&self) -> &str {
        &self.0[3..6]
    }

    pub fn sequence(&self) -> &str {
        &self.0[6..]
    }

    /// Establishment + emission point, the 6-digit series.
    pub fn series(&self) -> &str {
        &self.0[0..6]
    }
}

impl fmt::Display for SequentialNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SequentialNumber {
    type Err = InvoiceError;
    fn from_str(s: &str) -> Result<Self> {
        SequentialNumber::parse(s)
    }
}

/// Buyer identification vocabulary (tabla 6 of the SRI ficha técnica).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BuyerIdentificationType {
    Ruc,
    Cedula,
    Passport,
    FinalConsumer,
}

impl BuyerIdentificationType {
    pub fn code(&self) -> &'static str {
        match self {
            BuyerIdentificationType::Ruc => "04",
            BuyerIdentificationType::Cedula => "05",
            BuyerIdentificationType::Passport => "06",
            BuyerIdentificationType::FinalConsumer => "07",
        }
    }

    pub fn from_code(code: &str) -> Result<Self> {
        match code {
            "04" => Ok(BuyerIdentificationType::Ruc),
            "05" => Ok(BuyerIdentificationType::Cedula),
            "06" => Ok(BuyerIdentificationType::Passport),
            "07" => Ok(BuyerIdentificationType::FinalConsumer),
            other => Err(InvoiceError::UnknownIdentificationCode(other.to_string())),
        }
    }
}

/// Buyer (comprador) identity block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Buyer {
    pub identification_type: BuyerIdentificationType,
    pub name: String,
    pub identification: String,
    pub address: Option<String>,
}

/// Per-line tax entry: tax code, rate code, rate, base, and computed value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxEntry {
    pub code: String,
    pub rate_code: String,
    pub rate: f64,
    pub taxable_base: f64,
    pub value: f64,
}

impl TaxEntry {
    /// Entry with `value = round(base * rate / 100, 2)`.
    pub fn for_base(
        code: impl Into<String>,
        rate_code: impl Into<String>,
        rate: f64,
        taxable_base: f64,
    ) -> Self {
        Self {
            code: code.into(),
            rate_code: rate_code.into(),
            rate,
            taxable_base,
            value: round2(taxable_base * rate / 100.0),
        }
    }
}

/// Invoice-level tax total grouped by (code, rate code).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxTotal {
    pub code: String,
    pub rate_code: String,
    pub taxable_base: f64,
    pub value: f64,
}

/// Fields for creating a line item with a computed total.
#[derive(Debug, Clone, PartialEq)]
pub struct LineItemFields {
    pub main_code: String,
    pub description: String,
    pub quantity: f64,
    pub unit_price: f64,
    pub discount: f64,
}

/// Single invoice line (detalle) with its nested tax breakdown.
///
/// # Examples
/// ```rust
/// use facturec_core::invoice::{LineItem, LineItemFields};
///
/// let item = LineItem::new(LineItemFields {
///     main_code: "PRD-001".into(),
///     description: "Producto".into(),
///     quantity: 2.0,
///     unit_price: 10.0,
///     discount: 0.0,
/// })
/// .with_tax("2", "2", 12.0);
/// assert_eq!(item.line_total(), 20.0);
/// assert_eq!(item.taxes()[0].value, 2.4);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    main_code: String,
    description: String,
    quantity: f64,
    unit_price: f64,
    discount: f64,
    line_total: f64,
    taxes: Vec<TaxEntry>,
}

impl LineItem {
    pub fn new(fields: LineItemFields) -> Self {
        let line_total = round2(fields.quantity * fields.unit_price - fields.discount);
        Self {
            main_code: fields.main_code,
            description: fields.description,
            quantity: fields.quantity,
            unit_price: fields.unit_price,
            discount: fields.discount,
            line_total,
            taxes: Vec::new(),
        }
    }

    /// Append a tax entry computed over this line's total.
    pub fn with_tax(mut self, code: &str, rate_code: &str, rate: f64) -> Self {
        self.taxes
            .push(TaxEntry::for_base(code, rate_code, rate, self.line_total));
        self
    }

    pub fn main_code(&self) -> &str {
        &self.main_code
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn quantity(&self) -> f64 {
        self.quantity
    }

    pub fn unit_price(&self) -> f64 {
        self.unit_price
    }

    pub fn discount(&self) -> f64 {
        self.discount
    }

    pub fn line_total(&self) -> f64 {
        self.line_total
    }

    pub fn taxes(&self) -> &[TaxEntry] {
        &self.taxes
    }
}

/// Name/value pair for the `infoAdicional` block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdditionalField {
    pub name: String,
    pub value: String,
}

/// Authorization lifecycle states, covering both the internal initial state
/// and the Authority's wire vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthorizationStatus {
    Pending,
    Received,
    InProcess,
    Authorized,
    NotAuthorized,
    Returned,
    Rejected,
}

impl AuthorizationStatus {
    pub fn as_wire(&self) -> &'static str {
        match self {
            AuthorizationStatus::Pending => "PENDIENTE",
            AuthorizationStatus::Received => "RECIBIDA",
            AuthorizationStatus::InProcess => "EN PROCESO",
            AuthorizationStatus::Authorized => "AUTORIZADO",
            AuthorizationStatus::NotAuthorized => "NO AUTORIZADO",
            AuthorizationStatus::Returned => "DEVUELTA",
            AuthorizationStatus::Rejected => "RECHAZADA",
        }
    }

    pub fn from_wire(value: &str) -> Option<Self> {
        match value.trim() {
            "PENDIENTE" => Some(AuthorizationStatus::Pending),
            "RECIBIDA" => Some(AuthorizationStatus::Received),
            "EN PROCESO" => Some(AuthorizationStatus::InProcess),
            "AUTORIZADO" => Some(AuthorizationStatus::Authorized),
            "NO AUTORIZADO" => Some(AuthorizationStatus::NotAuthorized),
            "DEVUELTA" => Some(AuthorizationStatus::Returned),
            "RECHAZADA" => Some(AuthorizationStatus::Rejected),
            _ => None,
        }
    }

    /// Terminal for write operations: reprocessing is refused.
    pub fn is_final(&self) -> bool {
        matches!(self, AuthorizationStatus::Authorized)
    }
}

/// Severity of an Authority message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageSeverity {
    Error,
    Warning,
    Info,
}

impl MessageSeverity {
    pub fn as_wire(&self) -> &'static str {
        match self {
            MessageSeverity::Error => "ERROR",
            MessageSeverity::Warning => "ADVERTENCIA",
            MessageSeverity::Info => "INFORMATIVO",
        }
    }

    pub fn from_wire(value: &str) -> Self {
        match value.trim() {
            "ADVERTENCIA" | "WARNING" => MessageSeverity::Warning,
            "INFORMATIVO" | "INFO" => MessageSeverity::Info,
            _ => MessageSeverity::Error,
        }
    }
}

/// Message tuple returned by the Authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SriMessage {
    pub identifier: String,
    pub message: String,
    pub additional_info: Option<String>,
    pub severity: MessageSeverity,
}

/// Latest authorization outcome for an invoice. Replaced wholesale on every
/// status update; never merged with the previous value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorizationResult {
    pub status: AuthorizationStatus,
    pub authorization_number: Option<String>,
    pub authorization_date: Option<DateTime<Utc>>,
    pub environment: Option<String>,
    pub messages: Vec<SriMessage>,
}

impl AuthorizationResult {
    pub fn pending() -> Self {
        Self {
            status: AuthorizationStatus::Pending,
            authorization_number: None,
            authorization_date: None,
            environment: None,
            messages: Vec::new(),
        }
    }

    pub fn with_status(status: AuthorizationStatus, messages: Vec<SriMessage>) -> Self {
        Self {
            status,
            authorization_number: None,
            authorization_date: None,
            environment: None,
            messages,
        }
    }
}

/// The central entity: one electronic factura with its commercial data,
/// derived totals, cached documents, and latest authorization result.
///
/// Commercial data is immutable after [`InvoiceBuilder::build`]; only the
/// submission pipeline touches the lifecycle fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    id: String,
    sequential: SequentialNumber,
    issue_date: NaiveDate,
    access_key: AccessKey,
    buyer: Buyer,
    establishment_address: Option<String>,
    line_items: Vec<LineItem>,
    total_without_tax: f64,
    total_discount: f64,
    tax_totals: Vec<TaxTotal>,
    tip: f64,
    grand_total: f64,
    currency: String,
    payment_methods: Vec<String>,
    additional_fields: Vec<AdditionalField>,
    unsigned_xml: Option<String>,
    signed_xml: Option<String>,
    authorization: AuthorizationResult,
}

impl Invoice {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn sequential(&self) -> &SequentialNumber {
        &self.sequential
    }

    pub fn issue_date(&self) -> NaiveDate {
        self.issue_date
    }

    pub fn access_key(&self) -> &AccessKey {
        &self.access_key
    }

    pub fn buyer(&self) -> &Buyer {
        &self.buyer
    }

    pub fn establishment_address(&self) -> Option<&str> {
        self.establishment_address.as_deref()
    }

    pub fn line_items(&self) -> &[LineItem] {
        &self.line_items
    }

    pub fn total_without_tax(&self) -> f64 {
        self.total_without_tax
    }

    pub fn total_discount(&self) -> f64 {
        self.total_discount
    }

    pub fn tax_totals(&self) -> &[TaxTotal] {
        &self.tax_totals
    }

    pub fn tip(&self) -> f64 {
        self.tip
    }

    pub fn grand_total(&self) -> f64 {
        self.grand_total
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn payment_methods(&self) -> &[String] {
        &self.payment_methods
    }

    pub fn additional_fields(&self) -> &[AdditionalField] {
        &self.additional_fields
    }

    pub fn unsigned_xml(&self) -> Option<&str> {
        self.unsigned_xml.as_deref()
    }

    pub fn signed_xml(&self) -> Option<&str> {
        self.signed_xml.as_deref()
    }

    pub fn authorization(&self) -> &AuthorizationResult {
        &self.authorization
    }

    pub fn status(&self) -> AuthorizationStatus {
        self.authorization.status
    }

    /// Replace the authorization result in full.
    pub fn set_authorization(&mut self, result: AuthorizationResult) {
        self.authorization = result;
    }

    /// Cache the documents produced by the latest assemble/sign run.
    pub fn set_documents(&mut self, unsigned_xml: String, signed_xml: String) {
        self.unsigned_xml = Some(unsigned_xml);
        self.signed_xml = Some(signed_xml);
    }

    /// Swap in a freshly minted access key (reprocess with
    /// [`MintNewKey`](crate::pipeline::ReprocessKeyPolicy::MintNewKey)).
    /// Cached documents are dropped since they embed the old key.
    pub fn replace_access_key(&mut self, access_key: AccessKey) {
        self.access_key = access_key;
        self.unsigned_xml = None;
        self.signed_xml = None;
    }
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
