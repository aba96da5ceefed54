use super::{
    round2, AdditionalField, AuthorizationResult, Buyer, Invoice, InvoiceError, InvoiceField,
    LineItem, SequentialNumber, TaxTotal, ValidationError, ValidationIssue, ValidationKind,
    MONEY_EPSILON,
};
use crate::access_key::AccessKey;
use chrono::NaiveDate;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Default currency label in the rendered document.
pub const DEFAULT_CURRENCY: &str = "DOLAR";

/// Required inputs for a new invoice.
#[derive(Debug, Clone)]
pub struct RequiredInvoiceFields {
    pub sequential: SequentialNumber,
    pub issue_date: NaiveDate,
    pub access_key: AccessKey,
    pub buyer: Buyer,
    pub line_items: Vec<LineItem>,
    pub payment_methods: Vec<String>,
}

/// Caller-declared totals, validated against the computed ones. When absent,
/// the builder derives all totals from the line items.
#[derive(Debug, Clone, PartialEq)]
pub struct ProvidedTotals {
    pub total_without_tax: f64,
    pub total_discount: f64,
    pub tax_totals: Vec<TaxTotal>,
    pub grand_total: f64,
}

/// Builder for [`Invoice`]. Validation runs in [`build`](InvoiceBuilder::build)
/// and reports every issue found, not just the first.
///
/// # Examples
/// ```rust
/// use chrono::NaiveDate;
/// use facturec_core::access_key::AccessKey;
/// use facturec_core::config::{EmissionType, Environment};
/// use facturec_core::invoice::{
///     Buyer, BuyerIdentificationType, InvoiceBuilder, LineItem, LineItemFields,
///     RequiredInvoiceFields, SequentialNumber,
/// };
///
/// let sequential = SequentialNumber::parse("001001123")?;
/// let issue_date = NaiveDate::from_ymd_opt(2024, 5, 9).unwrap();
/// let access_key = AccessKey::generate(
///     issue_date,
///     &sequential,
///     "1790012345001",
///     Environment::Test,
///     EmissionType::Normal,
/// );
/// let invoice = InvoiceBuilder::new(RequiredInvoiceFields {
///     sequential,
///     issue_date,
///     access_key,
///     buyer: Buyer {
///         identification_type: BuyerIdentificationType::FinalConsumer,
///         name: "CONSUMIDOR FINAL".into(),
///         identification: "9999999999999".into(),
///         address: None,
///     },
///     line_items: vec![LineItem::new(LineItemFields {
///         main_code: "P1".into(),
///         description: "Producto".into(),
///         quantity: 2.0,
///         unit_price: 10.0,
///         discount: 0.0,
///     })
///     .with_tax("2", "2", 12.0)],
///     payment_methods: vec!["01".into()],
/// })
/// .build()?;
/// assert_eq!(invoice.grand_total(), 22.40);
/// # Ok::<(), facturec_core::invoice::InvoiceError>(())
/// ```
pub struct InvoiceBuilder {
    required: RequiredInvoiceFields,
    establishment_address: Option<String>,
    additional_fields: Vec<AdditionalField>,
    currency: String,
    tip: f64,
    totals: Option<ProvidedTotals>,
}

impl InvoiceBuilder {
    pub fn new(required: RequiredInvoiceFields) -> Self {
        Self {
            required,
            establishment_address: None,
            additional_fields: Vec::new(),
            currency: DEFAULT_CURRENCY.to_string(),
            tip: 0.0,
            totals: None,
        }
    }

    pub fn establishment_address(mut self, address: impl Into<String>) -> Self {
        self.establishment_address = Some(address.into());
        self
    }

    pub fn additional_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.additional_fields.push(AdditionalField {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    pub fn currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = currency.into();
        self
    }

    pub fn tip(mut self, tip: f64) -> Self {
        self.tip = tip;
        self
    }

    pub fn totals(mut self, totals: ProvidedTotals) -> Self {
        self.totals = Some(totals);
        self
    }

    /// Validate and produce the invoice in its initial `Pending` state.
    ///
    /// # Errors
    /// Returns [`InvoiceError::Validation`] listing every field issue.
    pub fn build(self) -> Result<Invoice, InvoiceError> {
        let mut issues = Vec::new();

        let buyer = &self.required.buyer;
        if buyer.name.trim().is_empty() {
            issues.push(issue(InvoiceField::BuyerName, ValidationKind::Empty, None));
        }
        if buyer.identification.trim().is_empty() {
            issues.push(issue(
                InvoiceField::BuyerIdentification,
                ValidationKind::Empty,
                None,
            ));
        }
        if self.required.line_items.is_empty() {
            issues.push(issue(InvoiceField::LineItems, ValidationKind::Missing, None));
        }
        if self.required.payment_methods.is_empty() {
            issues.push(issue(
                InvoiceField::PaymentMethods,
                ValidationKind::Missing,
                None,
            ));
        }
        if self.tip < 0.0 {
            issues.push(issue(InvoiceField::Tip, ValidationKind::OutOfRange, None));
        }

        for (index, item) in self.required.line_items.iter().enumerate() {
            if item.quantity() <= 0.0 {
                issues.push(issue(
                    InvoiceField::LineItemQuantity,
                    ValidationKind::OutOfRange,
                    Some(index),
                ));
            }
            if item.unit_price() < 0.0 {
                issues.push(issue(
                    InvoiceField::LineItemUnitPrice,
                    ValidationKind::OutOfRange,
                    Some(index),
                ));
            }
            let expected_total = item.quantity() * item.unit_price() - item.discount();
            if (expected_total - item.line_total()).abs() > MONEY_EPSILON {
                issues.push(issue(
                    InvoiceField::LineItemTotal,
                    ValidationKind::Mismatch,
                    Some(index),
                ));
            }
            for tax in item.taxes() {
                let expected_value = round2(tax.taxable_base * tax.rate / 100.0);
                if (expected_value - tax.value).abs() > MONEY_EPSILON {
                    issues.push(issue(
                        InvoiceField::LineItemTaxValue,
                        ValidationKind::Mismatch,
                        Some(index),
                    ));
                }
            }
        }

        let computed = computed_totals(&self.required.line_items);
        let totals = match self.totals {
            Some(provided) => {
                check_totals(&provided, &computed, &mut issues);
                provided
            }
            None => {
                let mut totals = computed;
                totals.grand_total = round2(totals.grand_total + self.tip);
                totals
            }
        };

        // grandTotal == totalWithoutTax - totalDiscount + sum(tax values) + tip
        let tax_sum: f64 = totals.tax_totals.iter().map(|t| t.value).sum();
        let identity = round2(totals.total_without_tax - totals.total_discount + tax_sum + self.tip);
        if (identity - totals.grand_total).abs() > MONEY_EPSILON {
            issues.push(issue(InvoiceField::GrandTotal, ValidationKind::Mismatch, None));
        }

        if !issues.is_empty() {
            return Err(ValidationError::new(issues).into());
        }

        Ok(Invoice {
            id: Uuid::new_v4().to_string(),
            sequential: self.required.sequential,
            issue_date: self.required.issue_date,
            access_key: self.required.access_key,
            buyer: self.required.buyer,
            establishment_address: self.establishment_address,
            line_items: self.required.line_items,
            total_without_tax: totals.total_without_tax,
            total_discount: totals.total_discount,
            tax_totals: totals.tax_totals,
            tip: self.tip,
            grand_total: totals.grand_total,
            currency: self.currency,
            payment_methods: self.required.payment_methods,
            additional_fields: self.additional_fields,
            unsigned_xml: None,
            signed_xml: None,
            authorization: AuthorizationResult::pending(),
        })
    }
}

fn issue(
    field: InvoiceField,
    kind: ValidationKind,
    line_item_index: Option<usize>,
) -> ValidationIssue {
    ValidationIssue {
        field,
        kind,
        line_item_index,
    }
}

fn computed_totals(line_items: &[LineItem]) -> ProvidedTotals {
    let total_without_tax = round2(
        line_items
            .iter()
            .map(|li| li.quantity() * li.unit_price())
            .sum(),
    );
    let total_discount = round2(line_items.iter().map(LineItem::discount).sum());

    let mut groups: BTreeMap<(String, String), TaxTotal> = BTreeMap::new();
    for item in line_items {
        for tax in item.taxes() {
            let entry = groups
                .entry((tax.code.clone(), tax.rate_code.clone()))
                .or_insert_with(|| TaxTotal {
                    code: tax.code.clone(),
                    rate_code: tax.rate_code.clone(),
                    taxable_base: 0.0,
                    value: 0.0,
                });
            entry.taxable_base = round2(entry.taxable_base + tax.taxable_base);
            entry.value = round2(entry.value + tax.value);
        }
    }
    let tax_totals: Vec<TaxTotal> = groups.into_values().collect();
    let tax_sum: f64 = tax_totals.iter().map(|t| t.value).sum();
    let grand_total = round2(total_without_tax - total_discount + tax_sum);

    ProvidedTotals {
        total_without_tax,
        total_discount,
        tax_totals,
        grand_total,
    }
}

fn check_totals(provided: &ProvidedTotals, computed: &ProvidedTotals, issues: &mut Vec<ValidationIssue>) {
    if (provided.total_without_tax - computed.total_without_tax).abs() > MONEY_EPSILON {
        issues.push(issue(
            InvoiceField::TotalWithoutTax,
            ValidationKind::Mismatch,
            None,
        ));
    }
    if (provided.total_discount - computed.total_discount).abs() > MONEY_EPSILON {
        issues.push(issue(
            InvoiceField::TotalDiscount,
            ValidationKind::Mismatch,
            None,
        ));
    }
    let provided_tax: f64 = provided.tax_totals.iter().map(|t| t.value).sum();
    let computed_tax: f64 = computed.tax_totals.iter().map(|t| t.value).sum();
    if (provided_tax - computed_tax).abs() > MONEY_EPSILON {
        issues.push(issue(InvoiceField::TaxTotals, ValidationKind::Mismatch, None));
    }
}
