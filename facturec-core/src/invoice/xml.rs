//! XML serialization of facturas following the SRI comprobantes schema.
//!
//! Element order is significant: the enveloped signature later covers the
//! byte-exact content. Serialization is a pure function of the invoice and
//! the issuer configuration.
use super::{AdditionalField, Invoice, LineItem, TaxEntry, TaxTotal};
use crate::access_key::DOCUMENT_TYPE_INVOICE;
use crate::config::IssuerConfig;
use helpers::FixedPrecision;
use quick_xml::se::{QuoteLevel, SeError, Serializer as QuickXmlSerializer};
use serde::ser::{Serialize, SerializeStruct, Serializer};
use thiserror::Error;

/// XML serialization error.
#[derive(Debug, Error)]
pub enum DocumentXmlError {
    #[error("failed to serialize factura to XML: {source}")]
    Serialize {
        #[from]
        source: SeError,
    },
}

const XML_DECLARATION: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n";

/// Render the canonical unsigned document.
///
/// All text content is escaped for the five reserved markup characters and
/// every monetary value is rendered with exactly two decimals.
///
/// # Errors
/// Returns [`DocumentXmlError`] if serialization fails.
pub fn to_xml(invoice: &Invoice, config: &IssuerConfig) -> Result<String, DocumentXmlError> {
    let mut buffer = XML_DECLARATION.to_string();
    let mut serializer = QuickXmlSerializer::new(&mut buffer);
    serializer.set_quote_level(QuoteLevel::Full);
    FacturaXml { invoice, config }.serialize(serializer)?;
    Ok(buffer)
}

mod helpers {
    use serde::ser::{Serialize, Serializer};
    use std::fmt::{self, Display, Formatter};

    /// Numeric value rendered with a fixed number of decimals, locale-free.
    pub(super) struct FixedPrecision {
        value: f64,
        precision: usize,
    }

    impl FixedPrecision {
        pub(super) fn new(value: f64, precision: usize) -> Self {
            Self { value, precision }
        }

        /// The two-decimal rendering used for every monetary field.
        pub(super) fn money(value: f64) -> Self {
            Self::new(value, 2)
        }
    }

    impl Display for FixedPrecision {
        fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
            write!(f, "{:.*}", self.precision, self.value)
        }
    }

    impl Serialize for FixedPrecision {
        fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            serializer.collect_str(self)
        }
    }
}

struct FacturaXml<'a> {
    invoice: &'a Invoice,
    config: &'a IssuerConfig,
}

impl<'a> Serialize for FacturaXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("factura", 0)?;
        st.serialize_field("@id", "comprobante")?;
        st.serialize_field("@version", "1.0.0")?;
        st.serialize_field(
            "infoTributaria",
            &InfoTributariaXml {
                invoice: self.invoice,
                config: self.config,
            },
        )?;
        st.serialize_field(
            "infoFactura",
            &InfoFacturaXml {
                invoice: self.invoice,
                config: self.config,
            },
        )?;
        st.serialize_field("detalles", &DetallesXml(self.invoice.line_items()))?;
        if !self.invoice.additional_fields().is_empty() {
            st.serialize_field(
                "infoAdicional",
                &InfoAdicionalXml(self.invoice.additional_fields()),
            )?;
        }
        st.end()
    }
}

struct InfoTributariaXml<'a> {
    invoice: &'a Invoice,
    config: &'a IssuerConfig,
}

impl<'a> Serialize for InfoTributariaXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let sequential = self.invoice.sequential();
        let mut st = s.serialize_struct("infoTributaria", 0)?;
        st.serialize_field("ambiente", self.config.environment.code())?;
        st.serialize_field("tipoEmision", self.config.emission_type.code())?;
        st.serialize_field("razonSocial", &self.config.legal_name)?;
        st.serialize_field("nombreComercial", self.config.trade_name_or_legal())?;
        st.serialize_field("ruc", &self.config.ruc)?;
        st.serialize_field("claveAcceso", self.invoice.access_key().as_str())?;
        st.serialize_field("codDoc", DOCUMENT_TYPE_INVOICE)?;
        st.serialize_field("estab", sequential.establishment())?;
        st.serialize_field("ptoEmi", sequential.emission_point())?;
        st.serialize_field("secuencial", sequential.sequence())?;
        st.serialize_field("dirMatriz", &self.config.head_office_address)?;
        st.end()
    }
}

struct InfoFacturaXml<'a> {
    invoice: &'a Invoice,
    config: &'a IssuerConfig,
}

impl<'a> Serialize for InfoFacturaXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let invoice = self.invoice;
        let buyer = invoice.buyer();
        let mut st = s.serialize_struct("infoFactura", 0)?;
        st.serialize_field(
            "fechaEmision",
            &invoice.issue_date().format("%d/%m/%Y").to_string(),
        )?;
        if let Some(address) = invoice.establishment_address() {
            st.serialize_field("dirEstablecimiento", address)?;
        }
        if let Some(number) = self.config.special_taxpayer.as_deref() {
            st.serialize_field("contribuyenteEspecial", number)?;
        }
        st.serialize_field(
            "obligadoContabilidad",
            if self.config.keeps_accounting { "SI" } else { "NO" },
        )?;
        st.serialize_field(
            "tipoIdentificacionComprador",
            buyer.identification_type.code(),
        )?;
        st.serialize_field("razonSocialComprador", &buyer.name)?;
        st.serialize_field("identificacionComprador", &buyer.identification)?;
        if let Some(address) = buyer.address.as_deref() {
            st.serialize_field("direccionComprador", address)?;
        }
        st.serialize_field(
            "totalSinImpuestos",
            &FixedPrecision::money(invoice.total_without_tax()),
        )?;
        st.serialize_field(
            "totalDescuento",
            &FixedPrecision::money(invoice.total_discount()),
        )?;
        st.serialize_field(
            "totalConImpuestos",
            &TotalConImpuestosXml(invoice.tax_totals()),
        )?;
        st.serialize_field("propina", &FixedPrecision::money(invoice.tip()))?;
        st.serialize_field("importeTotal", &FixedPrecision::money(invoice.grand_total()))?;
        st.serialize_field("moneda", invoice.currency())?;
        st.serialize_field(
            "pagos",
            &PagosXml {
                payment_methods: invoice.payment_methods(),
                total: invoice.grand_total(),
            },
        )?;
        st.end()
    }
}

struct TotalConImpuestosXml<'a>(&'a [TaxTotal]);

impl<'a> Serialize for TotalConImpuestosXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("totalConImpuestos", 0)?;
        for total in self.0 {
            st.serialize_field("totalImpuesto", &TotalImpuestoXml(total))?;
        }
        st.end()
    }
}

struct TotalImpuestoXml<'a>(&'a TaxTotal);

impl<'a> Serialize for TotalImpuestoXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let total = self.0;
        let mut st = s.serialize_struct("totalImpuesto", 0)?;
        st.serialize_field("codigo", &total.code)?;
        st.serialize_field("codigoPorcentaje", &total.rate_code)?;
        st.serialize_field("baseImponible", &FixedPrecision::money(total.taxable_base))?;
        st.serialize_field("valor", &FixedPrecision::money(total.value))?;
        st.end()
    }
}

struct PagosXml<'a> {
    payment_methods: &'a [String],
    total: f64,
}

impl<'a> Serialize for PagosXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("pagos", 0)?;
        for method in self.payment_methods {
            st.serialize_field(
                "pago",
                &PagoXml {
                    method,
                    total: self.total,
                },
            )?;
        }
        st.end()
    }
}

struct PagoXml<'a> {
    method: &'a str,
    total: f64,
}

impl<'a> Serialize for PagoXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("pago", 0)?;
        st.serialize_field("formaPago", self.method)?;
        st.serialize_field("total", &FixedPrecision::money(self.total))?;
        st.end()
    }
}

struct DetallesXml<'a>(&'a [LineItem]);

impl<'a> Serialize for DetallesXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("detalles", 0)?;
        for item in self.0 {
            st.serialize_field("detalle", &DetalleXml(item))?;
        }
        st.end()
    }
}

struct DetalleXml<'a>(&'a LineItem);

impl<'a> Serialize for DetalleXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let item = self.0;
        let mut st = s.serialize_struct("detalle", 0)?;
        st.serialize_field("codigoPrincipal", item.main_code())?;
        st.serialize_field("descripcion", item.description())?;
        st.serialize_field("cantidad", &FixedPrecision::money(item.quantity()))?;
        st.serialize_field("precioUnitario", &FixedPrecision::money(item.unit_price()))?;
        st.serialize_field("descuento", &FixedPrecision::money(item.discount()))?;
        st.serialize_field(
            "precioTotalSinImpuesto",
            &FixedPrecision::money(item.line_total()),
        )?;
        st.serialize_field("impuestos", &ImpuestosXml(item.taxes()))?;
        st.end()
    }
}

struct ImpuestosXml<'a>(&'a [TaxEntry]);

impl<'a> Serialize for ImpuestosXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("impuestos", 0)?;
        for tax in self.0 {
            st.serialize_field("impuesto", &ImpuestoXml(tax))?;
        }
        st.end()
    }
}

struct ImpuestoXml<'a>(&'a TaxEntry);

impl<'a> Serialize for ImpuestoXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let tax = self.0;
        let mut st = s.serialize_struct("impuesto", 0)?;
        st.serialize_field("codigo", &tax.code)?;
        st.serialize_field("codigoPorcentaje", &tax.rate_code)?;
        st.serialize_field("tarifa", &FixedPrecision::money(tax.rate))?;
        st.serialize_field("baseImponible", &FixedPrecision::money(tax.taxable_base))?;
        st.serialize_field("valor", &FixedPrecision::money(tax.value))?;
        st.end()
    }
}

struct InfoAdicionalXml<'a>(&'a [AdditionalField]);

impl<'a> Serialize for InfoAdicionalXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("infoAdicional", 0)?;
        for field in self.0 {
            st.serialize_field("campoAdicional", &CampoAdicionalXml(field))?;
        }
        st.end()
    }
}

struct CampoAdicionalXml<'a>(&'a AdditionalField);

impl<'a> Serialize for CampoAdicionalXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("campoAdicional", 0)?;
        st.serialize_field("@nombre", &self.0.name)?;
        st.serialize_field("$text", &self.0.value)?;
        st.end()
    }
}
