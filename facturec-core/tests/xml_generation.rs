use chrono::NaiveDate;
use facturec_core::access_key::AccessKey;
use facturec_core::config::{EmissionType, Environment, IssuerConfig};
use facturec_core::invoice::{
    xml, Buyer, BuyerIdentificationType, Invoice, InvoiceBuilder, LineItem, LineItemFields,
    RequiredInvoiceFields, SequentialNumber,
};

fn issuer_config() -> IssuerConfig {
    let mut config = IssuerConfig::new(
        "1790012345001",
        "ACME CIA. LTDA.",
        "Av. Amazonas N34-111, Quito",
    );
    config.trade_name = Some("ACME".into());
    config.keeps_accounting = true;
    config.email = "facturacion@acme.ec".into();
    config
}

fn invoice_with(description: &str) -> Invoice {
    let sequential = SequentialNumber::parse("001001123").expect("sequential");
    let issue_date = NaiveDate::from_ymd_opt(2024, 5, 9).expect("date");
    let access_key = AccessKey::with_numeric_code(
        issue_date,
        &sequential,
        "1790012345001",
        Environment::Test,
        EmissionType::Normal,
        12_345_678,
    );
    InvoiceBuilder::new(RequiredInvoiceFields {
        sequential,
        issue_date,
        access_key,
        buyer: Buyer {
            identification_type: BuyerIdentificationType::FinalConsumer,
            name: "CONSUMIDOR FINAL".into(),
            identification: "9999999999999".into(),
            address: None,
        },
        line_items: vec![LineItem::new(LineItemFields {
            main_code: "P1".into(),
            description: description.into(),
            quantity: 2.0,
            unit_price: 10.0,
            discount: 0.0,
        })
        .with_tax("2", "2", 12.0)],
        payment_methods: vec!["01".into()],
    })
    .build()
    .expect("build")
}

#[test]
fn assembly_is_idempotent() {
    let invoice = invoice_with("Producto");
    let config = issuer_config();
    let first = xml::to_xml(&invoice, &config).expect("first");
    let second = xml::to_xml(&invoice, &config).expect("second");
    assert_eq!(first, second);
}

#[test]
fn blocks_appear_in_schema_order() {
    let document = xml::to_xml(&invoice_with("Producto"), &issuer_config()).expect("xml");
    assert!(document.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
    let tributaria = document.find("<infoTributaria>").expect("infoTributaria");
    let factura = document.find("<infoFactura>").expect("infoFactura");
    let detalles = document.find("<detalles>").expect("detalles");
    assert!(tributaria < factura && factura < detalles);
    assert!(document.contains("<factura id=\"comprobante\" version=\"1.0.0\">"));
}

#[test]
fn reserved_characters_are_escaped() {
    let document = xml::to_xml(
        &invoice_with(r#"Caña & "Niños" <menor> 'tilde'"#),
        &issuer_config(),
    )
    .expect("xml");
    assert!(document
        .contains("Caña &amp; &quot;Niños&quot; &lt;menor&gt; &apos;tilde&apos;"));
    assert!(!document.contains("\"Niños\""));
}

#[test]
fn amounts_carry_exactly_two_decimals() {
    let document = xml::to_xml(&invoice_with("Producto"), &issuer_config()).expect("xml");
    assert!(document.contains("<totalSinImpuestos>20.00</totalSinImpuestos>"));
    assert!(document.contains("<totalDescuento>0.00</totalDescuento>"));
    assert!(document.contains("<baseImponible>20.00</baseImponible>"));
    assert!(document.contains("<valor>2.40</valor>"));
    assert!(document.contains("<propina>0.00</propina>"));
    assert!(document.contains("<importeTotal>22.40</importeTotal>"));
    assert!(document.contains("<cantidad>2.00</cantidad>"));
    assert!(document.contains("<precioUnitario>10.00</precioUnitario>"));
}

#[test]
fn tributary_info_splits_the_sequential() {
    let document = xml::to_xml(&invoice_with("Producto"), &issuer_config()).expect("xml");
    assert!(document.contains("<estab>001</estab>"));
    assert!(document.contains("<ptoEmi>001</ptoEmi>"));
    assert!(document.contains("<secuencial>123</secuencial>"));
    assert!(document.contains(
        "<claveAcceso>0905202401179001234500110010010000001231234567814</claveAcceso>"
    ));
    assert!(document.contains("<codDoc>01</codDoc>"));
    assert!(document.contains("<ambiente>1</ambiente>"));
    assert!(document.contains("<tipoEmision>1</tipoEmision>"));
}

#[test]
fn issue_date_uses_slash_format() {
    let document = xml::to_xml(&invoice_with("Producto"), &issuer_config()).expect("xml");
    assert!(document.contains("<fechaEmision>09/05/2024</fechaEmision>"));
}

#[test]
fn accounting_flag_and_optional_fields() {
    let mut config = issuer_config();
    let invoice = invoice_with("Producto");

    let document = xml::to_xml(&invoice, &config).expect("xml");
    assert!(document.contains("<obligadoContabilidad>SI</obligadoContabilidad>"));
    assert!(!document.contains("<contribuyenteEspecial>"));
    assert!(!document.contains("<dirEstablecimiento>"));
    assert!(!document.contains("<infoAdicional>"));

    config.keeps_accounting = false;
    config.special_taxpayer = Some("5368".into());
    let document = xml::to_xml(&invoice, &config).expect("xml");
    assert!(document.contains("<obligadoContabilidad>NO</obligadoContabilidad>"));
    assert!(document.contains("<contribuyenteEspecial>5368</contribuyenteEspecial>"));
}

#[test]
fn payments_each_carry_the_grand_total() {
    let sequential = SequentialNumber::parse("001001124").expect("sequential");
    let issue_date = NaiveDate::from_ymd_opt(2024, 5, 9).expect("date");
    let access_key = AccessKey::generate(
        issue_date,
        &sequential,
        "1790012345001",
        Environment::Test,
        EmissionType::Normal,
    );
    let invoice = InvoiceBuilder::new(RequiredInvoiceFields {
        sequential,
        issue_date,
        access_key,
        buyer: Buyer {
            identification_type: BuyerIdentificationType::Ruc,
            name: "EMPRESA S.A.".into(),
            identification: "0992233445001".into(),
            address: Some("Guayaquil".into()),
        },
        line_items: vec![LineItem::new(LineItemFields {
            main_code: "S1".into(),
            description: "Servicio".into(),
            quantity: 1.0,
            unit_price: 100.0,
            discount: 0.0,
        })
        .with_tax("2", "2", 12.0)],
        payment_methods: vec!["01".into(), "20".into()],
    })
    .additional_field("email", "cliente@example.com")
    .build()
    .expect("build");

    let document = xml::to_xml(&invoice, &issuer_config()).expect("xml");
    assert_eq!(document.matches("<formaPago>").count(), 2);
    assert_eq!(document.matches("<total>112.00</total>").count(), 2);
    assert!(document.contains("<direccionComprador>Guayaquil</direccionComprador>"));
    assert!(document.contains(
        "<campoAdicional nombre=\"email\">cliente@example.com</campoAdicional>"
    ));
}
