use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::path::PathBuf;
use std::str::FromStr;

use facturec_core::access_key::AccessKey;
use facturec_core::api::{AuthorityClient, SriClient};
use facturec_core::certificate::{CertificateMetadata, DigitalCertificate};
use facturec_core::config::{Environment, IssuerConfig};
use facturec_core::invoice::sign::{DocumentSigner, XadesBesSigner};
use facturec_core::invoice::{
    xml, Buyer, BuyerIdentificationType, Invoice, InvoiceBuilder, LineItem, LineItemFields,
    RequiredInvoiceFields, SequentialNumber,
};

#[derive(Parser)]
#[command(name = "facturec")]
#[command(about = "SRI electronic invoicing CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a 49-digit access key.
    AccessKey {
        #[arg(long)]
        date: NaiveDate,
        #[arg(long)]
        sequential: String,
        #[arg(long)]
        ruc: String,
        #[arg(long, default_value = "pruebas")]
        environment: String,
        /// Fixed 8-digit numeric block; random when omitted.
        #[arg(long)]
        numeric_code: Option<u32>,
    },
    /// Build the unsigned factura XML from an invoice draft.
    Assemble {
        #[arg(long)]
        invoice: PathBuf,
        #[arg(long)]
        config: PathBuf,
    },
    /// Sign an assembled document with a certificate container.
    Sign {
        #[arg(long)]
        invoice: PathBuf,
        #[arg(long)]
        certificate: PathBuf,
        #[arg(long)]
        passphrase: String,
        /// JSON file with certificate metadata, for non-DER containers.
        #[arg(long)]
        metadata: Option<PathBuf>,
    },
    /// Query the authorization verdict for an access key.
    Status {
        #[arg(long)]
        access_key: String,
        #[arg(long, default_value = "pruebas")]
        environment: String,
    },
}

/// Invoice draft as accepted on stdin/file. Totals are always derived.
#[derive(Deserialize)]
struct InvoiceDraft {
    sequential: String,
    issue_date: NaiveDate,
    /// Existing access key; a fresh one is generated when omitted.
    access_key: Option<String>,
    buyer: BuyerDraft,
    line_items: Vec<LineItemDraft>,
    payment_methods: Vec<String>,
    #[serde(default)]
    tip: Option<f64>,
    #[serde(default)]
    establishment_address: Option<String>,
    #[serde(default)]
    additional_fields: Vec<AdditionalFieldDraft>,
}

#[derive(Deserialize)]
struct BuyerDraft {
    /// SRI identification code: 04 RUC, 05 cédula, 06 pasaporte, 07 consumidor final.
    identification_type: String,
    name: String,
    identification: String,
    #[serde(default)]
    address: Option<String>,
}

#[derive(Deserialize)]
struct LineItemDraft {
    main_code: String,
    description: String,
    quantity: f64,
    unit_price: f64,
    #[serde(default)]
    discount: f64,
    #[serde(default)]
    taxes: Vec<TaxDraft>,
}

#[derive(Deserialize)]
struct TaxDraft {
    code: String,
    rate_code: String,
    rate: f64,
}

#[derive(Deserialize)]
struct AdditionalFieldDraft {
    name: String,
    value: String,
}

fn build_invoice(draft: InvoiceDraft, config: &IssuerConfig) -> Result<Invoice> {
    let sequential = SequentialNumber::parse(draft.sequential)?;
    let access_key = match draft.access_key {
        Some(raw) => AccessKey::parse(&raw).context("invalid access key in draft")?,
        None => AccessKey::generate(
            draft.issue_date,
            &sequential,
            &config.ruc,
            config.environment,
            config.emission_type,
        ),
    };
    let buyer = Buyer {
        identification_type: BuyerIdentificationType::from_code(&draft.buyer.identification_type)?,
        name: draft.buyer.name,
        identification: draft.buyer.identification,
        address: draft.buyer.address,
    };
    let line_items = draft
        .line_items
        .into_iter()
        .map(|line| {
            let mut item = LineItem::new(LineItemFields {
                main_code: line.main_code,
                description: line.description,
                quantity: line.quantity,
                unit_price: line.unit_price,
                discount: line.discount,
            });
            for tax in line.taxes {
                item = item.with_tax(&tax.code, &tax.rate_code, tax.rate);
            }
            item
        })
        .collect();

    let mut builder = InvoiceBuilder::new(RequiredInvoiceFields {
        sequential,
        issue_date: draft.issue_date,
        access_key,
        buyer,
        line_items,
        payment_methods: draft.payment_methods,
    });
    if let Some(address) = draft.establishment_address {
        builder = builder.establishment_address(address);
    }
    if let Some(tip) = draft.tip {
        builder = builder.tip(tip);
    }
    for field in draft.additional_fields {
        builder = builder.additional_field(field.name, field.value);
    }
    Ok(builder.build()?)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::AccessKey {
            date,
            sequential,
            ruc,
            environment,
            numeric_code,
        } => {
            let environment = Environment::from_str(&environment)?;
            let sequential = SequentialNumber::parse(sequential)?;
            let key = match numeric_code {
                Some(code) => AccessKey::with_numeric_code(
                    date,
                    &sequential,
                    &ruc,
                    environment,
                    Default::default(),
                    code,
                ),
                None => {
                    AccessKey::generate(date, &sequential, &ruc, environment, Default::default())
                }
            };
            println!("{key}");
        }
        Commands::Assemble { invoice, config } => {
            let config: IssuerConfig = serde_json::from_str(
                &std::fs::read_to_string(&config)
                    .with_context(|| format!("reading {}", config.display()))?,
            )
            .context("parsing issuer configuration")?;
            let draft: InvoiceDraft = serde_json::from_str(
                &std::fs::read_to_string(&invoice)
                    .with_context(|| format!("reading {}", invoice.display()))?,
            )
            .context("parsing invoice draft")?;
            let built = build_invoice(draft, &config)?;
            println!("{}", xml::to_xml(&built, &config)?);
        }
        Commands::Sign {
            invoice,
            certificate,
            passphrase,
            metadata,
        } => {
            let unsigned = std::fs::read_to_string(&invoice)
                .with_context(|| format!("reading {}", invoice.display()))?;
            let container = std::fs::read(&certificate)
                .with_context(|| format!("reading {}", certificate.display()))?;
            let mut cert = DigitalCertificate::new(container, &passphrase);
            if let Some(path) = metadata {
                let parsed: CertificateMetadata = serde_json::from_str(
                    &std::fs::read_to_string(&path)
                        .with_context(|| format!("reading {}", path.display()))?,
                )
                .context("parsing certificate metadata")?;
                cert = cert.with_metadata(parsed);
            }
            let signed = XadesBesSigner::new().sign(&unsigned, &cert, &passphrase)?;
            println!("{signed}");
        }
        Commands::Status {
            access_key,
            environment,
        } => {
            let environment = Environment::from_str(&environment)?;
            let key = AccessKey::parse(&access_key)?;
            let client = SriClient::new(environment)?;
            let result = client.query_authorization(&key).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
    }

    Ok(())
}
