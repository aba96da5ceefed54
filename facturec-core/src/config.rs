//! Issuer configuration and SRI environment selection.
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

/// SRI environment for web-service endpoints and access-key encoding.
/// - Test: the "pruebas" environment (certificación), code `1`.
/// - Production: the live environment, code `2`.
///
/// # Examples
/// ```rust
/// use std::str::FromStr;
/// use facturec_core::config::Environment;
///
/// let env = Environment::from_str("produccion")?;
/// assert_eq!(env.code(), "2");
/// # Ok::<(), facturec_core::config::EnvironmentParseError>(())
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Environment {
    Test,
    Production,
}

/// Error returned when parsing an [`Environment`] from a string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvironmentParseError {
    #[error("invalid environment: {input}")]
    Invalid { input: String },
}

impl FromStr for Environment {
    type Err = EnvironmentParseError;
    fn from_str(env: &str) -> Result<Environment, EnvironmentParseError> {
        match env.to_ascii_lowercase().as_str() {
            "1" | "test" | "pruebas" => Ok(Environment::Test),
            "2" | "production" | "produccion" => Ok(Environment::Production),
            _ => Err(EnvironmentParseError::Invalid {
                input: env.to_string(),
            }),
        }
    }
}

impl Environment {
    /// Single-digit code embedded in access keys and the `<ambiente>` element.
    pub fn code(&self) -> &'static str {
        match self {
            Environment::Test => "1",
            Environment::Production => "2",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Test => "pruebas",
            Environment::Production => "produccion",
        }
    }

    /// Reception service endpoint (`validarComprobante`).
    pub fn reception_url(&self) -> &'static str {
        match self {
            Environment::Test => {
                "https://celcer.sri.gob.ec/comprobantes-electronicos-ws/RecepcionComprobantesOffline"
            }
            Environment::Production => {
                "https://cel.sri.gob.ec/comprobantes-electronicos-ws/RecepcionComprobantesOffline"
            }
        }
    }

    /// Authorization service endpoint (`autorizacionComprobante`).
    pub fn authorization_url(&self) -> &'static str {
        match self {
            Environment::Test => {
                "https://celcer.sri.gob.ec/comprobantes-electronicos-ws/AutorizacionComprobantesOffline"
            }
            Environment::Production => {
                "https://cel.sri.gob.ec/comprobantes-electronicos-ws/AutorizacionComprobantesOffline"
            }
        }
    }
}

/// Emission type for issued documents. Only normal emission is defined by the
/// current SRI ficha técnica.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EmissionType {
    #[default]
    Normal,
}

impl EmissionType {
    pub fn code(&self) -> &'static str {
        match self {
            EmissionType::Normal => "1",
        }
    }
}

/// Issuer (emisor) configuration. Exactly one active configuration exists per
/// deployment; the core reads it through the store boundary and never mutates
/// it.
///
/// # Examples
/// ```rust
/// use facturec_core::config::{Environment, IssuerConfig};
///
/// let config = IssuerConfig::new("1790012345001", "ACME CIA. LTDA.", "Av. Amazonas N34-111, Quito");
/// assert_eq!(config.environment, Environment::Test);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssuerConfig {
    /// 13-digit RUC of the issuer.
    pub ruc: String,
    pub legal_name: String,
    /// Trade name; falls back to the legal name in the rendered document.
    pub trade_name: Option<String>,
    /// Registered head-office address (dirMatriz).
    pub head_office_address: String,
    /// Special-taxpayer resolution number, when assigned.
    pub special_taxpayer: Option<String>,
    /// Whether the issuer is obliged to keep accounting records.
    pub keeps_accounting: bool,
    pub environment: Environment,
    pub emission_type: EmissionType,
    pub email: String,
    /// Store id of the active digital certificate.
    pub certificate_id: Option<String>,
}

impl IssuerConfig {
    pub fn new(
        ruc: impl Into<String>,
        legal_name: impl Into<String>,
        head_office_address: impl Into<String>,
    ) -> Self {
        Self {
            ruc: ruc.into(),
            legal_name: legal_name.into(),
            trade_name: None,
            head_office_address: head_office_address.into(),
            special_taxpayer: None,
            keeps_accounting: false,
            environment: Environment::Test,
            emission_type: EmissionType::Normal,
            email: String::new(),
            certificate_id: None,
        }
    }

    /// Trade name as rendered in `<nombreComercial>`.
    pub fn trade_name_or_legal(&self) -> &str {
        match self.trade_name.as_deref() {
            Some(name) if !name.trim().is_empty() => name,
            _ => &self.legal_name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_codes_match_sri_vocabulary() {
        assert_eq!(Environment::Test.code(), "1");
        assert_eq!(Environment::Production.code(), "2");
        assert_eq!(EmissionType::Normal.code(), "1");
    }

    #[test]
    fn environment_endpoints_differ_per_environment() {
        assert!(Environment::Test.reception_url().contains("celcer"));
        assert!(!Environment::Production.reception_url().contains("celcer"));
        assert_ne!(
            Environment::Test.authorization_url(),
            Environment::Production.authorization_url()
        );
    }

    #[test]
    fn trade_name_falls_back_to_legal_name() {
        let mut config = IssuerConfig::new("1790012345001", "ACME CIA. LTDA.", "Quito");
        assert_eq!(config.trade_name_or_legal(), "ACME CIA. LTDA.");
        config.trade_name = Some("  ".into());
        assert_eq!(config.trade_name_or_legal(), "ACME CIA. LTDA.");
        config.trade_name = Some("ACME".into());
        assert_eq!(config.trade_name_or_legal(), "ACME");
    }
}
