//! 49-digit access keys (claves de acceso) identifying tax documents.
//!
//! Layout of the 48-character base, in order: issue date `ddmmyyyy` (8),
//! document type code (2), RUC (13), environment code (1), series =
//! establishment + emission point (6), sequence zero-padded to 9 (9), random
//! numeric block (8), emission type code (1). A mod-11 check digit closes the
//! key.
use crate::config::{EmissionType, Environment};
use crate::invoice::SequentialNumber;
use chrono::NaiveDate;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Document type code for facturas. The only type this crate issues.
pub const DOCUMENT_TYPE_INVOICE: &str = "01";

const KEY_LEN: usize = 49;
const WEIGHTS: [u32; 6] = [2, 3, 4, 5, 6, 7];

/// Errors raised when validating an externally supplied access key.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccessKeyError {
    #[error("access key must be {KEY_LEN} digits, found {found}")]
    Length { found: usize },
    #[error("access key must contain only digits")]
    NonNumeric,
    #[error("access key carries an invalid issue date")]
    InvalidDate,
    #[error("access key environment code must be 1 or 2, found {found}")]
    InvalidEnvironment { found: char },
    #[error("check digit mismatch: expected {expected}, found {found}")]
    CheckDigit { expected: u8, found: u8 },
}

/// Mod-11 check digit over a numeric base string, weighted `2..=7` cyclically
/// from the rightmost digit. A result of 11 maps to 0 and 10 maps to 1.
pub fn check_digit(base: &str) -> u8 {
    debug_assert!(base.bytes().all(|b| b.is_ascii_digit()));
    let sum: u32 = base
        .bytes()
        .rev()
        .enumerate()
        .map(|(i, b)| u32::from(b - b'0') * WEIGHTS[i % WEIGHTS.len()])
        .sum();
    match 11 - (sum % 11) {
        11 => 0,
        10 => 1,
        digit => digit as u8,
    }
}

/// Globally unique 49-digit key. Immutable once assigned to an invoice.
///
/// # Examples
/// ```rust
/// use chrono::NaiveDate;
/// use facturec_core::access_key::AccessKey;
/// use facturec_core::config::{EmissionType, Environment};
/// use facturec_core::invoice::SequentialNumber;
///
/// let sequential = SequentialNumber::parse("001001123")?;
/// let key = AccessKey::generate(
///     NaiveDate::from_ymd_opt(2024, 5, 9).unwrap(),
///     &sequential,
///     "1790012345001",
///     Environment::Test,
///     EmissionType::Normal,
/// );
/// assert_eq!(key.as_str().len(), 49);
/// # Ok::<(), facturec_core::invoice::InvoiceError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccessKey(String);

impl AccessKey {
    /// Generate a key for a new document. The random numeric block comes from
    /// the thread RNG; everything else is a pure function of the inputs.
    ///
    /// Caller contract: `ruc` is exactly 13 digits.
    pub fn generate(
        issue_date: NaiveDate,
        sequential: &SequentialNumber,
        ruc: &str,
        environment: Environment,
        emission_type: EmissionType,
    ) -> AccessKey {
        let code = rand::thread_rng().gen_range(0..100_000_000u32);
        Self::with_numeric_code(issue_date, sequential, ruc, environment, emission_type, code)
    }

    /// Deterministic variant with an explicit numeric block.
    pub fn with_numeric_code(
        issue_date: NaiveDate,
        sequential: &SequentialNumber,
        ruc: &str,
        environment: Environment,
        emission_type: EmissionType,
        numeric_code: u32,
    ) -> AccessKey {
        debug_assert!(ruc.len() == 13 && ruc.bytes().all(|b| b.is_ascii_digit()));
        debug_assert!(numeric_code < 100_000_000);

        let mut base = String::with_capacity(KEY_LEN);
        base.push_str(&issue_date.format("%d%m%Y").to_string());
        base.push_str(DOCUMENT_TYPE_INVOICE);
        base.push_str(ruc);
        base.push_str(environment.code());
        base.push_str(sequential.series());
        base.push_str(&format!("{:0>9}", sequential.sequence()));
        base.push_str(&format!("{numeric_code:08}"));
        base.push_str(emission_type.code());

        let digit = check_digit(&base);
        base.push((b'0' + digit) as char);
        AccessKey(base)
    }

    /// Validate an externally supplied key: length, digits, date,
    /// environment code, and check digit.
    pub fn parse(value: &str) -> Result<AccessKey, AccessKeyError> {
        if value.len() != KEY_LEN {
            return Err(AccessKeyError::Length { found: value.len() });
        }
        if !value.bytes().all(|b| b.is_ascii_digit()) {
            return Err(AccessKeyError::NonNumeric);
        }
        NaiveDate::parse_from_str(&value[0..8], "%d%m%Y")
            .map_err(|_| AccessKeyError::InvalidDate)?;
        let env = value[23..24].chars().next().ok_or(AccessKeyError::NonNumeric)?;
        if env != '1' && env != '2' {
            return Err(AccessKeyError::InvalidEnvironment { found: env });
        }
        let expected = check_digit(&value[..KEY_LEN - 1]);
        let found = value.as_bytes()[KEY_LEN - 1] - b'0';
        if expected != found {
            return Err(AccessKeyError::CheckDigit { expected, found });
        }
        Ok(AccessKey(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn issue_date(&self) -> Result<NaiveDate, AccessKeyError> {
        NaiveDate::parse_from_str(&self.0[0..8], "%d%m%Y").map_err(|_| AccessKeyError::InvalidDate)
    }

    pub fn document_type(&self) -> &str {
        &self.0[8..10]
    }

    pub fn ruc(&self) -> &str {
        &self.0[10..23]
    }

    pub fn environment(&self) -> Environment {
        if &self.0[23..24] == "2" {
            Environment::Production
        } else {
            Environment::Test
        }
    }

    /// The 9-digit sequential number reassembled from the series and the
    /// sequence block.
    pub fn sequential(&self) -> String {
        let mut s = String::with_capacity(9);
        s.push_str(&self.0[24..30]);
        s.push_str(&self.0[36..39]);
        s
    }

    pub fn numeric_code(&self) -> &str {
        &self.0[39..47]
    }

    pub fn emission_type_code(&self) -> &str {
        &self.0[47..48]
    }

    pub fn check_digit(&self) -> u8 {
        self.0.as_bytes()[KEY_LEN - 1] - b'0'
    }
}

impl fmt::Display for AccessKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for AccessKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
