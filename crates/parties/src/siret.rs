//! SIRET / SIREN identifiers of French establishments and legal entities.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use watergile_core::{DomainError, ValueObject};

/// Luhn checksum over a digit string.
///
/// Digits at 0-indexed even positions are doubled (minus 9 when the double
/// exceeds 9) before summing; the string is valid iff the sum is a multiple
/// of 10. Non-digit input is never valid.
pub fn luhn_valid(digits: &str) -> bool {
    if digits.is_empty() {
        return false;
    }
    let mut sum = 0u32;
    for (i, c) in digits.chars().enumerate() {
        let Some(mut d) = c.to_digit(10) else {
            return false;
        };
        if i % 2 == 0 {
            d *= 2;
            if d > 9 {
                d -= 9;
            }
        }
        sum += d;
    }
    sum % 10 == 0
}

/// A Luhn-valid 14-digit SIRET number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Siret(String);

impl Siret {
    /// Parse user input: spaces are ignored, exactly 14 digits are required
    /// and the Luhn checksum must hold.
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        let digits: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
        if digits.len() != 14 || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(DomainError::validation(format!(
                "SIRET must contain exactly 14 digits, got '{raw}'"
            )));
        }
        if !luhn_valid(&digits) {
            return Err(DomainError::validation(format!(
                "SIRET '{digits}' fails the Luhn checksum"
            )));
        }
        Ok(Self(digits))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// SIREN of the owning legal entity (first 9 digits).
    pub fn siren(&self) -> &str {
        &self.0[..9]
    }

    /// NIC: establishment rank within the legal entity (last 5 digits).
    pub fn nic(&self) -> &str {
        &self.0[9..]
    }

    /// `"XXX XXX XXX XXXXX"`.
    pub fn formatted(&self) -> String {
        format!(
            "{} {} {} {}",
            &self.0[0..3],
            &self.0[3..6],
            &self.0[6..9],
            &self.0[9..]
        )
    }

    /// French intra-community VAT number derived from the SIREN.
    pub fn vat_number(&self) -> String {
        vat_number_for_siren(self.siren())
    }
}

/// `FR` + two-digit key + SIREN, key = (12 + 3 × (SIREN mod 97)) mod 97.
pub fn vat_number_for_siren(siren: &str) -> String {
    let value: u64 = siren.parse().unwrap_or(0);
    let key = (12 + 3 * (value % 97)) % 97;
    format!("FR{key:02}{siren}")
}

impl ValueObject for Siret {}

impl core::fmt::Display for Siret {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Siret {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Siret {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Siret> for String {
    fn from(value: Siret) -> Self {
        value.0
    }
}
