//! Partner addresses: delivery destinations shared by one or more partners.

use serde::{Deserialize, Serialize};

use watergile_core::{CountryCode, DomainError, Entity};

use crate::partner::PartnerId;

watergile_core::domain_id!(
    /// Partner address identifier.
    AddressId
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressType {
    #[default]
    Delivery,
    Invoice,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

/// Result of the last BAN lookup for this address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BanEnrichment {
    pub ban_id: String,
    pub score: f64,
    pub validated: bool,
}

/// Input for creating or replacing an address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddressInput {
    pub name: String,
    pub owners: Vec<PartnerId>,
    #[serde(default)]
    pub street: Option<String>,
    #[serde(default)]
    pub street2: Option<String>,
    #[serde(default)]
    pub zip: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    pub country: CountryCode,
    #[serde(default)]
    pub address_type: AddressType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartnerAddress {
    pub id: AddressId,
    pub name: String,
    /// Ordered; the first owner is the main partner.
    pub owners: Vec<PartnerId>,
    pub street: Option<String>,
    pub street2: Option<String>,
    pub zip: Option<String>,
    pub city: Option<String>,
    pub country: CountryCode,
    pub address_type: AddressType,
    pub active: bool,
    pub coordinates: Option<Coordinates>,
    pub ban: Option<BanEnrichment>,
}

/// Format-only quality assessment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FormatQuality {
    pub score: f64,
    pub zip_valid: bool,
    pub city_valid: bool,
    pub street_valid: bool,
}

impl PartnerAddress {
    pub fn new(id: AddressId, input: AddressInput) -> Result<Self, DomainError> {
        let mut address = Self {
            id,
            name: String::new(),
            owners: Vec::new(),
            street: None,
            street2: None,
            zip: None,
            city: None,
            country: input.country.clone(),
            address_type: input.address_type,
            active: true,
            coordinates: None,
            ban: None,
        };
        address.replace(input)?;
        Ok(address)
    }

    /// Replace the user-owned fields. Enrichment is dropped when the postal
    /// fields change.
    pub fn replace(&mut self, input: AddressInput) -> Result<(), DomainError> {
        if input.name.trim().is_empty() {
            return Err(DomainError::validation("address name cannot be empty"));
        }
        if input.owners.is_empty() {
            return Err(DomainError::validation(
                "an address must be linked to at least one partner",
            ));
        }
        let zip = input.zip.as_deref().map(normalize_zip).transpose()?.flatten();
        let city = input.city.as_deref().map(normalize_city).filter(|c| !c.is_empty());
        let street = non_blank(input.street);
        let street2 = non_blank(input.street2);

        let postal_changed = self.street != street
            || self.zip != zip
            || self.city != city
            || self.country != input.country;

        self.name = input.name.trim().to_string();
        self.owners = dedup_preserving_order(input.owners);
        self.street = street;
        self.street2 = street2;
        self.zip = zip;
        self.city = city;
        self.country = input.country;
        self.address_type = input.address_type;
        if postal_changed {
            self.ban = None;
            self.coordinates = None;
        }
        Ok(())
    }

    pub fn main_partner(&self) -> Option<PartnerId> {
        self.owners.first().copied()
    }

    pub fn belongs_to(&self, partner: PartnerId) -> bool {
        self.owners.contains(&partner)
    }

    /// `"{name} ({zip} {city})"`, or the bare name when zip or city is missing.
    pub fn display_name(&self) -> String {
        match (&self.zip, &self.city) {
            (Some(zip), Some(city)) => format!("{} ({} {})", self.name, zip, city),
            _ => self.name.clone(),
        }
    }

    pub fn format_quality(&self) -> FormatQuality {
        format_quality(
            self.street.as_deref(),
            self.zip.as_deref(),
            self.city.as_deref(),
        )
    }

    /// Format score multiplied by the BAN score when one exists.
    pub fn combined_score(&self) -> f64 {
        let format = self.format_quality().score;
        match &self.ban {
            Some(ban) => format * ban.score,
            None => format,
        }
    }

    pub fn is_ban_valid(&self) -> bool {
        self.ban.is_some() && self.combined_score() > 0.8
    }

    pub fn record_ban_match(&mut self, ban_id: String, score: f64, coordinates: Option<Coordinates>) {
        let format = self.format_quality().score;
        self.ban = Some(BanEnrichment {
            ban_id,
            score,
            validated: format * score > 0.8,
        });
        if coordinates.is_some() {
            self.coordinates = coordinates;
        }
    }

    /// Deletion is refused while any dispatch references the address.
    pub fn ensure_deletable(&self, referencing_dispatches: usize) -> Result<(), DomainError> {
        if referencing_dispatches > 0 {
            return Err(DomainError::invariant(format!(
                "address '{}' is used by {referencing_dispatches} dispatch(es) and cannot be deleted",
                self.name
            )));
        }
        Ok(())
    }

    /// Archiving is refused while an in-progress dispatch targets the address.
    pub fn archive(&mut self, in_progress_dispatches: usize) -> Result<(), DomainError> {
        if in_progress_dispatches > 0 {
            return Err(DomainError::invariant(format!(
                "address '{}' has {in_progress_dispatches} dispatch(es) in progress and cannot be archived",
                self.name
            )));
        }
        self.active = false;
        Ok(())
    }

    pub fn unarchive(&mut self) {
        self.active = true;
    }
}

impl Entity for PartnerAddress {
    type Id = AddressId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Multiplicative format score of a French postal address.
pub fn format_quality(street: Option<&str>, zip: Option<&str>, city: Option<&str>) -> FormatQuality {
    let mut score = 1.0;

    let zip_valid = zip.is_some_and(|z| z.len() == 5 && z.chars().all(|c| c.is_ascii_digit()));
    if !zip_valid {
        score *= 0.7;
    }

    let city = city.map(str::trim).filter(|c| !c.is_empty());
    match city {
        None => score *= 0.7,
        Some(c) => {
            if !c.chars().all(|ch| ch.is_alphabetic() || ch == '-' || ch == ' ') {
                score *= 0.9;
            }
        }
    }

    let street = street.map(str::trim).filter(|s| !s.is_empty());
    match street {
        None => score *= 0.7,
        Some(s) => {
            if !s.chars().any(|ch| ch.is_ascii_digit()) {
                score *= 0.9;
            }
            let allowed = |ch: char| {
                ch.is_alphanumeric() || matches!(ch, ' ' | '\'' | '-' | ',' | '.')
            };
            if !s.chars().all(allowed) {
                score *= 0.9;
            }
        }
    }

    FormatQuality {
        score,
        zip_valid,
        city_valid: city.is_some(),
        street_valid: street.is_some(),
    }
}

fn normalize_zip(raw: &str) -> Result<Option<String>, DomainError> {
    let zip = raw.trim().to_uppercase();
    if zip.is_empty() {
        return Ok(None);
    }
    if !zip.chars().all(|c| c.is_alphanumeric()) {
        return Err(DomainError::validation(
            "zip code may only contain alphanumeric characters",
        ));
    }
    Ok(Some(zip))
}

/// Title-case each word, treating any non-alphabetic character as a break.
fn normalize_city(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut at_word_start = true;
    for ch in raw.trim().chars() {
        if ch.is_alphabetic() {
            if at_word_start {
                out.extend(ch.to_uppercase());
            } else {
                out.extend(ch.to_lowercase());
            }
            at_word_start = false;
        } else {
            out.push(ch);
            at_word_start = true;
        }
    }
    out
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn dedup_preserving_order(owners: Vec<PartnerId>) -> Vec<PartnerId> {
    let mut seen = Vec::with_capacity(owners.len());
    for owner in owners {
        if !seen.contains(&owner) {
            seen.push(owner);
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(owner: PartnerId) -> AddressInput {
        AddressInput {
            name: "Entrepôt Nord".to_string(),
            owners: vec![owner],
            street: Some("12 rue des Lilas".to_string()),
            street2: None,
            zip: Some(" 59000 ".to_string()),
            city: Some("  lille ".to_string()),
            country: CountryCode::france(),
            address_type: AddressType::Delivery,
        }
    }

    #[test]
    fn new_address_normalises_zip_and_city() {
        let owner = PartnerId::generate();
        let mut raw = input(owner);
        raw.city = Some("saint-ANDRÉ lez lille".to_string());
        let address = PartnerAddress::new(AddressId::generate(), raw).unwrap();
        assert_eq!(address.zip.as_deref(), Some("59000"));
        assert_eq!(address.city.as_deref(), Some("Saint-André Lez Lille"));
        assert_eq!(address.display_name(), "Entrepôt Nord (59000 Saint-André Lez Lille)");
    }

    #[test]
    fn address_requires_an_owner() {
        let mut raw = input(PartnerId::generate());
        raw.owners.clear();
        let err = PartnerAddress::new(AddressId::generate(), raw).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn zip_with_symbols_is_rejected() {
        let mut raw = input(PartnerId::generate());
        raw.zip = Some("59-000".to_string());
        assert!(PartnerAddress::new(AddressId::generate(), raw).is_err());
    }

    #[test]
    fn first_owner_is_main_partner() {
        let a = PartnerId::generate();
        let b = PartnerId::generate();
        let mut raw = input(a);
        raw.owners = vec![a, b, a];
        let address = PartnerAddress::new(AddressId::generate(), raw).unwrap();
        assert_eq!(address.main_partner(), Some(a));
        assert_eq!(address.owners.len(), 2);
        assert!(address.belongs_to(b));
        assert!(!address.belongs_to(PartnerId::generate()));
    }

    #[test]
    fn well_formed_address_scores_one() {
        let q = format_quality(Some("12 rue des Lilas"), Some("59000"), Some("Lille"));
        assert!((q.score - 1.0).abs() < f64::EPSILON);
        assert!(q.zip_valid && q.city_valid && q.street_valid);
    }

    #[test]
    fn each_defect_multiplies_the_score() {
        let q = format_quality(Some("rue des Lilas"), Some("5900"), None);
        // no house number 0.9, bad zip 0.7, missing city 0.7
        assert!((q.score - 0.9 * 0.7 * 0.7).abs() < 1e-9);

        let q = format_quality(Some("12 rue #3"), Some("59000"), Some("Lille 2"));
        assert!((q.score - 0.9 * 0.9).abs() < 1e-9);
    }

    #[test]
    fn ban_validity_uses_combined_score() {
        let mut address = PartnerAddress::new(AddressId::generate(), input(PartnerId::generate())).unwrap();
        address.record_ban_match("59350_1234_00012".to_string(), 0.95, None);
        assert!(address.is_ban_valid());

        address.record_ban_match("59350_1234_00012".to_string(), 0.6, None);
        assert!(!address.is_ban_valid());
    }

    #[test]
    fn changing_postal_fields_drops_enrichment() {
        let owner = PartnerId::generate();
        let mut address = PartnerAddress::new(AddressId::generate(), input(owner)).unwrap();
        address.record_ban_match("id".to_string(), 0.9, None);

        let mut changed = input(owner);
        changed.street = Some("3 avenue Foch".to_string());
        address.replace(changed).unwrap();
        assert!(address.ban.is_none());
    }

    #[test]
    fn cannot_delete_address_used_by_dispatch() {
        let address = PartnerAddress::new(AddressId::generate(), input(PartnerId::generate())).unwrap();
        assert!(address.ensure_deletable(0).is_ok());
        match address.ensure_deletable(2) {
            Err(DomainError::InvariantViolation(msg)) if msg.contains("cannot be deleted") => {}
            other => panic!("expected invariant violation, got {other:?}"),
        }
    }

    #[test]
    fn cannot_archive_address_with_dispatch_in_progress() {
        let mut address = PartnerAddress::new(AddressId::generate(), input(PartnerId::generate())).unwrap();
        assert!(address.archive(1).is_err());
        assert!(address.active);
        address.archive(0).unwrap();
        assert!(!address.active);
    }
}
