//! Delivery zones: geographic partitioning by country and postal code.

use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};

use watergile_core::{CountryCode, DomainError, Entity};

use crate::calendar::{CalendarRegion, add_business_days};
use crate::carrier::CarrierId;

watergile_core::domain_id!(
    /// Delivery zone identifier.
    ZoneId
);

pub const DEFAULT_SEQUENCE: i32 = 10;
pub const DEFAULT_LEAD_TIME_DAYS: f64 = 1.0;
pub const DEFAULT_DAILY_CAPACITY: u32 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZoneState {
    #[default]
    Draft,
    Active,
    Archived,
}

/// Postal-code filter of a zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ZipPattern {
    Exact { zip: String },
    Start { prefix: String },
    Multiple { zips: Vec<String> },
    /// Numeric, inclusive on both ends.
    Range { start: String, end: String },
    /// Regular expression anchored at the start of the postal code.
    Custom { regex: String },
}

impl ZipPattern {
    pub fn validate(&self) -> Result<(), DomainError> {
        match self {
            ZipPattern::Exact { zip } if zip.trim().is_empty() => {
                Err(DomainError::validation("exact zip pattern cannot be empty"))
            }
            ZipPattern::Start { prefix } if prefix.trim().is_empty() => {
                Err(DomainError::validation("zip start pattern cannot be empty"))
            }
            ZipPattern::Multiple { zips } if zips.iter().all(|z| z.trim().is_empty()) => {
                Err(DomainError::validation("zip list cannot be empty"))
            }
            ZipPattern::Range { start, end } => {
                let (Ok(s), Ok(e)) = (start.trim().parse::<u32>(), end.trim().parse::<u32>()) else {
                    return Err(DomainError::validation("zip range bounds must be numeric"));
                };
                if s > e {
                    return Err(DomainError::validation(
                        "zip range start must not be greater than its end",
                    ));
                }
                Ok(())
            }
            ZipPattern::Custom { regex } => Regex::new(regex).map(|_| ()).map_err(|e| {
                DomainError::validation(format!("zip pattern is not a valid regular expression: {e}"))
            }),
            _ => Ok(()),
        }
    }

    pub fn matches(&self, zip: &str) -> bool {
        let zip = zip.trim();
        match self {
            ZipPattern::Exact { zip: exact } => zip == exact.trim(),
            ZipPattern::Start { prefix } => zip.starts_with(prefix.trim()),
            ZipPattern::Multiple { zips } => zips.iter().any(|z| z.trim() == zip),
            ZipPattern::Range { start, end } => {
                if zip.is_empty() || !zip.chars().all(|c| c.is_ascii_digit()) {
                    return false;
                }
                match (zip.parse::<u32>(), start.trim().parse::<u32>(), end.trim().parse::<u32>()) {
                    (Ok(z), Ok(s), Ok(e)) => s <= z && z <= e,
                    _ => false,
                }
            }
            ZipPattern::Custom { regex } => Regex::new(&format!("^(?:{regex})"))
                .map(|re| re.is_match(zip))
                .unwrap_or(false),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneInput {
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub sequence: Option<i32>,
    pub country: CountryCode,
    #[serde(default)]
    pub pattern: Option<ZipPattern>,
    #[serde(default)]
    pub prefixes: Vec<String>,
    #[serde(default)]
    pub carrier_ids: Vec<CarrierId>,
    #[serde(default)]
    pub default_carrier_id: Option<CarrierId>,
    #[serde(default)]
    pub lead_time_days: Option<f64>,
    #[serde(default)]
    pub daily_capacity: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryZone {
    pub id: ZoneId,
    pub code: String,
    pub name: String,
    pub sequence: i32,
    pub state: ZoneState,
    pub country: CountryCode,
    pub pattern: Option<ZipPattern>,
    pub prefixes: Vec<String>,
    pub carrier_ids: Vec<CarrierId>,
    pub default_carrier_id: Option<CarrierId>,
    pub lead_time_days: f64,
    pub daily_capacity: u32,
}

impl DeliveryZone {
    pub fn new(id: ZoneId, input: ZoneInput) -> Result<Self, DomainError> {
        let mut zone = Self {
            id,
            code: String::new(),
            name: String::new(),
            sequence: DEFAULT_SEQUENCE,
            state: ZoneState::Draft,
            country: input.country.clone(),
            pattern: None,
            prefixes: Vec::new(),
            carrier_ids: Vec::new(),
            default_carrier_id: None,
            lead_time_days: DEFAULT_LEAD_TIME_DAYS,
            daily_capacity: DEFAULT_DAILY_CAPACITY,
        };
        zone.replace(input)?;
        Ok(zone)
    }

    /// Replace the editable fields, keeping the lifecycle state.
    pub fn replace(&mut self, input: ZoneInput) -> Result<(), DomainError> {
        let code = input.code.trim().to_uppercase();
        if code.is_empty() {
            return Err(DomainError::validation("zone code cannot be empty"));
        }
        if input.name.trim().is_empty() {
            return Err(DomainError::validation("zone name cannot be empty"));
        }
        if let Some(pattern) = &input.pattern {
            pattern.validate()?;
        }
        let prefixes = validate_prefixes(&input.prefixes)?;

        let lead_time_days = input.lead_time_days.unwrap_or(DEFAULT_LEAD_TIME_DAYS);
        if !(lead_time_days > 0.0) {
            return Err(DomainError::validation("lead time must be strictly positive"));
        }
        let daily_capacity = input.daily_capacity.unwrap_or(DEFAULT_DAILY_CAPACITY);
        if daily_capacity == 0 {
            return Err(DomainError::validation("daily capacity must be at least 1"));
        }

        let mut carrier_ids = Vec::with_capacity(input.carrier_ids.len());
        for id in input.carrier_ids {
            if !carrier_ids.contains(&id) {
                carrier_ids.push(id);
            }
        }
        if let Some(default) = input.default_carrier_id {
            if !carrier_ids.contains(&default) {
                return Err(DomainError::validation(
                    "default carrier must be one of the zone's carriers",
                ));
            }
        }
        if self.state == ZoneState::Active && carrier_ids.is_empty() {
            return Err(DomainError::invariant("an active zone needs at least one carrier"));
        }

        self.code = code;
        self.name = input.name.trim().to_string();
        self.sequence = input.sequence.unwrap_or(DEFAULT_SEQUENCE);
        self.country = input.country;
        self.pattern = input.pattern;
        self.prefixes = prefixes;
        self.carrier_ids = carrier_ids;
        self.default_carrier_id = input.default_carrier_id;
        self.lead_time_days = lead_time_days;
        self.daily_capacity = daily_capacity;
        Ok(())
    }

    pub fn activate(&mut self) -> Result<(), DomainError> {
        if self.carrier_ids.is_empty() {
            return Err(DomainError::invariant(
                "assign at least one carrier before activating the zone",
            ));
        }
        self.state = ZoneState::Active;
        Ok(())
    }

    pub fn archive(&mut self) {
        self.state = ZoneState::Archived;
    }

    pub fn reset_to_draft(&mut self) {
        self.state = ZoneState::Draft;
    }

    pub fn is_active(&self) -> bool {
        self.state == ZoneState::Active
    }

    /// `"{name} ({country})"`.
    pub fn display_name(&self) -> String {
        format!("{} ({})", self.name, self.country)
    }

    /// Whether the zone covers a postal code of `country`, regardless of state.
    /// A zone without pattern nor prefixes covers the whole country.
    pub fn matches(&self, zip: &str, country: &CountryCode) -> bool {
        if &self.country != country {
            return false;
        }
        let zip = zip.trim();
        if self.pattern.is_none() && self.prefixes.is_empty() {
            return true;
        }
        if zip.is_empty() {
            return false;
        }
        self.pattern.as_ref().is_some_and(|p| p.matches(zip))
            || self.prefixes.iter().any(|p| zip.starts_with(p.as_str()))
    }

    pub fn has_carrier(&self, carrier_id: CarrierId) -> bool {
        self.carrier_ids.contains(&carrier_id)
    }

    /// Carrier used when a dispatch does not pick one.
    pub fn preferred_carrier(&self) -> Option<CarrierId> {
        self.default_carrier_id.or_else(|| self.carrier_ids.first().copied())
    }

    /// Rejects once `scheduled_count` deliveries already fill the day.
    pub fn check_capacity(&self, scheduled_count: u32) -> Result<(), DomainError> {
        if scheduled_count >= self.daily_capacity {
            return Err(DomainError::invariant(format!(
                "zone {} is fully booked ({} deliveries per day)",
                self.code, self.daily_capacity
            )));
        }
        Ok(())
    }

    /// First date a delivery ordered on `from` can reach this zone.
    pub fn earliest_delivery_date(&self, from: NaiveDate, region: CalendarRegion) -> NaiveDate {
        let days = self.lead_time_days.ceil().max(0.0) as i64;
        add_business_days(from, days, region)
    }
}

impl Entity for DeliveryZone {
    type Id = ZoneId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

fn validate_prefixes(raw: &[String]) -> Result<Vec<String>, DomainError> {
    let mut out: Vec<String> = Vec::with_capacity(raw.len());
    for prefix in raw {
        let p = prefix.trim();
        if !p.chars().all(|c| c.is_ascii_digit()) || !(2..=3).contains(&p.len()) {
            return Err(DomainError::validation(format!(
                "zip prefix '{p}' must contain 2 or 3 digits"
            )));
        }
        if out.iter().any(|existing| existing == p) {
            return Err(DomainError::validation(format!(
                "zip prefix '{p}' is listed twice"
            )));
        }
        out.push(p.to_string());
    }
    out.sort();
    Ok(out)
}

/// Zone codes are unique across all zones.
pub fn ensure_unique_code<'a>(
    zones: impl IntoIterator<Item = &'a DeliveryZone>,
    code: &str,
    except: Option<ZoneId>,
) -> Result<(), DomainError> {
    let code = code.trim().to_uppercase();
    let clash = zones
        .into_iter()
        .any(|z| z.code == code && Some(z.id) != except);
    if clash {
        return Err(DomainError::conflict(format!("zone code '{code}' already exists")));
    }
    Ok(())
}

/// First active zone, ordered by sequence then name, covering the postal code.
pub fn resolve_zone<'a>(
    zones: impl IntoIterator<Item = &'a DeliveryZone>,
    zip: &str,
    country: &CountryCode,
) -> Option<&'a DeliveryZone> {
    let mut candidates: Vec<&DeliveryZone> = zones
        .into_iter()
        .filter(|z| z.is_active() && z.matches(zip, country))
        .collect();
    candidates.sort_by(|a, b| a.sequence.cmp(&b.sequence).then_with(|| a.name.cmp(&b.name)));
    candidates.into_iter().next()
}
