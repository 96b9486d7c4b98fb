//! Delivery time slots and weekdays.

use serde::{Deserialize, Serialize};

use watergile_core::{DomainError, Entity};

watergile_core::domain_id!(
    /// Time slot identifier.
    SlotId
);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSlotInput {
    pub name: String,
    #[serde(default)]
    pub sequence: Option<i32>,
    pub start_hour: f64,
    pub end_hour: f64,
    #[serde(default)]
    pub max_deliveries: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSlot {
    pub id: SlotId,
    pub name: String,
    pub sequence: i32,
    pub start_hour: f64,
    pub end_hour: f64,
    pub active: bool,
    pub max_deliveries: Option<u32>,
}

impl TimeSlot {
    pub fn new(id: SlotId, input: TimeSlotInput) -> Result<Self, DomainError> {
        let name = input.name.trim();
        if name.is_empty() {
            return Err(DomainError::validation("time slot name cannot be empty"));
        }
        if !(0.0..24.0).contains(&input.start_hour)
            || !(input.end_hour > 0.0 && input.end_hour <= 24.0)
            || input.start_hour >= input.end_hour
        {
            return Err(DomainError::validation(format!(
                "invalid hours {}-{}: expected 0 <= start < end <= 24",
                input.start_hour, input.end_hour
            )));
        }
        Ok(Self {
            id,
            name: name.to_string(),
            sequence: input.sequence.unwrap_or(10),
            start_hour: input.start_hour,
            end_hour: input.end_hour,
            active: true,
            max_deliveries: input.max_deliveries.filter(|m| *m > 0),
        })
    }

    /// Percentage of the slot's capacity used by `scheduled` deliveries;
    /// 0 when the slot is unbounded.
    pub fn occupation_rate(&self, scheduled: u32) -> f64 {
        match self.max_deliveries {
            Some(max) => f64::from(scheduled) / f64::from(max) * 100.0,
            None => 0.0,
        }
    }

    pub fn is_full(&self, scheduled: u32) -> bool {
        self.max_deliveries.is_some_and(|max| scheduled >= max)
    }
}

impl Entity for TimeSlot {
    type Id = SlotId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Delivery weekday, ISO-numbered (Monday = 1 ... Sunday = 7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Weekday(u8);

impl Weekday {
    pub fn from_code(code: u8) -> Result<Self, DomainError> {
        if !(1..=7).contains(&code) {
            return Err(DomainError::validation(format!(
                "weekday code must be between 1 and 7, got {code}"
            )));
        }
        Ok(Self(code))
    }

    pub fn code(self) -> u8 {
        self.0
    }

    pub fn of(date: chrono::NaiveDate) -> Self {
        use chrono::Datelike;
        Self(date.weekday().number_from_monday() as u8)
    }
}

impl TryFrom<u8> for Weekday {
    type Error = DomainError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::from_code(value)
    }
}

impl From<Weekday> for u8 {
    fn from(value: Weekday) -> Self {
        value.0
    }
}
