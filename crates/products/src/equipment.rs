//! Equipment registry: serialised units held by customers, with warranty
//! tracking and spare-part compatibility (see [`crate::Product`]).

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use watergile_core::{DomainError, Entity};
use watergile_parties::{AddressId, PartnerId};

use crate::product::ProductId;

watergile_core::domain_id!(
    /// Equipment identifier.
    EquipmentId
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EquipmentState {
    #[default]
    Draft,
    Available,
    InService,
    Maintenance,
    Repair,
    Inactive,
}

impl EquipmentState {
    /// Allowed state transitions.
    ///
    /// Out-of-service units must go back through draft before being reused.
    pub fn can_transition_to(self, target: EquipmentState) -> bool {
        use EquipmentState::*;
        match (self, target) {
            (a, b) if a == b => false,
            (Inactive, Draft) => true,
            (Inactive, _) => false,
            (Draft, Available) | (Draft, Inactive) => true,
            (Draft, _) => false,
            (_, Draft) => true,
            _ => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarrantyStatus {
    NoWarranty,
    Active,
    Expired,
}

/// Age broken down the way it is displayed: 365-day years, 30-day months.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EquipmentAge {
    pub years: i64,
    pub months: i64,
    pub days: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EquipmentInput {
    /// Defaults to the product name when empty.
    #[serde(default)]
    pub name: String,
    pub product_id: ProductId,
    pub serial_number: String,
    pub owner_id: PartnerId,
    pub holder_id: PartnerId,
    pub address_id: Option<AddressId>,
    pub manufacturer_id: Option<PartnerId>,
    #[serde(default)]
    pub refurbished: bool,
    pub service_start: Option<NaiveDate>,
    pub warranty_end: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Equipment {
    pub id: EquipmentId,
    pub name: String,
    pub product_id: ProductId,
    pub serial_number: String,
    pub owner_id: PartnerId,
    pub holder_id: PartnerId,
    pub address_id: Option<AddressId>,
    pub manufacturer_id: Option<PartnerId>,
    pub refurbished: bool,
    pub state: EquipmentState,
    pub service_start: Option<NaiveDate>,
    pub warranty_end: Option<NaiveDate>,
}

impl Equipment {
    pub fn new(
        id: EquipmentId,
        input: EquipmentInput,
        product_name: &str,
    ) -> Result<Self, DomainError> {
        let mut equipment = Self {
            id,
            name: String::new(),
            product_id: input.product_id,
            serial_number: String::new(),
            owner_id: input.owner_id,
            holder_id: input.holder_id,
            address_id: None,
            manufacturer_id: None,
            refurbished: false,
            state: EquipmentState::Draft,
            service_start: None,
            warranty_end: None,
        };
        equipment.replace(input, product_name)?;
        Ok(equipment)
    }

    pub fn replace(&mut self, input: EquipmentInput, product_name: &str) -> Result<(), DomainError> {
        let serial = input.serial_number.trim();
        if serial.is_empty() {
            return Err(DomainError::validation("serial number is required"));
        }
        if input.owner_id == input.holder_id {
            return Err(DomainError::validation("owner and holder must be different partners"));
        }
        if let (Some(start), Some(end)) = (input.service_start, input.warranty_end) {
            if end < start {
                return Err(DomainError::validation(
                    "warranty end cannot precede the service start date",
                ));
            }
        }

        let name = match input.name.trim() {
            "" => product_name.trim().to_string(),
            name => name.to_string(),
        };
        if name.is_empty() {
            return Err(DomainError::validation("equipment name cannot be empty"));
        }

        self.name = name;
        self.product_id = input.product_id;
        self.serial_number = serial.to_string();
        self.owner_id = input.owner_id;
        self.holder_id = input.holder_id;
        self.address_id = input.address_id;
        self.manufacturer_id = input.manufacturer_id;
        self.refurbished = input.refurbished;
        self.service_start = input.service_start;
        self.warranty_end = input.warranty_end;
        Ok(())
    }

    pub fn transition(&mut self, target: EquipmentState) -> Result<(), DomainError> {
        if !self.state.can_transition_to(target) {
            return Err(DomainError::invariant(format!(
                "equipment cannot move from {:?} to {:?}",
                self.state, target
            )));
        }
        self.state = target;
        Ok(())
    }

    pub fn warranty_status(&self, today: NaiveDate) -> WarrantyStatus {
        match self.warranty_end {
            None => WarrantyStatus::NoWarranty,
            Some(end) if end < today => WarrantyStatus::Expired,
            Some(_) => WarrantyStatus::Active,
        }
    }

    /// Days since the service start (0 when unknown or in the future).
    pub fn age_days(&self, today: NaiveDate) -> i64 {
        self.service_start
            .map(|start| (today - start).num_days().max(0))
            .unwrap_or(0)
    }

    pub fn age(&self, today: NaiveDate) -> EquipmentAge {
        let total = self.age_days(today);
        EquipmentAge {
            years: total / 365,
            months: (total % 365) / 30,
            days: total % 30,
        }
    }

    pub fn is_under_maintenance(&self) -> bool {
        matches!(self.state, EquipmentState::Maintenance | EquipmentState::Repair)
    }
}

impl Entity for Equipment {
    type Id = EquipmentId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Serial numbers are unique across the registry (case-insensitive).
pub fn ensure_unique_serial<'a>(
    existing: impl IntoIterator<Item = &'a Equipment>,
    serial: &str,
    except: Option<EquipmentId>,
) -> Result<(), DomainError> {
    let serial = serial.trim();
    let clash = existing.into_iter().any(|e| {
        Some(e.id) != except && e.serial_number.eq_ignore_ascii_case(serial)
    });
    if clash {
        return Err(DomainError::conflict(format!(
            "serial number '{serial}' is already registered"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn input() -> EquipmentInput {
        EquipmentInput {
            name: String::new(),
            product_id: ProductId::generate(),
            serial_number: " SN-0001 ".to_string(),
            owner_id: PartnerId::generate(),
            holder_id: PartnerId::generate(),
            address_id: None,
            manufacturer_id: None,
            refurbished: false,
            service_start: Some(date(2023, 1, 1)),
            warranty_end: Some(date(2025, 1, 1)),
        }
    }

    #[test]
    fn name_defaults_to_product_name() {
        let eq = Equipment::new(EquipmentId::generate(), input(), "Fontaine F200").unwrap();
        assert_eq!(eq.name, "Fontaine F200");
        assert_eq!(eq.serial_number, "SN-0001");
        assert_eq!(eq.state, EquipmentState::Draft);
    }

    #[test]
    fn owner_and_holder_must_differ() {
        let mut i = input();
        i.holder_id = i.owner_id;
        let err = Equipment::new(EquipmentId::generate(), i, "F").unwrap_err();
        match err {
            DomainError::Validation(msg) if msg.contains("owner and holder") => {}
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn warranty_cannot_end_before_service_start() {
        let mut i = input();
        i.warranty_end = Some(date(2022, 12, 31));
        assert!(Equipment::new(EquipmentId::generate(), i, "F").is_err());
    }

    #[test]
    fn warranty_status_follows_today() {
        let eq = Equipment::new(EquipmentId::generate(), input(), "F").unwrap();
        assert_eq!(eq.warranty_status(date(2024, 6, 1)), WarrantyStatus::Active);
        assert_eq!(eq.warranty_status(date(2025, 1, 1)), WarrantyStatus::Active);
        assert_eq!(eq.warranty_status(date(2025, 1, 2)), WarrantyStatus::Expired);

        let mut i = input();
        i.warranty_end = None;
        let eq = Equipment::new(EquipmentId::generate(), i, "F").unwrap();
        assert_eq!(eq.warranty_status(date(2024, 6, 1)), WarrantyStatus::NoWarranty);
    }

    #[test]
    fn age_is_broken_down() {
        let eq = Equipment::new(EquipmentId::generate(), input(), "F").unwrap();
        // 2023-01-01 -> 2024-03-11 is 435 days.
        assert_eq!(eq.age_days(date(2024, 3, 11)), 435);
        assert_eq!(
            eq.age(date(2024, 3, 11)),
            EquipmentAge {
                years: 1,
                months: 2,
                days: 15
            }
        );
        assert_eq!(eq.age_days(date(2022, 1, 1)), 0);
    }

    #[test]
    fn state_transitions() {
        let mut eq = Equipment::new(EquipmentId::generate(), input(), "F").unwrap();
        assert!(eq.transition(EquipmentState::InService).is_err());
        eq.transition(EquipmentState::Available).unwrap();
        eq.transition(EquipmentState::InService).unwrap();
        eq.transition(EquipmentState::Repair).unwrap();
        assert!(eq.is_under_maintenance());
        eq.transition(EquipmentState::Inactive).unwrap();
        assert!(eq.transition(EquipmentState::Available).is_err());
        eq.transition(EquipmentState::Draft).unwrap();
    }

    #[test]
    fn serial_numbers_are_unique() {
        let eq = Equipment::new(EquipmentId::generate(), input(), "F").unwrap();
        let all = vec![eq.clone()];
        assert!(ensure_unique_serial(&all, "sn-0001", None).is_err());
        assert!(ensure_unique_serial(&all, "SN-0001", Some(eq.id)).is_ok());
        assert!(ensure_unique_serial(&all, "SN-0002", None).is_ok());
    }
}
