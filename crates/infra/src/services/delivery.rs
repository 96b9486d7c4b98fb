//! Delivery zones, carriers, time slots and the business calendar.

use chrono::NaiveDate;

use watergile_core::{CountryCode, DomainError};
use watergile_delivery::{
    CalendarRegion, Carrier, CarrierId, CarrierInput, DeliveryZone, Holiday, SlotId, TimeSlot,
    TimeSlotInput, ZoneId, ZoneInput, add_business_days, business_days_between,
    carrier_serves_zone, ensure_unique_code, holidays_for_year, resolve_zone,
};

use super::{ServiceResult, SharedRecords, not_found};

pub struct DeliveryService {
    zones: SharedRecords<ZoneId, DeliveryZone>,
    carriers: SharedRecords<CarrierId, Carrier>,
    slots: SharedRecords<SlotId, TimeSlot>,
}

impl DeliveryService {
    pub fn new(
        zones: SharedRecords<ZoneId, DeliveryZone>,
        carriers: SharedRecords<CarrierId, Carrier>,
        slots: SharedRecords<SlotId, TimeSlot>,
    ) -> Self {
        Self {
            zones,
            carriers,
            slots,
        }
    }

    // Zones

    pub fn create_zone(&self, input: ZoneInput) -> ServiceResult<DeliveryZone> {
        ensure_unique_code(&self.zones.list()?, &input.code, None)?;
        self.ensure_carriers_exist(&input.carrier_ids)?;
        let zone = DeliveryZone::new(ZoneId::generate(), input)?;
        self.zones.upsert(zone.id, zone.clone())?;
        Ok(zone)
    }

    pub fn update_zone(&self, id: ZoneId, input: ZoneInput) -> ServiceResult<DeliveryZone> {
        let mut zone = self.zone(id)?;
        ensure_unique_code(&self.zones.list()?, &input.code, Some(id))?;
        self.ensure_carriers_exist(&input.carrier_ids)?;
        zone.replace(input)?;
        self.zones.upsert(id, zone.clone())?;
        Ok(zone)
    }

    pub fn zone(&self, id: ZoneId) -> ServiceResult<DeliveryZone> {
        self.zones.get(&id)?.ok_or_else(not_found)
    }

    pub fn zones(&self) -> ServiceResult<Vec<DeliveryZone>> {
        let mut zones = self.zones.list()?;
        zones.sort_by(|a, b| a.sequence.cmp(&b.sequence).then_with(|| a.name.cmp(&b.name)));
        Ok(zones)
    }

    pub fn activate_zone(&self, id: ZoneId) -> ServiceResult<DeliveryZone> {
        self.update_zone_state(id, DeliveryZone::activate)
    }

    pub fn archive_zone(&self, id: ZoneId) -> ServiceResult<DeliveryZone> {
        self.update_zone_state(id, |z| {
            z.archive();
            Ok(())
        })
    }

    pub fn reset_zone(&self, id: ZoneId) -> ServiceResult<DeliveryZone> {
        self.update_zone_state(id, |z| {
            z.reset_to_draft();
            Ok(())
        })
    }

    fn update_zone_state(
        &self,
        id: ZoneId,
        change: impl FnOnce(&mut DeliveryZone) -> Result<(), DomainError>,
    ) -> ServiceResult<DeliveryZone> {
        let mut zone = self.zone(id)?;
        change(&mut zone)?;
        self.zones.upsert(id, zone.clone())?;
        Ok(zone)
    }

    /// Active zone serving a postal code, if any.
    pub fn resolve(&self, zip: &str, country: &CountryCode) -> ServiceResult<Option<DeliveryZone>> {
        let zones = self.zones.list()?;
        Ok(resolve_zone(&zones, zip, country).cloned())
    }

    /// First delivery date for an order placed on `from`, honouring the
    /// zone's lead time and the holidays of the destination.
    pub fn earliest_delivery_date(
        &self,
        zone_id: ZoneId,
        from: NaiveDate,
        zip: &str,
    ) -> ServiceResult<NaiveDate> {
        let zone = self.zone(zone_id)?;
        Ok(zone.earliest_delivery_date(from, CalendarRegion::from_zip(zip)))
    }

    // Carriers

    fn ensure_carriers_exist(&self, ids: &[CarrierId]) -> ServiceResult<()> {
        for id in ids {
            if self.carriers.get(id)?.is_none() {
                return Err(DomainError::validation(format!("carrier {id} is unknown")).into());
            }
        }
        Ok(())
    }

    pub fn create_carrier(&self, input: CarrierInput) -> ServiceResult<Carrier> {
        let carrier = Carrier::new(CarrierId::generate(), input)?;
        self.carriers.upsert(carrier.id, carrier.clone())?;
        Ok(carrier)
    }

    pub fn update_carrier(&self, id: CarrierId, input: CarrierInput) -> ServiceResult<Carrier> {
        let mut carrier = self.carrier(id)?;
        carrier.replace(input)?;
        self.carriers.upsert(id, carrier.clone())?;
        Ok(carrier)
    }

    pub fn carrier(&self, id: CarrierId) -> ServiceResult<Carrier> {
        self.carriers.get(&id)?.ok_or_else(not_found)
    }

    pub fn carriers(&self) -> ServiceResult<Vec<Carrier>> {
        Ok(self.carriers.list()?)
    }

    /// Whether `carrier_id` may deliver in `zone_id`. Unknown ids are never
    /// reachable.
    pub fn serves(&self, zone_id: ZoneId, carrier_id: CarrierId) -> ServiceResult<bool> {
        let (Some(zone), Some(carrier)) = (self.zones.get(&zone_id)?, self.carriers.get(&carrier_id)?)
        else {
            return Ok(false);
        };
        Ok(carrier_serves_zone(&carrier, &zone))
    }

    // Slots

    pub fn create_slot(&self, input: TimeSlotInput) -> ServiceResult<TimeSlot> {
        let slot = TimeSlot::new(SlotId::generate(), input)?;
        self.slots.upsert(slot.id, slot.clone())?;
        Ok(slot)
    }

    pub fn slot(&self, id: SlotId) -> ServiceResult<TimeSlot> {
        self.slots.get(&id)?.ok_or_else(not_found)
    }

    pub fn slots(&self) -> ServiceResult<Vec<TimeSlot>> {
        let mut slots = self.slots.list()?;
        slots.sort_by(|a, b| {
            a.sequence
                .cmp(&b.sequence)
                .then_with(|| a.start_hour.total_cmp(&b.start_hour))
        });
        Ok(slots)
    }

    // Calendar

    pub fn holidays(&self, year: i32, region: CalendarRegion) -> Vec<Holiday> {
        holidays_for_year(year, region)
    }

    pub fn add_business_days(&self, date: NaiveDate, days: i64, region: CalendarRegion) -> NaiveDate {
        add_business_days(date, days, region)
    }

    pub fn business_days_between(&self, a: NaiveDate, b: NaiveDate, region: CalendarRegion) -> i64 {
        business_days_between(a, b, region)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::read_model::InMemoryRecordStore;
    use rust_decimal_macros::dec;
    use std::sync::Arc;
    use watergile_delivery::{DeliveryType, ZipPattern};

    fn service() -> DeliveryService {
        DeliveryService::new(
            Arc::new(InMemoryRecordStore::new()),
            Arc::new(InMemoryRecordStore::new()),
            Arc::new(InMemoryRecordStore::new()),
        )
    }

    fn zone_input(code: &str, carriers: Vec<CarrierId>) -> ZoneInput {
        ZoneInput {
            code: code.to_string(),
            name: format!("Zone {code}"),
            sequence: None,
            country: CountryCode::france(),
            pattern: Some(ZipPattern::Start {
                prefix: "75".to_string(),
            }),
            prefixes: vec![],
            carrier_ids: carriers,
            default_carrier_id: None,
            lead_time_days: None,
            daily_capacity: None,
        }
    }

    fn carrier(svc: &DeliveryService) -> Carrier {
        svc.create_carrier(CarrierInput {
            name: "Truck".to_string(),
            delivery_type: DeliveryType::Fixed { price: dec!(12) },
            zone_ids: vec![],
        })
        .unwrap()
    }

    #[test]
    fn zone_codes_are_unique() {
        let svc = service();
        svc.create_zone(zone_input("PAR", vec![])).unwrap();
        assert!(svc.create_zone(zone_input("par", vec![])).is_err());
    }

    #[test]
    fn only_active_zones_resolve() {
        let svc = service();
        let truck = carrier(&svc);
        let zone = svc.create_zone(zone_input("PAR", vec![truck.id])).unwrap();

        assert!(svc.resolve("75011", &CountryCode::france()).unwrap().is_none());
        svc.activate_zone(zone.id).unwrap();
        let resolved = svc.resolve("75011", &CountryCode::france()).unwrap();
        assert_eq!(resolved.map(|z| z.id), Some(zone.id));
        assert!(svc.serves(zone.id, truck.id).unwrap());
    }

    #[test]
    fn zone_without_carrier_cannot_be_activated() {
        let svc = service();
        let zone = svc.create_zone(zone_input("PAR", vec![])).unwrap();
        assert!(svc.activate_zone(zone.id).is_err());
    }

    #[test]
    fn unknown_carrier_is_rejected_on_zones() {
        let svc = service();
        assert!(svc.create_zone(zone_input("PAR", vec![CarrierId::generate()])).is_err());
    }
}
