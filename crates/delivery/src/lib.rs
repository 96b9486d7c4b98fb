//! Delivery domain module: zones, carriers, time slots and the French
//! business calendar.

pub mod calendar;
pub mod carrier;
pub mod slot;
pub mod zone;

pub use calendar::{
    CalendarRegion, Holiday, add_business_days, business_days_between, easter_sunday,
    holidays_for_year, is_business_day, is_holiday,
};
pub use carrier::{Carrier, CarrierId, CarrierInput, DeliveryType, IntegrationLevel, carrier_serves_zone};
pub use slot::{SlotId, TimeSlot, TimeSlotInput, Weekday};
pub use zone::{DeliveryZone, ZipPattern, ZoneId, ZoneInput, ZoneState, ensure_unique_code, resolve_zone};
