//! French public holidays and business-day arithmetic.

use chrono::{Datelike, Duration, NaiveDate, Weekday as ChronoWeekday};
use serde::{Deserialize, Serialize};

/// Calendar variant applied to a delivery address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalendarRegion {
    #[default]
    Metropole,
    /// Bas-Rhin, Haut-Rhin, Moselle.
    AlsaceMoselle,
    Guadeloupe,
    Martinique,
    Guyane,
    Reunion,
    Mayotte,
}

impl CalendarRegion {
    /// Region for a French postal code.
    pub fn from_zip(zip: &str) -> Self {
        let zip = zip.trim();
        if zip.len() >= 3 {
            match &zip[..3] {
                "971" => return Self::Guadeloupe,
                "972" => return Self::Martinique,
                "973" => return Self::Guyane,
                "974" => return Self::Reunion,
                "976" => return Self::Mayotte,
                _ => {}
            }
        }
        match zip.get(..2) {
            Some("57" | "67" | "68") => Self::AlsaceMoselle,
            _ => Self::Metropole,
        }
    }

    fn abolition_day(self) -> Option<(u32, u32)> {
        match self {
            Self::Guadeloupe => Some((5, 27)),
            Self::Martinique => Some((5, 22)),
            Self::Guyane => Some((6, 10)),
            Self::Reunion => Some((12, 20)),
            Self::Mayotte => Some((4, 27)),
            Self::Metropole | Self::AlsaceMoselle => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Holiday {
    pub date: NaiveDate,
    pub name: &'static str,
}

/// Easter Sunday (anonymous Gregorian computus).
pub fn easter_sunday(year: i32) -> NaiveDate {
    let a = year % 19;
    let b = year / 100;
    let c = year % 100;
    let d = b / 4;
    let e = b % 4;
    let f = (b + 8) / 25;
    let g = (b - f + 1) / 3;
    let h = (19 * a + b - d - g + 15) % 30;
    let i = c / 4;
    let k = c % 4;
    let l = (32 + 2 * e + 2 * i - h - k) % 7;
    let m = (a + 11 * h + 22 * l) / 451;
    let month = (h + l - 7 * m + 114) / 31;
    let day = (h + l - 7 * m + 114) % 31 + 1;
    NaiveDate::from_ymd_opt(year, month as u32, day as u32).unwrap_or(NaiveDate::MIN)
}

const FIXED: [(u32, u32, &str); 8] = [
    (1, 1, "Jour de l'an"),
    (5, 1, "Fête du Travail"),
    (5, 8, "Victoire 1945"),
    (7, 14, "Fête nationale"),
    (8, 15, "Assomption"),
    (11, 1, "Toussaint"),
    (11, 11, "Armistice"),
    (12, 25, "Noël"),
];

/// Public holidays of `year` for `region`, sorted by date.
pub fn holidays_for_year(year: i32, region: CalendarRegion) -> Vec<Holiday> {
    let mut out: Vec<Holiday> = FIXED
        .iter()
        .filter_map(|&(m, d, name)| NaiveDate::from_ymd_opt(year, m, d).map(|date| Holiday { date, name }))
        .collect();

    let easter = easter_sunday(year);
    out.push(Holiday { date: easter + Duration::days(1), name: "Lundi de Pâques" });
    out.push(Holiday { date: easter + Duration::days(39), name: "Ascension" });
    out.push(Holiday { date: easter + Duration::days(50), name: "Lundi de Pentecôte" });

    if region == CalendarRegion::AlsaceMoselle {
        out.push(Holiday { date: easter - Duration::days(2), name: "Vendredi saint" });
        if let Some(date) = NaiveDate::from_ymd_opt(year, 12, 26) {
            out.push(Holiday { date, name: "Saint-Étienne" });
        }
    }
    if let Some((m, d)) = region.abolition_day() {
        if let Some(date) = NaiveDate::from_ymd_opt(year, m, d) {
            out.push(Holiday { date, name: "Abolition de l'esclavage" });
        }
    }

    out.sort_by_key(|h| h.date);
    out
}

pub fn is_holiday(date: NaiveDate, region: CalendarRegion) -> bool {
    holidays_for_year(date.year(), region)
        .iter()
        .any(|h| h.date == date)
}

/// Monday to Friday and not a public holiday.
pub fn is_business_day(date: NaiveDate, region: CalendarRegion) -> bool {
    !matches!(date.weekday(), ChronoWeekday::Sat | ChronoWeekday::Sun) && !is_holiday(date, region)
}

/// Move `n` business days forward (or backward when negative). `n == 0`
/// returns `date` unchanged even if it is not a business day.
pub fn add_business_days(date: NaiveDate, n: i64, region: CalendarRegion) -> NaiveDate {
    let step = if n < 0 { -1 } else { 1 };
    let mut remaining = n.abs();
    let mut current = date;
    while remaining > 0 {
        current += Duration::days(step);
        if is_business_day(current, region) {
            remaining -= 1;
        }
    }
    current
}

/// Business days in the half-open interval `(a, b]`; negative when `b < a`.
pub fn business_days_between(a: NaiveDate, b: NaiveDate, region: CalendarRegion) -> i64 {
    let (start, end, sign) = if a <= b { (a, b, 1) } else { (b, a, -1) };
    let mut count = 0;
    let mut current = start;
    while current < end {
        current += Duration::days(1);
        if is_business_day(current, region) {
            count += 1;
        }
    }
    count * sign
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn easter_matches_known_years() {
        assert_eq!(easter_sunday(2024), d(2024, 3, 31));
        assert_eq!(easter_sunday(2025), d(2025, 4, 20));
        assert_eq!(easter_sunday(2019), d(2019, 4, 21));
    }

    #[test]
    fn metropole_has_eleven_holidays() {
        let holidays = holidays_for_year(2024, CalendarRegion::Metropole);
        assert_eq!(holidays.len(), 11);
        assert!(holidays.iter().any(|h| h.date == d(2024, 5, 9)), "Ascension 2024");
        assert!(holidays.iter().any(|h| h.date == d(2024, 5, 20)), "Whit Monday 2024");
    }

    #[test]
    fn alsace_moselle_adds_good_friday_and_boxing_day() {
        assert!(is_holiday(d(2024, 3, 29), CalendarRegion::AlsaceMoselle));
        assert!(is_holiday(d(2024, 12, 26), CalendarRegion::AlsaceMoselle));
        assert!(!is_holiday(d(2024, 3, 29), CalendarRegion::Metropole));
    }

    #[test]
    fn overseas_regions_add_abolition_day() {
        assert!(is_holiday(d(2024, 5, 27), CalendarRegion::Guadeloupe));
        assert!(is_holiday(d(2024, 12, 20), CalendarRegion::Reunion));
        assert!(!is_holiday(d(2024, 5, 27), CalendarRegion::Martinique));
    }

    #[test]
    fn region_is_derived_from_zip() {
        assert_eq!(CalendarRegion::from_zip("67000"), CalendarRegion::AlsaceMoselle);
        assert_eq!(CalendarRegion::from_zip("97100"), CalendarRegion::Guadeloupe);
        assert_eq!(CalendarRegion::from_zip("97600"), CalendarRegion::Mayotte);
        assert_eq!(CalendarRegion::from_zip("75001"), CalendarRegion::Metropole);
    }

    #[test]
    fn add_business_days_skips_weekends_and_holidays() {
        // Friday 2024-05-31 + 1 -> Monday 2024-06-03
        assert_eq!(add_business_days(d(2024, 5, 31), 1, CalendarRegion::Metropole), d(2024, 6, 3));
        // Tuesday 2024-05-07 + 1 skips 05-08 (holiday) -> 05-09 is Ascension -> 05-10
        assert_eq!(add_business_days(d(2024, 5, 7), 1, CalendarRegion::Metropole), d(2024, 5, 10));
        assert_eq!(add_business_days(d(2024, 6, 3), -1, CalendarRegion::Metropole), d(2024, 5, 31));
    }

    #[test]
    fn business_days_between_is_antisymmetric() {
        let a = d(2024, 6, 3);
        let b = d(2024, 6, 10);
        assert_eq!(business_days_between(a, b, CalendarRegion::Metropole), 5);
        assert_eq!(business_days_between(b, a, CalendarRegion::Metropole), -5);
    }
}

#[cfg(test)]
mod proptest_tests {
    use super::*;

    use proptest::prelude::*;

    fn region() -> impl Strategy<Value = CalendarRegion> {
        prop_oneof![
            Just(CalendarRegion::Metropole),
            Just(CalendarRegion::AlsaceMoselle),
            Just(CalendarRegion::Guadeloupe),
            Just(CalendarRegion::Reunion),
        ]
    }

    fn date() -> impl Strategy<Value = NaiveDate> {
        (0i64..3650).prop_map(|offset| {
            NaiveDate::from_ymd_opt(2020, 1, 1).unwrap() + Duration::days(offset)
        })
    }

    proptest! {
        #[test]
        fn adding_lands_on_a_business_day(from in date(), n in 1i64..40, region in region()) {
            let to = add_business_days(from, n, region);
            prop_assert!(to > from);
            prop_assert!(is_business_day(to, region));
        }

        #[test]
        fn counting_undoes_adding(from in date(), n in 0i64..40, region in region()) {
            let to = add_business_days(from, n, region);
            prop_assert_eq!(business_days_between(from, to, region), n);
        }
    }
}
