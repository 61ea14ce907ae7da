//! Property tests for date normalization.
//!
//! For every supported format pattern, formatting an arbitrary valid date
//! and normalizing it back must reproduce the date exactly; text matching
//! no pattern must return exactly the fallback.

use chrono::NaiveDate;
use proptest::prelude::*;
use regharvest_core::dates::normalize_date;

/// Union of the format lists the three adapters use.
const ALL_FORMATS: &[&str] = &[
    "%b %d, %Y",
    "%B %d, %Y",
    "%d-%m-%Y",
    "%d/%m/%Y",
    "%Y-%m-%d",
    "%d %b %Y",
    "%d %B %Y",
    "%m/%d/%Y",
    "%d-%b-%Y",
    "%d-%B-%Y",
];

fn arb_date() -> impl Strategy<Value = NaiveDate> {
    (2000i32..2035, 1u32..=12, 1u32..=28)
        .prop_map(|(y, m, d)| NaiveDate::from_ymd_opt(y, m, d).unwrap())
}

proptest! {
    #[test]
    fn every_format_round_trips(date in arb_date()) {
        let fallback = NaiveDate::from_ymd_opt(1999, 1, 1).unwrap();
        for format in ALL_FORMATS {
            let rendered = date.format(format).to_string();
            let normalized = normalize_date(&rendered, &[format], fallback);
            prop_assert_eq!(normalized, date, "format {} rendered {}", format, rendered);
        }
    }

    #[test]
    fn compact_form_round_trips(date in arb_date()) {
        let fallback = NaiveDate::from_ymd_opt(1999, 1, 1).unwrap();
        let rendered = date.format("%Y%m%d").to_string();
        // no format list needed: the 8-digit special case catches it
        prop_assert_eq!(normalize_date(&rendered, &[], fallback), date);
    }

    #[test]
    fn digitless_text_returns_exactly_the_fallback(
        text in "[a-zA-Z ,/-]{0,24}",
        fallback in arb_date(),
    ) {
        prop_assert_eq!(normalize_date(&text, ALL_FORMATS, fallback), fallback);
    }
}
