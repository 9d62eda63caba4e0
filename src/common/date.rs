//! Compact date representation
//!
//! A date is the day number since the common era packed into a `u32`; zero is
//! the null sentinel. The encoding is order-preserving, so range predicates
//! and tuple comparison work on the raw value.

use chrono::{Datelike, NaiveDate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Date(pub u32);

impl Date {
    pub const NULL: Date = Date(0);

    /// Parse a `YYYY-MM-DD` string. Returns `None` for malformed input.
    pub fn parse(text: &str) -> Option<Date> {
        let date = NaiveDate::parse_from_str(text, "%Y-%m-%d").ok()?;
        let days = date.num_days_from_ce();
        if days <= 0 {
            return None;
        }
        Some(Date(days as u32))
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Render as `YYYY-MM-DD`; null dates render as `None`.
    pub fn format(self) -> Option<String> {
        if self.is_null() {
            return None;
        }
        let date = NaiveDate::from_num_days_from_ce_opt(self.0 as i32)?;
        Some(date.format("%Y-%m-%d").to_string())
    }

    pub const fn to_le_bytes(self) -> [u8; 4] {
        self.0.to_le_bytes()
    }

    pub const fn from_le_bytes(bytes: [u8; 4]) -> Date {
        Date(u32::from_le_bytes(bytes))
    }
}
