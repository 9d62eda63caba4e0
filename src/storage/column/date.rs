//! Date column partition
//!
//! Stores the compact day-number encoding. When the column is the configured
//! sort date, the chunks of the owning partition are each internally sorted
//! by it, which lets range filters compile to contiguous id ranges.

use crate::common::Date;

#[derive(Debug, Default)]
pub struct DateColumnPartition {
    values: Vec<Date>,
    is_sorted: bool,
}

impl DateColumnPartition {
    pub fn new(is_sorted: bool) -> Self {
        Self {
            values: Vec::new(),
            is_sorted,
        }
    }

    pub fn from_values(values: Vec<Date>, is_sorted: bool) -> Self {
        Self { values, is_sorted }
    }

    pub fn insert(&mut self, value: Date) {
        self.values.push(value);
    }

    pub fn insert_null(&mut self) {
        self.values.push(Date::NULL);
    }

    pub fn values(&self) -> &[Date] {
        &self.values
    }

    /// Whether every chunk of the owning partition is sorted by this column
    pub fn is_sorted(&self) -> bool {
        self.is_sorted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_read() {
        let mut column = DateColumnPartition::new(true);
        column.insert(Date::parse("2021-01-01").unwrap());
        column.insert_null();
        assert_eq!(column.values().len(), 2);
        assert!(column.values()[1].is_null());
        assert!(column.is_sorted());
    }
}
