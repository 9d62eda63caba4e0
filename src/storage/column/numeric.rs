//! Int, float and bool column partitions
//!
//! Nulls are in-band: `i32::MIN` for ints, NaN for floats, the tri-state
//! byte for bools. No bitmap index is kept for these kinds; filters over
//! them compile to predicate selections.

use crate::common::OptionalBool;

use super::INT_NULL;

#[derive(Debug, Default)]
pub struct IntColumnPartition {
    values: Vec<i32>,
}

impl IntColumnPartition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_values(values: Vec<i32>) -> Self {
        Self { values }
    }

    pub fn insert(&mut self, value: i32) {
        self.values.push(value);
    }

    pub fn insert_null(&mut self) {
        self.values.push(INT_NULL);
    }

    pub fn values(&self) -> &[i32] {
        &self.values
    }
}

#[derive(Debug, Default)]
pub struct FloatColumnPartition {
    values: Vec<f64>,
}

impl FloatColumnPartition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_values(values: Vec<f64>) -> Self {
        Self { values }
    }

    pub fn insert(&mut self, value: f64) {
        self.values.push(value);
    }

    pub fn insert_null(&mut self) {
        self.values.push(f64::NAN);
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }
}

#[derive(Debug, Default)]
pub struct BoolColumnPartition {
    values: Vec<OptionalBool>,
}

impl BoolColumnPartition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, value: bool) {
        self.values.push(OptionalBool::new(value));
    }

    pub fn insert_null(&mut self) {
        self.values.push(OptionalBool::NULL_VALUE);
    }

    pub fn values(&self) -> &[OptionalBool] {
        &self.values
    }
}
