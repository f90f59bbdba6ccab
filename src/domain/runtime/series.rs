//! Backing storage for one time series.
//!
//! Values are stored chronologically; index 0 in script notation is the
//! newest value, so `get(k)` reads `k` bars back from the end. After each
//! bar the scheduler calls `shift`, which appends a copy of the current
//! value: a variable nobody writes on the next bar keeps its last value.

use crate::domain::value::Value;

#[derive(Debug, Clone, Default)]
pub struct Series {
    values: Vec<Value>,
}

impl Series {
    pub fn new() -> Self {
        Series { values: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Read `k` bars back from the newest value. Out of range is NA.
    pub fn get(&self, k: usize) -> Value {
        if k >= self.values.len() {
            return Value::Na;
        }
        self.values[self.values.len() - 1 - k].clone()
    }

    /// Chronological access: `at(0)` is the oldest value.
    pub fn at(&self, j: usize) -> Value {
        self.values.get(j).cloned().unwrap_or(Value::Na)
    }

    pub fn current(&self) -> Value {
        self.get(0)
    }

    /// Overwrite the current-bar value.
    pub fn set_current(&mut self, value: Value) {
        if let Some(last) = self.values.last_mut() {
            *last = value;
        } else {
            self.values.push(value);
        }
    }

    pub fn push(&mut self, value: Value) {
        self.values.push(value);
    }

    /// Advance to the next bar, carrying the current value forward.
    pub fn shift(&mut self) {
        let carried = self.values.last().cloned().unwrap_or(Value::Na);
        self.values.push(carried);
    }

    /// Drop the newest value. Used when a live bar is revised and must be
    /// reprocessed.
    pub fn pop(&mut self) {
        self.values.pop();
    }

    /// Undo the newest bar: drop its value and restore the carried copy of
    /// the bar before it, leaving the series as if `shift` had just run.
    pub fn rewind(&mut self) {
        self.pop();
        let carried = self.get(1);
        self.set_current(carried);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Value> {
        self.values.iter()
    }

    pub fn to_vec(&self) -> Vec<Value> {
        self.values.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_reads_back_from_newest() {
        let mut s = Series::new();
        s.push(Value::Num(1.0));
        s.push(Value::Num(2.0));
        s.push(Value::Num(3.0));
        assert_eq!(s.get(0), Value::Num(3.0));
        assert_eq!(s.get(2), Value::Num(1.0));
        assert_eq!(s.get(3), Value::Na);
    }

    #[test]
    fn shift_carries_last_value_forward() {
        let mut s = Series::new();
        s.push(Value::Num(5.0));
        s.shift();
        assert_eq!(s.len(), 2);
        assert_eq!(s.get(0), Value::Num(5.0));
        assert_eq!(s.get(1), Value::Num(5.0));
    }

    #[test]
    fn rewind_restores_the_carried_value() {
        // Bar 0 writes 1, shift carries it, bar 1 overwrites with 2, shift.
        let mut s = Series::new();
        s.push(Value::Num(1.0));
        s.shift();
        s.set_current(Value::Num(2.0));
        s.shift();
        s.rewind();
        assert_eq!(s.len(), 2);
        assert_eq!(s.get(0), Value::Num(1.0));
        assert_eq!(s.get(1), Value::Num(1.0));
    }

    #[test]
    fn set_current_overwrites_newest() {
        let mut s = Series::new();
        s.push(Value::Num(1.0));
        s.shift();
        s.set_current(Value::Num(9.0));
        assert_eq!(s.get(0), Value::Num(9.0));
        assert_eq!(s.get(1), Value::Num(1.0));
    }

    #[test]
    fn empty_series_reads_na() {
        let s = Series::new();
        assert_eq!(s.current(), Value::Na);
        assert_eq!(s.at(0), Value::Na);
    }
}
