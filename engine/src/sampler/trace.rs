//! Append-only record of retained sweeps.

use serde::{Deserialize, Serialize};

/// One row per retained sweep, columns in `ParameterLayout` order, plus the
/// log joint density of each retained state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    width: usize,
    draws: Vec<Vec<f64>>,
    log_density: Vec<f64>,
}

impl Trace {
    pub fn new(width: usize) -> Self {
        Self {
            width,
            draws: Vec::new(),
            log_density: Vec::new(),
        }
    }

    pub fn with_capacity(width: usize, rows: usize) -> Self {
        Self {
            width,
            draws: Vec::with_capacity(rows),
            log_density: Vec::with_capacity(rows),
        }
    }

    pub fn push(&mut self, row: Vec<f64>, log_density: f64) {
        debug_assert_eq!(row.len(), self.width);
        self.draws.push(row);
        self.log_density.push(log_density);
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn len(&self) -> usize {
        self.draws.len()
    }

    pub fn is_empty(&self) -> bool {
        self.draws.is_empty()
    }

    pub fn draws(&self) -> &[Vec<f64>] {
        &self.draws
    }

    pub fn log_density(&self) -> &[f64] {
        &self.log_density
    }

    /// All retained values of one column.
    pub fn column(&self, index: usize) -> Vec<f64> {
        self.draws.iter().map(|row| row[index]).collect()
    }

    /// Keep only the first `rows` draws.
    pub fn truncate(&mut self, rows: usize) {
        self.draws.truncate(rows);
        self.log_density.truncate(rows);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_and_column() {
        let mut trace = Trace::new(2);
        trace.push(vec![1.0, 2.0], -3.0);
        trace.push(vec![1.5, 2.5], -2.0);
        assert_eq!(trace.len(), 2);
        assert_eq!(trace.column(1), vec![2.0, 2.5]);
        assert_eq!(trace.log_density(), &[-3.0, -2.0]);
        trace.truncate(1);
        assert_eq!(trace.len(), 1);
        assert_eq!(trace.log_density().len(), 1);
    }
}
