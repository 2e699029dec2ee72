//! Windowed step-size adaptation.

use crate::config::AcceptanceBand;

/// Proposal scale of one scalar parameter, tuned during warm-up from the
/// acceptance rate of each window.
#[derive(Debug, Clone, PartialEq)]
pub struct StepAdapter {
    step: f64,
    min_step: f64,
    max_step: f64,
    window_proposed: u32,
    window_accepted: u32,
}

impl StepAdapter {
    pub fn new(initial: f64, min_step: f64, max_step: f64) -> Self {
        Self {
            step: initial.clamp(min_step, max_step),
            min_step,
            max_step,
            window_proposed: 0,
            window_accepted: 0,
        }
    }

    /// Random-walk scale for a parameter living on [a, b].
    pub fn for_location(width: f64) -> Self {
        Self::new(0.05 * width, 1e-6 * width, width)
    }

    /// Scale for a log-space random walk.
    pub fn for_log_scale() -> Self {
        Self::new(0.5, 1e-4, 5.0)
    }

    pub fn step(&self) -> f64 {
        self.step
    }

    pub fn record(&mut self, accepted: bool) {
        self.window_proposed += 1;
        if accepted {
            self.window_accepted += 1;
        }
    }

    /// Close the current window: outside the band the log step moves by
    /// 2·(rate − midpoint). Returns the window's acceptance rate.
    pub fn end_window(&mut self, band: &AcceptanceBand) -> Option<f64> {
        if self.window_proposed == 0 {
            return None;
        }
        let rate = f64::from(self.window_accepted) / f64::from(self.window_proposed);
        if !band.contains(rate) {
            let scaled = self.step * (2.0 * (rate - band.midpoint())).exp();
            self.step = scaled.clamp(self.min_step, self.max_step);
        }
        self.window_proposed = 0;
        self.window_accepted = 0;
        Some(rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_window(adapter: &mut StepAdapter, accepted: u32, total: u32) -> Option<f64> {
        for i in 0..total {
            adapter.record(i < accepted);
        }
        adapter.end_window(&AcceptanceBand::default())
    }

    #[test]
    fn test_low_acceptance_shrinks_step() {
        let mut adapter = StepAdapter::for_location(9.0);
        let before = adapter.step();
        assert_eq!(run_window(&mut adapter, 1, 25), Some(0.04));
        assert!(adapter.step() < before);
        assert!((adapter.step() - before * (2.0f64 * (0.04 - 0.45)).exp()).abs() < 1e-12);
    }

    #[test]
    fn test_high_acceptance_grows_step() {
        let mut adapter = StepAdapter::for_log_scale();
        run_window(&mut adapter, 25, 25);
        assert!(adapter.step() > 0.5);
    }

    #[test]
    fn test_rate_inside_band_keeps_step() {
        let mut adapter = StepAdapter::for_log_scale();
        run_window(&mut adapter, 12, 25);
        assert_eq!(adapter.step(), 0.5);
    }

    #[test]
    fn test_step_is_clamped() {
        let mut adapter = StepAdapter::new(1e-4, 1e-4, 5.0);
        for _ in 0..50 {
            run_window(&mut adapter, 0, 25);
        }
        assert_eq!(adapter.step(), 1e-4);
    }

    #[test]
    fn test_empty_window() {
        let mut adapter = StepAdapter::for_log_scale();
        assert_eq!(adapter.end_window(&AcceptanceBand::default()), None);
    }
}
