//! Persistence filter: debounces the per-frame fall signal.
//!
//! A frame qualifies when the predicted label is `Fall` and its fall
//! confidence exceeds the configured minimum. The filter counts consecutive
//! qualifying frames and trips exactly once when the count reaches the
//! threshold. Any non-qualifying frame resets the count and re-arms the trip.

use crate::detect::Prediction;

pub const DEFAULT_PERSISTENCE_THRESHOLD: u32 = 5;
pub const DEFAULT_CONFIDENCE_MINIMUM: f32 = 0.8;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterState {
    /// Counter is zero.
    Idle,
    /// At least one qualifying frame in the current run.
    Accumulating,
}

/// Outcome of one observation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FilterDecision {
    /// Length of the current run of qualifying frames.
    pub counter: u32,
    /// True only on the frame where the run reaches the threshold.
    pub triggered: bool,
    /// True on every frame of a run at or past the threshold.
    pub confirmed: bool,
}

#[derive(Clone, Debug)]
pub struct PersistenceFilter {
    threshold: u32,
    confidence_minimum: f32,
    counter: u32,
}

impl Default for PersistenceFilter {
    fn default() -> Self {
        Self::new(DEFAULT_PERSISTENCE_THRESHOLD, DEFAULT_CONFIDENCE_MINIMUM)
    }
}

impl PersistenceFilter {
    /// A threshold of zero is treated as one.
    pub fn new(threshold: u32, confidence_minimum: f32) -> Self {
        Self {
            threshold: threshold.max(1),
            confidence_minimum,
            counter: 0,
        }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }

    pub fn state(&self) -> FilterState {
        if self.counter == 0 {
            FilterState::Idle
        } else {
            FilterState::Accumulating
        }
    }

    pub fn qualifies(&self, prediction: &Prediction) -> bool {
        prediction.is_fall() && prediction.fall_confidence > self.confidence_minimum
    }

    pub fn observe(&mut self, prediction: &Prediction) -> FilterDecision {
        let qualifying = self.qualifies(prediction);
        self.observe_qualifying(qualifying)
    }

    /// Advance the state machine with an already-evaluated observation.
    pub fn observe_qualifying(&mut self, qualifying: bool) -> FilterDecision {
        if !qualifying {
            self.counter = 0;
            return FilterDecision::default();
        }
        self.counter = self.counter.saturating_add(1);
        FilterDecision {
            counter: self.counter,
            triggered: self.counter == self.threshold,
            confirmed: self.counter >= self.threshold,
        }
    }

    pub fn reset(&mut self) {
        self.counter = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::ClassMapping;

    const F: bool = true;
    const N: bool = false;

    fn trigger_indices(filter: &mut PersistenceFilter, labels: &[bool]) -> Vec<usize> {
        labels
            .iter()
            .enumerate()
            .filter(|&(_, &q)| filter.observe_qualifying(q).triggered)
            .map(|(i, _)| i)
            .collect()
    }

    #[test]
    fn two_episodes_trigger_twice() {
        let mut filter = PersistenceFilter::new(5, 0.8);
        let labels = [F, F, F, F, F, N, F, F, F, F, F];
        assert_eq!(trigger_indices(&mut filter, &labels), vec![4, 10]);
    }

    #[test]
    fn sustained_run_triggers_once() {
        let mut filter = PersistenceFilter::new(5, 0.8);
        let labels = [F; 7];
        assert_eq!(trigger_indices(&mut filter, &labels), vec![4]);
        assert_eq!(filter.counter(), 7);
    }

    #[test]
    fn counter_tracks_trailing_run() {
        let mut filter = PersistenceFilter::new(3, 0.8);
        let labels = [F, F, N, F, N, N, F, F, F, F, N, F];
        let mut run = 0u32;
        for &q in &labels {
            run = if q { run + 1 } else { 0 };
            let decision = filter.observe_qualifying(q);
            assert_eq!(decision.counter, run);
            assert_eq!(filter.counter(), run);
            assert_eq!(decision.confirmed, run >= 3);
        }
    }

    #[test]
    fn short_runs_never_trigger() {
        let mut filter = PersistenceFilter::new(5, 0.8);
        let labels = [F, F, F, F, N, F, F, F, F, N, F];
        assert!(trigger_indices(&mut filter, &labels).is_empty());
    }

    #[test]
    fn state_follows_counter() {
        let mut filter = PersistenceFilter::default();
        assert_eq!(filter.state(), FilterState::Idle);
        filter.observe_qualifying(true);
        assert_eq!(filter.state(), FilterState::Accumulating);
        filter.observe_qualifying(false);
        assert_eq!(filter.state(), FilterState::Idle);
    }

    #[test]
    fn threshold_of_one_triggers_every_fresh_run() {
        let mut filter = PersistenceFilter::new(1, 0.8);
        let labels = [F, F, N, F];
        assert_eq!(trigger_indices(&mut filter, &labels), vec![0, 3]);
    }

    #[test]
    fn low_confidence_fall_does_not_qualify() {
        let mapping = ClassMapping::default();
        let mut filter = PersistenceFilter::new(2, 0.8);

        // score 0.3 → Fall at 0.7 confidence, below the minimum.
        let weak = mapping.predict(0.3).unwrap();
        assert!(weak.is_fall());
        assert!(!filter.qualifies(&weak));

        let strong = mapping.predict(0.05).unwrap();
        filter.observe(&strong);
        let decision = filter.observe(&weak);
        assert_eq!(decision.counter, 0);
        assert_eq!(filter.state(), FilterState::Idle);
    }

    #[test]
    fn confidence_minimum_is_exclusive() {
        let mapping = ClassMapping::with_fall_index(1).unwrap();
        let filter = PersistenceFilter::new(5, 0.8);
        assert!(!filter.qualifies(&mapping.predict(0.8).unwrap()));
        assert!(filter.qualifies(&mapping.predict(0.81).unwrap()));
    }
}
