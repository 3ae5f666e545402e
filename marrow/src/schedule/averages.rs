//! Moving averages driving the Glucose restart policy.
use std::collections::VecDeque;

/// Average over the most recent `window` terms.
///
/// The value is only meaningful once the window is covered.
pub struct SimpleMovingAverage {
    window: usize,
    sum: u64,
    values: VecDeque<u64>,
}

impl SimpleMovingAverage {
    pub fn new(window: usize) -> SimpleMovingAverage {
        SimpleMovingAverage {
            window,
            sum: 0,
            values: VecDeque::with_capacity(window + 1),
        }
    }

    pub fn add_term(&mut self, term: u64) {
        debug_assert!(self.values.len() <= self.window);
        self.values.push_back(term);
        self.sum += term;
        if self.values.len() > self.window {
            self.sum -= self.values.pop_front().unwrap();
        }
    }

    pub fn reset(&mut self) {
        self.sum = 0;
        self.values.clear();
    }

    /// Whether enough terms were added to cover the window.
    pub fn is_covered(&self) -> bool {
        self.values.len() == self.window
    }

    pub fn value(&self) -> f64 {
        debug_assert!(self.is_covered());
        self.sum as f64 / self.window as f64
    }
}

/// Average over all terms ever added.
#[derive(Default)]
pub struct CumulativeMovingAverage {
    sum: u64,
    count: u64,
}

impl CumulativeMovingAverage {
    pub fn add_term(&mut self, term: u64) {
        self.sum += term;
        self.count += 1;
    }

    pub fn value(&self) -> f64 {
        self.sum as f64 / self.count as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn windowed_average() {
        let mut average = SimpleMovingAverage::new(3);
        assert!(!average.is_covered());

        average.add_term(3);
        average.add_term(6);
        assert!(!average.is_covered());

        average.add_term(9);
        assert!(average.is_covered());
        assert_eq!(average.value(), 6.0);

        average.add_term(12);
        assert!(average.is_covered());
        assert_eq!(average.value(), 9.0);

        average.reset();
        assert!(!average.is_covered());
    }

    #[test]
    fn cumulative_average() {
        let mut average = CumulativeMovingAverage::default();
        average.add_term(4);
        average.add_term(8);
        assert_eq!(average.value(), 6.0);
    }
}
