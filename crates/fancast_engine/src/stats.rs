//! Bounded latency sample windows and percentile math.

use std::collections::VecDeque;

/// A fixed-capacity ring of recent samples (milliseconds). Pushing beyond
/// capacity evicts the oldest sample.
#[derive(Debug)]
pub struct SampleWindow {
    cap: usize,
    values: VecDeque<f64>,
}

impl SampleWindow {
    pub fn new(cap: usize) -> Self {
        Self {
            cap,
            values: VecDeque::with_capacity(cap),
        }
    }

    pub fn push(&mut self, value: f64) {
        if self.values.len() == self.cap {
            self.values.pop_front();
        }
        self.values.push_back(value);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn mean(&self) -> Option<f64> {
        if self.values.is_empty() {
            return None;
        }
        Some(self.values.iter().sum::<f64>() / self.values.len() as f64)
    }

    /// Remove and return everything collected so far.
    pub fn drain(&mut self) -> Vec<f64> {
        self.values.drain(..).collect()
    }
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Sorts the buffer and returns the element at `floor(p * len)`, clamped to
/// the last element. Empty buffers have no percentile.
pub fn percentile(values: &mut [f64], p: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let idx = ((p * values.len() as f64).floor() as usize).min(values.len() - 1);
    Some(values[idx])
}
