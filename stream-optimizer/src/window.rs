//! Fixed-capacity sample windows and the statistics computed over them

use std::collections::VecDeque;

/// Ordered window that evicts its oldest entry once full.
#[derive(Debug, Clone)]
pub struct SlidingWindow<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> SlidingWindow<T> {
    /// Create an empty window. A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append an entry, returning the evicted one if the window was full.
    pub fn push(&mut self, item: T) -> Option<T> {
        let evicted = if self.items.len() == self.capacity {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(item);
        evicted
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Oldest to newest
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator {
        self.items.iter()
    }

    pub fn latest(&self) -> Option<&T> {
        self.items.back()
    }

    /// The `count` most recent entries, oldest first.
    pub fn recent(&self, count: usize) -> impl Iterator<Item = &T> {
        self.span(0, count)
    }

    /// Up to `count` entries ending `skip` entries before the newest, oldest first.
    ///
    /// `span(10, 10)` yields the entries 11 to 20 back from the newest.
    pub fn span(&self, skip: usize, count: usize) -> impl Iterator<Item = &T> {
        let end = self.items.len().saturating_sub(skip);
        let start = end.saturating_sub(count);
        self.items.range(start..end)
    }
}

/// Arithmetic mean, `None` for an empty input
pub fn mean(values: impl IntoIterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values
        .into_iter()
        .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 {
        None
    } else {
        Some(sum / count as f64)
    }
}

/// Population variance, `None` for an empty input
pub fn variance(values: impl IntoIterator<Item = f64>) -> Option<f64> {
    let values: Vec<f64> = values.into_iter().collect();
    let avg = mean(values.iter().copied())?;
    mean(values.iter().map(|v| (v - avg) * (v - avg)))
}
