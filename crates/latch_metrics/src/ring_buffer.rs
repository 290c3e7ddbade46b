//! Ring buffer for rolling averages

use std::time::Duration;

/// Fixed-capacity buffer that evicts the oldest sample once full.
///
/// Iteration always runs oldest to newest regardless of where the write
/// cursor currently sits.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    samples: Vec<T>,
    capacity: usize,
    index: usize,
}

impl<T: Clone> RingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: Vec::with_capacity(capacity),
            capacity,
            index: 0,
        }
    }

    pub fn push(&mut self, sample: T) {
        if self.samples.len() < self.capacity {
            self.samples.push(sample);
        } else {
            self.samples[self.index] = sample;
        }
        self.index = (self.index + 1) % self.capacity;
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.samples.clear();
        self.index = 0;
    }

    /// Samples in insertion order, oldest first.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + '_ {
        // Once full, `index` points at the oldest slot.
        let split = if self.samples.len() < self.capacity {
            0
        } else {
            self.index
        };
        let (newer, older) = self.samples.split_at(split);
        older.iter().chain(newer.iter())
    }

    /// Most recently pushed sample.
    pub fn latest(&self) -> Option<&T> {
        self.iter().next_back()
    }

    /// Up to `count` most recent samples, oldest first.
    pub fn tail(&self, count: usize) -> Vec<T> {
        let skip = self.samples.len().saturating_sub(count);
        self.iter().skip(skip).cloned().collect()
    }

    /// Copy of the contents, oldest first.
    pub fn to_vec(&self) -> Vec<T> {
        self.iter().cloned().collect()
    }
}

// Specialize for Duration (common case)
impl RingBuffer<Duration> {
    pub fn average(&self) -> Duration {
        if self.samples.is_empty() {
            return Duration::ZERO;
        }

        let sum: Duration = self.samples.iter().sum();
        sum / self.samples.len() as u32
    }

    /// Average of the `count` most recent samples.
    pub fn tail_average(&self, count: usize) -> Duration {
        let tail = self.tail(count);
        if tail.is_empty() {
            return Duration::ZERO;
        }
        let sum: Duration = tail.iter().sum();
        sum / tail.len() as u32
    }

    pub fn min_max(&self) -> (Duration, Duration) {
        let min = self.samples.iter().min().copied().unwrap_or(Duration::ZERO);
        let max = self.samples.iter().max().copied().unwrap_or(Duration::ZERO);
        (min, max)
    }
}

// Specialize for f64
impl RingBuffer<f64> {
    pub fn average(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }

        let sum: f64 = self.samples.iter().sum();
        sum / self.samples.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_buffer() {
        let mut buffer = RingBuffer::new(3);

        buffer.push(Duration::from_millis(10));
        assert_eq!(buffer.average(), Duration::from_millis(10));

        buffer.push(Duration::from_millis(20));
        assert_eq!(buffer.average(), Duration::from_millis(15));

        buffer.push(Duration::from_millis(30));
        assert_eq!(buffer.average(), Duration::from_millis(20));

        // Should wrap around
        buffer.push(Duration::from_millis(40));
        assert_eq!(buffer.average(), Duration::from_millis(30)); // (20 + 30 + 40) / 3
    }

    #[test]
    fn test_iteration_is_oldest_first_after_wrap() {
        let mut buffer = RingBuffer::new(3);
        for value in 1..=5u32 {
            buffer.push(value);
        }

        let ordered: Vec<u32> = buffer.iter().copied().collect();
        assert_eq!(ordered, vec![3, 4, 5]);
        assert_eq!(buffer.latest(), Some(&5));
        assert_eq!(buffer.tail(2), vec![4, 5]);
        assert_eq!(buffer.len(), 3);
    }

    #[test]
    fn test_tail_average_uses_most_recent_samples() {
        let mut buffer = RingBuffer::new(4);
        buffer.push(Duration::from_millis(100));
        buffer.push(Duration::from_millis(10));
        buffer.push(Duration::from_millis(20));

        assert_eq!(buffer.tail_average(2), Duration::from_millis(15));
        assert_eq!(buffer.tail_average(10), buffer.average());
    }

    #[test]
    fn test_clear_resets_cursor() {
        let mut buffer = RingBuffer::new(2);
        buffer.push(1.0);
        buffer.push(2.0);
        buffer.push(3.0);
        buffer.clear();
        assert!(buffer.is_empty());

        buffer.push(7.0);
        assert_eq!(buffer.to_vec(), vec![7.0]);
        assert_eq!(buffer.average(), 7.0);
    }
}
