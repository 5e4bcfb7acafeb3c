use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::error::{LogError, Result};

/// How many items a [`RingBuffer`] may hold.
///
/// `Bounded(0)` disables the buffer entirely. `Unbounded` keeps everything and
/// grows without limit over a long run, so it has to be asked for explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capacity {
    Bounded(usize),
    Unbounded,
}

impl Capacity {
    /// Returns true when nothing will ever be stored.
    pub fn is_disabled(&self) -> bool {
        matches!(self, Capacity::Bounded(0))
    }
}

/// Fixed-capacity, insertion-ordered store that evicts its oldest item.
///
/// Used both for the logger's retention window and for the broadcast hub's
/// replay backlog.
///
/// # Examples
///
/// ```
/// # use exp_logger::ring_buffer::{Capacity, RingBuffer};
/// let mut buf = RingBuffer::new(Capacity::Bounded(2));
/// buf.push(0);
/// buf.push(1);
/// assert_eq!(buf.push(2), Some(0));
/// assert_eq!(*buf.get(-1).unwrap(), 2);
/// assert_eq!(*buf.get(0).unwrap(), 1);
/// assert!(buf.get(-3).is_err());
/// ```
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    items: VecDeque<T>,
    capacity: Capacity,
}

impl<T> RingBuffer<T> {
    pub fn new(capacity: Capacity) -> Self {
        let items = match capacity {
            Capacity::Bounded(n) => VecDeque::with_capacity(n.min(4096)),
            Capacity::Unbounded => VecDeque::new(),
        };
        Self { items, capacity }
    }

    /// Appends `item`, evicting and returning the oldest item on overflow.
    ///
    /// In disabled mode the item itself is handed back unstored.
    pub fn push(&mut self, item: T) -> Option<T> {
        match self.capacity {
            Capacity::Bounded(0) => Some(item),
            Capacity::Bounded(n) => {
                let evicted = if self.items.len() >= n {
                    self.items.pop_front()
                } else {
                    None
                };
                self.items.push_back(item);
                evicted
            }
            Capacity::Unbounded => {
                self.items.push_back(item);
                None
            }
        }
    }

    /// Returns the item at `index`; negative indices count from the newest.
    pub fn get(&self, index: isize) -> Result<&T> {
        let len = self.items.len();
        let position = if index < 0 {
            len.checked_sub(index.unsigned_abs())
        } else {
            Some(index as usize).filter(|&i| i < len)
        };
        position
            .and_then(|i| self.items.get(i))
            .ok_or(LogError::OutOfRange { index, len })
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> Capacity {
        self.capacity
    }

    /// Newest item, if any.
    pub fn back(&self) -> Option<&T> {
        self.items.back()
    }

    /// Iterates oldest first.
    pub fn iter(&self) -> impl ExactSizeIterator<Item = &T> + DoubleEndedIterator + '_ {
        self.items.iter()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length_is_min_of_pushes_and_capacity() {
        for cap in 1..6usize {
            for n in 0..12usize {
                let mut buf = RingBuffer::new(Capacity::Bounded(cap));
                for i in 0..n {
                    buf.push(i);
                }
                assert_eq!(buf.len(), n.min(cap));
                if n > 0 {
                    assert_eq!(*buf.get(-1).unwrap(), n - 1);
                    let oldest = n.saturating_sub(cap);
                    assert_eq!(*buf.get(0).unwrap(), oldest);
                    assert_eq!(*buf.get(-(buf.len() as isize)).unwrap(), oldest);
                }
            }
        }
    }

    #[test]
    fn test_out_of_range_reports_index_and_len() {
        let mut buf = RingBuffer::new(Capacity::Bounded(3));
        buf.push("a");
        buf.push("b");
        match buf.get(2) {
            Err(LogError::OutOfRange { index, len }) => {
                assert_eq!(index, 2);
                assert_eq!(len, 2);
            }
            other => panic!("expected OutOfRange, got {:?}", other),
        }
        assert!(buf.get(-3).is_err());
        assert!(buf.get(isize::MIN).is_err());
    }

    #[test]
    fn test_disabled_buffer_stores_nothing() {
        let mut buf = RingBuffer::new(Capacity::Bounded(0));
        assert!(buf.capacity().is_disabled());
        assert_eq!(buf.push(7), Some(7));
        assert!(buf.is_empty());
        assert!(buf.get(0).is_err());
        assert!(buf.get(-1).is_err());
    }

    #[test]
    fn test_unbounded_keeps_everything() {
        let mut buf = RingBuffer::new(Capacity::Unbounded);
        for i in 0..10_000 {
            assert_eq!(buf.push(i), None);
        }
        assert_eq!(buf.len(), 10_000);
        assert_eq!(*buf.get(0).unwrap(), 0);
        assert_eq!(buf.iter().rev().next(), Some(&9_999));
    }

    #[test]
    fn test_capacity_serde_forms() {
        let bounded: Capacity = serde_json::from_str(r#"{"bounded":5}"#).unwrap();
        assert_eq!(bounded, Capacity::Bounded(5));
        let unbounded: Capacity = serde_json::from_str(r#""unbounded""#).unwrap();
        assert_eq!(unbounded, Capacity::Unbounded);
    }
}
