// Latest-value slot shared between a producer and one consumer thread.
//
// High-rate samples (car data, telemetry) must never queue up: if the
// consumer has not picked up the previous value yet, the new one replaces
// it. `replace` reports whether the slot was empty so the producer only
// wakes the consumer once per pending value.

use std::sync::{Arc, Mutex, MutexGuard};

pub struct LatestValue<T> {
    slot: Arc<Mutex<Option<T>>>,
}

impl<T> Clone for LatestValue<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T> Default for LatestValue<T> {
    fn default() -> Self {
        Self {
            slot: Arc::new(Mutex::new(None)),
        }
    }
}

impl<T> LatestValue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value`, dropping any unconsumed older one. Returns `true` if
    /// the slot was empty, i.e. the consumer needs a wake-up.
    pub fn replace(&self, value: T) -> bool {
        self.lock().replace(value).is_none()
    }

    pub fn take(&self) -> Option<T> {
        self.lock().take()
    }

    /// Take the value only if `pred` accepts it; otherwise leave it in place.
    pub fn take_if(&self, pred: impl FnOnce(&T) -> bool) -> Option<T> {
        self.lock().take_if(|value| pred(value))
    }

    // A panic while holding the lock cannot leave a half-written Option.
    fn lock(&self) -> MutexGuard<'_, Option<T>> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn newer_value_replaces_unconsumed() {
        let slot = LatestValue::new();
        assert!(slot.replace(1));
        assert!(!slot.replace(2));
        assert_eq!(slot.take(), Some(2));
        assert_eq!(slot.take(), None);
    }

    #[test]
    fn wakes_again_after_take() {
        let slot = LatestValue::new();
        assert!(slot.replace("a"));
        assert_eq!(slot.take(), Some("a"));
        assert!(slot.replace("b"));
    }

    #[test]
    fn take_if_leaves_rejected_value() {
        let slot = LatestValue::new();
        slot.replace((1, "old"));
        slot.replace((2, "new"));
        assert_eq!(slot.take_if(|(seq, _)| *seq == 1), None);
        assert_eq!(slot.take_if(|(seq, _)| *seq == 2), Some((2, "new")));
        assert_eq!(slot.take(), None);
    }

    #[test]
    fn clones_share_the_slot() {
        let producer = LatestValue::new();
        let consumer = producer.clone();
        let handle = thread::spawn(move || {
            for i in 0..100 {
                producer.replace(i);
            }
        });
        handle.join().unwrap();
        assert_eq!(consumer.take(), Some(99));
    }
}
