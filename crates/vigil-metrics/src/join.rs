//! Exactly-once scatter-gather join
//!
//! A [`PendingJoin`] holds a partially built value, a count of outstanding
//! contributions and a continuation. Each contribution mutates the value and
//! decrements the count; the continuation receives the value once, when the
//! count reaches zero. A failure short-circuits the join and delivers the
//! error instead. Whatever arrives after delivery is ignored.

use std::sync::atomic::{AtomicIsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;
use vigil_core::{Result, VigilError};

type Continuation<T> = Box<dyn FnOnce(Result<T>) + Send + 'static>;

struct Slot<T> {
    value: Option<T>,
    continuation: Option<Continuation<T>>,
}

/// Join over `outstanding` asynchronous contributions
pub struct PendingJoin<T> {
    remaining: AtomicIsize,
    slot: Mutex<Slot<T>>,
}

impl<T: Send + 'static> PendingJoin<T> {
    /// Create a join that delivers `value` to `continuation` after
    /// `outstanding` calls to [`complete_one`](Self::complete_one).
    ///
    /// With zero outstanding contributions nothing is delivered until
    /// [`seal`](Self::seal) is called.
    pub fn new<F>(outstanding: usize, value: T, continuation: F) -> Arc<Self>
    where
        F: FnOnce(Result<T>) + Send + 'static,
    {
        Arc::new(Self {
            remaining: AtomicIsize::new(outstanding as isize),
            slot: Mutex::new(Slot {
                value: Some(value),
                continuation: Some(Box::new(continuation)),
            }),
        })
    }

    /// Contributions still expected
    pub fn remaining(&self) -> isize {
        self.remaining.load(Ordering::Acquire)
    }

    /// Whether the continuation has already run
    pub fn is_delivered(&self) -> bool {
        self.slot
            .lock()
            .map(|slot| slot.continuation.is_none())
            .unwrap_or(true)
    }

    /// Apply one contribution and count it down.
    ///
    /// Returns `true` when this call delivered the value.
    pub fn complete_one<F>(&self, contribute: F) -> bool
    where
        F: FnOnce(&mut T),
    {
        {
            let mut slot = match self.slot.lock() {
                Ok(slot) => slot,
                Err(_) => return false,
            };
            match slot.value.as_mut() {
                Some(value) => contribute(value),
                None => return false,
            }
        }

        if self.remaining.fetch_sub(1, Ordering::AcqRel) <= 1 {
            return self.deliver(None);
        }
        false
    }

    /// Fail the whole join. Returns `true` when this call delivered the error.
    pub fn fail(&self, error: VigilError) -> bool {
        self.deliver(Some(error))
    }

    /// Deliver now if no contributions are outstanding
    pub fn seal(&self) -> bool {
        if self.remaining() <= 0 {
            return self.deliver(None);
        }
        false
    }

    fn deliver(&self, error: Option<VigilError>) -> bool {
        // Taking the continuation under the lock is what makes delivery
        // exactly-once; it runs after the lock is released.
        let (value, continuation) = match self.slot.lock() {
            Ok(mut slot) => match slot.continuation.take() {
                Some(continuation) => (slot.value.take(), continuation),
                None => return false,
            },
            Err(_) => return false,
        };

        let outcome = match (error, value) {
            (Some(error), _) => Err(error),
            (None, Some(value)) => Ok(value),
            (None, None) => Err(VigilError::Sampling(
                "join value missing at delivery".to_string(),
            )),
        };
        debug!("Join delivered (ok: {})", outcome.is_ok());
        continuation(outcome);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_join(k: usize) -> (Arc<PendingJoin<Vec<usize>>>, Arc<AtomicUsize>, Arc<Mutex<Option<Result<Vec<usize>>>>>) {
        let fired = Arc::new(AtomicUsize::new(0));
        let received = Arc::new(Mutex::new(None));
        let join = {
            let fired = fired.clone();
            let received = received.clone();
            PendingJoin::new(k, Vec::new(), move |result| {
                fired.fetch_add(1, Ordering::SeqCst);
                *received.lock().unwrap() = Some(result);
            })
        };
        (join, fired, received)
    }

    #[test]
    fn test_delivers_after_last_contribution() {
        let (join, fired, received) = counting_join(3);

        assert!(!join.complete_one(|v| v.push(2)));
        assert!(!join.complete_one(|v| v.push(0)));
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        assert!(join.complete_one(|v| v.push(1)));
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        let mut value = received.lock().unwrap().take().unwrap().unwrap();
        value.sort();
        assert_eq!(value, vec![0, 1, 2]);
    }

    #[test]
    fn test_late_contribution_is_ignored() {
        let (join, fired, _) = counting_join(1);
        assert!(join.complete_one(|v| v.push(1)));
        assert!(!join.complete_one(|v| v.push(2)));
        assert!(!join.seal());
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(join.remaining(), 0);
    }

    #[test]
    fn test_failure_delivers_error_once() {
        let (join, fired, received) = counting_join(2);
        assert!(join.fail(VigilError::Provider("boom".to_string())));
        assert!(!join.fail(VigilError::Provider("again".to_string())));
        assert!(!join.complete_one(|v| v.push(1)));
        assert!(!join.complete_one(|v| v.push(2)));

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(received.lock().unwrap().take().unwrap().is_err());
    }

    #[test]
    fn test_zero_outstanding_needs_seal() {
        let (join, fired, _) = counting_join(0);
        assert!(!join.is_delivered());
        assert!(join.seal());
        assert!(join.is_delivered());
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_concurrent_completion_fires_once() {
        for k in 1..=8 {
            for _round in 0..50 {
                let (join, fired, received) = counting_join(k);
                let handles: Vec<_> = (0..k)
                    .map(|i| {
                        let join = join.clone();
                        std::thread::spawn(move || {
                            join.complete_one(|v| v.push(i));
                        })
                    })
                    .collect();
                for handle in handles {
                    handle.join().unwrap();
                }

                assert_eq!(fired.load(Ordering::SeqCst), 1, "k = {}", k);
                let value = received.lock().unwrap().take().unwrap().unwrap();
                assert_eq!(value.len(), k);
            }
        }
    }
}
