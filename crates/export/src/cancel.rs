use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Cooperative cancellation: listeners (ctrl-c handler, resource watchdog)
/// set the flag, the pipeline polls it between batches and between records.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<Inner>);

#[derive(Debug, Default)]
struct Inner {
    flag: AtomicBool,
    reason: Mutex<Option<CancelReason>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelReason {
    /// External interrupt (SIGINT or equivalent).
    Interrupt,
    /// The resource watchdog tripped a memory or disk threshold.
    Resource(String),
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the flag. The first reason wins; later calls only re-assert the
    /// flag.
    pub fn cancel(&self, reason: CancelReason) {
        if let Ok(mut slot) = self.0.reason.lock() {
            slot.get_or_insert(reason);
        }
        self.0.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.flag.load(Ordering::SeqCst)
    }

    pub fn reason(&self) -> Option<CancelReason> {
        self.0.reason.lock().ok().and_then(|slot| slot.clone())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn first_reason_wins() {
        let flag = CancelFlag::new();
        assert!(!flag.is_cancelled());
        assert_eq!(flag.reason(), None);

        flag.cancel(CancelReason::Resource("memory".into()));
        flag.cancel(CancelReason::Interrupt);

        assert!(flag.is_cancelled());
        assert_eq!(flag.reason(), Some(CancelReason::Resource("memory".into())));
    }
}
