use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use sosbus_frame::Message;
use tracing::{error, trace};

use crate::error::BoxError;
use crate::pattern::Pattern;

/// A trigger callback. Runs on the receiver thread.
pub type Callback = Arc<dyn Fn(&Message) -> Result<(), BoxError> + Send + Sync + 'static>;

/// Handle for one registered trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TriggerId(u64);

impl fmt::Display for TriggerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Outcome of dispatching one message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Triggers whose pattern matched the message.
    pub matched: usize,
    /// Matched triggers whose callback returned an error or panicked.
    pub failed: usize,
}

#[derive(Clone)]
struct Trigger {
    id: TriggerId,
    pattern: Pattern,
    callback: Callback,
}

/// Ordered pattern → callback registrations.
///
/// Registration order is dispatch order, and removal never reorders the
/// survivors. Callbacks are invoked without the registry lock held, so a
/// callback may register or deregister triggers itself.
pub struct TriggerRegistry {
    triggers: Mutex<Vec<Trigger>>,
    next_id: AtomicU64,
}

impl TriggerRegistry {
    pub fn new() -> Self {
        Self {
            triggers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Append a trigger and return its id.
    pub fn register<F>(&self, pattern: Pattern, callback: F) -> TriggerId
    where
        F: Fn(&Message) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        let id = TriggerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().push(Trigger {
            id,
            pattern,
            callback: Arc::new(callback),
        });
        trace!(trigger = %id, pattern = %pattern, "registered trigger");
        id
    }

    /// Remove every trigger whose stored pattern is selected by `pattern`.
    ///
    /// Wildcard fields of `pattern` select any stored value; concrete fields
    /// select only the same concrete value. An all-wildcard pattern removes
    /// everything. Returns the number of triggers removed.
    pub fn deregister(&self, pattern: &Pattern) -> usize {
        let mut triggers = self.lock();
        let before = triggers.len();
        triggers.retain(|trigger| !pattern.selects(&trigger.pattern));
        let removed = before - triggers.len();
        trace!(pattern = %pattern, removed, "deregistered triggers");
        removed
    }

    /// Remove the trigger installed under `id`.
    pub fn deregister_id(&self, id: TriggerId) -> bool {
        let mut triggers = self.lock();
        match triggers.iter().position(|trigger| trigger.id == id) {
            Some(index) => {
                triggers.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Invoke every matching callback in registration order.
    ///
    /// A callback that returns an error or panics is logged and counted in
    /// the report; the remaining callbacks still run.
    pub fn dispatch(&self, message: &Message) -> DispatchReport {
        let matching: Vec<Trigger> = self
            .lock()
            .iter()
            .filter(|trigger| trigger.pattern.matches(message))
            .cloned()
            .collect();

        let mut report = DispatchReport {
            matched: matching.len(),
            failed: 0,
        };

        for trigger in matching {
            let outcome = catch_unwind(AssertUnwindSafe(|| (trigger.callback)(message)));
            let failure = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(err)) => err.to_string(),
                Err(panic) => format!("panicked: {}", panic_message(panic.as_ref())),
            };
            report.failed += 1;
            error!(
                trigger = %trigger.id,
                msg_type = message.msg_type(),
                error = %failure,
                "trigger callback failed"
            );
        }

        report
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Trigger>> {
        self.triggers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for TriggerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TriggerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let triggers = self.lock();
        f.debug_struct("TriggerRegistry")
            .field(
                "triggers",
                &triggers
                    .iter()
                    .map(|trigger| (trigger.id, trigger.pattern))
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(text) = panic.downcast_ref::<&str>() {
        text
    } else if let Some(text) = panic.downcast_ref::<String>() {
        text
    } else {
        "unknown panic payload"
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use bytes::Bytes;

    use super::*;

    fn msg(msg_type: u8) -> Message {
        Message::new(1, 2, 3, 4, msg_type, Bytes::from_static(&[0xAA, 0xBB, 0xCC, 0xDD])).unwrap()
    }

    fn recorder(log: &Arc<Mutex<Vec<String>>>, name: &'static str) -> impl Fn(&Message) -> Result<(), BoxError> {
        let log = Arc::clone(log);
        move |message: &Message| {
            log.lock()
                .unwrap()
                .push(format!("{name}:{}", message.msg_type()));
            Ok(())
        }
    }

    #[test]
    fn trigger_fires_once_for_matching_message() {
        let registry = TriggerRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        registry.register(Pattern::any().msg_type(33), move |message| {
            sink.lock().unwrap().push(message.clone());
            Ok(())
        });

        let report = registry.dispatch(&msg(33));
        assert_eq!(report, DispatchReport { matched: 1, failed: 0 });
        assert_eq!(seen.lock().unwrap().as_slice(), &[msg(33)]);

        assert_eq!(registry.dispatch(&msg(34)).matched, 0);
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn dispatch_follows_registration_order() {
        let registry = TriggerRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        registry.register(Pattern::any(), recorder(&log, "a"));
        registry.register(Pattern::any().msg_type(33), recorder(&log, "b"));
        registry.register(Pattern::any(), recorder(&log, "c"));

        registry.dispatch(&msg(33));
        registry.dispatch(&msg(40));

        assert_eq!(
            log.lock().unwrap().as_slice(),
            &["a:33", "b:33", "c:33", "a:40", "c:40"]
        );
    }

    #[test]
    fn failing_callbacks_do_not_stop_dispatch() {
        let registry = TriggerRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        registry.register(Pattern::any().msg_type(33), |_| panic!("boom"));
        registry.register(Pattern::any().msg_type(33), |_| Err("refused".into()));
        registry.register(Pattern::any(), recorder(&log, "after"));

        let report = registry.dispatch(&msg(33));
        assert_eq!(report, DispatchReport { matched: 3, failed: 2 });

        let report = registry.dispatch(&msg(34));
        assert_eq!(report, DispatchReport { matched: 1, failed: 0 });
        assert_eq!(log.lock().unwrap().as_slice(), &["after:33", "after:34"]);
    }

    #[test]
    fn deregister_by_pattern_keeps_survivor_order() {
        let registry = TriggerRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        registry.register(Pattern::any().msg_type(33), recorder(&log, "t33"));
        registry.register(Pattern::any().src_addr(4), recorder(&log, "s4"));
        registry.register(Pattern::any().msg_type(33).src_addr(4), recorder(&log, "both"));
        registry.register(Pattern::any(), recorder(&log, "all"));

        assert_eq!(registry.deregister(&Pattern::any().msg_type(33)), 2);
        assert_eq!(registry.len(), 2);

        registry.dispatch(&msg(33));
        assert_eq!(log.lock().unwrap().as_slice(), &["s4:33", "all:33"]);

        assert_eq!(registry.deregister(&Pattern::any().msg_type(99)), 0);
        assert_eq!(registry.deregister(&Pattern::any()), 2);
        assert!(registry.is_empty());
    }

    #[test]
    fn deregister_by_id_removes_one_trigger() {
        let registry = TriggerRegistry::new();
        let first = registry.register(Pattern::any(), |_| Ok(()));
        let second = registry.register(Pattern::any(), |_| Ok(()));
        assert_ne!(first, second);

        assert!(registry.deregister_id(first));
        assert!(!registry.deregister_id(first));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn callbacks_may_modify_the_registry() {
        let registry = Arc::new(TriggerRegistry::new());
        let hits = Arc::new(AtomicUsize::new(0));

        let inner = Arc::clone(&registry);
        let counter = Arc::clone(&hits);
        registry.register(Pattern::any().msg_type(1), move |_| {
            let counter = Arc::clone(&counter);
            inner.register(Pattern::any().msg_type(2), move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
            inner.deregister(&Pattern::any().msg_type(1));
            Ok(())
        });

        registry.dispatch(&msg(1));
        registry.dispatch(&msg(1));
        registry.dispatch(&msg(2));

        assert_eq!(registry.len(), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panic_messages() {
        let text: Box<dyn Any + Send> = Box::new("static text");
        assert_eq!(panic_message(text.as_ref()), "static text");
        let owned: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(owned.as_ref()), "owned");
        let other: Box<dyn Any + Send> = Box::new(7u32);
        assert_eq!(panic_message(other.as_ref()), "unknown panic payload");
    }
}
