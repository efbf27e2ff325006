//! Lazy, single-computation cache behind every portion.
//!
//! Each cache walks `Created -> Initializing -> Translating -> Translated`
//! exactly once, driven by one producer thread, or ends in `Failed` when a
//! step errors or panics. The producer is the only writer; consumers only
//! read. Consumers that arrive early wait on a condition variable with a
//! short timeout, re-checking their
//! [`CancelToken`] on every wakeup. A cancelled consumer stops waiting but
//! the producer keeps running, so the result stays valid for everyone else.

use std::any::Any;
use std::fmt;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::error::{MachoError, Result};

/// Observable summary of a cache's progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadStatus {
    Created,
    Initializing,
    Translating,
    Translated,
    Failed,
}

impl fmt::Display for LoadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Initializing => "initializing",
            Self::Translating => "translating",
            Self::Translated => "translated",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

enum LoadState<I, T> {
    Created,
    Initializing,
    Translating(Arc<I>),
    Translated(Arc<I>, Arc<T>),
    Failed(Arc<MachoError>),
}

impl<I, T> LoadState<I, T> {
    fn status(&self) -> LoadStatus {
        match self {
            Self::Created => LoadStatus::Created,
            Self::Initializing => LoadStatus::Initializing,
            Self::Translating(_) => LoadStatus::Translating,
            Self::Translated(..) => LoadStatus::Translated,
            Self::Failed(_) => LoadStatus::Failed,
        }
    }
}

/// Cooperative cancellation flag shared between a waiter and whoever may cancel it.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// A fresh, not-yet-cancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask every waiter holding this token to give up.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether `cancel` was called.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|message| (*message).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Per-portion compute-once cache.
pub struct PortionCache<I, T> {
    name: String,
    state: Mutex<LoadState<I, T>>,
    changed: Condvar,
    started: AtomicBool,
    poll_interval: Duration,
}

impl<I, T> fmt::Debug for PortionCache<I, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortionCache")
            .field("name", &self.name)
            .field("status", &self.status())
            .finish()
    }
}

impl<I, T> PortionCache<I, T> {
    /// Name used in logs and errors.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current status.
    pub fn status(&self) -> LoadStatus {
        self.lock().status()
    }

    fn lock(&self) -> MutexGuard<'_, LoadState<I, T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<I, T> PortionCache<I, T>
where
    I: Send + Sync + 'static,
    T: Send + Sync + 'static,
{
    /// A cache in the `Created` state.
    pub fn new(name: impl Into<String>, poll_interval: Duration) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            state: Mutex::new(LoadState::Created),
            changed: Condvar::new(),
            started: AtomicBool::new(false),
            poll_interval,
        })
    }

    /// Spawn the single producer thread. A second call fails.
    pub fn start_loading<F, G>(self: &Arc<Self>, initialize: F, translate: G) -> Result<()>
    where
        F: FnOnce() -> Result<I> + Send + 'static,
        G: FnOnce(&I) -> Result<T> + Send + 'static,
    {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(MachoError::AlreadyStarted {
                portion: self.name.clone(),
            });
        }
        let cache = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name(format!("portion:{}", self.name))
            .spawn(move || cache.run(initialize, translate));
        self.record_spawn(spawned)
    }

    /// A producer that never started leaves the cache `Failed` so waiters return.
    fn record_spawn(&self, spawned: io::Result<thread::JoinHandle<()>>) -> Result<()> {
        match spawned {
            Ok(_) => Ok(()),
            Err(err) => {
                let kind = err.kind();
                let message = err.to_string();
                self.fail(MachoError::Io(err));
                Err(MachoError::Io(io::Error::new(kind, message)))
            }
        }
    }

    fn run<F, G>(&self, initialize: F, translate: G)
    where
        F: FnOnce() -> Result<I>,
        G: FnOnce(&I) -> Result<T>,
    {
        self.publish(LoadState::Initializing);
        let initialized = match self.guarded(initialize) {
            Ok(value) => Arc::new(value),
            Err(err) => return self.fail(err),
        };
        self.publish(LoadState::Translating(Arc::clone(&initialized)));
        match self.guarded(|| translate(&initialized)) {
            Ok(translated) => self.publish(LoadState::Translated(initialized, Arc::new(translated))),
            Err(err) => self.fail(err),
        }
    }

    /// Run one step, turning a panic into a `Panicked` error.
    fn guarded<R>(&self, step: impl FnOnce() -> Result<R>) -> Result<R> {
        panic::catch_unwind(AssertUnwindSafe(step)).unwrap_or_else(|payload| {
            Err(MachoError::Panicked {
                portion: self.name.clone(),
                message: panic_message(payload.as_ref()),
            })
        })
    }

    fn fail(&self, err: MachoError) {
        warn!(portion = %self.name, error = %err, "portion failed to decode");
        self.publish(LoadState::Failed(Arc::new(err)));
    }

    fn publish(&self, next: LoadState<I, T>) {
        let status = next.status();
        *self.lock() = next;
        debug!(portion = %self.name, %status, "portion state changed");
        self.changed.notify_all();
    }

    /// Wait until the initialize step finished and return its result.
    pub fn await_initialize_result(&self, cancel: &CancelToken) -> Result<Arc<I>> {
        self.wait_for(cancel, |state| match state {
            LoadState::Translating(init) | LoadState::Translated(init, _) => {
                Some(Ok(Arc::clone(init)))
            }
            LoadState::Failed(err) => Some(Err(err)),
            _ => None,
        })
    }

    /// Wait until the translate step finished and return its result.
    pub fn await_translate_result(&self, cancel: &CancelToken) -> Result<Arc<T>> {
        self.wait_for(cancel, |state| match state {
            LoadState::Translated(_, translated) => Some(Ok(Arc::clone(translated))),
            LoadState::Failed(err) => Some(Err(err)),
            _ => None,
        })
    }

    /// Translate result if already available, without waiting.
    pub fn translate_result(&self) -> Option<Arc<T>> {
        match &*self.lock() {
            LoadState::Translated(_, translated) => Some(Arc::clone(translated)),
            _ => None,
        }
    }

    fn wait_for<R>(
        &self,
        cancel: &CancelToken,
        ready: impl Fn(&LoadState<I, T>) -> Option<std::result::Result<R, &Arc<MachoError>>>,
    ) -> Result<R> {
        let mut guard = self.lock();
        loop {
            match ready(&guard) {
                Some(Ok(value)) => return Ok(value),
                Some(Err(err)) => {
                    return Err(MachoError::DependencyFailed {
                        portion: self.name.clone(),
                        message: err.to_string(),
                    })
                }
                None => {}
            }
            if cancel.is_cancelled() {
                return Err(MachoError::Cancelled {
                    portion: self.name.clone(),
                });
            }
            trace!(portion = %self.name, status = %guard.status(), "waiting for portion");
            guard = self
                .changed
                .wait_timeout(guard, self.poll_interval)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;
    use std::time::Instant;

    const POLL: Duration = Duration::from_millis(5);

    #[test]
    fn test_translate_runs_once_for_many_readers() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = PortionCache::<u32, Vec<u8>>::new("counter", POLL);
        let counter = Arc::clone(&calls);
        cache
            .start_loading(
                || Ok(7),
                move |init| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(vec![*init as u8; 3])
                },
            )
            .unwrap();

        let cancel = CancelToken::new();
        let first = cache.await_translate_result(&cancel).unwrap();
        let second = cache.await_translate_result(&cancel).unwrap();
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || cache.await_translate_result(&CancelToken::new()).unwrap())
            })
            .collect();
        for reader in readers {
            assert_eq!(*reader.join().unwrap(), vec![7, 7, 7]);
        }
        assert_eq!(first, second);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.status(), LoadStatus::Translated);
    }

    #[test]
    fn test_second_start_is_rejected() {
        let cache = PortionCache::<(), ()>::new("twice", POLL);
        cache.start_loading(|| Ok(()), |_| Ok(())).unwrap();
        let err = cache.start_loading(|| Ok(()), |_| Ok(())).unwrap_err();
        assert!(matches!(err, MachoError::AlreadyStarted { .. }));
    }

    #[test]
    fn test_initialize_result_available_before_translation() {
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let cache = PortionCache::<u32, u32>::new("gated", POLL);
        cache
            .start_loading(
                || Ok(41),
                move |init| {
                    release_rx.recv().ok();
                    Ok(init + 1)
                },
            )
            .unwrap();

        let cancel = CancelToken::new();
        assert_eq!(*cache.await_initialize_result(&cancel).unwrap(), 41);
        assert_eq!(cache.status(), LoadStatus::Translating);
        assert!(cache.translate_result().is_none());

        release_tx.send(()).unwrap();
        assert_eq!(*cache.await_translate_result(&cancel).unwrap(), 42);
    }

    #[test]
    fn test_cancel_does_not_stop_producer() {
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let cache = PortionCache::<(), &'static str>::new("slow", POLL);
        cache
            .start_loading(
                || Ok(()),
                move |_| {
                    release_rx.recv().ok();
                    Ok("done")
                },
            )
            .unwrap();

        let cancel = CancelToken::new();
        let waiter = {
            let cache = Arc::clone(&cache);
            let cancel = cancel.clone();
            thread::spawn(move || cache.await_translate_result(&cancel))
        };
        thread::sleep(POLL * 3);
        let started = Instant::now();
        cancel.cancel();
        let outcome = waiter.join().unwrap();
        assert!(matches!(outcome, Err(MachoError::Cancelled { .. })));
        assert!(started.elapsed() < Duration::from_secs(2));

        release_tx.send(()).unwrap();
        let result = cache.await_translate_result(&CancelToken::new()).unwrap();
        assert_eq!(*result, "done");
    }

    #[test]
    fn test_failure_is_terminal_and_shared() {
        let cache = PortionCache::<u32, u32>::new("broken", POLL);
        cache
            .start_loading(|| Err(MachoError::MalformedLeb { offset: 9 }), |_| Ok(0))
            .unwrap();
        let cancel = CancelToken::new();
        let err = cache.await_initialize_result(&cancel).unwrap_err();
        match err {
            MachoError::DependencyFailed { portion, message } => {
                assert_eq!(portion, "broken");
                assert!(message.contains("LEB128"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(cache.await_translate_result(&cancel).is_err());
        assert_eq!(cache.status(), LoadStatus::Failed);
    }

    #[test]
    fn test_panicking_step_fails_instead_of_hanging() {
        let cache = PortionCache::<u32, u32>::new("panics", POLL);
        cache
            .start_loading(|| Ok(u32::MAX), |init| Ok(init.checked_add(1).expect("overflow in translate")))
            .unwrap();

        let (done_tx, done_rx) = mpsc::channel();
        let waiter = Arc::clone(&cache);
        thread::spawn(move || {
            done_tx.send(waiter.await_translate_result(&CancelToken::new())).ok();
        });
        let outcome = done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        match outcome {
            Err(MachoError::DependencyFailed { portion, message }) => {
                assert_eq!(portion, "panics");
                assert!(message.contains("overflow in translate"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(cache.status(), LoadStatus::Failed);
    }

    #[test]
    fn test_spawn_failure_leaves_cache_failed() {
        let cache = PortionCache::<(), ()>::new("unspawned", POLL);
        cache.started.store(true, Ordering::SeqCst);
        let err = cache
            .record_spawn(Err(io::Error::new(io::ErrorKind::WouldBlock, "no threads left")))
            .unwrap_err();
        assert!(matches!(err, MachoError::Io(_)));
        assert_eq!(cache.status(), LoadStatus::Failed);
        assert!(cache.await_translate_result(&CancelToken::new()).is_err());
        assert!(matches!(
            cache.start_loading(|| Ok(()), |_| Ok(())),
            Err(MachoError::AlreadyStarted { .. })
        ));
    }

    #[test]
    fn test_debug_shows_status() {
        let cache = PortionCache::<(), ()>::new("shown", POLL);
        let rendered = format!("{cache:?}");
        assert!(rendered.contains("shown"));
        assert!(rendered.contains("Created"));
    }
}
