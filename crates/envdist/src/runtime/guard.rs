//! Bounded calls into foreign processes
//!
//! A process that stops while it is being attached to can leave the attach
//! call hanging forever. Every such call runs on its own blocking worker and
//! is abandoned once the timeout elapses. An abandoned worker is never
//! reused; it finishes (or not) on its own.

use super::error::{AttachError, RegistryError, Result};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Default bound of a single process call
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_millis(3000);

/// A guarded call that did not finish in time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadlockEvent {
    pub process_id: String,
    pub timeout: Duration,
}

impl DeadlockEvent {
    pub fn message(&self) -> String {
        format!(
            "Could not execute command on process within {:?}. This happens sometimes on Windows \
             systems when the process stops at the same time as the command is called: {}",
            self.timeout, self.process_id
        )
    }
}

/// What happens when a guarded call times out
#[derive(Clone, Default)]
pub enum DeadlockPolicy {
    /// Fail the operation with [`RegistryError::TimeoutDeadlock`]
    #[default]
    Escalate,
    /// Log a warning and continue without a result
    Warn,
    /// Hand the event to a callback and continue without a result
    Custom(Arc<dyn Fn(&DeadlockEvent) + Send + Sync>),
}

impl fmt::Debug for DeadlockPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeadlockPolicy::Escalate => f.write_str("Escalate"),
            DeadlockPolicy::Warn => f.write_str("Warn"),
            DeadlockPolicy::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl DeadlockPolicy {
    fn handle(&self, event: DeadlockEvent) -> Result<()> {
        match self {
            DeadlockPolicy::Escalate => Err(RegistryError::TimeoutDeadlock {
                process_id: event.process_id,
                timeout: event.timeout,
            }),
            DeadlockPolicy::Warn => {
                log::warn!("{}", event.message());
                Ok(())
            }
            DeadlockPolicy::Custom(handler) => {
                handler(&event);
                Ok(())
            }
        }
    }
}

/// Runs process calls on dedicated workers with a wall-clock bound
#[derive(Debug, Clone)]
pub struct TimeoutGuard {
    timeout: Duration,
    policy: DeadlockPolicy,
    abandoned: Arc<AtomicUsize>,
}

impl TimeoutGuard {
    pub fn new(timeout: Duration, policy: DeadlockPolicy) -> Self {
        Self {
            timeout,
            policy,
            abandoned: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Number of workers left behind by timed out calls
    pub fn abandoned_workers(&self) -> usize {
        self.abandoned.load(Ordering::Relaxed)
    }

    /// Run `call` against `process_id`.
    ///
    /// Returns `Ok(None)` when the call timed out and the policy chose to
    /// continue, or when the worker was cancelled.
    pub async fn call<R, F>(&self, process_id: &str, call: F) -> Result<Option<R>>
    where
        F: FnOnce() -> std::result::Result<R, AttachError> + Send + 'static,
        R: Send + 'static,
    {
        let worker = tokio::task::spawn_blocking(call);

        match tokio::time::timeout(self.timeout, worker).await {
            Ok(Ok(Ok(value))) => Ok(Some(value)),
            Ok(Ok(Err(e))) => Err(RegistryError::Attach(e)),
            Ok(Err(join_error)) if join_error.is_cancelled() => {
                log::debug!("Call on process {} was cancelled", process_id);
                Ok(None)
            }
            Ok(Err(_)) => Err(RegistryError::WorkerPanicked(process_id.to_string())),
            Err(_) => {
                // dropping the join handle detaches the worker
                self.abandoned.fetch_add(1, Ordering::Relaxed);
                self.policy
                    .handle(DeadlockEvent {
                        process_id: process_id.to_string(),
                        timeout: self.timeout,
                    })
                    .map(|_| None)
            }
        }
    }
}

impl Default for TimeoutGuard {
    fn default() -> Self {
        Self::new(DEFAULT_CALL_TIMEOUT, DeadlockPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    const SHORT: Duration = Duration::from_millis(50);

    fn hang() -> std::result::Result<u32, AttachError> {
        std::thread::sleep(Duration::from_millis(300));
        Ok(1)
    }

    #[tokio::test]
    async fn test_call_returns_result() {
        let guard = TimeoutGuard::new(SHORT, DeadlockPolicy::Escalate);
        let result = guard.call("1", || Ok(42)).await.unwrap();
        assert_eq!(result, Some(42));
        assert_eq!(guard.abandoned_workers(), 0);
    }

    #[tokio::test]
    async fn test_call_propagates_attach_error() {
        let guard = TimeoutGuard::default();
        let result: Result<Option<()>> = guard
            .call("7", || Err(AttachError::ProcessNotFound("7".to_string())))
            .await;
        assert!(matches!(
            result,
            Err(RegistryError::Attach(AttachError::ProcessNotFound(_)))
        ));
    }

    #[tokio::test]
    async fn test_timeout_escalates() {
        let guard = TimeoutGuard::new(SHORT, DeadlockPolicy::Escalate);
        let result = guard.call("99", hang).await;
        match result {
            Err(RegistryError::TimeoutDeadlock {
                process_id,
                timeout,
            }) => {
                assert_eq!(process_id, "99");
                assert_eq!(timeout, SHORT);
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(guard.abandoned_workers(), 1);
    }

    #[tokio::test]
    async fn test_timeout_warns_and_continues() {
        let guard = TimeoutGuard::new(SHORT, DeadlockPolicy::Warn);
        assert_eq!(guard.call("99", hang).await.unwrap(), None);
        assert_eq!(guard.abandoned_workers(), 1);
    }

    #[tokio::test]
    async fn test_timeout_custom_handler() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let policy = DeadlockPolicy::Custom(Arc::new(move |event: &DeadlockEvent| {
            sink.lock().unwrap().push(event.clone());
        }));
        let guard = TimeoutGuard::new(SHORT, policy);

        assert_eq!(guard.call("5", hang).await.unwrap(), None);

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].process_id, "5");
        assert!(events[0].message().contains('5'));
    }

    #[tokio::test]
    async fn test_panicking_worker() {
        let guard = TimeoutGuard::default();
        let result: Result<Option<()>> = guard.call("3", || panic!("boom")).await;
        assert!(matches!(result, Err(RegistryError::WorkerPanicked(_))));
    }
}
