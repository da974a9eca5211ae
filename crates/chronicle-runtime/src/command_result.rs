//! Completion tracking for sent commands.
//!
//! A caller registers interest in a command id before sending it and gets a
//! [`CommandResultFuture`]. The registration resolves exactly once: when
//! the matching reply is observed, when the transport reports a failure,
//! when its deadline passes, or when the runtime shuts down. The deadline
//! starts at registration and fires whether or not anyone is waiting.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chronicle_core::error::DomainError;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Outcome delivered to command result waiters.
pub type CommandResult = Result<(), DomainError>;

/// Which downstream signal completes a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyType {
    /// The command handler finished.
    CommandExecuted,
    /// An event raised by the command was handled downstream.
    DomainEventHandled,
}

#[derive(Debug)]
struct Pending {
    reply_type: ReplyType,
    /// Distinguishes re-registrations of one id for the deadline task.
    generation: u64,
    sender: watch::Sender<Option<CommandResult>>,
}

type PendingMap = Arc<Mutex<HashMap<String, Pending>>>;

/// Registry of commands awaiting a reply.
#[derive(Debug)]
pub struct CommandResultManager {
    pending: PendingMap,
    default_timeout: Duration,
    generations: AtomicU64,
}

impl CommandResultManager {
    /// Creates a manager whose registrations expire after
    /// `default_timeout`.
    #[must_use]
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            pending: Arc::new(Mutex::new(HashMap::new())),
            default_timeout,
            generations: AtomicU64::new(0),
        }
    }

    /// Registers `command_id` as waiting for `reply_type`.
    ///
    /// Registering an id that is already pending returns another observer
    /// of the same result; the original reply type and deadline are kept.
    ///
    /// When called inside a Tokio runtime the registration is resolved with
    /// `DomainError::Timeout` after the default timeout even if no future
    /// is awaited. Outside a runtime it expires only through a wait.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if the registry lock is
    /// poisoned.
    pub fn register(
        &self,
        command_id: &str,
        reply_type: ReplyType,
    ) -> Result<CommandResultFuture, DomainError> {
        let mut pending = lock(&self.pending)?;
        let receiver = match pending.get(command_id) {
            Some(existing) => existing.sender.subscribe(),
            None => {
                let (sender, receiver) = watch::channel(None);
                let generation = self.generations.fetch_add(1, Ordering::Relaxed);
                pending.insert(
                    command_id.to_owned(),
                    Pending {
                        reply_type,
                        generation,
                        sender,
                    },
                );
                self.arm_deadline(command_id, generation);
                receiver
            }
        };
        Ok(CommandResultFuture {
            command_id: command_id.to_owned(),
            receiver,
            pending: Arc::clone(&self.pending),
            default_timeout: self.default_timeout,
        })
    }

    /// Reports that the handler of `command_id` finished. Resolves the
    /// registration only if it waits for [`ReplyType::CommandExecuted`].
    ///
    /// Returns whether a waiter was resolved.
    pub fn notify_command_executed(&self, command_id: &str, result: CommandResult) -> bool {
        self.resolve(command_id, Some(ReplyType::CommandExecuted), result)
    }

    /// Reports that an event of `command_id` was handled. Resolves the
    /// registration only if it waits for [`ReplyType::DomainEventHandled`].
    ///
    /// Returns whether a waiter was resolved.
    pub fn notify_domain_event_handled(&self, command_id: &str, result: CommandResult) -> bool {
        self.resolve(command_id, Some(ReplyType::DomainEventHandled), result)
    }

    /// Fails the registration of `command_id` whatever its reply type.
    pub fn fail(&self, command_id: &str, error: DomainError) -> bool {
        self.resolve(command_id, None, Err(error))
    }

    /// Fails every pending registration with `error`. Returns how many were
    /// resolved.
    pub fn fail_all(&self, error: &DomainError) -> usize {
        let drained: Vec<(String, Pending)> = match self.pending.lock() {
            Ok(mut pending) => pending.drain().collect(),
            Err(_) => {
                warn!("command result registry poisoned; nothing to fail");
                return 0;
            }
        };
        for (command_id, entry) in &drained {
            entry.sender.send_replace(Some(Err(error.clone())));
            debug!(command_id = %command_id, "command result failed on shutdown");
        }
        drained.len()
    }

    /// Number of unresolved registrations.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.lock().map(|p| p.len()).unwrap_or_default()
    }

    fn resolve(&self, command_id: &str, reply: Option<ReplyType>, result: CommandResult) -> bool {
        resolve(&self.pending, command_id, reply, result)
    }

    fn arm_deadline(&self, command_id: &str, generation: u64) {
        let Ok(runtime) = Handle::try_current() else {
            debug!(command_id, "no async runtime; registration expires only when awaited");
            return;
        };
        let pending = Arc::downgrade(&self.pending);
        let command_id = command_id.to_owned();
        let timeout = self.default_timeout;
        runtime.spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(pending) = pending.upgrade() {
                expire(&pending, &command_id, generation);
            }
        });
    }
}

/// Resolves `command_id` with `DomainError::Timeout` if it is still the
/// registration made as `generation`.
fn expire(pending: &PendingMap, command_id: &str, generation: u64) {
    let entry = {
        let Ok(mut pending) = pending.lock() else {
            warn!(command_id, "command result registry poisoned");
            return;
        };
        match pending.get(command_id) {
            Some(entry) if entry.generation == generation => pending.remove(command_id),
            _ => None,
        }
    };
    if let Some(entry) = entry {
        warn!(command_id, "command result timed out");
        entry.sender.send_replace(Some(Err(DomainError::Timeout {
            command_id: command_id.to_owned(),
        })));
    }
}

/// Resolves and unregisters `command_id`. `reply` of `None` matches any
/// registration.
fn resolve(
    pending: &PendingMap,
    command_id: &str,
    reply: Option<ReplyType>,
    result: CommandResult,
) -> bool {
    let entry = {
        let Ok(mut pending) = pending.lock() else {
            warn!(command_id, "command result registry poisoned");
            return false;
        };
        match pending.get(command_id) {
            Some(entry) if reply.is_none_or(|r| r == entry.reply_type) => {
                pending.remove(command_id)
            }
            _ => None,
        }
    };
    let Some(entry) = entry else {
        return false;
    };
    debug!(command_id, ok = result.is_ok(), "command result resolved");
    entry.sender.send_replace(Some(result));
    true
}

fn lock(
    pending: &PendingMap,
) -> Result<std::sync::MutexGuard<'_, HashMap<String, Pending>>, DomainError> {
    pending
        .lock()
        .map_err(|_| DomainError::Infrastructure("command result registry poisoned".into()))
}

/// Awaitable result of one command. Clones observe the same result.
#[derive(Debug, Clone)]
pub struct CommandResultFuture {
    command_id: String,
    receiver: watch::Receiver<Option<CommandResult>>,
    pending: PendingMap,
    default_timeout: Duration,
}

impl CommandResultFuture {
    /// The awaited command id.
    #[must_use]
    pub fn command_id(&self) -> &str {
        &self.command_id
    }

    /// Returns the result if it has already been delivered.
    #[must_use]
    pub fn try_result(&self) -> Option<CommandResult> {
        self.receiver.borrow().clone()
    }

    /// Waits for the result using the manager's default timeout.
    ///
    /// # Errors
    ///
    /// Returns the command's failure, or `DomainError::Timeout` if no
    /// result arrived in time.
    pub async fn wait(self) -> CommandResult {
        let timeout = self.default_timeout;
        self.wait_timeout(timeout).await
    }

    /// Waits for the result for at most `timeout`.
    ///
    /// On timeout the registration is resolved with
    /// `DomainError::Timeout`, so every other observer sees the same
    /// outcome. The registration's own deadline still applies, so a
    /// `timeout` longer than the manager's default ends early.
    ///
    /// # Errors
    ///
    /// Returns the command's failure, or `DomainError::Timeout` if no
    /// result arrived in time.
    pub async fn wait_timeout(mut self, timeout: Duration) -> CommandResult {
        let waited = tokio::time::timeout(timeout, async {
            self.receiver
                .wait_for(Option::is_some)
                .await
                .map(|result| result.clone())
        })
        .await;

        match waited {
            Ok(Ok(Some(result))) => result,
            Ok(Ok(None) | Err(_)) => Err(DomainError::Infrastructure(format!(
                "result channel for command {} closed unresolved",
                self.command_id
            ))),
            Err(_) => {
                let timed_out = DomainError::Timeout {
                    command_id: self.command_id.clone(),
                };
                if resolve(&self.pending, &self.command_id, None, Err(timed_out)) {
                    warn!(command_id = %self.command_id, "command result timed out");
                }
                // A concurrent resolution may have won the race.
                self.receiver.borrow().clone().unwrap_or_else(|| {
                    Err(DomainError::Timeout {
                        command_id: self.command_id.clone(),
                    })
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> CommandResultManager {
        CommandResultManager::new(Duration::from_millis(50))
    }

    #[tokio::test]
    async fn test_command_executed_resolves_matching_registration() {
        // Arrange
        let results = manager();
        let future = results.register("cmd-1", ReplyType::CommandExecuted).unwrap();

        // Act
        let resolved = results.notify_command_executed("cmd-1", Ok(()));

        // Assert
        assert!(resolved);
        assert!(future.wait().await.is_ok());
        assert_eq!(results.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_mismatched_reply_type_does_not_resolve() {
        let results = manager();
        let future = results
            .register("cmd-1", ReplyType::DomainEventHandled)
            .unwrap();

        let resolved = results.notify_command_executed("cmd-1", Ok(()));

        assert!(!resolved);
        assert!(future.try_result().is_none());
        assert_eq!(results.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_result_resolves_exactly_once() {
        // Arrange
        let results = manager();
        let future = results.register("cmd-1", ReplyType::CommandExecuted).unwrap();
        results.notify_command_executed("cmd-1", Err(DomainError::Validation("no".into())));

        // Act
        let second = results.notify_command_executed("cmd-1", Ok(()));

        // Assert
        assert!(!second);
        assert!(matches!(
            future.wait().await,
            Err(DomainError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_all_observers_see_the_same_result() {
        // Arrange
        let results = manager();
        let first = results.register("cmd-1", ReplyType::CommandExecuted).unwrap();
        let second = results.register("cmd-1", ReplyType::CommandExecuted).unwrap();
        let third = first.clone();

        // Act
        let waiter = tokio::spawn(second.wait_timeout(Duration::from_secs(5)));
        results.fail("cmd-1", DomainError::Transport("down".into()));

        // Assert
        assert!(matches!(first.wait().await, Err(DomainError::Transport(_))));
        assert!(matches!(third.wait().await, Err(DomainError::Transport(_))));
        assert!(matches!(
            waiter.await.unwrap(),
            Err(DomainError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn test_timeout_resolves_registration_for_everyone() {
        // Arrange
        let results = manager();
        let future = results.register("cmd-1", ReplyType::CommandExecuted).unwrap();
        let observer = future.clone();

        // Act
        let result = future.wait_timeout(Duration::from_millis(10)).await;

        // Assert
        assert!(matches!(
            result,
            Err(DomainError::Timeout { command_id }) if command_id == "cmd-1"
        ));
        assert!(matches!(
            observer.try_result(),
            Some(Err(DomainError::Timeout { .. }))
        ));
        assert!(!results.notify_command_executed("cmd-1", Ok(())));
    }

    #[tokio::test]
    async fn test_fail_all_resolves_every_pending_command() {
        let results = manager();
        let a = results.register("cmd-a", ReplyType::CommandExecuted).unwrap();
        let b = results
            .register("cmd-b", ReplyType::DomainEventHandled)
            .unwrap();

        let failed = results.fail_all(&DomainError::Infrastructure("shutdown".into()));

        assert_eq!(failed, 2);
        assert!(a.wait().await.is_err());
        assert!(b.wait().await.is_err());
    }

    #[test]
    fn test_notify_unknown_command_is_ignored() {
        let results = manager();

        assert!(!results.notify_domain_event_handled("cmd-x", Ok(())));
    }

    #[tokio::test]
    async fn test_unawaited_registrations_expire_on_their_own() {
        // Arrange
        let results = CommandResultManager::new(Duration::from_millis(20));
        for i in 0..100 {
            let future = results
                .register(&format!("cmd-{i}"), ReplyType::CommandExecuted)
                .unwrap();
            drop(future);
        }
        assert_eq!(results.pending_count(), 100);

        // Act
        tokio::time::sleep(Duration::from_millis(200)).await;

        // Assert
        assert_eq!(results.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_deadline_delivers_timeout_to_idle_observer() {
        let results = CommandResultManager::new(Duration::from_millis(20));
        let observer = results.register("cmd-1", ReplyType::CommandExecuted).unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(matches!(
            observer.try_result(),
            Some(Err(DomainError::Timeout { command_id })) if command_id == "cmd-1"
        ));
        assert!(!results.notify_command_executed("cmd-1", Ok(())));
    }

    #[tokio::test]
    async fn test_stale_deadline_does_not_expire_a_new_registration() {
        // Arrange
        let results = CommandResultManager::new(Duration::from_millis(200));
        results.register("cmd-1", ReplyType::CommandExecuted).unwrap();
        results.notify_command_executed("cmd-1", Ok(()));
        tokio::time::sleep(Duration::from_millis(120)).await;
        let again = results.register("cmd-1", ReplyType::CommandExecuted).unwrap();

        // Act
        tokio::time::sleep(Duration::from_millis(120)).await;

        // Assert
        assert_eq!(results.pending_count(), 1);
        assert!(again.try_result().is_none());
    }

    #[test]
    fn test_register_outside_runtime_waits_for_reply() {
        let results = manager();
        let future = results.register("cmd-1", ReplyType::CommandExecuted).unwrap();

        assert!(results.notify_command_executed("cmd-1", Ok(())));
        assert!(matches!(future.try_result(), Some(Ok(()))));
    }
}
