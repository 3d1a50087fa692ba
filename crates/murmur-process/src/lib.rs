//! Child-process registry for murmur.
//!
//! Every external process murmur spawns (transcription engines, media
//! conversion) is registered here so it can be terminated on shutdown or
//! explicit cancellation, independent of which call site created it.
//! Natural exit deregisters automatically; callers never unregister on the
//! happy path.

use std::collections::HashMap;
use std::process::ExitStatus;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use tokio::process::Child;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// What a registered process is doing, for targeted kills and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessCategory {
    Transcription,
    AudioExtraction,
    Other,
}

/// Opaque id for a registered process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessId(u64);

impl std::fmt::Display for ProcessId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "proc-{}", self.0)
    }
}

struct Entry {
    category: ProcessCategory,
    description: String,
    started_at: Instant,
    kill: CancellationToken,
}

/// Tracks live child processes across all call sites.
///
/// The entry map is the only shared mutable state between concurrent
/// orchestrator instances; registration and removal are atomic per id, so a
/// process can never be double-killed or double-cleaned.
#[derive(Default)]
pub struct ProcessRegistry {
    entries: Mutex<HashMap<ProcessId, Entry>>,
    next_id: AtomicU64,
}

impl ProcessRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers a spawned child and takes ownership of it.
    ///
    /// A monitor task races the child's natural exit against the entry's
    /// kill signal; either way the entry is removed and the exit status is
    /// delivered to the returned handle.
    pub fn register(
        self: &Arc<Self>,
        mut child: Child,
        category: ProcessCategory,
        description: impl Into<String>,
    ) -> RegisteredChild {
        let id = ProcessId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let description = description.into();
        let kill = CancellationToken::new();

        debug!(%id, ?category, description, pid = child.id(), "Registering process");

        self.entries.lock().insert(
            id,
            Entry {
                category,
                description,
                started_at: Instant::now(),
                kill: kill.clone(),
            },
        );

        let (exit_tx, exit_rx) = oneshot::channel();
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                _ = kill.cancelled() => {
                    if let Err(e) = child.start_kill() {
                        warn!(%id, error = %e, "Failed to signal process");
                    }
                    child.wait().await
                }
            };
            registry.remove(id);
            // The receiver may be gone if the caller gave up; that is fine.
            let _ = exit_tx.send(status);
        });

        RegisteredChild { id, exit: exit_rx }
    }

    fn remove(&self, id: ProcessId) {
        if let Some(entry) = self.entries.lock().remove(&id) {
            debug!(
                %id,
                lived_ms = entry.started_at.elapsed().as_millis() as u64,
                "Process deregistered"
            );
        }
    }

    /// Kills one process. Returns false if the id is not (or no longer)
    /// registered.
    pub fn kill(&self, id: ProcessId) -> bool {
        match self.entries.lock().remove(&id) {
            Some(entry) => {
                debug!(%id, description = entry.description, "Killing process");
                entry.kill.cancel();
                true
            }
            None => false,
        }
    }

    /// Kills every tracked process. Returns how many were signalled.
    ///
    /// This is the shutdown hook: after it returns, no registered engine or
    /// media-conversion process outlives the host.
    pub fn kill_all(&self) -> usize {
        let entries: Vec<_> = {
            let mut map = self.entries.lock();
            map.drain().collect()
        };
        for (id, entry) in &entries {
            debug!(%id, description = entry.description, "Killing process (shutdown)");
            entry.kill.cancel();
        }
        entries.len()
    }

    /// Kills every tracked process in one category. Returns how many were
    /// signalled.
    pub fn kill_category(&self, category: ProcessCategory) -> usize {
        let entries: Vec<_> = {
            let mut map = self.entries.lock();
            let ids: Vec<_> = map
                .iter()
                .filter(|(_, e)| e.category == category)
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter().filter_map(|id| map.remove(&id)).collect()
        };
        for entry in &entries {
            entry.kill.cancel();
        }
        entries.len()
    }

    /// Number of currently tracked processes.
    pub fn active_count(&self) -> usize {
        self.entries.lock().len()
    }

    /// Number of currently tracked processes in one category.
    pub fn count_category(&self, category: ProcessCategory) -> usize {
        self.entries
            .lock()
            .values()
            .filter(|e| e.category == category)
            .count()
    }
}

/// Handle to a registered process's exit.
pub struct RegisteredChild {
    id: ProcessId,
    exit: oneshot::Receiver<std::io::Result<ExitStatus>>,
}

impl RegisteredChild {
    pub fn id(&self) -> ProcessId {
        self.id
    }

    /// Waits for the process to exit, naturally or by kill.
    pub async fn wait(self) -> std::io::Result<ExitStatus> {
        match self.exit.await {
            Ok(status) => status,
            // Monitor task dropped without sending; only possible if the
            // runtime is shutting down underneath us.
            Err(_) => Err(std::io::Error::other("process monitor went away")),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tokio::process::Command;

    fn sleep_child(secs: u32) -> Child {
        Command::new("sleep")
            .arg(secs.to_string())
            .spawn()
            .expect("spawn sleep")
    }

    #[tokio::test]
    async fn test_natural_exit_deregisters() {
        let registry = ProcessRegistry::new();
        let child = Command::new("true").spawn().expect("spawn true");
        let handle = registry.register(child, ProcessCategory::Other, "true");

        let status = handle.wait().await.unwrap();
        assert!(status.success());
        assert_eq!(registry.active_count(), 0);
    }

    #[tokio::test]
    async fn test_kill_removes_entry_and_stops_process() {
        let registry = ProcessRegistry::new();
        let handle = registry.register(
            sleep_child(30),
            ProcessCategory::Transcription,
            "sleep 30",
        );

        assert_eq!(registry.active_count(), 1);
        assert!(registry.kill(handle.id()));
        assert_eq!(registry.active_count(), 0);

        // Second kill of the same id is a no-op, not a double-kill.
        assert!(!registry.kill(handle.id()));

        let status = handle.wait().await.unwrap();
        assert!(!status.success());
    }

    #[tokio::test]
    async fn test_kill_all_mixed_categories() {
        let registry = ProcessRegistry::new();
        let a = registry.register(sleep_child(30), ProcessCategory::Transcription, "a");
        let b = registry.register(sleep_child(30), ProcessCategory::AudioExtraction, "b");
        let c = registry.register(sleep_child(30), ProcessCategory::Other, "c");

        assert_eq!(registry.active_count(), 3);
        assert_eq!(registry.kill_all(), 3);
        assert_eq!(registry.active_count(), 0);

        for handle in [a, b, c] {
            assert!(!handle.wait().await.unwrap().success());
        }
    }

    #[tokio::test]
    async fn test_kill_category_leaves_others() {
        let registry = ProcessRegistry::new();
        let a = registry.register(sleep_child(30), ProcessCategory::Transcription, "a");
        let b = registry.register(sleep_child(30), ProcessCategory::AudioExtraction, "b");

        assert_eq!(registry.kill_category(ProcessCategory::AudioExtraction), 1);
        assert_eq!(registry.active_count(), 1);
        assert_eq!(registry.count_category(ProcessCategory::Transcription), 1);

        assert!(!b.wait().await.unwrap().success());
        assert!(registry.kill(a.id()));
        assert!(!a.wait().await.unwrap().success());
    }
}
