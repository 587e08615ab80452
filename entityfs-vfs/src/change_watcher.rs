//! A debounced coalescer (`spec.md` §4.6): `notify()` is a non-blocking
//! signal; on the first signal after idle, a delay timer starts; further
//! signals received during the window coalesce into the single pending
//! flush. On expiry, the configured action runs once.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;

pub struct ChangeWatcher {
    notify: Arc<Notify>,
    _task: JoinHandle<()>,
}

impl ChangeWatcher {
    /// Spawn the coalescing task. `action` runs on the current Tokio
    /// runtime each time the debounce window expires after at least one
    /// signal.
    pub fn spawn(delay: Duration, action: impl Fn() + Send + Sync + 'static) -> Self {
        let notify = Arc::new(Notify::new());
        let notify_for_task = notify.clone();
        let task = tokio::spawn(async move {
            loop {
                notify_for_task.notified().await;
                loop {
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => break,
                        _ = notify_for_task.notified() => continue,
                    }
                }
                action();
            }
        });
        Self { notify, _task: task }
    }

    pub fn notify(&self) {
        self.notify.notify_one();
    }
}

/// `touch(path)`: `OpenOptions::create(true)` plus an explicit `set_len`,
/// satisfying the ENOENT->create+close contract without shelling out
/// (`SPEC_FULL.md` §4.6).
pub fn touch(path: &std::path::Path) -> std::io::Result<()> {
    let file = std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .open(path)?;
    let metadata = file.metadata()?;
    file.set_len(metadata.len())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn coalesces_bursts_into_one_action() {
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        let watcher = ChangeWatcher::spawn(Duration::from_millis(50), move || {
            count2.fetch_add(1, Ordering::SeqCst);
        });

        for _ in 0..5 {
            watcher.notify();
            tokio::time::advance(Duration::from_millis(5)).await;
        }
        tokio::time::advance(Duration::from_millis(100)).await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn touch_creates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("marker");
        assert!(!path.exists());
        touch(&path).unwrap();
        assert!(path.exists());
    }
}
