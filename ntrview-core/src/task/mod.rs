//! Ownership of the background tasks belonging to one connection.
//!
//! Every task spawned through [`SessionTasks`] races its future against
//! a shared [`CancellationToken`], so cancelling the set stops all of
//! them at their next await point. Dropping the set cancels it too:
//! a connection's tasks never outlive the connection.

use std::future::Future;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::trace;

#[derive(Debug, Default)]
pub struct SessionTasks {
    token: CancellationToken,
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

impl SessionTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// A clone of the set's token, for work that must check for
    /// cancellation between await points.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Spawn `fut` on the runtime, tied to this set's lifetime.
    pub fn spawn<F>(&mut self, name: &'static str, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let token = self.token.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => trace!("{name} cancelled"),
                _ = fut => trace!("{name} finished"),
            }
        });
        self.handles.retain(|(_, h)| !h.is_finished());
        self.handles.push((name, handle));
    }

    /// Cancel and abort every task. Idempotent.
    pub fn cancel(&mut self) {
        self.token.cancel();
        for (_, handle) in self.handles.drain(..) {
            handle.abort();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Names of the tasks that are still running.
    pub fn running(&self) -> Vec<&'static str> {
        self.handles
            .iter()
            .filter(|(_, h)| !h.is_finished())
            .map(|(name, _)| *name)
            .collect()
    }
}

impl Drop for SessionTasks {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn cancel_stops_looping_task() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let mut tasks = SessionTasks::new();
        let counter = Arc::clone(&ticks);
        tasks.spawn("ticker", async move {
            loop {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        });

        tokio::time::sleep(Duration::from_millis(30)).await;
        tasks.cancel();
        assert!(tasks.is_cancelled());
        let after_cancel = ticks.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), after_cancel);
        assert!(tasks.running().is_empty());
    }

    #[tokio::test]
    async fn drop_cancels_token() {
        let tasks = SessionTasks::new();
        let token = tasks.token();
        drop(tasks);
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn finished_tasks_are_pruned() {
        let mut tasks = SessionTasks::new();
        tasks.spawn("quick", async {});
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(tasks.running().is_empty());
        tasks.spawn("slow", std::future::pending());
        assert_eq!(tasks.running(), vec!["slow"]);
    }
}
