use flume::{Receiver, Sender, unbounded};
use std::future::Future;

pub use async_task::{Runnable, Task};

/// Block the current thread until the passed future completes.
pub use async_io::block_on;

/// A single-threaded run queue for `async_task` runnables.
///
/// The embedding host decides when queued work runs by calling
/// [`TaskQueue::run_pending`]; nothing here spins up a thread or an
/// event loop of its own.
pub struct TaskQueue {
    tx: Sender<Runnable>,
    rx: Receiver<Runnable>,
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskQueue")
            .field("queued", &self.rx.len())
            .finish()
    }
}

impl TaskQueue {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx }
    }

    /// Spawn a future onto this queue. It is first polled on the next
    /// `run_pending` call and must be driven from the spawning thread.
    pub fn spawn_local<F>(&self, future: F) -> Task<F::Output>
    where
        F: Future + 'static,
        F::Output: 'static,
    {
        let tx = self.tx.clone();
        let (runnable, task) = async_task::spawn_local(future, move |runnable| {
            tx.send(runnable).ok();
        });
        runnable.schedule();
        task
    }

    /// Run queued runnables until the queue is empty, including any that
    /// are woken while draining. Returns how many polls were made.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        while let Ok(runnable) = self.rx.try_recv() {
            runnable.run();
            ran += 1;
        }
        ran
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
