//! The expiry scheduler: a delay-ordered queue running on its own task.
//!
//! Callers hand in `(delay, action)` pairs over a command channel; the
//! task sleeps until the earliest deadline and fires the action into
//! the handler. Events sharing a deadline fire in insertion order.
//! Shutting down closes the channel and drops whatever is still queued.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

struct Event<A> {
    deadline: Instant,
    seq: u64,
    action: A,
}

impl<A> PartialEq for Event<A> {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl<A> Eq for Event<A> {}

impl<A> PartialOrd for Event<A> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<A> Ord for Event<A> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.deadline
            .cmp(&other.deadline)
            .then(self.seq.cmp(&other.seq))
    }
}

enum Command<A> {
    Insert { delay: Duration, action: A },
    Shutdown,
}

/// Handle to the scheduler task. Dropping the handle also stops the
/// task, since the command channel closes.
pub struct Scheduler<A: Send + 'static> {
    commands: mpsc::UnboundedSender<Command<A>>,
    task: JoinHandle<()>,
}

impl<A: Send + 'static> Scheduler<A> {
    /// Spawns the queue task. `handler` runs on that task for every
    /// fired event; keep it to quick state mutations.
    pub fn spawn(mut handler: impl FnMut(A) + Send + 'static) -> Self {
        let (commands, mut rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(async move {
            let mut queue: BinaryHeap<Reverse<Event<A>>> = BinaryHeap::new();
            let mut seq: u64 = 0;

            loop {
                let deadline = queue.peek().map(|Reverse(event)| event.deadline);
                let sleep = async move {
                    match deadline {
                        Some(deadline) => tokio::time::sleep_until(deadline).await,
                        None => std::future::pending().await,
                    }
                };

                tokio::select! {
                    command = rx.recv() => match command {
                        Some(Command::Insert { delay, action }) => {
                            queue.push(Reverse(Event {
                                deadline: Instant::now() + delay,
                                seq,
                                action,
                            }));
                            seq += 1;
                        }
                        Some(Command::Shutdown) | None => break,
                    },
                    _ = sleep => {
                        if let Some(Reverse(event)) = queue.pop() {
                            handler(event.action);
                        }
                    }
                }
            }
            // Pending events are cancelled, not fired.
            queue.clear();
        });

        Self { commands, task }
    }

    /// Schedules `action` for `now + delay`. Inserting after shutdown
    /// is a no-op: cancellation is best-effort in the other direction
    /// too, so callers must tolerate both outcomes.
    pub fn insert(&self, delay: Duration, action: A) {
        let _ = self.commands.send(Command::Insert { delay, action });
    }

    /// Stops the task and drops all pending events. An event already
    /// being handled still completes; everything queued is cancelled.
    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
    }
}

impl<A: Send + 'static> Drop for Scheduler<A> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn recorder() -> (Arc<Mutex<Vec<u32>>>, impl FnMut(u32) + Send + 'static) {
        let fired = Arc::new(Mutex::new(Vec::new()));
        let sink = fired.clone();
        (fired, move |action| sink.lock().unwrap().push(action))
    }

    #[tokio::test(start_paused = true)]
    async fn fires_in_deadline_order() {
        let (fired, handler) = recorder();
        let scheduler = Scheduler::spawn(handler);

        scheduler.insert(Duration::from_secs(30), 3);
        scheduler.insert(Duration::from_secs(10), 1);
        scheduler.insert(Duration::from_secs(20), 2);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(*fired.lock().unwrap(), vec![1, 2, 3]);

        scheduler.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn equal_deadlines_fire_in_insertion_order() {
        let (fired, handler) = recorder();
        let scheduler = Scheduler::spawn(handler);

        for action in 0..8 {
            scheduler.insert(Duration::from_secs(5), action);
        }

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(*fired.lock().unwrap(), (0..8).collect::<Vec<_>>());

        scheduler.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_pending_events() {
        let (fired, handler) = recorder();
        let scheduler = Scheduler::spawn(handler);

        scheduler.insert(Duration::from_secs(100), 9);
        tokio::time::sleep(Duration::from_secs(1)).await;
        scheduler.shutdown();

        tokio::time::sleep(Duration::from_secs(200)).await;
        assert!(fired.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn later_insert_can_fire_first() {
        let (fired, handler) = recorder();
        let scheduler = Scheduler::spawn(handler);

        scheduler.insert(Duration::from_secs(50), 2);
        tokio::time::sleep(Duration::from_secs(1)).await;
        scheduler.insert(Duration::from_secs(5), 1);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(*fired.lock().unwrap(), vec![1, 2]);

        scheduler.shutdown();
    }
}
