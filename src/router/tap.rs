//! Timer thread releasing tapped outputs.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::io;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{RecvTimeoutError, Sender};

use crate::model::OutputId;

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
struct PendingRelease {
    due: Instant,
    generation: u64,
    id: OutputId,
}

/// Single timer thread ordering pending releases by deadline.
///
/// Scheduling never blocks the caller. Dropping the scheduler discards
/// releases that have not come due yet.
pub(super) struct TapScheduler {
    sender: Option<Sender<PendingRelease>>,
    worker: Option<JoinHandle<()>>,
}

impl TapScheduler {
    pub(super) fn start<F>(on_due: F) -> io::Result<Self>
    where
        F: Fn(OutputId, u64) + Send + 'static,
    {
        let (sender, receiver) = crossbeam_channel::unbounded::<PendingRelease>();

        let worker = thread::Builder::new()
            .name("tap_release".to_string())
            .spawn(move || {
                let mut pending: BinaryHeap<Reverse<PendingRelease>> = BinaryHeap::new();
                loop {
                    let received = match pending.peek() {
                        Some(Reverse(next)) => receiver
                            .recv_timeout(next.due.saturating_duration_since(Instant::now())),
                        None => receiver.recv().map_err(|_| RecvTimeoutError::Disconnected),
                    };

                    match received {
                        Ok(release) => pending.push(Reverse(release)),
                        Err(RecvTimeoutError::Timeout) => {}
                        Err(RecvTimeoutError::Disconnected) => break,
                    }

                    let now = Instant::now();
                    while pending.peek().is_some_and(|Reverse(next)| next.due <= now) {
                        if let Some(Reverse(release)) = pending.pop() {
                            on_due(release.id, release.generation);
                        }
                    }
                }
            })?;

        Ok(Self {
            sender: Some(sender),
            worker: Some(worker),
        })
    }

    pub(super) fn schedule(&self, id: OutputId, generation: u64, after: Duration) {
        if let Some(sender) = &self.sender {
            let _ = sender.send(PendingRelease {
                due: Instant::now() + after,
                generation,
                id,
            });
        }
    }
}

impl Drop for TapScheduler {
    fn drop(&mut self) {
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_releases_fire_in_deadline_order() {
        let fired = Arc::new(Mutex::new(Vec::new()));
        let sink = fired.clone();
        let scheduler = TapScheduler::start(move |id, generation| {
            sink.lock().unwrap().push((id, generation));
        })
        .unwrap();

        scheduler.schedule(OutputId::Joystick(2), 2, Duration::from_millis(40));
        scheduler.schedule(OutputId::Joystick(1), 1, Duration::from_millis(5));

        let deadline = Instant::now() + Duration::from_secs(2);
        while fired.lock().unwrap().len() < 2 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(
            *fired.lock().unwrap(),
            vec![(OutputId::Joystick(1), 1), (OutputId::Joystick(2), 2)]
        );
    }

    #[test]
    fn test_drop_discards_pending() {
        let fired = Arc::new(Mutex::new(0usize));
        let sink = fired.clone();
        let scheduler = TapScheduler::start(move |_, _| {
            *sink.lock().unwrap() += 1;
        })
        .unwrap();

        scheduler.schedule(OutputId::Joystick(1), 1, Duration::from_secs(30));
        drop(scheduler);
        assert_eq!(*fired.lock().unwrap(), 0);
    }
}
