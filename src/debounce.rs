// Single-slot debouncing for inputs that change on every keystroke (the
// price band). `Debouncer` is the clock-driven state machine; the scheduler
// runs it on tokio's timer and forwards settled values over a channel.

use std::time::Duration;

use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{sleep_until, Instant},
};
use tracing::debug;

struct Pending<T> {
    value: T,
    deadline: Instant,
}

/// At most one pending value. Scheduling again replaces it and pushes the
/// deadline out; nothing is emitted for replaced values.
pub struct Debouncer<T> {
    pending: Option<Pending<T>>,
}

impl<T> Default for Debouncer<T> {
    fn default() -> Self {
        Self { pending: None }
    }
}

impl<T> Debouncer<T> {
    pub fn new() -> Self {
        Self::default()
    }

    // Returns the value that got superseded, if any
    pub fn schedule(&mut self, value: T, delay: Duration, now: Instant) -> Option<T> {
        self.pending
            .replace(Pending {
                value,
                deadline: now + delay,
            })
            .map(|p| p.value)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.pending.as_ref().map(|p| p.deadline)
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    // Hands out the pending value once its quiet period is over
    pub fn poll(&mut self, now: Instant) -> Option<T> {
        match &self.pending {
            Some(p) if now >= p.deadline => self.pending.take().map(|p| p.value),
            _ => None,
        }
    }

    pub fn cancel(&mut self) -> Option<T> {
        self.pending.take().map(|p| p.value)
    }
}

enum Command<T> {
    Schedule(T, Duration),
    Cancel,
}

/// Owns a background task driving a [`Debouncer`]. Settled values arrive on
/// the receiver returned by [`DebounceScheduler::new`]. Dropping the scheduler
/// stops the task, and a pending value is then never emitted.
pub struct DebounceScheduler<T> {
    delay: Duration,
    commands: mpsc::UnboundedSender<Command<T>>,
    task: JoinHandle<()>,
}

impl<T: Send + 'static> DebounceScheduler<T> {
    pub fn new(delay: Duration) -> (Self, mpsc::UnboundedReceiver<T>) {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (emit, settled) = mpsc::unbounded_channel();

        let task = tokio::spawn(run(command_rx, emit));

        (
            Self {
                delay,
                commands,
                task,
            },
            settled,
        )
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn schedule(&self, value: T) {
        self.schedule_with_delay(value, self.delay);
    }

    pub fn schedule_with_delay(&self, value: T, delay: Duration) {
        // Only fails once the task is gone, at which point nothing may fire
        let _ = self.commands.send(Command::Schedule(value, delay));
    }

    pub fn cancel(&self) {
        let _ = self.commands.send(Command::Cancel);
    }
}

impl<T> Drop for DebounceScheduler<T> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run<T>(mut commands: mpsc::UnboundedReceiver<Command<T>>, emit: mpsc::UnboundedSender<T>) {
    let mut debouncer = Debouncer::new();

    loop {
        let command = match debouncer.deadline() {
            Some(deadline) => {
                tokio::select! {
                    biased;

                    command = commands.recv() => command,
                    _ = sleep_until(deadline) => {
                        if let Some(value) = debouncer.poll(Instant::now()) {
                            debug!("debounced value settled");
                            if emit.send(value).is_err() {
                                break;
                            }
                        }
                        continue;
                    }
                }
            }
            None => commands.recv().await,
        };

        match command {
            Some(Command::Schedule(value, delay)) => {
                if debouncer.schedule(value, delay, Instant::now()).is_some() {
                    debug!(delay_ms = delay.as_millis() as u64, "superseded pending value");
                }
            }
            Some(Command::Cancel) => {
                if debouncer.cancel().is_some() {
                    debug!("pending value cancelled");
                }
            }
            // Scheduler dropped: whatever is pending dies with us
            None => break,
        }
    }
}
