//! Progress reporting.
//!
//! The engine never talks to a UI directly. It pushes `ProgressEvent`s into a
//! `ProgressSink`; the default sink is a `ProgressReporter`, one end of a
//! bounded channel whose other end is a `Subscription` held by the shell.
//!
//! Delivery guarantees:
//! - events arrive in the order they were produced
//! - emitting never blocks; when the buffer is full the oldest buffered event
//!   is dropped to make room
//! - the terminal event is never dropped, and nothing is delivered after it

use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use tracing::trace;

use crate::model::ProgressEvent;

/// Destination for progress events produced by a running job.
pub trait ProgressSink: Send {
    /// Called once per processed item and once with the terminal event.
    fn emit(&mut self, event: ProgressEvent);
}

impl ProgressSink for Vec<ProgressEvent> {
    fn emit(&mut self, event: ProgressEvent) {
        self.push(event);
    }
}

/// Create a connected reporter/subscription pair buffering up to `capacity` events.
pub fn channel(capacity: usize) -> (ProgressReporter, Subscription) {
    let (sender, receiver) = bounded(capacity.max(1));
    let reporter = ProgressReporter {
        sender,
        overflow: receiver.clone(),
        closed: false,
        dropped: 0,
    };
    (reporter, Subscription::new(receiver))
}

/// Producer half of a progress channel. Owned by the job's worker.
#[derive(Debug)]
pub struct ProgressReporter {
    sender: Sender<ProgressEvent>,
    // Second handle on the queue, used only to evict the oldest event on overflow.
    overflow: Receiver<ProgressEvent>,
    closed: bool,
    dropped: u64,
}

impl ProgressReporter {
    /// Number of events evicted because the subscriber fell behind.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// True once the terminal event has been sent.
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl ProgressSink for ProgressReporter {
    fn emit(&mut self, event: ProgressEvent) {
        if self.closed {
            trace!("ignoring progress event after terminal event");
            return;
        }
        let terminal = event.is_terminal();

        let mut pending = event;
        loop {
            match self.sender.try_send(pending) {
                Ok(()) => break,
                Err(TrySendError::Full(event)) => {
                    if self.overflow.try_recv().is_ok() {
                        self.dropped += 1;
                    }
                    pending = event;
                }
                Err(TrySendError::Disconnected(_)) => break,
            }
        }

        if terminal {
            self.closed = true;
        }
    }
}

/// Consumer half of a progress channel.
///
/// Iterating blocks until the next event and ends after the terminal event.
/// A subscription is not restartable: once it has ended it stays closed.
#[derive(Debug)]
pub struct Subscription {
    receiver: Option<Receiver<ProgressEvent>>,
}

impl Subscription {
    fn new(receiver: Receiver<ProgressEvent>) -> Self {
        Subscription {
            receiver: Some(receiver),
        }
    }

    /// A subscription that yields nothing.
    pub fn closed() -> Self {
        Subscription { receiver: None }
    }

    pub fn is_closed(&self) -> bool {
        self.receiver.is_none()
    }

    /// Take the next event if one is already buffered.
    pub fn poll(&mut self) -> Option<ProgressEvent> {
        let receiver = self.receiver.as_ref()?;
        match receiver.try_recv() {
            Ok(event) => Some(self.observe(event)),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                self.receiver = None;
                None
            }
        }
    }

    /// Wait up to `timeout` for the next event.
    pub fn recv_timeout(&mut self, timeout: Duration) -> Option<ProgressEvent> {
        let receiver = self.receiver.as_ref()?;
        match receiver.recv_timeout(timeout) {
            Ok(event) => Some(self.observe(event)),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => {
                self.receiver = None;
                None
            }
        }
    }

    fn observe(&mut self, event: ProgressEvent) -> ProgressEvent {
        if event.is_terminal() {
            self.receiver = None;
        }
        event
    }
}

impl Iterator for Subscription {
    type Item = ProgressEvent;

    fn next(&mut self) -> Option<ProgressEvent> {
        let receiver = self.receiver.as_ref()?;
        match receiver.recv() {
            Ok(event) => Some(self.observe(event)),
            Err(_) => {
                self.receiver = None;
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Terminal, WorkItem};

    fn item_event(n: usize) -> ProgressEvent {
        ProgressEvent::item(n, 10, WorkItem::file(format!("{}.txt", n)), None)
    }

    #[test]
    fn test_events_arrive_in_order_and_end_after_terminal() {
        let (mut reporter, subscription) = channel(16);

        reporter.emit(item_event(1));
        reporter.emit(item_event(2));
        reporter.emit(ProgressEvent::finished(2, 2, Terminal::Completed, None));

        let events: Vec<_> = subscription.collect();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].completed_count, 1);
        assert_eq!(events[1].completed_count, 2);
        assert_eq!(events[2].terminal, Terminal::Completed);
    }

    #[test]
    fn test_nothing_is_delivered_after_terminal() {
        let (mut reporter, mut subscription) = channel(16);

        reporter.emit(ProgressEvent::finished(0, 0, Terminal::Cancelled, None));
        reporter.emit(item_event(1));
        assert!(reporter.is_closed());

        assert_eq!(
            subscription.poll().map(|e| e.terminal),
            Some(Terminal::Cancelled)
        );
        assert!(subscription.is_closed());
        assert_eq!(subscription.poll(), None);
    }

    #[test]
    fn test_overflow_drops_oldest_but_keeps_terminal() {
        let (mut reporter, subscription) = channel(2);

        for n in 1..=5 {
            reporter.emit(item_event(n));
        }
        reporter.emit(ProgressEvent::finished(5, 5, Terminal::Completed, None));

        assert_eq!(reporter.dropped(), 4);
        let events: Vec<_> = subscription.collect();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].completed_count, 5);
        assert!(events[1].is_terminal());
    }

    #[test]
    fn test_subscription_ends_when_reporter_dropped() {
        let (reporter, mut subscription) = channel(4);
        drop(reporter);

        assert_eq!(subscription.next(), None);
        assert!(subscription.is_closed());
    }

    #[test]
    fn test_poll_on_empty_channel_stays_open() {
        let (_reporter, mut subscription) = channel(4);

        assert_eq!(subscription.poll(), None);
        assert!(!subscription.is_closed());
        assert_eq!(subscription.recv_timeout(Duration::from_millis(5)), None);
        assert!(!subscription.is_closed());
    }

    #[test]
    fn test_closed_subscription_is_empty() {
        let mut subscription = Subscription::closed();
        assert!(subscription.is_closed());
        assert_eq!(subscription.next(), None);
    }
}
