//! Event sinks.
//!
//! The dispatcher reports progress only through an [`EventSink`]. Sinks must
//! not block: emission happens inline on the routing task.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info};

use adreel_models::{EngineId, JobId, RouterEvent, RouterPhase};

/// Receives router events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: RouterEvent);
}

impl<F> EventSink for F
where
    F: Fn(RouterEvent) + Send + Sync,
{
    fn emit(&self, event: RouterEvent) {
        self(event)
    }
}

/// Drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn emit(&self, _event: RouterEvent) {}
}

/// Logs events through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: RouterEvent) {
        info!(
            job_id = %event.job_id,
            seq = event.seq,
            phase = %event.phase,
            engine_id = event.engine_id.as_deref().unwrap_or("-"),
            "{}",
            event.message
        );
    }
}

/// Buffers events in memory.
#[derive(Debug, Default)]
pub struct CollectingSink {
    events: Mutex<Vec<RouterEvent>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything emitted so far.
    pub fn events(&self) -> Vec<RouterEvent> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn phases(&self) -> Vec<RouterPhase> {
        self.events().into_iter().map(|e| e.phase).collect()
    }

    pub fn take(&self) -> Vec<RouterEvent> {
        std::mem::take(&mut *self.events.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl EventSink for CollectingSink {
    fn emit(&self, event: RouterEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

/// Forwards events to an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<RouterEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<RouterEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: RouterEvent) {
        // Receiver gone means nobody is listening any more.
        let _ = self.tx.send(event);
    }
}

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// Fan-out sink; any number of subscribers see every event.
///
/// Slow subscribers lag and lose the oldest events rather than blocking
/// the dispatcher.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    sender: broadcast::Sender<RouterEvent>,
}

impl Default for BroadcastSink {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RouterEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl EventSink for BroadcastSink {
    fn emit(&self, event: RouterEvent) {
        if self.sender.send(event).is_err() {
            debug!("Router event dropped: no subscribers");
        }
    }
}

/// Emits to several sinks in order.
#[derive(Clone, Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl EventSink for FanoutSink {
    fn emit(&self, event: RouterEvent) {
        if let Some((last, rest)) = self.sinks.split_last() {
            for sink in rest {
                sink.emit(event.clone());
            }
            last.emit(event);
        }
    }
}

/// Stamps events for one routing call with increasing sequence numbers.
pub struct EventEmitter<'a> {
    sink: &'a dyn EventSink,
    job_id: JobId,
    next_seq: u64,
}

impl<'a> EventEmitter<'a> {
    pub fn new(sink: &'a dyn EventSink, job_id: JobId) -> Self {
        Self {
            sink,
            job_id,
            next_seq: 0,
        }
    }

    pub fn emit(&mut self, phase: RouterPhase, engine_id: Option<&EngineId>, message: impl Into<String>) {
        let event = RouterEvent::new(
            self.next_seq,
            self.job_id.clone(),
            phase,
            engine_id.cloned(),
            message,
        );
        self.next_seq += 1;
        debug!(job_id = %event.job_id, seq = event.seq, phase = %event.phase, "{}", event.message);
        self.sink.emit(event);
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Number of events emitted so far.
    pub fn emitted(&self) -> u64 {
        self.next_seq
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emitter_sequences_events() {
        let sink = CollectingSink::new();
        let mut emitter = EventEmitter::new(&sink, JobId::from_string("j"));
        emitter.emit(RouterPhase::RouteStarted, None, "start");
        emitter.emit(RouterPhase::DispatchAttempt, Some(&"e".to_string()), "try");

        let events = sink.events();
        assert_eq!(events.iter().map(|e| e.seq).collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(events[1].engine_id.as_deref(), Some("e"));
        assert!(events[0].timestamp <= events[1].timestamp);
    }

    #[test]
    fn test_closure_sink() {
        let seen = Mutex::new(0);
        let sink = |_e: RouterEvent| {
            *seen.lock().unwrap() += 1;
        };
        let mut emitter = EventEmitter::new(&sink, JobId::new());
        emitter.emit(RouterPhase::RouteStarted, None, "a");
        emitter.emit(RouterPhase::RouteCompleted, None, "b");
        assert_eq!(*seen.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_broadcast_and_fanout() {
        let broadcast = Arc::new(BroadcastSink::new(16));
        let mut rx = broadcast.subscribe();
        let collected = Arc::new(CollectingSink::new());
        let fanout = FanoutSink::new()
            .with(broadcast.clone())
            .with(collected.clone());

        let mut emitter = EventEmitter::new(&fanout, JobId::from_string("j"));
        emitter.emit(RouterPhase::RouteStarted, None, "start");

        assert_eq!(rx.recv().await.unwrap().phase, RouterPhase::RouteStarted);
        assert_eq!(collected.phases(), vec![RouterPhase::RouteStarted]);
    }

    #[tokio::test]
    async fn test_channel_sink_survives_dropped_receiver() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        let mut emitter = EventEmitter::new(&sink, JobId::new());
        emitter.emit(RouterPhase::RouteStarted, None, "ignored");
    }
}
