use std::sync::{mpsc, Arc, Mutex};

use crate::ExportEvent;

/// Receives lifecycle notifications from a running export job.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: ExportEvent);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn emit(&self, _event: ExportEvent) {}
}

pub struct ChannelEventSink {
    tx: mpsc::Sender<ExportEvent>,
}

impl ChannelEventSink {
    pub fn new(tx: mpsc::Sender<ExportEvent>) -> Self {
        Self { tx }
    }
}

impl EventSink for ChannelEventSink {
    fn emit(&self, event: ExportEvent) {
        // A dropped receiver only means nobody is listening anymore.
        let _ = self.tx.send(event);
    }
}

/// Keeps every event in memory; clones share the same buffer.
#[derive(Debug, Default, Clone)]
pub struct CollectingEventSink {
    events: Arc<Mutex<Vec<ExportEvent>>>,
}

impl CollectingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ExportEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn take(&self) -> Vec<ExportEvent> {
        self.events
            .lock()
            .map(|mut events| events.drain(..).collect())
            .unwrap_or_default()
    }
}

impl EventSink for CollectingEventSink {
    fn emit(&self, event: ExportEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_sink_survives_a_dropped_receiver() {
        let (tx, rx) = mpsc::channel();
        let sink = ChannelEventSink::new(tx);
        sink.emit(ExportEvent::ExportStarting { export: 1 });
        assert_eq!(rx.recv().unwrap(), ExportEvent::ExportStarting { export: 1 });
        drop(rx);
        sink.emit(ExportEvent::ExportEnded { export: 1 });
    }

    #[test]
    fn collecting_sink_clones_share_events() {
        let sink = CollectingEventSink::new();
        let clone = sink.clone();
        clone.emit(ExportEvent::ExportCompleted { export: 3 });
        assert_eq!(sink.take(), vec![ExportEvent::ExportCompleted { export: 3 }]);
        assert!(sink.events().is_empty());
    }
}
