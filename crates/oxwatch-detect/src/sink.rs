use oxwatch_common::id::next_event_id;
use oxwatch_common::time::Timestamp;
use oxwatch_common::types::{AlarmEvent, EventId, RtnCause};
use std::sync::{Mutex, MutexGuard};

/// Receiver of alarm raises and clears.
///
/// Ownership of an event passes to the sink on [`raise`](Self::raise); the
/// engine keeps only the returned id.
pub trait AlarmSink: Send + Sync {
    fn raise(&self, event: &AlarmEvent) -> anyhow::Result<EventId>;

    fn return_to_normal(
        &self,
        event_id: EventId,
        timestamp: Timestamp,
        cause: RtnCause,
    ) -> anyhow::Result<()>;
}

/// Sink that keeps every event in memory.
#[derive(Default)]
pub struct MemoryAlarmSink {
    events: Mutex<Vec<(EventId, AlarmEvent)>>,
}

impl MemoryAlarmSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<(EventId, AlarmEvent)>> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// All events in raise order.
    pub fn events(&self) -> Vec<AlarmEvent> {
        self.lock().iter().map(|(_, event)| event.clone()).collect()
    }

    pub fn open_events(&self) -> Vec<AlarmEvent> {
        self.lock()
            .iter()
            .filter(|(_, event)| event.is_open())
            .map(|(_, event)| event.clone())
            .collect()
    }

    pub fn get(&self, event_id: EventId) -> Option<AlarmEvent> {
        self.lock()
            .iter()
            .find(|(id, _)| *id == event_id)
            .map(|(_, event)| event.clone())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl AlarmSink for MemoryAlarmSink {
    fn raise(&self, event: &AlarmEvent) -> anyhow::Result<EventId> {
        let id = next_event_id();
        self.lock().push((id, event.clone()));
        Ok(id)
    }

    fn return_to_normal(
        &self,
        event_id: EventId,
        timestamp: Timestamp,
        cause: RtnCause,
    ) -> anyhow::Result<()> {
        let mut events = self.lock();
        let (_, event) = events
            .iter_mut()
            .find(|(id, _)| *id == event_id)
            .ok_or_else(|| anyhow::anyhow!("unknown alarm event {event_id}"))?;
        if !event.is_open() {
            anyhow::bail!("alarm event {event_id} is not open");
        }
        event.rtn_timestamp = Some(timestamp);
        event.rtn_cause = Some(cause);
        Ok(())
    }
}
