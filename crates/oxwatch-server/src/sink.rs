use oxwatch_common::id::next_event_id;
use oxwatch_common::time::{format_timestamp, Timestamp};
use oxwatch_common::types::{AlarmEvent, EventId, RtnCause};
use oxwatch_detect::AlarmSink;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

/// Alarm sink that reports through `tracing` and keeps open alarms in
/// memory so clears can be logged with their origin.
#[derive(Default)]
pub struct LoggingAlarmSink {
    open: Mutex<HashMap<EventId, AlarmEvent>>,
    raised: AtomicU64,
    cleared: AtomicU64,
}

impl LoggingAlarmSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<EventId, AlarmEvent>> {
        self.open
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn open_count(&self) -> usize {
        self.lock().len()
    }

    pub fn raised(&self) -> u64 {
        self.raised.load(Ordering::Relaxed)
    }

    pub fn cleared(&self) -> u64 {
        self.cleared.load(Ordering::Relaxed)
    }
}

impl AlarmSink for LoggingAlarmSink {
    fn raise(&self, event: &AlarmEvent) -> anyhow::Result<EventId> {
        let id = next_event_id();
        self.raised.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            event_id = id,
            definition_id = %event.definition_id,
            signal_id = %event.signal_id,
            level = %event.level,
            active = %format_timestamp(event.active_timestamp),
            rtn_applicable = event.rtn_applicable,
            "ALARM"
        );
        if event.rtn_applicable {
            self.lock().insert(id, event.clone());
        }
        Ok(id)
    }

    fn return_to_normal(
        &self,
        event_id: EventId,
        timestamp: Timestamp,
        cause: RtnCause,
    ) -> anyhow::Result<()> {
        let event = self
            .lock()
            .remove(&event_id)
            .ok_or_else(|| anyhow::anyhow!("alarm event {event_id} is not open"))?;
        self.cleared.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            event_id,
            definition_id = %event.definition_id,
            signal_id = %event.signal_id,
            level = %event.level,
            active_for_ms = timestamp - event.active_timestamp,
            rtn = %format_timestamp(timestamp),
            cause = %cause,
            "CLEARED"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxwatch_common::types::AlarmLevel;

    fn event(rtn_applicable: bool) -> AlarmEvent {
        AlarmEvent {
            definition_id: "d".to_string(),
            signal_id: "s".to_string(),
            level: AlarmLevel::Critical,
            active_timestamp: 1_000,
            rtn_applicable,
            rtn_timestamp: None,
            rtn_cause: None,
        }
    }

    #[test]
    fn tracks_open_alarms() {
        let sink = LoggingAlarmSink::new();
        let id = sink.raise(&event(true)).unwrap();
        sink.raise(&event(false)).unwrap();
        assert_eq!(sink.open_count(), 1);
        assert_eq!(sink.raised(), 2);

        sink.return_to_normal(id, 2_000, RtnCause::ReturnToNormal).unwrap();
        assert_eq!(sink.open_count(), 0);
        assert_eq!(sink.cleared(), 1);
        assert!(sink.return_to_normal(id, 3_000, RtnCause::Deactivated).is_err());
    }
}
