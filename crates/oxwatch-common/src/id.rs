use snowflake::SnowflakeIdBucket;
use std::sync::Mutex;

static EVENT_ID_BUCKET: Mutex<Option<SnowflakeIdBucket>> = Mutex::new(None);

/// Seeds the alarm event id generator.
///
/// `machine_id` and `node_id` are 0-31. Calling this again replaces the bucket.
pub fn init(machine_id: i32, node_id: i32) {
    let mut bucket = EVENT_ID_BUCKET
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    *bucket = Some(SnowflakeIdBucket::new(machine_id, node_id));
}

/// Returns the next alarm event id. Lazily seeds with `(1, 1)` when [`init`]
/// was never called.
pub fn next_event_id() -> i64 {
    let mut bucket = EVENT_ID_BUCKET
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    bucket
        .get_or_insert_with(|| SnowflakeIdBucket::new(1, 1))
        .get_id()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn event_ids_are_unique() {
        init(1, 1);
        let mut ids = HashSet::new();
        for _ in 0..1000 {
            assert!(ids.insert(next_event_id()), "duplicate event id generated");
        }
    }

    #[test]
    fn event_ids_are_positive() {
        init(2, 3);
        assert!(next_event_id() > 0);
    }
}
