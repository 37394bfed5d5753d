use oxwatch_common::time::Timestamp;
use std::collections::VecDeque;

/// Time-ordered trailing window of `(timestamp, item)` pairs.
pub struct SlidingWindow<T> {
    window_ms: i64,
    data: VecDeque<(Timestamp, T)>,
}

impl<T> SlidingWindow<T> {
    pub fn new(window_ms: i64) -> Self {
        Self {
            window_ms,
            data: VecDeque::new(),
        }
    }

    pub fn window_ms(&self) -> i64 {
        self.window_ms
    }

    pub fn push(&mut self, at: Timestamp, item: T) {
        self.data.push_back((at, item));
    }

    /// Drops entries at or before `now - window`.
    pub fn evict(&mut self, now: Timestamp) {
        let cutoff = now - self.window_ms;
        while let Some((at, _)) = self.data.front() {
            if *at <= cutoff {
                self.data.pop_front();
            } else {
                break;
            }
        }
    }

    /// Like [`evict`](Self::evict), but keeps the newest entry at or before
    /// the cutoff so the value held at the window start stays known.
    pub fn evict_keep_anchor(&mut self, now: Timestamp) {
        let cutoff = now - self.window_ms;
        while self.data.len() >= 2 && self.data[1].0 <= cutoff {
            self.data.pop_front();
        }
    }

    pub fn front(&self) -> Option<&(Timestamp, T)> {
        self.data.front()
    }

    pub fn back(&self) -> Option<&(Timestamp, T)> {
        self.data.back()
    }

    pub fn get(&self, index: usize) -> Option<&(Timestamp, T)> {
        self.data.get(index)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_entries_outside_window() {
        let mut window = SlidingWindow::new(1_000);
        window.push(0, 'a');
        window.push(400, 'b');
        window.push(1_200, 'c');
        window.evict(1_200);
        assert_eq!(window.len(), 2);
        assert_eq!(window.front(), Some(&(400, 'b')));
        window.evict(1_400);
        assert_eq!(window.front(), Some(&(1_200, 'c')));
    }

    #[test]
    fn anchor_eviction_keeps_held_value() {
        let mut window = SlidingWindow::new(1_000);
        window.push(0, 0.0);
        window.push(500, 1.1);
        window.evict_keep_anchor(1_499);
        assert_eq!(window.len(), 2);
        window.evict_keep_anchor(1_500);
        assert_eq!(window.len(), 1);
        window.evict_keep_anchor(10_000);
        assert_eq!(window.back(), Some(&(500, 1.1)));
    }
}
