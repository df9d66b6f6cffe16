use std::collections::VecDeque;

use qrouter_core::RouterEvent;

/// FIFO of pending parallel-router events.
///
/// Equal events collapse to their last occurrence before each pop, so an
/// event queued repeatedly during one step runs once, in its latest slot.
#[derive(Debug, Default)]
pub struct EventQueue {
    events: VecDeque<RouterEvent>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: RouterEvent) {
        self.events.push_back(event);
    }

    /// Deduplicate, then take the front event.
    pub fn pop(&mut self) -> Option<RouterEvent> {
        self.dedup_keep_last();
        self.events.pop_front()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    fn dedup_keep_last(&mut self) {
        let mut kept: Vec<RouterEvent> = Vec::with_capacity(self.events.len());
        while let Some(event) = self.events.pop_back() {
            if !kept.contains(&event) {
                kept.push(event);
            }
        }
        self.events.extend(kept.into_iter().rev());
    }
}
