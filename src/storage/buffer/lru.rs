use super::replacer::{FrameId, Replacer};
use std::collections::VecDeque;

/// Least-recently-unpinned eviction policy. Frames enter the queue when
/// their pin count drops to zero and leave it when repinned or evicted.
#[derive(Debug, Default)]
pub struct LruReplacer {
    // Evictable frames, least recently unpinned at the front.
    lru_list: VecDeque<FrameId>,
}

impl LruReplacer {
    pub fn new() -> Self {
        Self::default()
    }

    fn detach(&mut self, frame_id: FrameId) {
        if let Some(pos) = self.lru_list.iter().position(|&f| f == frame_id) {
            self.lru_list.remove(pos);
        }
    }
}

impl Replacer for LruReplacer {
    fn evict(&mut self) -> Option<FrameId> {
        self.lru_list.pop_front()
    }

    fn pin(&mut self, frame_id: FrameId) {
        self.detach(frame_id);
    }

    fn unpin(&mut self, frame_id: FrameId) {
        if !self.lru_list.contains(&frame_id) {
            self.lru_list.push_back(frame_id);
        }
    }

    fn size(&self) -> usize {
        self.lru_list.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evict_in_unpin_order() {
        let mut replacer = LruReplacer::new();
        replacer.unpin(1);
        replacer.unpin(2);
        replacer.unpin(3);

        assert_eq!(replacer.evict(), Some(1));
        assert_eq!(replacer.evict(), Some(2));
        assert_eq!(replacer.evict(), Some(3));
        assert_eq!(replacer.evict(), None);
    }

    #[test]
    fn test_pin_removes_from_queue() {
        let mut replacer = LruReplacer::new();
        replacer.unpin(1);
        replacer.unpin(2);
        replacer.pin(1);

        assert_eq!(replacer.size(), 1);
        assert_eq!(replacer.evict(), Some(2));
        assert_eq!(replacer.evict(), None);
    }

    #[test]
    fn test_unpin_is_idempotent() {
        let mut replacer = LruReplacer::new();
        replacer.unpin(7);
        replacer.unpin(7);

        assert_eq!(replacer.size(), 1);
        assert_eq!(replacer.evict(), Some(7));
        assert_eq!(replacer.evict(), None);
    }
}
