use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::debug;

#[derive(Debug, Default, Clone, Copy)]
struct Tombstone {
    // 尚未观察到取消的在途单元，可能暂时为负
    outstanding: isize,
    armed: bool,
}

/// 已取消章节的墓碑集合，按 (章节ID, 代次) 记录
///
/// 取消时先 `add`，从任务表移除后再用移除时的在途数量 `arm`。
/// 在途单元恢复执行时发现任务已不在，就调用 `observe`。
/// 所有在途单元都观察过之后墓碑被清除。
#[derive(Debug, Default)]
pub struct TombstoneSet {
    entries: DashMap<(String, u64), Tombstone>,
}

impl TombstoneSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, chapter_id: &str, generation: u64) {
        self.entries
            .entry((chapter_id.to_string(), generation))
            .or_default();
    }

    pub fn arm(&self, chapter_id: &str, generation: u64, in_flight: usize) {
        if let Entry::Occupied(mut entry) = self.entries.entry((chapter_id.to_string(), generation)) {
            let tombstone = entry.get_mut();
            tombstone.outstanding += in_flight as isize;
            tombstone.armed = true;
            if tombstone.outstanding <= 0 {
                entry.remove();
                debug!("章节 {} 没有在途任务，墓碑已清除", chapter_id);
            }
        }
    }

    /// 在途单元观察到取消，返回该单元是否确实属于已取消的任务
    pub fn observe(&self, chapter_id: &str, generation: u64) -> bool {
        match self.entries.entry((chapter_id.to_string(), generation)) {
            Entry::Occupied(mut entry) => {
                let tombstone = entry.get_mut();
                tombstone.outstanding -= 1;
                if tombstone.armed && tombstone.outstanding <= 0 {
                    entry.remove();
                    debug!("章节 {} 的在途任务已全部停止，墓碑已清除", chapter_id);
                }
                true
            }
            Entry::Vacant(_) => false,
        }
    }

    #[cfg(test)]
    fn is_cancelled(&self, chapter_id: &str) -> bool {
        self.entries.iter().any(|e| e.key().0 == chapter_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleared_after_all_in_flight_units_observe() {
        let tombstones = TombstoneSet::new();
        tombstones.add("1", 3);
        tombstones.arm("1", 3, 2);
        assert!(tombstones.is_cancelled("1"));
        assert!(tombstones.observe("1", 3));
        assert!(tombstones.is_cancelled("1"));
        assert!(tombstones.observe("1", 3));
        assert!(!tombstones.is_cancelled("1"));
        assert!(!tombstones.observe("1", 3));
    }

    #[test]
    fn nothing_in_flight_clears_immediately() {
        let tombstones = TombstoneSet::new();
        tombstones.add("1", 1);
        tombstones.arm("1", 1, 0);
        assert!(tombstones.is_empty());
    }

    #[test]
    fn observation_before_arming_is_counted() {
        let tombstones = TombstoneSet::new();
        tombstones.add("1", 1);
        assert!(tombstones.observe("1", 1));
        assert!(tombstones.is_cancelled("1"));
        tombstones.arm("1", 1, 1);
        assert!(tombstones.is_empty());
    }

    #[test]
    fn generations_are_independent() {
        let tombstones = TombstoneSet::new();
        tombstones.add("1", 1);
        tombstones.arm("1", 1, 1);
        assert!(!tombstones.observe("1", 2));
        assert_eq!(tombstones.len(), 1);
    }
}
