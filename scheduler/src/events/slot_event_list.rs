//! Slot-staged event list
//!
//! Producers append under a short lock; the scheduler thread takes the whole batch once
//! per slot by swapping it into a buffer it owns.

use parking_lot::Mutex;

pub struct SlotEventList<T> {
    pending: Mutex<Vec<T>>,
}

impl<T> Default for SlotEventList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SlotEventList<T> {
    pub fn new() -> Self {
        Self { pending: Mutex::new(Vec::new()) }
    }

    /// Stage an event for the next slot boundary
    pub fn push(&self, ev: T) {
        self.pending.lock().push(ev);
    }

    /// Move everything staged so far into `current`, discarding its previous content.
    /// Events pushed afterwards wait for the next call.
    pub fn slot_indication(&self, current: &mut Vec<T>) {
        current.clear();
        std::mem::swap(&mut *self.pending.lock(), current);
    }

    #[cfg(test)]
    pub fn nof_pending(&self) -> usize {
        self.pending.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_swap_keeps_order_and_boundary() {
        let list = SlotEventList::new();
        let mut current = vec![99];
        list.push(1);
        list.push(2);
        list.slot_indication(&mut current);
        assert_eq!(current, vec![1, 2]);

        list.push(3);
        assert_eq!(current, vec![1, 2]);
        list.slot_indication(&mut current);
        assert_eq!(current, vec![3]);
        assert_eq!(list.nof_pending(), 0);
    }

    #[test]
    fn test_concurrent_producers() {
        let list = SlotEventList::new();
        std::thread::scope(|s| {
            for t in 0..4u32 {
                let list = &list;
                s.spawn(move || {
                    for i in 0..250u32 {
                        list.push((t, i));
                    }
                });
            }
        });
        let mut current = Vec::new();
        list.slot_indication(&mut current);
        assert_eq!(current.len(), 1000);
        // Per-producer order is preserved.
        for t in 0..4u32 {
            let seq: Vec<u32> = current.iter().filter(|(p, _)| *p == t).map(|(_, i)| *i).collect();
            assert_eq!(seq, (0..250).collect::<Vec<_>>());
        }
    }
}
