//! DL buffer occupancy coalescing
//!
//! One atomic slot per bearer holds the latest reported buffer state. Only the update that
//! finds the slot empty queues the bearer key, so a bearer is drained at most once per slot
//! with its most recent value.

use super::messages::DlBufferStateIndication;
use super::slot_event_list::SlotEventList;
use common::types::{Lcid, UeIndex, MAX_NOF_DU_UES, MAX_NOF_RB_LCIDS};
use std::sync::atomic::{AtomicI32, Ordering};

/// Marks a bearer without pending update
const NO_PENDING_BO: i32 = -1;

pub struct BufferOccupancyManager {
    ue_dl_bo_table: Box<[AtomicI32]>,
    pending_keys: SlotEventList<u32>,
}

impl Default for BufferOccupancyManager {
    fn default() -> Self {
        Self::new()
    }
}

impl BufferOccupancyManager {
    pub fn new() -> Self {
        Self {
            ue_dl_bo_table: (0..MAX_NOF_DU_UES * MAX_NOF_RB_LCIDS)
                .map(|_| AtomicI32::new(NO_PENDING_BO))
                .collect(),
            pending_keys: SlotEventList::new(),
        }
    }

    /// Bearer key of (UE, LCID)
    pub fn bearer_key(ue_index: UeIndex, lcid: Lcid) -> Option<u32> {
        if ue_index.as_usize() >= MAX_NOF_DU_UES || lcid.as_usize() >= MAX_NOF_RB_LCIDS {
            return None;
        }
        Some((lcid.as_usize() * MAX_NOF_DU_UES + ue_index.as_usize()) as u32)
    }

    fn from_key(key: u32) -> (UeIndex, Lcid) {
        let key = key as usize;
        (UeIndex((key % MAX_NOF_DU_UES) as u16), Lcid((key / MAX_NOF_DU_UES) as u8))
    }

    /// Store the latest buffer state. Callable from any thread; returns false for an invalid
    /// bearer.
    pub fn handle_dl_buffer_state_indication(&self, ind: DlBufferStateIndication) -> bool {
        let Some(key) = Self::bearer_key(ind.ue_index, ind.lcid) else {
            return false;
        };
        let bs = ind.bs.min(i32::MAX as u32) as i32;
        let prev = self.ue_dl_bo_table[key as usize].swap(bs, Ordering::AcqRel);
        if prev < 0 {
            // First update of the bearer since the last drain.
            self.pending_keys.push(key);
        }
        true
    }

    /// Drain the bearers updated before this call. `keys` is a scratch buffer owned by the
    /// consumer.
    pub fn slot_indication(&self, keys: &mut Vec<u32>, mut on_update: impl FnMut(DlBufferStateIndication)) {
        self.pending_keys.slot_indication(keys);
        for key in keys.drain(..) {
            let bs = self.ue_dl_bo_table[key as usize].swap(NO_PENDING_BO, Ordering::AcqRel);
            if bs < 0 {
                continue;
            }
            let (ue_index, lcid) = Self::from_key(key);
            on_update(DlBufferStateIndication { ue_index, lcid, bs: bs as u32 });
        }
    }
}
