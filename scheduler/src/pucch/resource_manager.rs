//! PUCCH resource usage tracking
//!
//! Records, for every slot of the allocation window, which RNTI holds each dedicated PUCCH
//! resource and which common `r_PUCCH` indexes are taken.

use crate::RING_ALLOCATOR_SIZE;
use common::types::{Rnti, SlotPoint};
use tracing::trace;

#[derive(Debug, Default)]
struct SlotUsage {
    slot: Option<SlotPoint>,
    /// (resource id, holder)
    dedicated: Vec<(u8, Rnti)>,
    /// Bitmap of used `r_PUCCH` values (0-15)
    common: u16,
}

impl SlotUsage {
    fn reset(&mut self, slot: SlotPoint) {
        self.slot = Some(slot);
        self.dedicated.clear();
        self.common = 0;
    }
}

#[derive(Debug)]
pub struct PucchResourceManager {
    slots: Vec<SlotUsage>,
    started: bool,
}

impl Default for PucchResourceManager {
    fn default() -> Self {
        Self::new()
    }
}

impl PucchResourceManager {
    pub fn new() -> Self {
        Self {
            slots: (0..RING_ALLOCATOR_SIZE).map(|_| SlotUsage::default()).collect(),
            started: false,
        }
    }

    fn ring_index(sl: SlotPoint) -> usize {
        sl.to_uint() as usize % RING_ALLOCATOR_SIZE
    }

    /// Advance the window. Slot ordering is checked by the caller.
    pub fn slot_indication(&mut self, sl: SlotPoint) {
        if !self.started {
            for i in 0..RING_ALLOCATOR_SIZE as u32 {
                let s = sl + i;
                self.slots[Self::ring_index(s)].reset(s);
            }
            self.started = true;
            return;
        }
        let head = sl + (RING_ALLOCATOR_SIZE as u32 - 1);
        self.slots[Self::ring_index(head)].reset(head);
    }

    fn usage(&self, sl: SlotPoint) -> Option<&SlotUsage> {
        self.slots.get(Self::ring_index(sl)).filter(|u| u.slot == Some(sl))
    }

    fn usage_mut(&mut self, sl: SlotPoint) -> Option<&mut SlotUsage> {
        self.slots.get_mut(Self::ring_index(sl)).filter(|u| u.slot == Some(sl))
    }

    /// RNTI holding a dedicated resource at `sl`
    pub fn holder(&self, sl: SlotPoint, res_id: u8) -> Option<Rnti> {
        self.usage(sl)?
            .dedicated
            .iter()
            .find(|(id, _)| *id == res_id)
            .map(|(_, rnti)| *rnti)
    }

    /// Mark a dedicated resource as used. Fails if the resource is taken or `sl` is not
    /// tracked.
    pub fn reserve_dedicated(&mut self, sl: SlotPoint, res_id: u8, rnti: Rnti) -> bool {
        let Some(usage) = self.usage_mut(sl) else {
            return false;
        };
        if usage.dedicated.iter().any(|(id, _)| *id == res_id) {
            trace!("rnti={}: PUCCH resource {} at slot {} already in use", rnti, res_id, sl);
            return false;
        }
        usage.dedicated.push((res_id, rnti));
        true
    }

    pub fn release_dedicated(&mut self, sl: SlotPoint, res_id: u8, rnti: Rnti) -> bool {
        let Some(usage) = self.usage_mut(sl) else {
            return false;
        };
        let before = usage.dedicated.len();
        usage.dedicated.retain(|(id, holder)| !(*id == res_id && *holder == rnti));
        usage.dedicated.len() != before
    }

    pub fn is_common_used(&self, sl: SlotPoint, r_pucch: u8) -> bool {
        self.usage(sl).map_or(true, |u| u.common & (1 << r_pucch) != 0)
    }

    pub fn reserve_common(&mut self, sl: SlotPoint, r_pucch: u8) -> bool {
        match self.usage_mut(sl) {
            Some(usage) if usage.common & (1 << r_pucch) == 0 => {
                usage.common |= 1 << r_pucch;
                true
            }
            _ => false,
        }
    }

    pub fn release_common(&mut self, sl: SlotPoint, r_pucch: u8) {
        if let Some(usage) = self.usage_mut(sl) {
            usage.common &= !(1 << r_pucch);
        }
    }

    /// Release every dedicated resource held by `rnti` in the window
    pub fn release_all(&mut self, rnti: Rnti) -> usize {
        self.slots
            .iter_mut()
            .map(|usage| {
                let before = usage.dedicated.len();
                usage.dedicated.retain(|(_, holder)| *holder != rnti);
                before - usage.dedicated.len()
            })
            .sum()
    }
}
