//! Resource Grid and Collision Model
//!
//! Tracks which allocation units (one CRB x one symbol) are occupied, per link direction,
//! for every slot of the allocation window.

use crate::config::CellConfiguration;
use crate::result::SlotResult;
use crate::{SchedError, RING_ALLOCATOR_SIZE};
use bitflags::bitflags;
use common::types::{SlotPoint, SubcarrierSpacing};
use common::utils::Interval;
use std::sync::Arc;
use tracing::{debug, trace};

bitflags! {
    /// Set of channel types occupying one allocation unit
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ChannelSet: u8 {
        const PDCCH = 1 << 0;
        const PDSCH = 1 << 1;
        const SSB = 1 << 2;
        const CSI_RS = 1 << 3;
        const PUCCH = 1 << 4;
        const PUSCH = 1 << 5;
        const PRACH = 1 << 6;
    }
}

/// Physical channel type of a grant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Pdcch,
    Pdsch,
    Ssb,
    CsiRs,
    Pucch,
    Pusch,
    Prach,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkDirection {
    Downlink,
    Uplink,
}

impl Channel {
    pub fn direction(&self) -> LinkDirection {
        match self {
            Channel::Pdcch | Channel::Pdsch | Channel::Ssb | Channel::CsiRs => LinkDirection::Downlink,
            Channel::Pucch | Channel::Pusch | Channel::Prach => LinkDirection::Uplink,
        }
    }

    fn flag(&self) -> ChannelSet {
        match self {
            Channel::Pdcch => ChannelSet::PDCCH,
            Channel::Pdsch => ChannelSet::PDSCH,
            Channel::Ssb => ChannelSet::SSB,
            Channel::CsiRs => ChannelSet::CSI_RS,
            Channel::Pucch => ChannelSet::PUCCH,
            Channel::Pusch => ChannelSet::PUSCH,
            Channel::Prach => ChannelSet::PRACH,
        }
    }

    /// Whether grants of this channel may share units with the given occupants
    fn can_share(&self, occupants: ChannelSet) -> bool {
        // PUCCH grants are code-multiplexed (cyclic shift / OCC) on the same PRBs.
        occupants.is_empty() || (*self == Channel::Pucch && occupants == ChannelSet::PUCCH)
    }
}

/// Rectangular region of allocation units tagged with a channel type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GrantInfo {
    pub channel: Channel,
    pub scs: SubcarrierSpacing,
    pub symbols: Interval,
    pub crbs: Interval,
}

#[derive(Debug, Clone, Copy, Default)]
struct GridUnit {
    channels: ChannelSet,
    /// Grants holding the unit; PUCCHs stack on shared units
    users: u16,
}

/// Occupancy of one carrier and direction during one slot
#[derive(Debug, Clone)]
pub struct CarrierGrid {
    scs: SubcarrierSpacing,
    nof_crbs: u32,
    nof_symbols: u32,
    /// Units indexed by `symbol * nof_crbs + crb`
    units: Vec<GridUnit>,
}

impl CarrierGrid {
    pub fn new(scs: SubcarrierSpacing, nof_crbs: u32, nof_symbols: u32) -> Self {
        Self {
            scs,
            nof_crbs,
            nof_symbols,
            units: vec![GridUnit::default(); (nof_crbs * nof_symbols) as usize],
        }
    }

    pub fn nof_crbs(&self) -> u32 {
        self.nof_crbs
    }

    fn contains(&self, grant: &GrantInfo) -> bool {
        grant.scs == self.scs
            && grant.crbs.stop <= self.nof_crbs
            && grant.symbols.stop <= self.nof_symbols
            && !grant.crbs.is_empty()
            && !grant.symbols.is_empty()
    }

    fn unit_indexes(&self, grant: &GrantInfo) -> impl Iterator<Item = usize> + '_ {
        let crbs = grant.crbs;
        grant
            .symbols
            .iter()
            .flat_map(move |sym| crbs.iter().map(move |crb| (sym * self.nof_crbs + crb) as usize))
    }

    /// Whether the grant overlaps units held by an incompatible channel. Grants that do not
    /// fit the carrier always collide.
    pub fn collides(&self, grant: &GrantInfo) -> bool {
        if !self.contains(grant) {
            return true;
        }
        self.unit_indexes(grant)
            .any(|idx| !grant.channel.can_share(self.units[idx].channels))
    }

    /// Mark the grant units as used. Leaves the grid untouched and returns false on collision.
    pub fn reserve(&mut self, grant: &GrantInfo) -> bool {
        if self.collides(grant) {
            trace!("Grant {:?} crbs={} symbols={} collides", grant.channel, grant.crbs, grant.symbols);
            return false;
        }
        let flag = grant.channel.flag();
        let indexes: Vec<usize> = self.unit_indexes(grant).collect();
        for idx in indexes {
            let unit = &mut self.units[idx];
            debug_assert!(unit.users < u16::MAX, "Grid unit user count overflow");
            unit.channels |= flag;
            unit.users = unit.users.saturating_add(1);
        }
        true
    }

    /// Free units previously reserved for the grant
    pub fn release(&mut self, grant: &GrantInfo) {
        if !self.contains(grant) {
            return;
        }
        let flag = grant.channel.flag();
        let indexes: Vec<usize> = self.unit_indexes(grant).collect();
        for idx in indexes {
            let unit = &mut self.units[idx];
            if !unit.channels.contains(flag) {
                continue;
            }
            unit.users = unit.users.saturating_sub(1);
            if unit.users == 0 {
                unit.channels = ChannelSet::empty();
            }
        }
    }

    pub fn clear(&mut self) {
        self.units.fill(GridUnit::default());
    }

    /// Whether a single unit is free
    pub fn is_free(&self, crb: u32, symbol: u32) -> bool {
        crb < self.nof_crbs
            && symbol < self.nof_symbols
            && self.units[(symbol * self.nof_crbs + crb) as usize].channels.is_empty()
    }

    /// First contiguous run of up to `max_crbs` CRBs free over all `symbols`, searched
    /// within `bounds`. Returns the longest run found if none reaches `max_crbs`.
    pub fn find_free_crbs(&self, symbols: Interval, bounds: Interval, max_crbs: u32) -> Option<Interval> {
        if max_crbs == 0 {
            return None;
        }
        let limit = bounds.stop.min(self.nof_crbs);
        let mut best: Option<Interval> = None;
        let mut run_start: Option<u32> = None;
        // One extra iteration past the limit closes the last run.
        for crb in bounds.start..=limit {
            let free = crb < limit && symbols.iter().all(|sym| self.is_free(crb, sym));
            if free {
                let start = *run_start.get_or_insert(crb);
                if crb + 1 - start >= max_crbs {
                    return Some(Interval::new(start, crb + 1));
                }
            } else if let Some(start) = run_start.take() {
                let run = Interval::new(start, crb);
                if best.map_or(true, |b| run.length() > b.length()) {
                    best = Some(run);
                }
            }
        }
        best
    }
}

/// Grids and decision record of one slot of one cell
#[derive(Debug, Clone)]
pub struct CellSlotResourceAllocator {
    pub slot: SlotPoint,
    pub dl_res_grid: CarrierGrid,
    pub ul_res_grid: CarrierGrid,
    pub result: SlotResult,
}

impl CellSlotResourceAllocator {
    fn new(cfg: &CellConfiguration, slot: SlotPoint) -> Self {
        Self {
            slot,
            dl_res_grid: CarrierGrid::new(cfg.scs, cfg.nof_crbs, cfg.nof_symbols),
            ul_res_grid: CarrierGrid::new(cfg.scs, cfg.nof_crbs, cfg.nof_symbols),
            result: SlotResult::new(slot),
        }
    }

    fn grid(&self, channel: Channel) -> &CarrierGrid {
        match channel.direction() {
            LinkDirection::Downlink => &self.dl_res_grid,
            LinkDirection::Uplink => &self.ul_res_grid,
        }
    }

    fn grid_mut(&mut self, channel: Channel) -> &mut CarrierGrid {
        match channel.direction() {
            LinkDirection::Downlink => &mut self.dl_res_grid,
            LinkDirection::Uplink => &mut self.ul_res_grid,
        }
    }

    pub fn collides(&self, grant: &GrantInfo) -> bool {
        self.grid(grant.channel).collides(grant)
    }

    pub fn reserve(&mut self, grant: &GrantInfo) -> bool {
        self.grid_mut(grant.channel).reserve(grant)
    }

    pub fn release(&mut self, grant: &GrantInfo) {
        self.grid_mut(grant.channel).release(grant)
    }

    fn clear(&mut self, slot: SlotPoint) {
        self.slot = slot;
        self.dl_res_grid.clear();
        self.ul_res_grid.clear();
        self.result.clear(slot);
    }
}

/// Ring of per-slot resource allocators covering `[last_slot, last_slot + RING_ALLOCATOR_SIZE)`
pub struct CellResourceAllocator {
    pub cfg: Arc<CellConfiguration>,
    slots: Vec<CellSlotResourceAllocator>,
    last_slot_ind: Option<SlotPoint>,
}

impl CellResourceAllocator {
    pub fn new(cfg: Arc<CellConfiguration>) -> Self {
        let first = SlotPoint::from_count(cfg.scs, 0);
        let slots = (0..RING_ALLOCATOR_SIZE as u32)
            .map(|i| CellSlotResourceAllocator::new(&cfg, first + i))
            .collect();
        Self {
            cfg,
            slots,
            last_slot_ind: None,
        }
    }

    fn ring_index(sl: SlotPoint) -> usize {
        sl.to_uint() as usize % RING_ALLOCATOR_SIZE
    }

    /// Advance the window to `sl`. Slots must be indicated consecutively.
    pub fn slot_indication(&mut self, sl: SlotPoint) -> Result<(), SchedError> {
        match self.last_slot_ind {
            None => {
                for i in 0..RING_ALLOCATOR_SIZE as u32 {
                    let s = sl + i;
                    self.slots[Self::ring_index(s)].clear(s);
                }
                debug!("Resource grid started at slot {}", sl);
            }
            Some(last) => {
                if sl != last + 1 {
                    return Err(SchedError::OrderingViolation {
                        expected: last + 1,
                        received: sl,
                    });
                }
                // The slot leaving the trailing edge is recycled as the new head of the window.
                let head = sl + (RING_ALLOCATOR_SIZE as u32 - 1);
                self.slots[Self::ring_index(head)].clear(head);
            }
        }
        self.last_slot_ind = Some(sl);
        Ok(())
    }

    pub fn last_slot(&self) -> Option<SlotPoint> {
        self.last_slot_ind
    }

    fn check_window(&self, sl: SlotPoint) -> Result<usize, SchedError> {
        let last = self.last_slot_ind.ok_or(SchedError::NotStarted(sl))?;
        let offset = sl - last;
        if offset < 0 || offset as usize >= RING_ALLOCATOR_SIZE {
            return Err(SchedError::SlotOutOfWindow { slot: sl, last });
        }
        Ok(Self::ring_index(sl))
    }

    pub fn get(&self, sl: SlotPoint) -> Result<&CellSlotResourceAllocator, SchedError> {
        let idx = self.check_window(sl)?;
        Ok(&self.slots[idx])
    }

    pub fn get_mut(&mut self, sl: SlotPoint) -> Result<&mut CellSlotResourceAllocator, SchedError> {
        let idx = self.check_window(sl)?;
        Ok(&mut self.slots[idx])
    }

    /// Slot allocator `offset` slots after the current slot
    pub fn at_offset(&mut self, offset: u32) -> Result<&mut CellSlotResourceAllocator, SchedError> {
        let last = self.last_slot_ind.ok_or(SchedError::NotStarted(SlotPoint::from_count(self.cfg.scs, 0)))?;
        self.get_mut(last + offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers;
    use common::types::CellIndex;

    fn pdcch_grant(crbs: Interval, symbols: Interval) -> GrantInfo {
        GrantInfo { channel: Channel::Pdcch, scs: SubcarrierSpacing::Scs30, symbols, crbs }
    }

    #[test]
    fn test_reserve_and_collide() {
        let mut grid = CarrierGrid::new(SubcarrierSpacing::Scs30, 52, 14);
        let g1 = pdcch_grant(Interval::new(0, 6), Interval::new(0, 1));
        assert!(!grid.collides(&g1));
        assert!(grid.reserve(&g1));
        assert!(grid.collides(&g1));

        let overlap = pdcch_grant(Interval::new(5, 8), Interval::new(0, 2));
        assert!(!grid.reserve(&overlap));
        // Failed reservation leaves the non-overlapping units free.
        assert!(grid.is_free(6, 0));
        assert!(grid.is_free(5, 1));

        grid.release(&g1);
        assert!(grid.reserve(&overlap));
    }

    #[test]
    fn test_out_of_carrier_grant_collides() {
        let mut grid = CarrierGrid::new(SubcarrierSpacing::Scs30, 52, 14);
        assert!(!grid.reserve(&pdcch_grant(Interval::new(50, 53), Interval::new(0, 1))));
        let wrong_scs = GrantInfo {
            channel: Channel::Pdcch,
            scs: SubcarrierSpacing::Scs15,
            symbols: Interval::new(0, 1),
            crbs: Interval::new(0, 1),
        };
        assert!(grid.collides(&wrong_scs));
    }

    #[test]
    fn test_pucch_grants_share_units() {
        let mut grid = CarrierGrid::new(SubcarrierSpacing::Scs30, 52, 14);
        let pucch = GrantInfo {
            channel: Channel::Pucch,
            scs: SubcarrierSpacing::Scs30,
            symbols: Interval::new(0, 14),
            crbs: Interval::new(51, 52),
        };
        let pusch = GrantInfo { channel: Channel::Pusch, ..pucch };
        assert!(grid.reserve(&pucch));
        assert!(grid.reserve(&pucch));
        assert!(grid.collides(&pusch));

        // One release keeps the unit held by the second PUCCH.
        grid.release(&pucch);
        assert!(grid.collides(&pusch));
        grid.release(&pucch);
        assert!(grid.reserve(&pusch));
    }

    #[test]
    fn test_many_pucchs_on_one_unit() {
        let mut grid = CarrierGrid::new(SubcarrierSpacing::Scs30, 52, 14);
        let pucch = GrantInfo {
            channel: Channel::Pucch,
            scs: SubcarrierSpacing::Scs30,
            symbols: Interval::new(12, 14),
            crbs: Interval::new(0, 1),
        };
        for _ in 0..300 {
            assert!(grid.reserve(&pucch));
        }
        for _ in 0..299 {
            grid.release(&pucch);
        }
        assert!(!grid.is_free(0, 12));
        grid.release(&pucch);
        assert!(grid.is_free(0, 12));
    }

    #[test]
    fn test_find_free_crbs() {
        let mut grid = CarrierGrid::new(SubcarrierSpacing::Scs30, 20, 14);
        let symbols = Interval::new(2, 14);
        let used = GrantInfo {
            channel: Channel::Pdsch,
            scs: SubcarrierSpacing::Scs30,
            symbols,
            crbs: Interval::new(0, 4),
        };
        assert!(grid.reserve(&used));
        assert_eq!(grid.find_free_crbs(symbols, Interval::new(0, 20), 10), Some(Interval::new(4, 14)));
        assert_eq!(grid.find_free_crbs(symbols, Interval::new(0, 20), 30), Some(Interval::new(4, 20)));
    }

    #[test]
    fn test_ring_rejects_skipped_slot() {
        let cfg = Arc::new(test_helpers::cell_config(CellIndex(0)));
        let mut res = CellResourceAllocator::new(cfg);
        let sl = SlotPoint::new(SubcarrierSpacing::Scs30, 10, 0);
        res.slot_indication(sl).unwrap();
        res.slot_indication(sl + 1).unwrap();
        assert_eq!(
            res.slot_indication(sl + 3),
            Err(SchedError::OrderingViolation { expected: sl + 2, received: sl + 3 })
        );
        assert!(res.slot_indication(sl + 1).is_err());
    }

    #[test]
    fn test_ring_window_bounds() {
        let cfg = Arc::new(test_helpers::cell_config(CellIndex(0)));
        let mut res = CellResourceAllocator::new(cfg);
        let sl = SlotPoint::new(SubcarrierSpacing::Scs30, 0, 0);
        assert!(matches!(res.get(sl), Err(SchedError::NotStarted(_))));
        res.slot_indication(sl).unwrap();
        assert!(res.get(sl + (RING_ALLOCATOR_SIZE as u32 - 1)).is_ok());
        assert!(matches!(
            res.get(sl + RING_ALLOCATOR_SIZE as u32),
            Err(SchedError::SlotOutOfWindow { .. })
        ));
        assert!(res.get(sl - 1).is_err());
    }

    #[test]
    fn test_trailing_slot_cleared_on_advance() {
        let cfg = Arc::new(test_helpers::cell_config(CellIndex(0)));
        let mut res = CellResourceAllocator::new(cfg);
        let sl = SlotPoint::new(SubcarrierSpacing::Scs30, 0, 0);
        res.slot_indication(sl).unwrap();
        let grant = pdcch_grant(Interval::new(0, 6), Interval::new(0, 1));
        assert!(res.get_mut(sl).unwrap().reserve(&grant));

        res.slot_indication(sl + 1).unwrap();
        assert!(res.get(sl).is_err());
        let head = res.get(sl + RING_ALLOCATOR_SIZE as u32).unwrap();
        assert_eq!(head.slot, sl + RING_ALLOCATOR_SIZE as u32);
        assert!(!head.collides(&grant));
    }
}
