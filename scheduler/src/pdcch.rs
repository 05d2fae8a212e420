//! PDCCH Scheduler
//!
//! Finds collision-free CCE positions for the DCIs of a slot. Each new DCI is placed by a
//! depth-first search over the candidate positions of all DCIs already allocated in that
//! slot, so earlier DCIs may be moved to other candidates to make room.

use crate::config::{AggregationLevel, CellConfiguration, CoresetConfig, SearchSpaceConfig, UeCellConfiguration};
use crate::resource_grid::{CellSlotResourceAllocator, Channel, GrantInfo};
use crate::result::{DciFormat, PdcchInfo};
use crate::{SchedError, RING_ALLOCATOR_SIZE};
use common::types::{Rnti, SlotPoint};
use common::utils::Interval;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Number of REGs per CCE
const REGS_PER_CCE: u32 = 6;

/// Source of the CCE candidate positions monitored by a UE
///
/// The TS 38.213 search space hashing function lives behind this interface.
pub trait PdcchCandidateProvider: Send {
    /// Candidate first-CCE positions in priority order
    fn cce_candidates(
        &self,
        ss: &SearchSpaceConfig,
        coreset: &CoresetConfig,
        aggr_lvl: AggregationLevel,
        rnti: Rnti,
        slot: SlotPoint,
    ) -> Vec<u32>;
}

/// Candidates taken verbatim from the search space configuration
#[derive(Debug, Default, Clone, Copy)]
pub struct ConfiguredCandidates;

impl PdcchCandidateProvider for ConfiguredCandidates {
    fn cce_candidates(
        &self,
        ss: &SearchSpaceConfig,
        coreset: &CoresetConfig,
        aggr_lvl: AggregationLevel,
        _rnti: Rnti,
        _slot: SlotPoint,
    ) -> Vec<u32> {
        let nof_cces = coreset.nof_cces();
        ss.candidates
            .get(aggr_lvl)
            .iter()
            .copied()
            .filter(|ncce| ncce + aggr_lvl.nof_cces() <= nof_cces)
            .collect()
    }
}

/// Resources spanned by a PDCCH candidate.
///
/// With non-interleaved mapping the REGs of consecutive CCEs are numbered time-first, so the
/// candidate covers a `6 * L / duration` CRB wide rectangle over the whole CORESET duration.
pub fn cce_grant(cfg: &CellConfiguration, coreset: &CoresetConfig, ncce: u32, aggr_lvl: AggregationLevel) -> GrantInfo {
    let first_reg = ncce * REGS_PER_CCE;
    let last_reg = (ncce + aggr_lvl.nof_cces()) * REGS_PER_CCE;
    GrantInfo {
        channel: Channel::Pdcch,
        scs: cfg.scs,
        symbols: Interval::with_length(coreset.start_symbol, coreset.duration),
        crbs: Interval::new(
            coreset.start_crb + first_reg / coreset.duration,
            coreset.start_crb + last_reg / coreset.duration,
        ),
    }
}

/// DCI allocated in a slot
#[derive(Debug, Clone)]
struct AllocRecord {
    is_dl: bool,
    /// Position of the PDCCH in the slot result list of its direction
    pdcch_index: usize,
    coreset: CoresetConfig,
    aggr_lvl: AggregationLevel,
    candidates: Vec<u32>,
}

/// DFS decision tree node
#[derive(Debug, Clone, Copy, PartialEq)]
struct TreeNode {
    dci_iter_index: usize,
    ncce: u32,
    record_index: usize,
}

/// Per-slot DFS state
#[derive(Debug, Default)]
struct PdcchSlotAllocator {
    /// DCIs committed in the slot
    records: Vec<AllocRecord>,
    /// Last successful placement; `dfs_tree[i]` is the position of `records[i]`
    dfs_tree: Vec<TreeNode>,
}

impl PdcchSlotAllocator {
    fn clear(&mut self) {
        self.records.clear();
        self.dfs_tree.clear();
    }

    fn alloc_pdcch(&mut self, cfg: &CellConfiguration, slot_alloc: &mut CellSlotResourceAllocator, record: AllocRecord) -> bool {
        let mut saved_dfs_tree: Option<Vec<TreeNode>> = None;

        // Try to place the new DCI. On failure, retry with the next permutation of the
        // positions of the DCIs already placed.
        loop {
            if let Some(node) = Self::alloc_dfs_node(cfg, slot_alloc, &record, self.dfs_tree.len(), 0) {
                self.dfs_tree.push(node);
                self.records.push(record);
                self.commit_positions(slot_alloc);
                return true;
            }
            if saved_dfs_tree.is_none() {
                saved_dfs_tree = Some(self.dfs_tree.clone());
            }
            if !self.get_next_dfs(cfg, slot_alloc) {
                break;
            }
        }

        // Revert to the placement that existed before this DCI was attempted.
        for node in std::mem::take(&mut self.dfs_tree) {
            let rec = &self.records[node.record_index];
            slot_alloc.release(&cce_grant(cfg, &rec.coreset, node.ncce, rec.aggr_lvl));
        }
        self.dfs_tree = saved_dfs_tree.unwrap_or_default();
        for node in &self.dfs_tree {
            let rec = &self.records[node.record_index];
            let restored = slot_alloc.reserve(&cce_grant(cfg, &rec.coreset, node.ncce, rec.aggr_lvl));
            debug_assert!(restored, "Failed to restore PDCCH placement");
        }
        false
    }

    /// Place `record` at the first collision-free candidate starting from `dci_iter_index`
    fn alloc_dfs_node(
        cfg: &CellConfiguration,
        slot_alloc: &mut CellSlotResourceAllocator,
        record: &AllocRecord,
        record_index: usize,
        dci_iter_index: usize,
    ) -> Option<TreeNode> {
        for (iter_index, &ncce) in record.candidates.iter().enumerate().skip(dci_iter_index) {
            let grant = cce_grant(cfg, &record.coreset, ncce, record.aggr_lvl);
            if slot_alloc.reserve(&grant) {
                return Some(TreeNode {
                    dci_iter_index: iter_index,
                    ncce,
                    record_index,
                });
            }
        }
        None
    }

    /// Move to the next complete placement of the already committed DCIs
    fn get_next_dfs(&mut self, cfg: &CellConfiguration, slot_alloc: &mut CellSlotResourceAllocator) -> bool {
        loop {
            let Some(last) = self.dfs_tree.pop() else {
                // Root reached: every permutation has been tried.
                return false;
            };
            let rec = &self.records[last.record_index];
            slot_alloc.release(&cce_grant(cfg, &rec.coreset, last.ncce, rec.aggr_lvl));

            // Re-add the popped node with a higher candidate index and refill the rest.
            let mut start_child_idx = last.dci_iter_index + 1;
            while self.dfs_tree.len() < self.records.len() {
                let idx = self.dfs_tree.len();
                match Self::alloc_dfs_node(cfg, slot_alloc, &self.records[idx], idx, start_child_idx) {
                    Some(node) => self.dfs_tree.push(node),
                    None => break,
                }
                start_child_idx = 0;
            }
            if self.dfs_tree.len() == self.records.len() {
                return true;
            }
        }
    }

    /// Propagate the tree positions to the slot result
    fn commit_positions(&self, slot_alloc: &mut CellSlotResourceAllocator) {
        for node in &self.dfs_tree {
            let rec = &self.records[node.record_index];
            let list = if rec.is_dl {
                &mut slot_alloc.result.dl_pdcchs
            } else {
                &mut slot_alloc.result.ul_pdcchs
            };
            if let Some(pdcch) = list.get_mut(rec.pdcch_index) {
                pdcch.ncce = node.ncce;
            }
        }
    }

    /// Restrict the last committed DCI to its current CCE position
    fn pin_last(&mut self) -> bool {
        let (Some(node), Some(rec)) = (self.dfs_tree.last_mut(), self.records.last_mut()) else {
            return false;
        };
        rec.candidates = vec![node.ncce];
        node.dci_iter_index = 0;
        true
    }

    fn cancel_last(&mut self, cfg: &CellConfiguration, slot_alloc: &mut CellSlotResourceAllocator) -> bool {
        let (Some(node), Some(rec)) = (self.dfs_tree.pop(), self.records.pop()) else {
            return false;
        };
        slot_alloc.release(&cce_grant(cfg, &rec.coreset, node.ncce, rec.aggr_lvl));
        let list = if rec.is_dl {
            &mut slot_alloc.result.dl_pdcchs
        } else {
            &mut slot_alloc.result.ul_pdcchs
        };
        debug_assert_eq!(list.len(), rec.pdcch_index + 1);
        list.truncate(rec.pdcch_index);
        true
    }
}

/// PDCCH scheduler of one cell
pub struct PdcchScheduler {
    cfg: Arc<CellConfiguration>,
    max_pdcchs_per_slot: usize,
    slot_records: Vec<PdcchSlotAllocator>,
    last_sl_ind: Option<SlotPoint>,
    candidates: Box<dyn PdcchCandidateProvider>,
}

impl PdcchScheduler {
    pub fn new(cfg: Arc<CellConfiguration>, max_pdcchs_per_slot: usize) -> Self {
        Self::with_candidate_provider(cfg, max_pdcchs_per_slot, Box::new(ConfiguredCandidates))
    }

    pub fn with_candidate_provider(
        cfg: Arc<CellConfiguration>,
        max_pdcchs_per_slot: usize,
        candidates: Box<dyn PdcchCandidateProvider>,
    ) -> Self {
        Self {
            cfg,
            max_pdcchs_per_slot,
            slot_records: (0..RING_ALLOCATOR_SIZE).map(|_| PdcchSlotAllocator::default()).collect(),
            last_sl_ind: None,
            candidates,
        }
    }

    pub fn slot_indication(&mut self, sl_tx: SlotPoint) -> Result<(), SchedError> {
        if let Some(last) = self.last_sl_ind {
            if sl_tx != last + 1 {
                return Err(SchedError::OrderingViolation {
                    expected: last + 1,
                    received: sl_tx,
                });
            }
        }
        self.last_sl_ind = Some(sl_tx);

        // Clear old records.
        self.slot_records[(sl_tx - 1).to_uint() as usize % RING_ALLOCATOR_SIZE].clear();
        Ok(())
    }

    /// Allocate a DL PDCCH in a common search space (SI, paging, RAR, TC-RNTI)
    pub fn alloc_dl_pdcch_common<'a>(
        &mut self,
        slot_alloc: &'a mut CellSlotResourceAllocator,
        rnti: Rnti,
        ss_id: u8,
        aggr_lvl: AggregationLevel,
    ) -> Option<&'a PdcchInfo> {
        self.alloc_pdcch_helper(slot_alloc, rnti, ss_id, aggr_lvl, DciFormat::Dl1_0)
    }

    /// Allocate a DL PDCCH for a UE with the given DCI format
    pub fn alloc_dl_pdcch_ue<'a>(
        &mut self,
        slot_alloc: &'a mut CellSlotResourceAllocator,
        rnti: Rnti,
        ue_cell_cfg: &UeCellConfiguration,
        aggr_lvl: AggregationLevel,
        dci_fmt: DciFormat,
    ) -> Option<&'a PdcchInfo> {
        debug_assert!(dci_fmt.is_dl());
        self.alloc_pdcch_helper(slot_alloc, rnti, ue_cell_cfg.ss_id, aggr_lvl, dci_fmt)
    }

    /// Allocate an UL PDCCH for a UE with the given DCI format
    pub fn alloc_ul_pdcch_ue<'a>(
        &mut self,
        slot_alloc: &'a mut CellSlotResourceAllocator,
        rnti: Rnti,
        ue_cell_cfg: &UeCellConfiguration,
        aggr_lvl: AggregationLevel,
        dci_fmt: DciFormat,
    ) -> Option<&'a PdcchInfo> {
        debug_assert!(!dci_fmt.is_dl());
        self.alloc_pdcch_helper(slot_alloc, rnti, ue_cell_cfg.ss_id, aggr_lvl, dci_fmt)
    }

    /// Revoke the most recently allocated PDCCH of the slot
    pub fn cancel_last_pdcch(&mut self, slot_alloc: &mut CellSlotResourceAllocator) -> bool {
        let idx = slot_alloc.slot.to_uint() as usize % RING_ALLOCATOR_SIZE;
        self.slot_records[idx].cancel_last(&self.cfg, slot_alloc)
    }

    /// Keep the most recently allocated PDCCH of slot `sl` at its CCE in later searches.
    /// Needed once a common PUCCH resource has been derived from that CCE.
    pub fn pin_last_pdcch(&mut self, sl: SlotPoint) -> bool {
        self.slot_records[sl.to_uint() as usize % RING_ALLOCATOR_SIZE].pin_last()
    }

    fn alloc_pdcch_helper<'a>(
        &mut self,
        slot_alloc: &'a mut CellSlotResourceAllocator,
        rnti: Rnti,
        ss_id: u8,
        aggr_lvl: AggregationLevel,
        dci_fmt: DciFormat,
    ) -> Option<&'a PdcchInfo> {
        let sl = slot_alloc.slot;
        let Some(last) = self.last_sl_ind else {
            warn!("rnti={}: PDCCH allocation before the first slot indication", rnti);
            return None;
        };
        let offset = sl - last;
        if offset < 0 || offset as usize >= RING_ALLOCATOR_SIZE {
            warn!("rnti={}: PDCCH slot {} outside of the allocation window", rnti, sl);
            return None;
        }

        let nof_pdcchs = slot_alloc.result.dl_pdcchs.len() + slot_alloc.result.ul_pdcchs.len();
        if nof_pdcchs >= self.max_pdcchs_per_slot {
            debug!("rnti={}: Failed to allocate PDCCH. Cause: max PDCCHs per slot reached", rnti);
            return None;
        }

        let Some(ss) = self.cfg.find_search_space(ss_id) else {
            warn!("rnti={}: Failed to allocate PDCCH. Cause: unknown search space {}", rnti, ss_id);
            return None;
        };
        let Some(coreset) = self.cfg.find_coreset(ss.coreset_id) else {
            warn!("rnti={}: Failed to allocate PDCCH. Cause: unknown CORESET {}", rnti, ss.coreset_id);
            return None;
        };
        let candidates = self.candidates.cce_candidates(ss, coreset, aggr_lvl, rnti, sl);

        // Create PDCCH list element.
        let is_dl = dci_fmt.is_dl();
        let list = if is_dl {
            &mut slot_alloc.result.dl_pdcchs
        } else {
            &mut slot_alloc.result.ul_pdcchs
        };
        list.push(PdcchInfo {
            rnti,
            dci_format: dci_fmt,
            aggr_lvl,
            ss_id,
            coreset_id: coreset.id,
            ncce: 0,
        });
        let record = AllocRecord {
            is_dl,
            pdcch_index: list.len() - 1,
            coreset: coreset.clone(),
            aggr_lvl,
            candidates,
        };

        let slot_records = &mut self.slot_records[sl.to_uint() as usize % RING_ALLOCATOR_SIZE];
        if !slot_records.alloc_pdcch(&self.cfg, slot_alloc, record) {
            trace!("rnti={}: No PDCCH candidate available at slot {} for {:?}", rnti, sl, aggr_lvl);
            let list = if is_dl {
                &mut slot_alloc.result.dl_pdcchs
            } else {
                &mut slot_alloc.result.ul_pdcchs
            };
            list.pop();
            return None;
        }

        let list = if is_dl {
            &slot_alloc.result.dl_pdcchs
        } else {
            &slot_alloc.result.ul_pdcchs
        };
        list.last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CceCandidates, SearchSpaceType};
    use crate::resource_grid::CellResourceAllocator;
    use crate::test_helpers;
    use common::types::{CellIndex, SubcarrierSpacing};

    /// Cell with one extra AL1 UE search space per candidate table, ids 10, 11, ...
    fn cell_with_tables(tables: &[Vec<u32>]) -> Arc<CellConfiguration> {
        let mut cfg = test_helpers::cell_config(CellIndex(0));
        for (i, table) in tables.iter().enumerate() {
            cfg.search_spaces.push(SearchSpaceConfig {
                id: 10 + i as u8,
                coreset_id: 0,
                ss_type: SearchSpaceType::UeSpecific,
                candidates: CceCandidates { al1: table.clone(), ..Default::default() },
            });
        }
        Arc::new(cfg)
    }

    struct Fixture {
        cfg: Arc<CellConfiguration>,
        res: CellResourceAllocator,
        pdcch: PdcchScheduler,
        sl: SlotPoint,
    }

    impl Fixture {
        fn new(tables: &[Vec<u32>]) -> Self {
            let cfg = cell_with_tables(tables);
            let mut res = CellResourceAllocator::new(cfg.clone());
            let mut pdcch = PdcchScheduler::new(cfg.clone(), 16);
            let sl = SlotPoint::new(SubcarrierSpacing::Scs30, 0, 0);
            res.slot_indication(sl).unwrap();
            pdcch.slot_indication(sl).unwrap();
            Self { cfg, res, pdcch, sl }
        }

        fn alloc(&mut self, rnti: u16, ss_id: u8) -> Option<u32> {
            let slot_alloc = self.res.get_mut(self.sl).unwrap();
            self.pdcch
                .alloc_dl_pdcch_common(slot_alloc, Rnti(rnti), ss_id, AggregationLevel::N1)
                .map(|p| p.ncce)
        }

        fn ncce_of(&self, rnti: u16) -> Option<u32> {
            let slot_alloc = self.res.get(self.sl).unwrap();
            slot_alloc.result.dl_pdcchs.iter().find(|p| p.rnti == Rnti(rnti)).map(|p| p.ncce)
        }

        /// Occupancy of every CCE of CORESET 0 at AL1
        fn cce_occupancy(&self) -> Vec<bool> {
            let slot_alloc = self.res.get(self.sl).unwrap();
            let coreset = &self.cfg.coresets[0];
            (0..coreset.nof_cces())
                .map(|ncce| slot_alloc.collides(&cce_grant(&self.cfg, coreset, ncce, AggregationLevel::N1)))
                .collect()
        }
    }

    #[test]
    fn test_cce_grant_rectangle() {
        let cfg = test_helpers::cell_config(CellIndex(0));
        let coreset = &cfg.coresets[0];
        let grant = cce_grant(&cfg, coreset, 2, AggregationLevel::N2);
        // 2 symbols: 3 CRBs per CCE.
        assert_eq!(grant.crbs, Interval::new(6, 12));
        assert_eq!(grant.symbols, Interval::new(0, 2));
    }

    #[test]
    fn test_configured_candidates_filter_out_of_coreset() {
        let cfg = test_helpers::cell_config(CellIndex(0));
        let mut ss = cfg.search_spaces[1].clone();
        ss.candidates.al4 = vec![0, 4, 6];
        let cands = ConfiguredCandidates.cce_candidates(
            &ss,
            &cfg.coresets[0],
            AggregationLevel::N4,
            Rnti(1),
            SlotPoint::new(SubcarrierSpacing::Scs30, 0, 0),
        );
        assert_eq!(cands, vec![0, 4]);
    }

    #[test]
    fn test_same_single_candidate_second_request_fails() {
        let mut fx = Fixture::new(&[vec![5], vec![5]]);
        assert_eq!(fx.alloc(0x4601, 10), Some(5));
        let before = fx.cce_occupancy();

        assert_eq!(fx.alloc(0x4602, 11), None);
        assert_eq!(fx.ncce_of(0x4601), Some(5));
        assert_eq!(fx.ncce_of(0x4602), None);
        assert_eq!(fx.cce_occupancy(), before);
        assert_eq!(fx.res.get(fx.sl).unwrap().result.dl_pdcchs.len(), 1);
    }

    #[test]
    fn test_backtracking_moves_earlier_grant() {
        let mut fx = Fixture::new(&[vec![0, 1], vec![0]]);
        assert_eq!(fx.alloc(0x4601, 10), Some(0));
        // The second DCI only fits at CCE 0: the first one is moved to CCE 1.
        assert_eq!(fx.alloc(0x4602, 11), Some(0));
        assert_eq!(fx.ncce_of(0x4601), Some(1));

        let occupancy = fx.cce_occupancy();
        assert!(occupancy[0] && occupancy[1]);
        assert!(occupancy[2..].iter().all(|used| !used));
    }

    #[test]
    fn test_pinned_pdcch_keeps_its_cce() {
        let mut fx = Fixture::new(&[vec![0, 1], vec![0]]);
        assert_eq!(fx.alloc(0x4601, 10), Some(0));
        assert!(fx.pdcch.pin_last_pdcch(fx.sl));

        // Moving the first DCI to CCE 1 would be the only way to fit the second one.
        let before = fx.cce_occupancy();
        assert_eq!(fx.alloc(0x4602, 11), None);
        assert_eq!(fx.ncce_of(0x4601), Some(0));
        assert_eq!(fx.cce_occupancy(), before);
        assert_eq!(fx.alloc(0x4603, 10), Some(1));
    }

    #[test]
    fn test_failed_search_restores_previous_placement() {
        let mut fx = Fixture::new(&[vec![0, 1], vec![1], vec![0, 1]]);
        assert_eq!(fx.alloc(1, 10), Some(0));
        assert_eq!(fx.alloc(2, 11), Some(1));
        let before = fx.cce_occupancy();

        // Every permutation is exhausted for the third DCI.
        assert_eq!(fx.alloc(3, 12), None);
        assert_eq!(fx.cce_occupancy(), before);
        assert_eq!(fx.ncce_of(1), Some(0));
        assert_eq!(fx.ncce_of(2), Some(1));

        // The restored tree is still usable for further requests.
        assert_eq!(fx.alloc(4, 2), Some(2));
    }

    #[test]
    fn test_all_satisfiable_requests_succeed() {
        let tables: Vec<Vec<u32>> = (0..8).map(|_| (0..8).collect()).collect();
        let mut fx = Fixture::new(&tables);
        for i in 0..8u16 {
            assert!(fx.alloc(100 + i, 10 + i as u8).is_some());
        }
        assert!(fx.cce_occupancy().iter().all(|used| *used));
    }

    #[test]
    fn test_cancel_last_pdcch_releases_cces() {
        let mut fx = Fixture::new(&[vec![3]]);
        assert_eq!(fx.alloc(1, 10), Some(3));
        let slot_alloc = fx.res.get_mut(fx.sl).unwrap();
        assert!(fx.pdcch.cancel_last_pdcch(slot_alloc));
        assert!(fx.cce_occupancy().iter().all(|used| !used));
        assert!(fx.res.get(fx.sl).unwrap().result.dl_pdcchs.is_empty());
        assert_eq!(fx.alloc(2, 10), Some(3));
    }

    #[test]
    fn test_ul_and_dl_pdcchs_share_the_coreset() {
        let mut fx = Fixture::new(&[vec![0, 1]]);
        let ue_cell_cfg = UeCellConfiguration { ss_id: 10, ..test_helpers::ue_config(
            common::types::UeIndex(0),
            Rnti(1),
            CellIndex(0),
        ).cells[0].clone() };
        let slot_alloc = fx.res.get_mut(fx.sl).unwrap();
        let dl = fx
            .pdcch
            .alloc_dl_pdcch_ue(slot_alloc, Rnti(1), &ue_cell_cfg, AggregationLevel::N1, DciFormat::Dl1_1)
            .map(|p| p.ncce);
        assert_eq!(dl, Some(0));
        let slot_alloc = fx.res.get_mut(fx.sl).unwrap();
        let ul = fx
            .pdcch
            .alloc_ul_pdcch_ue(slot_alloc, Rnti(1), &ue_cell_cfg, AggregationLevel::N1, DciFormat::Ul0_1)
            .map(|p| p.ncce);
        assert_eq!(ul, Some(1));
        assert_eq!(fx.res.get(fx.sl).unwrap().result.ul_pdcchs.len(), 1);
    }

    struct ReversedCandidates;

    impl PdcchCandidateProvider for ReversedCandidates {
        fn cce_candidates(
            &self,
            ss: &SearchSpaceConfig,
            coreset: &CoresetConfig,
            aggr_lvl: AggregationLevel,
            rnti: Rnti,
            slot: SlotPoint,
        ) -> Vec<u32> {
            let mut cands = ConfiguredCandidates.cce_candidates(ss, coreset, aggr_lvl, rnti, slot);
            cands.reverse();
            cands
        }
    }

    #[test]
    fn test_custom_candidate_provider() {
        let mut fx = Fixture::new(&[vec![0, 1, 2]]);
        fx.pdcch = PdcchScheduler::with_candidate_provider(fx.cfg.clone(), 16, Box::new(ReversedCandidates));
        fx.pdcch.slot_indication(fx.sl).unwrap();
        assert_eq!(fx.alloc(1, 10), Some(2));
    }

    #[test]
    fn test_pdcch_limit_per_slot() {
        let tables: Vec<Vec<u32>> = vec![(0..8).collect()];
        let mut fx = Fixture::new(&tables);
        fx.pdcch = PdcchScheduler::new(fx.cfg.clone(), 2);
        fx.pdcch.slot_indication(fx.sl).unwrap();
        assert!(fx.alloc(1, 10).is_some());
        assert!(fx.alloc(2, 10).is_some());
        assert!(fx.alloc(3, 10).is_none());
    }
}
