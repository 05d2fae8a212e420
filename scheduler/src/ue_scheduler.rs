//! UE Scheduler
//!
//! Round-robin data scheduling of the UEs whose PCell is the cell. Retransmissions are
//! served before new data. A DL grant needs a PDCCH, PDSCH CRBs and a HARQ-ACK resource;
//! an UL grant needs a PDCCH and PUSCH CRBs. Partial allocations are rolled back.

use crate::config::{AggregationLevel, CellConfiguration, SchedulerExpertConfig, UeCellConfiguration};
use crate::pdcch::PdcchScheduler;
use crate::pucch::{PucchAllocError, PucchAllocator};
use crate::resource_grid::{CellResourceAllocator, Channel, GrantInfo};
use crate::result::{DciFormat, PdcchInfo, PdschInfo, PuschInfo};
use crate::ue::UeRepository;
use common::types::{HarqId, Rnti, SlotPoint, UeIndex};
use common::utils::Interval;
use std::sync::Arc;
use tracing::{debug, trace};

/// Spectral efficiency per CQI index (TS 38.214 Table 5.2.2.1-2)
const CQI_EFFICIENCY: [f32; 16] = [
    0.0, 0.1523, 0.2344, 0.3770, 0.6016, 0.8770, 1.1758, 1.4766, 1.9141, 2.4063, 2.7305, 3.3223, 3.9023,
    4.5234, 5.1152, 5.5547,
];

/// DMRS resource elements per PRB (one front-loaded symbol)
const DMRS_RE_PER_PRB: u32 = 12;

/// UL grant size used to serve an SR before any BSR
pub const SR_GRANT_BYTES: u32 = 128;

/// Lower CQI needs more CCEs to keep the DCI decodable
pub fn aggregation_level_from_cqi(cqi: u8) -> AggregationLevel {
    match cqi {
        0..=4 => AggregationLevel::N8,
        5..=7 => AggregationLevel::N4,
        8..=11 => AggregationLevel::N2,
        _ => AggregationLevel::N1,
    }
}

fn cqi_to_mcs(cqi: u8) -> u8 {
    ((cqi.min(15) as u32 * 28) / 15).min(27) as u8
}

/// Payload bytes carried by one CRB over `nof_symbols`
pub fn bytes_per_crb(cqi: u8, nof_symbols: u32) -> u32 {
    let nof_re = (12 * nof_symbols).saturating_sub(DMRS_RE_PER_PRB);
    (nof_re as f32 * CQI_EFFICIENCY[cqi.min(15) as usize] / 8.0) as u32
}

/// Common search spaces only monitor the high aggregation levels
fn common_aggregation_level(aggr_lvl: AggregationLevel) -> AggregationLevel {
    match aggr_lvl {
        AggregationLevel::N1 | AggregationLevel::N2 | AggregationLevel::N4 => AggregationLevel::N4,
        lvl => lvl,
    }
}

/// HARQ process picked for a grant
struct HarqChoice {
    h_id: HarqId,
    /// TBS to repeat for a retransmission
    retx_tbs: Option<u32>,
}

/// Number of grants allocated in a slot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UeSchedStats {
    pub nof_dl_grants: usize,
    pub nof_ul_grants: usize,
}

pub struct UeScheduler {
    cfg: Arc<CellConfiguration>,
    max_ue_grants_per_slot: usize,
    next_dl_ue: usize,
    next_ul_ue: usize,
}

impl UeScheduler {
    pub fn new(cfg: Arc<CellConfiguration>, expert: &SchedulerExpertConfig) -> Self {
        Self {
            cfg,
            max_ue_grants_per_slot: expert.max_ue_grants_per_slot,
            next_dl_ue: 0,
            next_ul_ue: 0,
        }
    }

    /// UEs of the cell, rotated by the round-robin offset
    fn candidates(&self, ues: &UeRepository, offset: usize) -> Vec<UeIndex> {
        let mut list: Vec<UeIndex> = ues
            .iter()
            .filter(|ue| ue.pcell_index() == self.cfg.cell_index)
            .map(|ue| ue.ue_index)
            .collect();
        if !list.is_empty() {
            let len = list.len();
            list.rotate_left(offset % len);
        }
        list
    }

    pub fn run_slot(
        &mut self,
        res_alloc: &mut CellResourceAllocator,
        pdcch: &mut PdcchScheduler,
        pucch: &mut PucchAllocator,
        ues: &mut UeRepository,
    ) -> UeSchedStats {
        let mut stats = UeSchedStats::default();
        let Some(sl) = res_alloc.last_slot() else {
            return stats;
        };
        if !self.cfg.is_dl_enabled(sl) {
            return stats;
        }

        for ue_index in self.candidates(ues, self.next_dl_ue) {
            if stats.nof_dl_grants >= self.max_ue_grants_per_slot {
                break;
            }
            if self.schedule_dl_ue(sl, ue_index, res_alloc, pdcch, pucch, ues) {
                stats.nof_dl_grants += 1;
            }
        }
        self.next_dl_ue = self.next_dl_ue.wrapping_add(1);

        if self.cfg.is_ul_enabled(sl + self.cfg.k2) {
            for ue_index in self.candidates(ues, self.next_ul_ue) {
                if stats.nof_ul_grants >= self.max_ue_grants_per_slot {
                    break;
                }
                if self.schedule_ul_ue(sl, ue_index, res_alloc, pdcch, pucch, ues) {
                    stats.nof_ul_grants += 1;
                }
            }
            self.next_ul_ue = self.next_ul_ue.wrapping_add(1);
        }

        if stats.nof_dl_grants > 0 || stats.nof_ul_grants > 0 {
            debug!(
                "slot={} cell={}: {} DL and {} UL grants",
                sl, self.cfg.cell_index, stats.nof_dl_grants, stats.nof_ul_grants
            );
        }
        stats
    }

    fn schedule_dl_ue(
        &self,
        sl: SlotPoint,
        ue_index: UeIndex,
        res_alloc: &mut CellResourceAllocator,
        pdcch: &mut PdcchScheduler,
        pucch: &mut PucchAllocator,
        ues: &mut UeRepository,
    ) -> bool {
        let cell_index = self.cfg.cell_index;
        let Some(ue) = ues.get(ue_index) else {
            return false;
        };
        let Some(ue_cell) = ue.find_cell(cell_index) else {
            return false;
        };
        let rnti = ue.crnti;
        let cqi = ue_cell.channel_state.cqi;
        if cqi == 0 {
            return false;
        }

        let harq = match ue_cell.dl_harqs.find_pending_retx() {
            Some(h_id) => HarqChoice { h_id, retx_tbs: ue_cell.dl_harqs.get(h_id).map(|h| h.tbs_bytes) },
            None => {
                if !ue.has_pending_dl_newtx_bytes() {
                    return false;
                }
                let Some(h_id) = ue_cell.dl_harqs.find_empty() else {
                    return false;
                };
                HarqChoice { h_id, retx_tbs: None }
            }
        };

        let pdsch_symbols = Interval::new(self.cfg.pdsch_start_symbol, self.cfg.nof_symbols);
        let crb_bytes = bytes_per_crb(cqi, pdsch_symbols.length()).max(1);
        let requested = harq.retx_tbs.unwrap_or_else(|| ue.dl_lc.pending_bytes());
        let nof_crbs = requested.div_ceil(crb_bytes).max(1);
        let fallback = ue_cell.cfg.pucch.is_none();
        let aggr_lvl = aggregation_level_from_cqi(cqi);

        let Ok(slot_alloc) = res_alloc.get_mut(sl) else {
            return false;
        };
        let allocated = if fallback {
            pdcch.alloc_dl_pdcch_common(slot_alloc, rnti, self.cfg.common_ss_id, common_aggregation_level(aggr_lvl))
        } else {
            pdcch.alloc_dl_pdcch_ue(slot_alloc, rnti, &ue_cell.cfg, aggr_lvl, DciFormat::Dl1_1)
        };
        let Some(pdcch_info) = allocated.cloned() else {
            trace!("rnti={}: No PDCCH for DL grant at slot {}", rnti, sl);
            return false;
        };

        let crbs = match slot_alloc
            .dl_res_grid
            .find_free_crbs(pdsch_symbols, Interval::new(0, self.cfg.nof_crbs), nof_crbs)
        {
            Some(crbs) if harq.retx_tbs.is_none() || crbs.length() >= nof_crbs => crbs,
            _ => {
                trace!("rnti={}: No PDSCH CRBs at slot {}", rnti, sl);
                pdcch.cancel_last_pdcch(slot_alloc);
                return false;
            }
        };
        let pdsch_grant = GrantInfo { channel: Channel::Pdsch, scs: self.cfg.scs, symbols: pdsch_symbols, crbs };
        if !slot_alloc.reserve(&pdsch_grant) {
            pdcch.cancel_last_pdcch(slot_alloc);
            return false;
        }

        let Some((k1, harq_bit_idx)) = self.alloc_harq_ack(res_alloc, pucch, rnti, &ue_cell.cfg, &pdcch_info) else {
            debug!("rnti={}: No HARQ-ACK resource for PDSCH at slot {}", rnti, sl);
            if let Ok(slot_alloc) = res_alloc.get_mut(sl) {
                slot_alloc.release(&pdsch_grant);
                pdcch.cancel_last_pdcch(slot_alloc);
            }
            return false;
        };
        if fallback {
            // The common PUCCH resource follows from the CCE of the DCI.
            pdcch.pin_last_pdcch(sl);
        }

        // Commit.
        let Some(ue) = ues.get_mut(ue_index) else {
            return false;
        };
        let mcs = cqi_to_mcs(cqi);
        let tbs_bytes = harq.retx_tbs.unwrap_or(crbs.length() * crb_bytes);
        let ack_slot = sl + k1;
        if let Some(ue_cell) = ue.find_cell_mut(cell_index) {
            match harq.retx_tbs {
                Some(_) => ue_cell.dl_harqs.new_retx(harq.h_id, sl, ack_slot),
                None => ue_cell.dl_harqs.new_tx(harq.h_id, sl, ack_slot, tbs_bytes, mcs),
            };
            ue_cell.dl_harqs.set_harq_bit_idx(harq.h_id, harq_bit_idx);
        }
        if harq.retx_tbs.is_none() {
            ue.dl_lc.allocate(tbs_bytes);
        }

        let Ok(slot_alloc) = res_alloc.get_mut(sl) else {
            return false;
        };
        slot_alloc.result.pdschs.push(PdschInfo {
            rnti,
            crbs,
            symbols: pdsch_symbols,
            harq_id: harq.h_id,
            tbs_bytes,
            mcs,
            is_retx: harq.retx_tbs.is_some(),
            ack_slot,
        });
        debug!(
            "rnti={} h_id={}: PDSCH at slot {} crbs={} tbs={} k1={} retx={}",
            rnti,
            harq.h_id.0,
            sl,
            crbs,
            tbs_bytes,
            k1,
            harq.retx_tbs.is_some()
        );
        true
    }

    /// Allocate the HARQ-ACK bit at the first feasible k1. Returns k1 and the bit position
    /// in the codebook of the feedback slot.
    fn alloc_harq_ack(
        &self,
        res_alloc: &mut CellResourceAllocator,
        pucch: &mut PucchAllocator,
        rnti: Rnti,
        ue_cell_cfg: &UeCellConfiguration,
        pdcch_info: &PdcchInfo,
    ) -> Option<(u32, u8)> {
        for &k1 in &self.cfg.k1_candidates {
            let Ok(slot_alloc) = res_alloc.at_offset(k1) else {
                break;
            };
            if !self.cfg.is_ul_enabled(slot_alloc.slot) {
                continue;
            }
            // A PUSCH of the UE in the feedback slot carries the bit.
            if let Some(pusch) = slot_alloc.result.puschs.iter_mut().find(|p| p.rnti == rnti) {
                pusch.uci.harq_ack_bits += 1;
                return Some((k1, (pusch.uci.harq_ack_bits - 1) as u8));
            }

            let res = match ue_cell_cfg.pucch {
                Some(_) => pucch.alloc_ded_pucch_harq_ack_ue(res_alloc, rnti, ue_cell_cfg, 0, k1),
                None => pucch.alloc_common_pucch_harq_ack_ue(res_alloc, rnti, 0, k1, pdcch_info),
            };
            match res {
                Ok(_pri) => {
                    let harq_bits = res_alloc
                        .at_offset(k1)
                        .ok()
                        .and_then(|s| {
                            s.result
                                .pucchs
                                .iter()
                                .filter(|p| p.rnti == rnti)
                                .map(|p| p.uci.harq_ack_bits)
                                .max()
                        })
                        .unwrap_or(1);
                    return Some((k1, harq_bits.saturating_sub(1) as u8));
                }
                Err(PucchAllocError::SlotOutOfWindow) => break,
                Err(e) => trace!("rnti={}: HARQ-ACK not allocated with k1={}. Cause: {}", rnti, k1, e),
            }
        }
        None
    }

    fn schedule_ul_ue(
        &self,
        sl: SlotPoint,
        ue_index: UeIndex,
        res_alloc: &mut CellResourceAllocator,
        pdcch: &mut PdcchScheduler,
        pucch: &mut PucchAllocator,
        ues: &mut UeRepository,
    ) -> bool {
        let cell_index = self.cfg.cell_index;
        let Some(ue) = ues.get(ue_index) else {
            return false;
        };
        let Some(ue_cell) = ue.find_cell(cell_index) else {
            return false;
        };
        // UL grants use the UE dedicated configuration.
        if ue_cell.cfg.pucch.is_none() {
            return false;
        }
        let rnti = ue.crnti;
        let cqi = ue_cell.channel_state.cqi;
        if cqi == 0 {
            return false;
        }

        let harq = match ue_cell.ul_harqs.find_pending_retx() {
            Some(h_id) => HarqChoice { h_id, retx_tbs: ue_cell.ul_harqs.get(h_id).map(|h| h.tbs_bytes) },
            None => {
                if !ue.has_pending_ul_data() {
                    return false;
                }
                let Some(h_id) = ue_cell.ul_harqs.find_empty() else {
                    return false;
                };
                HarqChoice { h_id, retx_tbs: None }
            }
        };

        let pusch_symbols = Interval::new(0, self.cfg.nof_symbols);
        let crb_bytes = bytes_per_crb(cqi, pusch_symbols.length()).max(1);
        let requested = harq
            .retx_tbs
            .unwrap_or_else(|| ue.ul_lc.pending_bytes().max(SR_GRANT_BYTES));
        let nof_crbs = requested.div_ceil(crb_bytes).max(1);

        let Ok(slot_alloc) = res_alloc.get_mut(sl) else {
            return false;
        };
        let allocated =
            pdcch.alloc_ul_pdcch_ue(slot_alloc, rnti, &ue_cell.cfg, aggregation_level_from_cqi(cqi), DciFormat::Ul0_1);
        if allocated.is_none() {
            trace!("rnti={}: No PDCCH for UL grant at slot {}", rnti, sl);
            return false;
        }

        let k2 = self.cfg.k2;
        let pusch_slot = sl + k2;
        let placed = match res_alloc.at_offset(k2) {
            Ok(pusch_alloc) => {
                match pusch_alloc
                    .ul_res_grid
                    .find_free_crbs(pusch_symbols, Interval::new(0, self.cfg.nof_crbs), nof_crbs)
                {
                    Some(crbs) if harq.retx_tbs.is_none() || crbs.length() >= nof_crbs => {
                        let grant =
                            GrantInfo { channel: Channel::Pusch, scs: self.cfg.scs, symbols: pusch_symbols, crbs };
                        pusch_alloc.reserve(&grant).then_some(crbs)
                    }
                    _ => None,
                }
            }
            Err(_) => None,
        };
        let Some(crbs) = placed else {
            trace!("rnti={}: No PUSCH CRBs at slot {}", rnti, pusch_slot);
            if let Ok(slot_alloc) = res_alloc.get_mut(sl) {
                pdcch.cancel_last_pdcch(slot_alloc);
            }
            return false;
        };

        // Commit.
        let Some(ue) = ues.get_mut(ue_index) else {
            return false;
        };
        let mcs = cqi_to_mcs(cqi);
        let tbs_bytes = harq.retx_tbs.unwrap_or(crbs.length() * crb_bytes);
        if let Some(ue_cell) = ue.find_cell_mut(cell_index) {
            match harq.retx_tbs {
                Some(_) => ue_cell.ul_harqs.new_retx(harq.h_id, sl, pusch_slot),
                None => ue_cell.ul_harqs.new_tx(harq.h_id, sl, pusch_slot, tbs_bytes, mcs),
            };
        }
        if harq.retx_tbs.is_none() {
            ue.ul_lc.handle_ul_grant(tbs_bytes);
        }

        let Ok(pusch_alloc) = res_alloc.at_offset(k2) else {
            return false;
        };
        // UCI of the slot moves from the PUCCH to the PUSCH.
        let uci = pucch.remove_ue_uci_from_pucch(pusch_alloc, rnti);
        pusch_alloc.result.puschs.push(PuschInfo {
            rnti,
            crbs,
            symbols: pusch_symbols,
            harq_id: harq.h_id,
            tbs_bytes,
            mcs,
            is_retx: harq.retx_tbs.is_some(),
            uci,
        });
        debug!(
            "rnti={} h_id={}: PUSCH at slot {} crbs={} tbs={} retx={}",
            rnti,
            harq.h_id.0,
            pusch_slot,
            crbs,
            tbs_bytes,
            harq.retx_tbs.is_some()
        );
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers;
    use crate::ue::Ue;
    use common::types::{CellIndex, Lcid, SubcarrierSpacing};

    struct Fixture {
        res: CellResourceAllocator,
        pdcch: PdcchScheduler,
        pucch: PucchAllocator,
        sched: UeScheduler,
        ues: UeRepository,
        sl: SlotPoint,
    }

    impl Fixture {
        fn new(nof_ues: u16) -> Self {
            let cfg = Arc::new(test_helpers::cell_config(CellIndex(0)));
            let expert = SchedulerExpertConfig::default();
            let sl = SlotPoint::new(SubcarrierSpacing::Scs30, 0, 0);
            let mut ues = UeRepository::new();
            for ue in 0..nof_ues {
                let ue_cfg = test_helpers::ue_config(UeIndex(ue), Rnti(0x4601 + ue), CellIndex(0));
                assert!(ues.add_ue(Ue::new(ue_cfg, &expert, sl)).is_ok());
            }
            Self {
                res: CellResourceAllocator::new(cfg.clone()),
                pdcch: PdcchScheduler::new(cfg.clone(), expert.max_pdcchs_per_slot),
                pucch: PucchAllocator::new(cfg.clone(), expert.max_pucchs_per_slot),
                sched: UeScheduler::new(cfg, &expert),
                ues,
                sl,
            }
        }

        fn run(&mut self, sl: SlotPoint) -> UeSchedStats {
            self.res.slot_indication(sl).unwrap();
            self.pdcch.slot_indication(sl).unwrap();
            self.pucch.slot_indication(sl).unwrap();
            for ue in self.ues.iter_mut() {
                ue.slot_indication(sl);
            }
            self.sched.run_slot(&mut self.res, &mut self.pdcch, &mut self.pucch, &mut self.ues)
        }
    }

    #[test]
    fn test_aggregation_level_from_cqi() {
        assert_eq!(aggregation_level_from_cqi(1), AggregationLevel::N8);
        assert_eq!(aggregation_level_from_cqi(9), AggregationLevel::N2);
        assert_eq!(aggregation_level_from_cqi(15), AggregationLevel::N1);
    }

    #[test]
    fn test_bytes_per_crb() {
        // 12 PDSCH symbols at CQI 9: (144 - 12) * 2.4063 / 8
        assert_eq!(bytes_per_crb(9, 12), 39);
        assert_eq!(bytes_per_crb(0, 12), 0);
    }

    #[test]
    fn test_dl_new_tx_allocates_pdcch_pdsch_and_harq_ack() {
        let mut fx = Fixture::new(1);
        fx.ues.get_mut(UeIndex(0)).unwrap().handle_dl_buffer_state(Lcid(4), 300);

        let stats = fx.run(fx.sl);
        assert_eq!(stats.nof_dl_grants, 1);

        let result = &fx.res.get(fx.sl).unwrap().result;
        assert_eq!(result.dl_pdcchs.len(), 1);
        assert_eq!(result.dl_pdcchs[0].dci_format, DciFormat::Dl1_1);
        assert_eq!(result.pdschs.len(), 1);
        let pdsch = &result.pdschs[0];
        assert_eq!(pdsch.crbs, Interval::new(0, 8));
        assert_eq!(pdsch.tbs_bytes, 8 * 39);
        assert_eq!(pdsch.ack_slot, fx.sl + 4);

        let pucchs = &fx.res.get(fx.sl + 4).unwrap().result.pucchs;
        assert_eq!(pucchs.len(), 1);
        assert_eq!(pucchs[0].uci.harq_ack_bits, 1);

        let ue = fx.ues.get(UeIndex(0)).unwrap();
        assert!(!ue.has_pending_dl_newtx_bytes());
        assert_eq!(ue.find_cell(CellIndex(0)).unwrap().dl_harqs.nof_waiting_ack(), 1);
    }

    #[test]
    fn test_dl_retx_served_first_with_same_tbs() {
        let mut fx = Fixture::new(1);
        fx.ues.get_mut(UeIndex(0)).unwrap().handle_dl_buffer_state(Lcid(4), 300);
        fx.run(fx.sl);

        let cell = fx.ues.get_mut(UeIndex(0)).unwrap().find_cell_mut(CellIndex(0)).unwrap();
        let outcome = cell.handle_dl_ack_info(fx.sl + 4, &[crate::ue::harq::HarqAckValue::Nack]);
        assert_eq!(outcome.len(), 1);
        fx.ues.get_mut(UeIndex(0)).unwrap().handle_dl_buffer_state(Lcid(4), 50);

        fx.run(fx.sl + 1);
        let pdschs = &fx.res.get(fx.sl + 1).unwrap().result.pdschs;
        assert_eq!(pdschs.len(), 1);
        assert!(pdschs[0].is_retx);
        assert_eq!(pdschs[0].tbs_bytes, 8 * 39);
        // New data waits for the next slot.
        assert!(fx.ues.get(UeIndex(0)).unwrap().has_pending_dl_newtx_bytes());
    }

    #[test]
    fn test_consecutive_dl_grants_use_distinct_harqs() {
        let mut fx = Fixture::new(1);
        // More than one slot worth of data.
        fx.ues.get_mut(UeIndex(0)).unwrap().handle_dl_buffer_state(Lcid(4), 5000);
        fx.run(fx.sl);
        assert_eq!(fx.res.get(fx.sl).unwrap().result.pdschs[0].crbs, Interval::new(0, 52));
        fx.run(fx.sl + 1);
        let first = &fx.res.get(fx.sl).unwrap().result.pdschs[0];
        let second = &fx.res.get(fx.sl + 1).unwrap().result.pdschs[0];
        assert_eq!(first.ack_slot, fx.sl + 4);
        assert_eq!(second.ack_slot, fx.sl + 5);
        assert_ne!(first.harq_id, second.harq_id);
    }

    #[test]
    fn test_failed_harq_ack_rolls_back_grants() {
        let mut fx = Fixture::new(1);
        fx.ues.get_mut(UeIndex(0)).unwrap().handle_dl_buffer_state(Lcid(4), 300);
        // No PUCCH capacity at all.
        fx.pucch = PucchAllocator::new(Arc::new(test_helpers::cell_config(CellIndex(0))), 0);
        let stats = fx.run(fx.sl);
        assert_eq!(stats.nof_dl_grants, 0);

        let slot_alloc = fx.res.get(fx.sl).unwrap();
        assert!(slot_alloc.result.dl_pdcchs.is_empty());
        assert!(slot_alloc.result.pdschs.is_empty());
        assert!(slot_alloc.dl_res_grid.is_free(0, 0));
        assert!(slot_alloc.dl_res_grid.is_free(0, 5));
        assert!(fx.ues.get(UeIndex(0)).unwrap().has_pending_dl_newtx_bytes());
    }

    #[test]
    fn test_sr_triggers_ul_grant_with_uci_on_pusch() {
        let mut fx = Fixture::new(1);
        fx.run(fx.sl);
        {
            let ue = fx.ues.get_mut(UeIndex(0)).unwrap();
            ue.ul_lc.handle_sr_indication();
            ue.handle_dl_buffer_state(Lcid(4), 100);
        }
        let stats = fx.run(fx.sl + 1);
        assert_eq!(stats, UeSchedStats { nof_dl_grants: 1, nof_ul_grants: 1 });

        let result = &fx.res.get(fx.sl + 1).unwrap().result;
        assert_eq!(result.ul_pdcchs.len(), 1);
        assert_eq!(result.ul_pdcchs[0].dci_format, DciFormat::Ul0_1);

        let pusch_slot = fx.res.get(fx.sl + 5).unwrap();
        assert_eq!(pusch_slot.result.puschs.len(), 1);
        let pusch = &pusch_slot.result.puschs[0];
        assert_eq!(pusch.uci.harq_ack_bits, 1);
        assert!(pusch.tbs_bytes >= SR_GRANT_BYTES);
        assert!(pusch_slot.result.pucchs.iter().all(|p| p.rnti != Rnti(0x4601)));
        assert!(!fx.ues.get(UeIndex(0)).unwrap().ul_lc.has_pending_sr());
    }

    #[test]
    fn test_round_robin_rotates_first_ue() {
        let mut fx = Fixture::new(3);
        fx.sched.max_ue_grants_per_slot = 1;
        for ue in 0..3u16 {
            fx.ues.get_mut(UeIndex(ue)).unwrap().handle_dl_buffer_state(Lcid(4), 5000);
        }
        let mut served = Vec::new();
        for i in 0..3u32 {
            fx.run(fx.sl + i);
            served.push(fx.res.get(fx.sl + i).unwrap().result.pdschs[0].rnti);
        }
        assert_eq!(served, vec![Rnti(0x4601), Rnti(0x4602), Rnti(0x4603)]);
    }

    #[test]
    fn test_ue_without_dedicated_pucch_uses_common_resources() {
        let mut fx = Fixture::new(0);
        let mut cfg = test_helpers::ue_config(UeIndex(5), Rnti(0x4606), CellIndex(0));
        cfg.cells[0].pucch = None;
        assert!(fx.ues.add_ue(Ue::new(cfg, &SchedulerExpertConfig::default(), fx.sl)).is_ok());
        fx.ues.get_mut(UeIndex(5)).unwrap().handle_dl_buffer_state(Lcid::SRB1, 40);

        assert_eq!(fx.run(fx.sl).nof_dl_grants, 1);
        let result = &fx.res.get(fx.sl).unwrap().result;
        assert_eq!(result.dl_pdcchs[0].dci_format, DciFormat::Dl1_0);
        assert_eq!(result.dl_pdcchs[0].aggr_lvl, AggregationLevel::N4);
        let pucchs = &fx.res.get(fx.sl + 4).unwrap().result.pucchs;
        assert!(pucchs.iter().any(|p| p.is_common && p.rnti == Rnti(0x4606)));
    }
}
