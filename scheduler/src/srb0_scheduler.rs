//! SRB0 Scheduler
//!
//! Schedules the RRC messages of SRB0 for UEs waiting on them, before any other UE data of
//! the slot. An SRB0 PDU is never segmented: it goes out whole at the configured MCS using
//! a DCI 1_0 in the common search space and a common PUCCH for the HARQ-ACK, or it stays
//! pending for a later slot.

use crate::config::{AggregationLevel, CellConfiguration, PdschTimeDomainResource, SchedulerExpertConfig};
use crate::pdcch::PdcchScheduler;
use crate::pucch::{PucchAllocError, PucchAllocator};
use crate::resource_grid::{CellResourceAllocator, Channel, GrantInfo};
use crate::result::{PdcchInfo, PdschInfo};
use crate::ue::UeRepository;
use common::types::{Rnti, SlotPoint, UeIndex};
use common::utils::Interval;
use std::sync::Arc;
use tracing::{debug, trace};

/// Spectral efficiency per MCS index (TS 38.214 Table 5.1.3.1-1)
const MCS_EFFICIENCY: [f32; 29] = [
    0.2344, 0.3066, 0.3770, 0.4902, 0.6016, 0.7402, 0.8770, 1.0273, 1.1758, 1.3262, 1.3281, 1.4766, 1.6953,
    1.9141, 2.1602, 2.4063, 2.5703, 2.5664, 2.7305, 3.0293, 3.3223, 3.6094, 3.9023, 4.2129, 4.5234, 4.8164,
    5.1152, 5.3320, 5.5547,
];

/// DMRS resource elements per PRB (one front-loaded symbol)
const DMRS_RE_PER_PRB: u32 = 12;

/// Aggregation level of the SRB0 DCI
const SRB0_AGGREGATION_LEVEL: AggregationLevel = AggregationLevel::N4;

/// Payload bytes carried by one CRB over `nof_symbols` at `mcs`
pub fn bytes_per_crb_mcs(mcs: u8, nof_symbols: u32) -> u32 {
    let nof_re = (12 * nof_symbols).saturating_sub(DMRS_RE_PER_PRB);
    let idx = (mcs as usize).min(MCS_EFFICIENCY.len() - 1);
    (nof_re as f32 * MCS_EFFICIENCY[idx] / 8.0) as u32
}

pub struct Srb0Scheduler {
    cfg: Arc<CellConfiguration>,
    max_msg4_mcs: u8,
    pending_ues: Vec<UeIndex>,
}

impl Srb0Scheduler {
    pub fn new(cfg: Arc<CellConfiguration>, expert: &SchedulerExpertConfig) -> Self {
        Self {
            cfg,
            max_msg4_mcs: expert.max_msg4_mcs,
            pending_ues: Vec::new(),
        }
    }

    /// Queue a UE that received SRB0 data
    pub fn handle_dl_buffer_state_indication(&mut self, ue_index: UeIndex) {
        if !self.pending_ues.contains(&ue_index) {
            self.pending_ues.push(ue_index);
        }
    }

    pub fn nof_pending_ues(&self) -> usize {
        self.pending_ues.len()
    }

    /// Schedule the pending UEs in queue order. Returns the number of SRB0 grants.
    pub fn run_slot(
        &mut self,
        res_alloc: &mut CellResourceAllocator,
        pdcch: &mut PdcchScheduler,
        pucch: &mut PucchAllocator,
        ues: &mut UeRepository,
    ) -> usize {
        let Some(sl) = res_alloc.last_slot() else {
            return 0;
        };
        if self.pending_ues.is_empty() || !self.cfg.is_dl_enabled(sl) {
            return 0;
        }

        let mut nof_grants = 0;
        let mut still_pending = Vec::with_capacity(self.pending_ues.len());
        for ue_index in std::mem::take(&mut self.pending_ues) {
            let Some(ue) = ues.get(ue_index) else {
                debug!("ue={}: Dropping SRB0 request. Cause: UE removed", ue_index);
                continue;
            };
            if ue.pcell_index() != self.cfg.cell_index || ue.dl_lc.pending_srb0_bytes() == 0 {
                continue;
            }
            if self.schedule_ue(sl, ue_index, res_alloc, pdcch, pucch, ues) {
                nof_grants += 1;
            } else {
                still_pending.push(ue_index);
            }
        }
        self.pending_ues = still_pending;
        nof_grants
    }

    fn schedule_ue(
        &self,
        sl: SlotPoint,
        ue_index: UeIndex,
        res_alloc: &mut CellResourceAllocator,
        pdcch: &mut PdcchScheduler,
        pucch: &mut PucchAllocator,
        ues: &mut UeRepository,
    ) -> bool {
        for td in self.cfg.pdsch_td_resources() {
            if self.schedule_ue_on(td, ue_index, res_alloc, pdcch, pucch, ues) {
                return true;
            }
        }
        debug!("ue={}: SRB0 message not scheduled at slot {}", ue_index, sl);
        false
    }

    fn schedule_ue_on(
        &self,
        td: PdschTimeDomainResource,
        ue_index: UeIndex,
        res_alloc: &mut CellResourceAllocator,
        pdcch: &mut PdcchScheduler,
        pucch: &mut PucchAllocator,
        ues: &mut UeRepository,
    ) -> bool {
        let cell_index = self.cfg.cell_index;
        let Some(sl) = res_alloc.last_slot() else {
            return false;
        };
        let pdsch_slot = sl + td.k0;
        if !self.cfg.is_dl_enabled(pdsch_slot) {
            return false;
        }
        let Some(ue) = ues.get(ue_index) else {
            return false;
        };
        let rnti = ue.crnti;
        let Some(h_id) = ue.find_cell(cell_index).and_then(|c| c.dl_harqs.find_empty()) else {
            trace!("rnti={}: No empty DL HARQ process for SRB0", rnti);
            return false;
        };

        let pdsch_symbols = Interval::new(td.start_symbol, td.start_symbol + td.nof_symbols);
        let crb_bytes = bytes_per_crb_mcs(self.max_msg4_mcs, pdsch_symbols.length());
        if crb_bytes == 0 {
            return false;
        }
        let pending = ue.dl_lc.pending_srb0_bytes();
        let nof_crbs = pending.div_ceil(crb_bytes);
        if nof_crbs > self.cfg.nof_crbs {
            trace!("rnti={}: SRB0 PDU of {} bytes does not fit the cell at MCS {}", rnti, pending, self.max_msg4_mcs);
            return false;
        }

        let crbs = match res_alloc.at_offset(td.k0) {
            Ok(pdsch_alloc) => pdsch_alloc.dl_res_grid.find_free_crbs(
                pdsch_symbols,
                Interval::new(0, self.cfg.nof_crbs),
                nof_crbs,
            ),
            Err(_) => None,
        };
        let Some(crbs) = crbs.filter(|crbs| crbs.length() >= nof_crbs) else {
            trace!("rnti={}: No PDSCH CRBs for SRB0 at slot {}", rnti, pdsch_slot);
            return false;
        };

        let Ok(slot_alloc) = res_alloc.get_mut(sl) else {
            return false;
        };
        let Some(pdcch_info) = pdcch
            .alloc_dl_pdcch_common(slot_alloc, rnti, self.cfg.common_ss_id, SRB0_AGGREGATION_LEVEL)
            .cloned()
        else {
            trace!("rnti={}: No PDCCH for SRB0 at slot {}", rnti, sl);
            return false;
        };

        let pdsch_grant = GrantInfo { channel: Channel::Pdsch, scs: self.cfg.scs, symbols: pdsch_symbols, crbs };
        let reserved = res_alloc.at_offset(td.k0).is_ok_and(|a| a.reserve(&pdsch_grant));
        if !reserved {
            if let Ok(slot_alloc) = res_alloc.get_mut(sl) {
                pdcch.cancel_last_pdcch(slot_alloc);
            }
            return false;
        }

        let Some(k1) = self.alloc_harq_ack(res_alloc, pucch, rnti, td.k0, &pdcch_info) else {
            debug!("rnti={}: No common PUCCH for SRB0 PDSCH at slot {}", rnti, pdsch_slot);
            if let Ok(pdsch_alloc) = res_alloc.at_offset(td.k0) {
                pdsch_alloc.release(&pdsch_grant);
            }
            if let Ok(slot_alloc) = res_alloc.get_mut(sl) {
                pdcch.cancel_last_pdcch(slot_alloc);
            }
            return false;
        };
        // The common PUCCH resource follows from the CCE of the DCI.
        pdcch.pin_last_pdcch(sl);

        // Commit.
        let Some(ue) = ues.get_mut(ue_index) else {
            return false;
        };
        let tbs_bytes = crbs.length() * crb_bytes;
        let ack_slot = pdsch_slot + k1;
        if let Some(ue_cell) = ue.find_cell_mut(cell_index) {
            ue_cell.dl_harqs.new_tx(h_id, pdsch_slot, ack_slot, tbs_bytes, self.max_msg4_mcs);
            ue_cell.dl_harqs.set_harq_bit_idx(h_id, 0);
        }
        ue.dl_lc.allocate_srb0(tbs_bytes);

        let Ok(pdsch_alloc) = res_alloc.at_offset(td.k0) else {
            return false;
        };
        pdsch_alloc.result.pdschs.push(PdschInfo {
            rnti,
            crbs,
            symbols: pdsch_symbols,
            harq_id: h_id,
            tbs_bytes,
            mcs: self.max_msg4_mcs,
            is_retx: false,
            ack_slot,
        });
        debug!(
            "rnti={} h_id={}: SRB0 PDSCH at slot {} k0={} crbs={} tbs={} k1={}",
            rnti, h_id.0, pdsch_slot, td.k0, crbs, tbs_bytes, k1
        );
        true
    }

    /// Common PUCCH for the HARQ-ACK at the first feasible k1
    fn alloc_harq_ack(
        &self,
        res_alloc: &mut CellResourceAllocator,
        pucch: &mut PucchAllocator,
        rnti: Rnti,
        k0: u32,
        pdcch_info: &PdcchInfo,
    ) -> Option<u32> {
        for &k1 in &self.cfg.k1_candidates {
            let Ok(slot_alloc) = res_alloc.at_offset(k0 + k1) else {
                break;
            };
            if !self.cfg.is_ul_enabled(slot_alloc.slot) {
                continue;
            }
            match pucch.alloc_common_pucch_harq_ack_ue(res_alloc, rnti, k0, k1, pdcch_info) {
                Ok(_pri) => return Some(k1),
                Err(PucchAllocError::SlotOutOfWindow) => break,
                Err(e) => trace!("rnti={}: SRB0 HARQ-ACK not allocated with k1={}. Cause: {}", rnti, k1, e),
            }
        }
        None
    }
}
