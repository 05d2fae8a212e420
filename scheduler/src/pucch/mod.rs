//! PUCCH Allocator
//!
//! Allocates the uplink feedback resources carrying HARQ-ACK, SR and CSI bits. A UE holds at
//! most one dedicated grant per format and purpose in a slot; new bits are merged into the
//! existing grants and trigger a format upgrade when they no longer fit.

pub mod resource_manager;

use crate::config::{CellConfiguration, PucchConfig, PucchFormatParams, PucchResource, UeCellConfiguration};
use crate::resource_grid::{CellResourceAllocator, CellSlotResourceAllocator, Channel, GrantInfo};
use crate::result::{PdcchInfo, PucchFormat, PucchGrantParams, PucchInfo, PucchUciBits};
use crate::{SchedError, RING_ALLOCATOR_SIZE};
use common::types::{Rnti, SlotPoint};
use common::utils::Interval;
use resource_manager::PucchResourceManager;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, trace};

/// Maximum number of HARQ-ACK bits carried by Format 0/1
pub const FORMAT1_MAX_HARQ_BITS: u32 = 2;

/// Number of PUCCH resource indicator values of DCI 1_0/1_1
const NOF_PRI_VALUES: u8 = 8;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PucchAllocError {
    #[error("No PUCCH resource available")]
    NoCapacity,

    #[error("UE already holds a common PUCCH grant in the slot")]
    CommonGrantInUse,

    #[error("UCI payload exceeds {from:?} capacity, {to:?} required")]
    UpgradeRequired { from: PucchFormat, to: PucchFormat },

    #[error("PUCCH slot outside of the allocation window")]
    SlotOutOfWindow,
}

/// CRC bits appended to a UCI payload (TS 38.212, Section 6.3.1.2.1)
pub fn uci_crc_bits(payload_bits: u32) -> u32 {
    match payload_bits {
        0..=11 => 0,
        12..=19 => 6,
        _ => 11,
    }
}

/// Maximum number of bits a Format 2 grant carries with QPSK at the configured code rate
pub fn format2_capacity_bits(nof_prbs: u32, nof_symbols: u32, max_code_rate: f32) -> u32 {
    (16.0 * nof_prbs as f32 * nof_symbols as f32 * max_code_rate).floor() as u32
}

/// Smallest number of PRBs able to carry `uci_bits`, if any within `max_prbs`
fn format2_nof_prbs(max_prbs: u32, nof_symbols: u32, max_code_rate: f32, uci_bits: u32) -> Option<u32> {
    let needed = uci_bits + uci_crc_bits(uci_bits);
    (1..=max_prbs).find(|&n| format2_capacity_bits(n, nof_symbols, max_code_rate) >= needed)
}

#[derive(Debug, Clone, Copy)]
enum RbOffset {
    Prbs(u32),
    /// floor(N_BWP / 4)
    QuarterBwp,
}

/// Row of TS 38.213 Table 9.2.1-1
#[derive(Debug, Clone, Copy)]
struct PucchResourceCommon {
    format: PucchFormat,
    first_symbol: u32,
    nof_symbols: u32,
    rb_offset: RbOffset,
    cyclic_shifts: &'static [u8],
}

const fn row(
    format: PucchFormat,
    first_symbol: u32,
    nof_symbols: u32,
    rb_offset: RbOffset,
    cyclic_shifts: &'static [u8],
) -> PucchResourceCommon {
    PucchResourceCommon { format, first_symbol, nof_symbols, rb_offset, cyclic_shifts }
}

const PUCCH_RESOURCE_COMMON: [PucchResourceCommon; 16] = [
    row(PucchFormat::Format0, 12, 2, RbOffset::Prbs(0), &[0, 3]),
    row(PucchFormat::Format0, 12, 2, RbOffset::Prbs(0), &[0, 4, 8]),
    row(PucchFormat::Format0, 12, 2, RbOffset::Prbs(3), &[0, 4, 8]),
    row(PucchFormat::Format1, 10, 4, RbOffset::Prbs(0), &[0, 6]),
    row(PucchFormat::Format1, 10, 4, RbOffset::Prbs(0), &[0, 3, 6, 9]),
    row(PucchFormat::Format1, 10, 4, RbOffset::Prbs(2), &[0, 3, 6, 9]),
    row(PucchFormat::Format1, 10, 4, RbOffset::Prbs(4), &[0, 3, 6, 9]),
    row(PucchFormat::Format1, 4, 10, RbOffset::Prbs(0), &[0, 6]),
    row(PucchFormat::Format1, 4, 10, RbOffset::Prbs(0), &[0, 3, 6, 9]),
    row(PucchFormat::Format1, 4, 10, RbOffset::Prbs(2), &[0, 3, 6, 9]),
    row(PucchFormat::Format1, 4, 10, RbOffset::Prbs(4), &[0, 3, 6, 9]),
    row(PucchFormat::Format1, 0, 14, RbOffset::Prbs(0), &[0, 6]),
    row(PucchFormat::Format1, 0, 14, RbOffset::Prbs(0), &[0, 3, 6, 9]),
    row(PucchFormat::Format1, 0, 14, RbOffset::Prbs(2), &[0, 3, 6, 9]),
    row(PucchFormat::Format1, 0, 14, RbOffset::QuarterBwp, &[0, 3, 6, 9]),
    row(PucchFormat::Format1, 0, 14, RbOffset::QuarterBwp, &[0, 3, 6, 9]),
];

/// Common PUCCH resource `r_pucch` of the given row (TS 38.213, Section 9.2.1)
fn common_resource_grant(cfg_row: &PucchResourceCommon, r_pucch: u32, nof_bwp_prbs: u32, rnti: Rnti) -> PucchInfo {
    let rb_offset = match cfg_row.rb_offset {
        RbOffset::Prbs(n) => n,
        RbOffset::QuarterBwp => nof_bwp_prbs / 4,
    };
    let nof_cs = cfg_row.cyclic_shifts.len() as u32;
    let (first_prb, second_prb, cs_idx) = if r_pucch / 8 == 0 {
        let prb = rb_offset + r_pucch / nof_cs;
        (prb, nof_bwp_prbs - 1 - prb, r_pucch % nof_cs)
    } else {
        let r = r_pucch - 8;
        let prb = rb_offset + r / nof_cs;
        (nof_bwp_prbs - 1 - prb, prb, r % nof_cs)
    };
    let initial_cyclic_shift = cfg_row.cyclic_shifts[cs_idx as usize];
    let params = match cfg_row.format {
        PucchFormat::Format0 => PucchGrantParams::Format0 { initial_cyclic_shift },
        _ => PucchGrantParams::Format1 { initial_cyclic_shift, time_domain_occ: 0 },
    };
    PucchInfo {
        rnti,
        format: cfg_row.format,
        first_hop: Interval::with_length(first_prb, 1),
        second_hop: Some(Interval::with_length(second_prb, 1)),
        symbols: Interval::with_length(cfg_row.first_symbol, cfg_row.nof_symbols),
        params,
        uci: PucchUciBits { harq_ack_bits: 1, ..Default::default() },
        is_common: true,
        res_id: Some(r_pucch as u8),
    }
}

/// Grant record of a dedicated resource. `nof_prbs` only applies to Format 2.
fn dedicated_resource_grant(res: &PucchResource, rnti: Rnti, uci: PucchUciBits, nof_prbs: u32) -> PucchInfo {
    let (format, symbols, params, width) = match res.params {
        PucchFormatParams::Format1 { initial_cyclic_shift, time_domain_occ, starting_symbol, nof_symbols } => (
            PucchFormat::Format1,
            Interval::with_length(starting_symbol, nof_symbols),
            PucchGrantParams::Format1 { initial_cyclic_shift, time_domain_occ },
            1,
        ),
        PucchFormatParams::Format2 { starting_symbol, nof_symbols, .. } => (
            PucchFormat::Format2,
            Interval::with_length(starting_symbol, nof_symbols),
            PucchGrantParams::Format2 { nof_prbs },
            nof_prbs,
        ),
    };
    PucchInfo {
        rnti,
        format,
        first_hop: Interval::with_length(res.starting_prb, width),
        second_hop: res.second_hop_prb.map(|prb| Interval::with_length(prb, width)),
        symbols,
        params,
        uci,
        is_common: false,
        res_id: Some(res.res_id),
    }
}

/// UL grid rectangles of a grant, split in two halves when hopping
fn hop_grants(cfg: &CellConfiguration, pucch: &PucchInfo) -> (GrantInfo, Option<GrantInfo>) {
    let rect = |crbs: Interval, symbols: Interval| GrantInfo {
        channel: Channel::Pucch,
        scs: cfg.scs,
        symbols,
        crbs,
    };
    match pucch.second_hop {
        None => (rect(pucch.first_hop, pucch.symbols), None),
        Some(second_hop) => {
            let split = pucch.symbols.start + pucch.symbols.length() / 2;
            (
                rect(pucch.first_hop, Interval::new(pucch.symbols.start, split)),
                Some(rect(second_hop, Interval::new(split, pucch.symbols.stop))),
            )
        }
    }
}

fn reserve_in_grid(cfg: &CellConfiguration, slot_alloc: &mut CellSlotResourceAllocator, pucch: &PucchInfo) -> bool {
    let (first, second) = hop_grants(cfg, pucch);
    if !slot_alloc.reserve(&first) {
        return false;
    }
    if let Some(second) = second {
        if !slot_alloc.reserve(&second) {
            slot_alloc.release(&first);
            return false;
        }
    }
    true
}

fn release_from_grid(cfg: &CellConfiguration, slot_alloc: &mut CellSlotResourceAllocator, pucch: &PucchInfo) {
    let (first, second) = hop_grants(cfg, pucch);
    slot_alloc.release(&first);
    if let Some(second) = second {
        slot_alloc.release(&second);
    }
}

/// Grants of one UE in one slot, as indexes into the slot PUCCH list
#[derive(Debug, Default)]
struct UeGrants {
    common: Option<usize>,
    f1_harq: Option<usize>,
    f1_sr: Option<usize>,
    f2: Option<usize>,
}

impl UeGrants {
    fn find(pucchs: &[PucchInfo], rnti: Rnti, pucch_cfg: &PucchConfig) -> Self {
        let mut grants = UeGrants::default();
        for (i, pucch) in pucchs.iter().enumerate().filter(|(_, p)| p.rnti == rnti) {
            if pucch.is_common {
                grants.common = Some(i);
                continue;
            }
            match pucch.format {
                PucchFormat::Format0 | PucchFormat::Format1 if pucch.res_id == Some(pucch_cfg.sr_resource) => {
                    grants.f1_sr = Some(i)
                }
                PucchFormat::Format0 | PucchFormat::Format1 => grants.f1_harq = Some(i),
                _ => grants.f2 = Some(i),
            }
        }
        grants
    }
}

/// PUCCH allocator of one cell
pub struct PucchAllocator {
    cfg: Arc<CellConfiguration>,
    max_pucchs_per_slot: usize,
    resources: PucchResourceManager,
    last_sl_ind: Option<SlotPoint>,
}

impl PucchAllocator {
    pub fn new(cfg: Arc<CellConfiguration>, max_pucchs_per_slot: usize) -> Self {
        Self {
            cfg,
            max_pucchs_per_slot,
            resources: PucchResourceManager::new(),
            last_sl_ind: None,
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
        self.resources.slot_indication(sl_tx);
        Ok(())
    }

    pub fn resource_manager(&self) -> &PucchResourceManager {
        &self.resources
    }

    fn pucch_slot<'a>(
        res_alloc: &'a mut CellResourceAllocator,
        k0: u32,
        k1: u32,
    ) -> Result<&'a mut CellSlotResourceAllocator, PucchAllocError> {
        let offset = k0 + k1;
        if offset as usize >= RING_ALLOCATOR_SIZE {
            return Err(PucchAllocError::SlotOutOfWindow);
        }
        res_alloc.at_offset(offset).map_err(|_| PucchAllocError::SlotOutOfWindow)
    }

    fn check_pucch_limit(&self, slot_alloc: &CellSlotResourceAllocator, rnti: Rnti) -> Result<(), PucchAllocError> {
        if slot_alloc.result.pucchs.len() >= self.max_pucchs_per_slot {
            debug!("rnti={}: PUCCH limit per slot reached at slot {}", rnti, slot_alloc.slot);
            return Err(PucchAllocError::NoCapacity);
        }
        Ok(())
    }

    /// Allocate the HARQ-ACK of a PDSCH scheduled with a common configuration (no dedicated
    /// PUCCH yet). Returns the PUCCH resource indicator to signal in the DCI.
    pub fn alloc_common_pucch_harq_ack_ue(
        &mut self,
        res_alloc: &mut CellResourceAllocator,
        tc_rnti: Rnti,
        k0: u32,
        k1: u32,
        pdcch: &PdcchInfo,
    ) -> Result<u8, PucchAllocError> {
        let slot_alloc = Self::pucch_slot(res_alloc, k0, k1)?;
        let sl = slot_alloc.slot;

        if slot_alloc.result.pucchs.iter().any(|p| p.rnti == tc_rnti && p.is_common) {
            return Err(PucchAllocError::CommonGrantInUse);
        }
        self.check_pucch_limit(slot_alloc, tc_rnti)?;

        let cfg_row = &PUCCH_RESOURCE_COMMON[(self.cfg.pucch_resource_common & 0x0f) as usize];
        let nof_cces = self
            .cfg
            .find_coreset(pdcch.coreset_id)
            .map(|cs| cs.nof_cces())
            .filter(|n| *n > 0)
            .ok_or(PucchAllocError::NoCapacity)?;

        for pri in 0..NOF_PRI_VALUES {
            let r_pucch = (2 * pdcch.ncce) / nof_cces + 2 * pri as u32;
            if r_pucch >= 16 || self.resources.is_common_used(sl, r_pucch as u8) {
                continue;
            }
            let grant = common_resource_grant(cfg_row, r_pucch, self.cfg.nof_crbs, tc_rnti);
            if !reserve_in_grid(&self.cfg, slot_alloc, &grant) {
                continue;
            }
            self.resources.reserve_common(sl, r_pucch as u8);
            debug!(
                "tc-rnti={}: Common PUCCH allocated at slot {} r_pucch={} pri={} prbs={}/{:?}",
                tc_rnti, sl, r_pucch, pri, grant.first_hop, grant.second_hop
            );
            slot_alloc.result.pucchs.push(grant);
            return Ok(pri);
        }

        debug!("tc-rnti={}: No common PUCCH resource available at slot {}", tc_rnti, sl);
        Err(PucchAllocError::NoCapacity)
    }

    /// Allocate one HARQ-ACK bit on the dedicated resources of the UE. Returns the PUCCH
    /// resource indicator to signal in the DCI.
    pub fn alloc_ded_pucch_harq_ack_ue(
        &mut self,
        res_alloc: &mut CellResourceAllocator,
        rnti: Rnti,
        ue_cell_cfg: &UeCellConfiguration,
        k0: u32,
        k1: u32,
    ) -> Result<u8, PucchAllocError> {
        let pucch_cfg = ue_cell_cfg.pucch.as_ref().ok_or(PucchAllocError::NoCapacity)?;
        let slot_alloc = Self::pucch_slot(res_alloc, k0, k1)?;
        let grants = UeGrants::find(&slot_alloc.result.pucchs, rnti, pucch_cfg);

        if grants.common.is_some() {
            return Err(PucchAllocError::CommonGrantInUse);
        }

        // Format 2 already allocated: fold the new bit into it.
        if let Some(f2) = grants.f2 {
            let mut uci = slot_alloc.result.pucchs[f2].uci;
            uci.harq_ack_bits += 1;
            return self
                .place_format2(slot_alloc, rnti, pucch_cfg, uci, true)
                .and_then(|pri| pri.ok_or(PucchAllocError::NoCapacity));
        }

        if let Some(f1) = grants.f1_harq {
            let bits = slot_alloc.result.pucchs[f1].uci.harq_ack_bits;
            if bits < FORMAT1_MAX_HARQ_BITS {
                let res_id = slot_alloc.result.pucchs[f1].res_id;
                let Some(pri) = pucch_cfg.harq_set0.iter().position(|id| Some(*id) == res_id) else {
                    debug!(
                        "rnti={}: PUCCH F1 res={:?} at slot {} not in HARQ set 0",
                        rnti, res_id, slot_alloc.slot
                    );
                    return Err(PucchAllocError::NoCapacity);
                };
                slot_alloc.result.pucchs[f1].uci.harq_ack_bits += 1;
                if let Some(sr) = grants.f1_sr {
                    slot_alloc.result.pucchs[sr].uci.harq_ack_bits += 1;
                }
                trace!("rnti={}: HARQ-ACK bit merged into PUCCH F1 at slot {}", rnti, slot_alloc.slot);
                return Ok(pri as u8);
            }

            // Format 1 overflow: move all the UCI to Format 2.
            let uci = PucchUciBits {
                harq_ack_bits: bits + 1,
                sr_bits: grants.f1_sr.map_or(0, |sr| slot_alloc.result.pucchs[sr].uci.sr_bits),
                csi_part1_bits: 0,
            };
            return self
                .place_format2(slot_alloc, rnti, pucch_cfg, uci, true)
                .and_then(|pri| pri.ok_or(PucchAllocError::NoCapacity));
        }

        self.check_pucch_limit(slot_alloc, rnti)?;
        let sl = slot_alloc.slot;
        for (pri, res_id) in pucch_cfg.harq_set0.iter().enumerate() {
            let Some(res) = pucch_cfg.find_resource(*res_id) else {
                continue;
            };
            if !self.resources.reserve_dedicated(sl, *res_id, rnti) {
                continue;
            }
            let uci = PucchUciBits { harq_ack_bits: 1, ..Default::default() };
            let grant = dedicated_resource_grant(res, rnti, uci, 1);
            if !reserve_in_grid(&self.cfg, slot_alloc, &grant) {
                self.resources.release_dedicated(sl, *res_id, rnti);
                continue;
            }
            slot_alloc.result.pucchs.push(grant);
            if let Some(sr) = grants.f1_sr {
                slot_alloc.result.pucchs[sr].uci.harq_ack_bits += 1;
            }
            debug!("rnti={}: PUCCH F1 HARQ-ACK allocated at slot {} res={} pri={}", rnti, sl, res_id, pri);
            return Ok(pri as u8);
        }

        debug!("rnti={}: No PUCCH F1 resource available at slot {}", rnti, sl);
        Err(PucchAllocError::NoCapacity)
    }

    /// Allocate the periodic SR opportunity of the UE
    pub fn pucch_allocate_sr_opportunity(
        &mut self,
        slot_alloc: &mut CellSlotResourceAllocator,
        rnti: Rnti,
        ue_cell_cfg: &UeCellConfiguration,
    ) -> Result<(), PucchAllocError> {
        let pucch_cfg = ue_cell_cfg.pucch.as_ref().ok_or(PucchAllocError::NoCapacity)?;
        let grants = UeGrants::find(&slot_alloc.result.pucchs, rnti, pucch_cfg);
        if grants.f1_sr.is_some() {
            return Ok(());
        }
        if let Some(f2) = grants.f2 {
            let mut uci = slot_alloc.result.pucchs[f2].uci;
            if uci.sr_bits > 0 {
                return Ok(());
            }
            uci.sr_bits = 1;
            let need_pri = uci.harq_ack_bits > 0;
            return self.place_format2(slot_alloc, rnti, pucch_cfg, uci, need_pri).map(|_| ());
        }

        self.check_pucch_limit(slot_alloc, rnti)?;
        let sl = slot_alloc.slot;
        let res = pucch_cfg
            .find_resource(pucch_cfg.sr_resource)
            .ok_or(PucchAllocError::NoCapacity)?;
        if !self.resources.reserve_dedicated(sl, res.res_id, rnti) {
            return Err(PucchAllocError::NoCapacity);
        }
        let uci = PucchUciBits {
            harq_ack_bits: grants.f1_harq.map_or(0, |h| slot_alloc.result.pucchs[h].uci.harq_ack_bits),
            sr_bits: 1,
            csi_part1_bits: 0,
        };
        let grant = dedicated_resource_grant(res, rnti, uci, 1);
        if !reserve_in_grid(&self.cfg, slot_alloc, &grant) {
            self.resources.release_dedicated(sl, res.res_id, rnti);
            return Err(PucchAllocError::NoCapacity);
        }
        trace!("rnti={}: SR opportunity allocated at slot {}", rnti, sl);
        slot_alloc.result.pucchs.push(grant);
        Ok(())
    }

    /// Allocate the periodic CSI report of the UE. Any Format 1 grant of the UE in the
    /// slot is converted into Format 2.
    pub fn pucch_allocate_csi_opportunity(
        &mut self,
        slot_alloc: &mut CellSlotResourceAllocator,
        rnti: Rnti,
        ue_cell_cfg: &UeCellConfiguration,
        csi_part1_bits: u32,
    ) -> Result<(), PucchAllocError> {
        let pucch_cfg = ue_cell_cfg.pucch.as_ref().ok_or(PucchAllocError::NoCapacity)?;
        let grants = UeGrants::find(&slot_alloc.result.pucchs, rnti, pucch_cfg);
        if grants.common.is_some() {
            return Err(PucchAllocError::CommonGrantInUse);
        }

        let mut uci = match grants.f2 {
            Some(f2) => slot_alloc.result.pucchs[f2].uci,
            None => {
                if grants.f1_harq.is_none() && grants.f1_sr.is_none() {
                    self.check_pucch_limit(slot_alloc, rnti)?;
                }
                PucchUciBits {
                    harq_ack_bits: grants.f1_harq.map_or(0, |h| slot_alloc.result.pucchs[h].uci.harq_ack_bits),
                    sr_bits: grants.f1_sr.map_or(0, |sr| slot_alloc.result.pucchs[sr].uci.sr_bits),
                    csi_part1_bits: 0,
                }
            }
        };
        uci.csi_part1_bits += csi_part1_bits;
        let need_pri = uci.harq_ack_bits > 0;
        self.place_format2(slot_alloc, rnti, pucch_cfg, uci, need_pri).map(|_| ())
    }

    /// Move all the dedicated UCI of the UE in the slot onto one Format 2 grant carrying
    /// `uci`. Resources of HARQ set 1 are used when a PRI must be signalled, the CSI
    /// resource otherwise. On failure the slot is left untouched.
    fn place_format2(
        &mut self,
        slot_alloc: &mut CellSlotResourceAllocator,
        rnti: Rnti,
        pucch_cfg: &PucchConfig,
        uci: PucchUciBits,
        need_pri: bool,
    ) -> Result<Option<u8>, PucchAllocError> {
        let sl = slot_alloc.slot;
        let candidates: Vec<(Option<u8>, u8)> = if need_pri || pucch_cfg.csi_resource.is_none() {
            pucch_cfg
                .harq_set1
                .iter()
                .enumerate()
                .map(|(pri, id)| (Some(pri as u8), *id))
                .collect()
        } else {
            pucch_cfg.csi_resource.iter().map(|id| (None, *id)).collect()
        };
        if candidates.is_empty() {
            debug!("rnti={}: No PUCCH F2 resource configured", rnti);
            return Err(PucchAllocError::NoCapacity);
        }

        // Lift the current dedicated grants out of the slot.
        let old_grants = self.take_grants(slot_alloc, |p| p.rnti == rnti && !p.is_common);
        let old_f2_res = old_grants
            .iter()
            .find(|p| p.format == PucchFormat::Format2)
            .and_then(|p| p.res_id);

        // The resource already in use is tried first.
        let ordered = candidates
            .iter()
            .filter(|(_, id)| Some(*id) == old_f2_res)
            .chain(candidates.iter().filter(|(_, id)| Some(*id) != old_f2_res));

        let max_code_rate = pucch_cfg.f2_max_code_rate.to_f32();
        let mut capacity_exceeded = false;
        for (pri, res_id) in ordered {
            let Some(res) = pucch_cfg.find_resource(*res_id) else {
                continue;
            };
            let PucchFormatParams::Format2 { nof_prbs: max_prbs, nof_symbols, .. } = res.params else {
                continue;
            };
            let Some(nof_prbs) = format2_nof_prbs(max_prbs, nof_symbols, max_code_rate, uci.total()) else {
                capacity_exceeded = true;
                continue;
            };
            if !self.resources.reserve_dedicated(sl, *res_id, rnti) {
                continue;
            }
            let grant = dedicated_resource_grant(res, rnti, uci, nof_prbs);
            if !reserve_in_grid(&self.cfg, slot_alloc, &grant) {
                self.resources.release_dedicated(sl, *res_id, rnti);
                continue;
            }
            debug!(
                "rnti={}: PUCCH F2 allocated at slot {} res={} prbs={} uci={:?}",
                rnti, sl, res_id, nof_prbs, uci
            );
            slot_alloc.result.pucchs.push(grant);
            return Ok(*pri);
        }

        // Restore the previous grants.
        for grant in old_grants {
            if let Some(res_id) = grant.res_id {
                self.resources.reserve_dedicated(sl, res_id, rnti);
            }
            let restored = reserve_in_grid(&self.cfg, slot_alloc, &grant);
            debug_assert!(restored, "Failed to restore PUCCH grant");
            slot_alloc.result.pucchs.push(grant);
        }

        if capacity_exceeded {
            info!("rnti={}: UCI of {} bits exceeds the PUCCH F2 capacity at slot {}", rnti, uci.total(), sl);
            return Err(PucchAllocError::UpgradeRequired {
                from: PucchFormat::Format2,
                to: PucchFormat::Format3,
            });
        }
        debug!("rnti={}: No PUCCH F2 resource available at slot {}", rnti, sl);
        Err(PucchAllocError::NoCapacity)
    }

    /// Remove the grants matching `pred` from the slot, returning their units and resources
    fn take_grants(
        &mut self,
        slot_alloc: &mut CellSlotResourceAllocator,
        pred: impl Fn(&PucchInfo) -> bool,
    ) -> Vec<PucchInfo> {
        let sl = slot_alloc.slot;
        let (removed, kept): (Vec<PucchInfo>, Vec<PucchInfo>) =
            std::mem::take(&mut slot_alloc.result.pucchs).into_iter().partition(|p| pred(p));
        slot_alloc.result.pucchs = kept;
        for grant in &removed {
            release_from_grid(&self.cfg, slot_alloc, grant);
            match (grant.is_common, grant.res_id) {
                (true, Some(r_pucch)) => self.resources.release_common(sl, r_pucch),
                (false, Some(res_id)) => {
                    self.resources.release_dedicated(sl, res_id, grant.rnti);
                }
                _ => {}
            }
        }
        removed
    }

    /// Remove all the PUCCH grants of the UE in the slot, e.g. when its UCI is multiplexed
    /// on PUSCH. Returns the UCI bits that were carried.
    pub fn remove_ue_uci_from_pucch(&mut self, slot_alloc: &mut CellSlotResourceAllocator, rnti: Rnti) -> PucchUciBits {
        let removed = self.take_grants(slot_alloc, |p| p.rnti == rnti);
        // The SR grant repeats the HARQ-ACK bits of the F1 HARQ grant.
        let uci = removed.iter().fold(PucchUciBits::default(), |acc, p| PucchUciBits {
            harq_ack_bits: acc.harq_ack_bits.max(p.uci.harq_ack_bits),
            sr_bits: acc.sr_bits + p.uci.sr_bits,
            csi_part1_bits: acc.csi_part1_bits + p.uci.csi_part1_bits,
        });
        if !removed.is_empty() {
            trace!("rnti={}: {} PUCCH grants removed at slot {}", rnti, removed.len(), slot_alloc.slot);
        }
        uci
    }

    /// Release every PUCCH grant of the UE in the whole allocation window
    pub fn remove_ue(&mut self, res_alloc: &mut CellResourceAllocator, rnti: Rnti) {
        let mut nof_removed = 0;
        for offset in 0..RING_ALLOCATOR_SIZE as u32 {
            let Ok(slot_alloc) = res_alloc.at_offset(offset) else {
                break;
            };
            nof_removed += self.take_grants(slot_alloc, |p| p.rnti == rnti).len();
        }
        self.resources.release_all(rnti);
        if nof_removed > 0 {
            debug!("rnti={}: {} PUCCH grants released", rnti, nof_removed);
        }
    }
}
