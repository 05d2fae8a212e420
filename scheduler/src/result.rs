//! Scheduling decision records
//!
//! Grant records produced per slot and handed to the PHY adapter.

use crate::config::AggregationLevel;
use common::types::{HarqId, Rnti, SlotPoint};
use common::utils::Interval;
use serde::Serialize;

/// DCI format carried by a PDCCH
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DciFormat {
    /// DL fallback
    Dl1_0,
    /// DL non-fallback
    Dl1_1,
    /// UL fallback
    Ul0_0,
    /// UL non-fallback
    Ul0_1,
}

impl DciFormat {
    pub fn is_dl(&self) -> bool {
        matches!(self, DciFormat::Dl1_0 | DciFormat::Dl1_1)
    }
}

/// Committed control-channel grant
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PdcchInfo {
    pub rnti: Rnti,
    pub dci_format: DciFormat,
    pub aggr_lvl: AggregationLevel,
    pub ss_id: u8,
    pub coreset_id: u8,
    /// First CCE of the candidate chosen by the allocator
    pub ncce: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum PucchFormat {
    Format0,
    Format1,
    Format2,
    Format3,
    Format4,
}

/// UCI payload carried by one PUCCH grant
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PucchUciBits {
    pub harq_ack_bits: u32,
    pub sr_bits: u32,
    pub csi_part1_bits: u32,
}

impl PucchUciBits {
    pub fn total(&self) -> u32 {
        self.harq_ack_bits + self.sr_bits + self.csi_part1_bits
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PucchGrantParams {
    Format0 { initial_cyclic_shift: u8 },
    Format1 { initial_cyclic_shift: u8, time_domain_occ: u8 },
    Format2 { nof_prbs: u32 },
}

/// Committed feedback-channel grant
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PucchInfo {
    pub rnti: Rnti,
    pub format: PucchFormat,
    /// CRBs of the first hop
    pub first_hop: Interval,
    /// CRBs of the second hop, if frequency hopping is enabled
    pub second_hop: Option<Interval>,
    pub symbols: Interval,
    pub params: PucchGrantParams,
    pub uci: PucchUciBits,
    /// Common (pucch-ResourceCommon) or dedicated resource
    pub is_common: bool,
    /// Dedicated resource identity, or `r_PUCCH` for common resources
    pub res_id: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PdschInfo {
    pub rnti: Rnti,
    pub crbs: Interval,
    pub symbols: Interval,
    pub harq_id: HarqId,
    pub tbs_bytes: u32,
    pub mcs: u8,
    pub is_retx: bool,
    /// Slot of the HARQ-ACK feedback
    pub ack_slot: SlotPoint,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PuschInfo {
    pub rnti: Rnti,
    pub crbs: Interval,
    pub symbols: Interval,
    pub harq_id: HarqId,
    pub tbs_bytes: u32,
    pub mcs: u8,
    pub is_retx: bool,
    /// UCI moved from the PUCCH of the same slot
    pub uci: PucchUciBits,
}

/// Scheduling decision for one cell and one slot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlotResult {
    pub slot: SlotPoint,
    pub dl_pdcchs: Vec<PdcchInfo>,
    pub ul_pdcchs: Vec<PdcchInfo>,
    pub pdschs: Vec<PdschInfo>,
    pub puschs: Vec<PuschInfo>,
    pub pucchs: Vec<PucchInfo>,
}

impl SlotResult {
    pub fn new(slot: SlotPoint) -> Self {
        Self {
            slot,
            dl_pdcchs: Vec::new(),
            ul_pdcchs: Vec::new(),
            pdschs: Vec::new(),
            puschs: Vec::new(),
            pucchs: Vec::new(),
        }
    }

    /// Reset the decision for a new slot keeping the allocated capacity
    pub fn clear(&mut self, slot: SlotPoint) {
        self.slot = slot;
        self.dl_pdcchs.clear();
        self.ul_pdcchs.clear();
        self.pdschs.clear();
        self.puschs.clear();
        self.pucchs.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.dl_pdcchs.is_empty()
            && self.ul_pdcchs.is_empty()
            && self.pdschs.is_empty()
            && self.puschs.is_empty()
            && self.pucchs.is_empty()
    }
}
