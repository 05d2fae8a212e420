//! Scheduler configuration
//!
//! Cell, UE and expert parameters consumed by the scheduler. All types deserialize from
//! the gNodeB configuration file.

use crate::SchedError;
use common::types::{CellIndex, Lcg, Lcid, Rnti, SlotPoint, SubcarrierSpacing, UeIndex};
use common::types::{MAX_NOF_DU_CELLS, MAX_NOF_LCGS};
use serde::{Deserialize, Serialize};

/// Tuning knobs that are not part of the cell or UE configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchedulerExpertConfig {
    /// Maximum number of PDCCHs (DL + UL) allocated per slot
    #[serde(default = "default_max_pdcchs_per_slot")]
    pub max_pdcchs_per_slot: usize,
    /// Maximum number of PUCCH grants per slot
    #[serde(default = "default_max_pucchs_per_slot")]
    pub max_pucchs_per_slot: usize,
    /// Maximum number of UE data grants per slot and direction
    #[serde(default = "default_max_ue_grants_per_slot")]
    pub max_ue_grants_per_slot: usize,
    /// Maximum number of HARQ retransmissions
    #[serde(default = "default_max_harq_retx")]
    pub max_harq_retx: u8,
    /// CQI assumed until the first CSI report
    #[serde(default = "default_initial_cqi")]
    pub initial_cqi: u8,
    /// Capacity of the diagnostic event record channel
    #[serde(default = "default_event_log_capacity")]
    pub event_log_capacity: usize,
    /// MCS of SRB0 grants, which are never segmented
    #[serde(default = "default_max_msg4_mcs")]
    pub max_msg4_mcs: u8,
}

fn default_max_pdcchs_per_slot() -> usize {
    16
}

fn default_max_pucchs_per_slot() -> usize {
    32
}

fn default_max_ue_grants_per_slot() -> usize {
    8
}

fn default_max_harq_retx() -> u8 {
    4
}

fn default_initial_cqi() -> u8 {
    9
}

fn default_event_log_capacity() -> usize {
    4096
}

fn default_max_msg4_mcs() -> u8 {
    9
}

impl Default for SchedulerExpertConfig {
    fn default() -> Self {
        Self {
            max_pdcchs_per_slot: default_max_pdcchs_per_slot(),
            max_pucchs_per_slot: default_max_pucchs_per_slot(),
            max_ue_grants_per_slot: default_max_ue_grants_per_slot(),
            max_harq_retx: default_max_harq_retx(),
            initial_cqi: default_initial_cqi(),
            event_log_capacity: default_event_log_capacity(),
            max_msg4_mcs: default_max_msg4_mcs(),
        }
    }
}

/// PDCCH aggregation level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum AggregationLevel {
    N1,
    N2,
    N4,
    N8,
    N16,
}

impl AggregationLevel {
    /// Number of CCEs spanned by a PDCCH of this level
    pub fn nof_cces(&self) -> u32 {
        match self {
            AggregationLevel::N1 => 1,
            AggregationLevel::N2 => 2,
            AggregationLevel::N4 => 4,
            AggregationLevel::N8 => 8,
            AggregationLevel::N16 => 16,
        }
    }
}

/// Control resource set, non-interleaved and contiguous in frequency
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CoresetConfig {
    pub id: u8,
    /// First CRB of the CORESET
    pub start_crb: u32,
    /// Number of RBs, a multiple of 6
    pub nof_rbs: u32,
    #[serde(default)]
    pub start_symbol: u32,
    /// Duration in symbols (1-3)
    pub duration: u32,
}

impl CoresetConfig {
    /// Number of CCEs contained in the CORESET
    pub fn nof_cces(&self) -> u32 {
        self.nof_rbs * self.duration / 6
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum SearchSpaceType {
    Common,
    UeSpecific,
}

/// CCE candidate positions per aggregation level, in priority order
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CceCandidates {
    #[serde(default)]
    pub al1: Vec<u32>,
    #[serde(default)]
    pub al2: Vec<u32>,
    #[serde(default)]
    pub al4: Vec<u32>,
    #[serde(default)]
    pub al8: Vec<u32>,
    #[serde(default)]
    pub al16: Vec<u32>,
}

impl CceCandidates {
    pub fn get(&self, aggr_lvl: AggregationLevel) -> &[u32] {
        match aggr_lvl {
            AggregationLevel::N1 => &self.al1,
            AggregationLevel::N2 => &self.al2,
            AggregationLevel::N4 => &self.al4,
            AggregationLevel::N8 => &self.al8,
            AggregationLevel::N16 => &self.al16,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SearchSpaceConfig {
    pub id: u8,
    pub coreset_id: u8,
    #[serde(rename = "type")]
    pub ss_type: SearchSpaceType,
    #[serde(default)]
    pub candidates: CceCandidates,
}

/// TDD pattern: `nof_dl_slots` DL slots, then flexible slots, then `nof_ul_slots` UL slots
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TddPattern {
    pub period_slots: u32,
    pub nof_dl_slots: u32,
    pub nof_ul_slots: u32,
}

/// PDSCH time domain resource, relative to the slot of its PDCCH
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct PdschTimeDomainResource {
    #[serde(default)]
    pub k0: u32,
    pub start_symbol: u32,
    pub nof_symbols: u32,
}

/// Cell configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CellConfiguration {
    pub cell_index: CellIndex,
    pub pci: u16,
    pub scs: SubcarrierSpacing,
    /// Number of CRBs of the carrier (initial BWP spans the whole carrier)
    pub nof_crbs: u32,
    #[serde(default = "default_nof_symbols")]
    pub nof_symbols: u32,
    /// FDD when absent
    #[serde(default)]
    pub tdd: Option<TddPattern>,
    pub coresets: Vec<CoresetConfig>,
    pub search_spaces: Vec<SearchSpaceConfig>,
    /// Search space used for common-RNTI and fallback DCIs
    #[serde(default = "default_common_ss_id")]
    pub common_ss_id: u8,
    /// Row of TS 38.213 Table 9.2.1-1
    #[serde(default)]
    pub pucch_resource_common: u8,
    /// PDSCH-to-HARQ feedback delays, tried in order
    #[serde(default = "default_k1_candidates")]
    pub k1_candidates: Vec<u32>,
    /// PDCCH-to-PUSCH delay
    #[serde(default = "default_k2")]
    pub k2: u32,
    /// First PDSCH symbol (after the control region)
    #[serde(default = "default_pdsch_start_symbol")]
    pub pdsch_start_symbol: u32,
    /// Time domain resources tried in order for SRB0 grants
    #[serde(default)]
    pub pdsch_td_alloc_list: Vec<PdschTimeDomainResource>,
}

fn default_nof_symbols() -> u32 {
    14
}

fn default_common_ss_id() -> u8 {
    1
}

fn default_k1_candidates() -> Vec<u32> {
    vec![4, 5, 6, 7]
}

fn default_k2() -> u32 {
    4
}

fn default_pdsch_start_symbol() -> u32 {
    2
}

impl CellConfiguration {
    pub fn find_coreset(&self, id: u8) -> Option<&CoresetConfig> {
        self.coresets.iter().find(|cs| cs.id == id)
    }

    pub fn find_search_space(&self, id: u8) -> Option<&SearchSpaceConfig> {
        self.search_spaces.iter().find(|ss| ss.id == id)
    }

    /// Configured SRB0 PDSCH time domain resources, or a single same-slot resource from
    /// `pdsch_start_symbol` to the end of the slot
    pub fn pdsch_td_resources(&self) -> Vec<PdschTimeDomainResource> {
        if !self.pdsch_td_alloc_list.is_empty() {
            return self.pdsch_td_alloc_list.clone();
        }
        vec![PdschTimeDomainResource {
            k0: 0,
            start_symbol: self.pdsch_start_symbol,
            nof_symbols: self.nof_symbols.saturating_sub(self.pdsch_start_symbol),
        }]
    }

    /// Whether DL transmissions are possible in the given slot
    pub fn is_dl_enabled(&self, sl: SlotPoint) -> bool {
        match &self.tdd {
            None => true,
            Some(tdd) => sl.to_uint() % tdd.period_slots < tdd.nof_dl_slots,
        }
    }

    /// Whether UL transmissions are possible in the given slot
    pub fn is_ul_enabled(&self, sl: SlotPoint) -> bool {
        match &self.tdd {
            None => true,
            Some(tdd) => sl.to_uint() % tdd.period_slots >= tdd.period_slots - tdd.nof_ul_slots,
        }
    }

    pub fn validate(&self) -> Result<(), SchedError> {
        if self.cell_index.as_usize() >= MAX_NOF_DU_CELLS {
            return Err(SchedError::InvalidConfiguration(format!(
                "cell_index {} exceeds the DU limit", self.cell_index
            )));
        }
        if self.nof_crbs == 0 || self.nof_crbs > 275 {
            return Err(SchedError::InvalidConfiguration(format!(
                "Invalid number of CRBs {}", self.nof_crbs
            )));
        }
        for cs in &self.coresets {
            if cs.nof_rbs % 6 != 0 || cs.nof_rbs == 0 || !(1..=3).contains(&cs.duration) {
                return Err(SchedError::InvalidConfiguration(format!(
                    "CORESET {} must span a multiple of 6 RBs over 1-3 symbols", cs.id
                )));
            }
            if cs.start_crb + cs.nof_rbs > self.nof_crbs || cs.start_symbol + cs.duration > self.nof_symbols {
                return Err(SchedError::InvalidConfiguration(format!(
                    "CORESET {} exceeds the carrier", cs.id
                )));
            }
        }
        for ss in &self.search_spaces {
            if self.find_coreset(ss.coreset_id).is_none() {
                return Err(SchedError::InvalidConfiguration(format!(
                    "Search space {} refers to unknown CORESET {}", ss.id, ss.coreset_id
                )));
            }
        }
        if self.find_search_space(self.common_ss_id).is_none() {
            return Err(SchedError::InvalidConfiguration(format!(
                "Common search space {} not configured", self.common_ss_id
            )));
        }
        if self.pucch_resource_common > 15 {
            return Err(SchedError::InvalidConfiguration(format!(
                "pucch_resource_common {} out of range (0-15)", self.pucch_resource_common
            )));
        }
        let max_k = self.k1_candidates.iter().copied().chain(std::iter::once(self.k2)).max().unwrap_or(0);
        if self.k1_candidates.is_empty() || max_k as usize >= crate::RING_ALLOCATOR_SIZE {
            return Err(SchedError::InvalidConfiguration(format!(
                "k1/k2 must be non-empty and lower than the allocation window of {} slots",
                crate::RING_ALLOCATOR_SIZE
            )));
        }
        for td in &self.pdsch_td_alloc_list {
            if td.nof_symbols == 0 || td.start_symbol + td.nof_symbols > self.nof_symbols {
                return Err(SchedError::InvalidConfiguration(format!(
                    "PDSCH symbols {}+{} exceed the slot", td.start_symbol, td.nof_symbols
                )));
            }
            if (td.k0 + max_k) as usize >= crate::RING_ALLOCATOR_SIZE {
                return Err(SchedError::InvalidConfiguration(format!(
                    "PDSCH k0 {} plus k1 {} exceeds the allocation window", td.k0, max_k
                )));
            }
        }
        if let Some(tdd) = &self.tdd {
            if tdd.period_slots == 0 || tdd.nof_dl_slots + tdd.nof_ul_slots > tdd.period_slots {
                return Err(SchedError::InvalidConfiguration("Invalid TDD pattern".into()));
            }
        }
        Ok(())
    }
}

/// PUCCH format specific resource parameters
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "format")]
pub enum PucchFormatParams {
    Format1 {
        initial_cyclic_shift: u8,
        time_domain_occ: u8,
        starting_symbol: u32,
        nof_symbols: u32,
    },
    Format2 {
        /// Maximum number of PRBs the grant may grow to
        nof_prbs: u32,
        starting_symbol: u32,
        nof_symbols: u32,
    },
}

/// Dedicated PUCCH resource
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PucchResource {
    pub res_id: u8,
    pub starting_prb: u32,
    /// PRB of the second hop when intra-slot frequency hopping is enabled
    #[serde(default)]
    pub second_hop_prb: Option<u32>,
    #[serde(flatten)]
    pub params: PucchFormatParams,
}

/// PUCCH Format 2 maximum code rate (TS 38.331 PUCCH-MaxCodeRate)
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub enum MaxCodeRate {
    Dot08,
    Dot15,
    Dot25,
    Dot35,
    Dot45,
    Dot60,
    Dot80,
}

impl MaxCodeRate {
    pub fn to_f32(&self) -> f32 {
        match self {
            MaxCodeRate::Dot08 => 0.08,
            MaxCodeRate::Dot15 => 0.15,
            MaxCodeRate::Dot25 => 0.25,
            MaxCodeRate::Dot35 => 0.35,
            MaxCodeRate::Dot45 => 0.45,
            MaxCodeRate::Dot60 => 0.60,
            MaxCodeRate::Dot80 => 0.80,
        }
    }
}

fn default_max_code_rate() -> MaxCodeRate {
    MaxCodeRate::Dot35
}

/// UE dedicated PUCCH configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PucchConfig {
    pub resources: Vec<PucchResource>,
    /// Resource set 0: Format 1 resources for up to 2 HARQ-ACK bits, indexed by PRI
    pub harq_set0: Vec<u8>,
    /// Resource set 1: Format 2 resources for more than 2 UCI bits, indexed by PRI
    #[serde(default)]
    pub harq_set1: Vec<u8>,
    pub sr_resource: u8,
    #[serde(default)]
    pub csi_resource: Option<u8>,
    #[serde(default = "default_max_code_rate")]
    pub f2_max_code_rate: MaxCodeRate,
}

impl PucchConfig {
    pub fn find_resource(&self, res_id: u8) -> Option<&PucchResource> {
        self.resources.iter().find(|res| res.res_id == res_id)
    }
}

/// Periodic scheduling request opportunity
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SrConfig {
    pub period_slots: u32,
    #[serde(default)]
    pub offset: u32,
}

/// Periodic CSI report on PUCCH
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CsiReportConfig {
    pub period_slots: u32,
    #[serde(default)]
    pub offset: u32,
    #[serde(default = "default_csi_part1_bits")]
    pub part1_bits: u32,
}

fn default_csi_part1_bits() -> u32 {
    4
}

/// Per-serving-cell UE configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UeCellConfiguration {
    pub cell_index: CellIndex,
    /// UE-specific search space
    pub ss_id: u8,
    /// Absent until the UE dedicated configuration is applied
    #[serde(default)]
    pub pucch: Option<PucchConfig>,
    #[serde(default)]
    pub sr: Option<SrConfig>,
    #[serde(default)]
    pub csi: Option<CsiReportConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogicalChannelConfig {
    pub lcid: Lcid,
    pub lcg: Lcg,
    #[serde(default)]
    pub priority: u8,
}

/// UE configuration; the first cell is the PCell
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UeConfiguration {
    pub ue_index: UeIndex,
    pub crnti: Rnti,
    pub cells: Vec<UeCellConfiguration>,
    #[serde(default)]
    pub logical_channels: Vec<LogicalChannelConfig>,
}

impl UeConfiguration {
    pub fn pcell(&self) -> Option<&UeCellConfiguration> {
        self.cells.first()
    }

    pub fn find_cell(&self, cell_index: CellIndex) -> Option<&UeCellConfiguration> {
        self.cells.iter().find(|c| c.cell_index == cell_index)
    }

    pub fn validate(&self) -> Result<(), SchedError> {
        if self.cells.is_empty() {
            return Err(SchedError::InvalidConfiguration(format!(
                "ue={} has no serving cells", self.ue_index
            )));
        }
        for cell in &self.cells {
            if let Some(pucch) = &cell.pucch {
                let ids = pucch
                    .harq_set0
                    .iter()
                    .chain(pucch.harq_set1.iter())
                    .chain(std::iter::once(&pucch.sr_resource))
                    .chain(pucch.csi_resource.iter());
                for res_id in ids {
                    if pucch.find_resource(*res_id).is_none() {
                        return Err(SchedError::InvalidConfiguration(format!(
                            "ue={}: PUCCH resource {} not configured", self.ue_index, res_id
                        )));
                    }
                }
                if pucch.harq_set0.len() > 8 || pucch.harq_set1.len() > 8 {
                    return Err(SchedError::InvalidConfiguration(format!(
                        "ue={}: PUCCH resource sets are limited to 8 entries", self.ue_index
                    )));
                }
            }
        }
        for lc in &self.logical_channels {
            if (lc.lcg.0 as usize) >= MAX_NOF_LCGS {
                return Err(SchedError::InvalidConfiguration(format!(
                    "ue={}: invalid LCG for lcid={}", self.ue_index, lc.lcid
                )));
            }
        }
        Ok(())
    }
}
