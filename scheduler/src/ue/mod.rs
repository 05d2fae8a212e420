//! UE Context
//!
//! Scheduler-side state of every UE: serving cells with their HARQ entities and channel
//! state, plus DL and UL logical channel state.

pub mod harq;
pub mod logical_channels;

use crate::config::{SchedulerExpertConfig, UeCellConfiguration, UeConfiguration};
use common::types::{CellIndex, HarqId, Lcid, Rnti, SlotPoint, UeIndex, MAX_NOF_HARQS};
use harq::{HarqAckValue, HarqEntity, HarqFeedbackOutcome};
use logical_channels::{DlLogicalChannelManager, UlLogicalChannelManager};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Latest channel measurements of a UE in one cell
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UeChannelState {
    pub cqi: u8,
    pub pucch_sinr_db: Option<f32>,
    pub pusch_sinr_db: Option<f32>,
    pub ph_db: Option<i8>,
    /// Accumulated timing advance offset, in TA units
    pub ta_offset: i32,
}

/// UE state in one serving cell
pub struct UeCell {
    pub cell_index: CellIndex,
    pub cfg: UeCellConfiguration,
    pub dl_harqs: HarqEntity,
    pub ul_harqs: HarqEntity,
    pub channel_state: UeChannelState,
}

impl UeCell {
    fn new(rnti: Rnti, cfg: UeCellConfiguration, expert: &SchedulerExpertConfig, sl: SlotPoint) -> Self {
        Self {
            cell_index: cfg.cell_index,
            cfg,
            dl_harqs: HarqEntity::new(rnti, MAX_NOF_HARQS, expert.max_harq_retx, sl),
            ul_harqs: HarqEntity::new(rnti, MAX_NOF_HARQS, expert.max_harq_retx, sl),
            channel_state: UeChannelState {
                cqi: expert.initial_cqi,
                pucch_sinr_db: None,
                pusch_sinr_db: None,
                ph_db: None,
                ta_offset: 0,
            },
        }
    }

    /// Apply the DL HARQ-ACK bits received in `slot_rx`
    pub fn handle_dl_ack_info(&mut self, slot_rx: SlotPoint, acks: &[HarqAckValue]) -> Vec<HarqFeedbackOutcome> {
        acks.iter()
            .enumerate()
            .map(|(bit_idx, ack)| self.dl_harqs.handle_ack_info(slot_rx, *ack, bit_idx as u8))
            .collect()
    }

    /// Apply the CRC of a PUSCH received in `sl_rx`. Returns the TBS of a decoded
    /// transport block.
    pub fn handle_crc_pdu(&mut self, sl_rx: SlotPoint, harq_id: HarqId, crc_ok: bool, ul_sinr_db: Option<f32>) -> Option<u32> {
        if ul_sinr_db.is_some() {
            self.channel_state.pusch_sinr_db = ul_sinr_db;
        }
        match self.ul_harqs.handle_crc(sl_rx, harq_id, crc_ok) {
            HarqFeedbackOutcome::Acked { tbs_bytes } => Some(tbs_bytes),
            HarqFeedbackOutcome::Nacked { .. } | HarqFeedbackOutcome::Stale => None,
        }
    }

    pub fn handle_csi_report(&mut self, cqi: u8) {
        self.channel_state.cqi = cqi.min(15);
    }
}

pub struct Ue {
    pub ue_index: UeIndex,
    pub crnti: Rnti,
    cfg: UeConfiguration,
    cells: Vec<UeCell>,
    pub dl_lc: DlLogicalChannelManager,
    pub ul_lc: UlLogicalChannelManager,
}

impl Ue {
    pub fn new(cfg: UeConfiguration, expert: &SchedulerExpertConfig, sl: SlotPoint) -> Self {
        let cells = cfg
            .cells
            .iter()
            .map(|c| UeCell::new(cfg.crnti, c.clone(), expert, sl))
            .collect();
        Self {
            ue_index: cfg.ue_index,
            crnti: cfg.crnti,
            dl_lc: DlLogicalChannelManager::new(&cfg.logical_channels),
            ul_lc: UlLogicalChannelManager::new(&cfg.logical_channels),
            cells,
            cfg,
        }
    }

    pub fn config(&self) -> &UeConfiguration {
        &self.cfg
    }

    /// The PCell is the first configured serving cell
    pub fn pcell_index(&self) -> CellIndex {
        self.cells.first().map_or(CellIndex(0), |c| c.cell_index)
    }

    pub fn cells(&self) -> &[UeCell] {
        &self.cells
    }

    pub fn find_cell(&self, cell_index: CellIndex) -> Option<&UeCell> {
        self.cells.iter().find(|c| c.cell_index == cell_index)
    }

    pub fn find_cell_mut(&mut self, cell_index: CellIndex) -> Option<&mut UeCell> {
        self.cells.iter_mut().find(|c| c.cell_index == cell_index)
    }

    /// Apply a new configuration. HARQ state survives for the cells still configured.
    pub fn handle_reconfiguration(&mut self, cfg: UeConfiguration, expert: &SchedulerExpertConfig, sl: SlotPoint) {
        let mut old_cells = std::mem::take(&mut self.cells);
        self.cells = cfg
            .cells
            .iter()
            .map(|c| match old_cells.iter().position(|old| old.cell_index == c.cell_index) {
                Some(pos) => {
                    let mut cell = old_cells.swap_remove(pos);
                    cell.cfg = c.clone();
                    cell
                }
                None => UeCell::new(self.crnti, c.clone(), expert, sl),
            })
            .collect();
        self.dl_lc.configure(&cfg.logical_channels);
        self.ul_lc.configure(&cfg.logical_channels);
        self.cfg = cfg;
        debug!("ue={} rnti={}: Configuration updated", self.ue_index, self.crnti);
    }

    pub fn handle_dl_buffer_state(&mut self, lcid: Lcid, bs: u32) -> bool {
        self.dl_lc.handle_dl_buffer_status(lcid, bs)
    }

    /// Advance the HARQ timers of every serving cell
    pub fn slot_indication(&mut self, sl: SlotPoint) {
        for cell in &mut self.cells {
            cell.dl_harqs.slot_indication(sl);
            cell.ul_harqs.slot_indication(sl);
        }
    }

    pub fn has_pending_dl_newtx_bytes(&self) -> bool {
        self.dl_lc.has_pending_bytes()
    }

    /// Whether the UE needs an UL grant for new data
    pub fn has_pending_ul_data(&self) -> bool {
        self.ul_lc.has_pending_sr() || self.ul_lc.pending_bytes() > 0
    }
}

/// UEs of the DU, indexed by `UeIndex` and C-RNTI
#[derive(Default)]
pub struct UeRepository {
    ues: BTreeMap<UeIndex, Ue>,
    rnti_to_ue: HashMap<Rnti, UeIndex>,
    /// UEs removed since the last `take_removed`
    removed: Vec<(Rnti, Vec<CellIndex>)>,
}

impl UeRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, ue_index: UeIndex) -> bool {
        self.ues.contains_key(&ue_index)
    }

    pub fn contains_rnti(&self, rnti: Rnti) -> bool {
        self.rnti_to_ue.contains_key(&rnti)
    }

    /// Insert a UE. Fails if the index or the C-RNTI is already in use.
    pub fn add_ue(&mut self, ue: Ue) -> Result<(), Ue> {
        if self.contains(ue.ue_index) || self.contains_rnti(ue.crnti) {
            return Err(ue);
        }
        self.rnti_to_ue.insert(ue.crnti, ue.ue_index);
        self.ues.insert(ue.ue_index, ue);
        Ok(())
    }

    pub fn remove_ue(&mut self, ue_index: UeIndex) -> Option<Ue> {
        let ue = self.ues.remove(&ue_index)?;
        self.rnti_to_ue.remove(&ue.crnti);
        self.removed
            .push((ue.crnti, ue.cells.iter().map(|c| c.cell_index).collect()));
        Some(ue)
    }

    /// UEs removed since the last call, with their serving cells
    pub fn take_removed(&mut self) -> Vec<(Rnti, Vec<CellIndex>)> {
        std::mem::take(&mut self.removed)
    }

    pub fn get(&self, ue_index: UeIndex) -> Option<&Ue> {
        self.ues.get(&ue_index)
    }

    pub fn get_mut(&mut self, ue_index: UeIndex) -> Option<&mut Ue> {
        self.ues.get_mut(&ue_index)
    }

    pub fn find_by_rnti(&self, rnti: Rnti) -> Option<&Ue> {
        self.rnti_to_ue.get(&rnti).and_then(|idx| self.ues.get(idx))
    }

    pub fn len(&self) -> usize {
        self.ues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ues.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Ue> {
        self.ues.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Ue> {
        self.ues.values_mut()
    }
}
