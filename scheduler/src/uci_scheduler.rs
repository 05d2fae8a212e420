//! UCI Scheduler
//!
//! Places the periodic SR and CSI opportunities of every UE served by the cell on the
//! PUCCH. Each slot entering the allocation window gets the opportunities of all UEs; a UE
//! created or reconfigured mid-run also gets those of the slots already in the window.

use crate::config::{CellConfiguration, CsiReportConfig, SrConfig, UeCellConfiguration};
use crate::pucch::{PucchAllocError, PucchAllocator};
use crate::resource_grid::CellResourceAllocator;
use crate::ue::UeRepository;
use crate::RING_ALLOCATOR_SIZE;
use common::types::{Rnti, SlotPoint, UeIndex};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

fn is_periodic_occasion(sl: SlotPoint, period_slots: u32, offset: u32) -> bool {
    period_slots > 0 && sl.to_uint() % period_slots == offset % period_slots
}

/// Periodic UCI setup of a UE in the cell
#[derive(Debug, Clone, PartialEq)]
struct PeriodicUci {
    crnti: Rnti,
    sr: Option<SrConfig>,
    csi: Option<CsiReportConfig>,
}

impl PeriodicUci {
    fn new(crnti: Rnti, cfg: &UeCellConfiguration) -> Self {
        // No dedicated PUCCH, no periodic opportunities.
        let dedicated = cfg.pucch.is_some();
        Self {
            crnti,
            sr: cfg.sr.clone().filter(|_| dedicated),
            csi: cfg.csi.clone().filter(|_| dedicated),
        }
    }

    fn is_sr_occasion(&self, sl: SlotPoint) -> bool {
        self.sr
            .as_ref()
            .is_some_and(|sr| is_periodic_occasion(sl, sr.period_slots, sr.offset))
    }

    fn is_csi_occasion(&self, sl: SlotPoint) -> bool {
        self.csi
            .as_ref()
            .is_some_and(|csi| is_periodic_occasion(sl, csi.period_slots, csi.offset))
    }
}

pub struct UciScheduler {
    cfg: Arc<CellConfiguration>,
    /// Setup of every UE of the cell when its opportunities were last placed
    ues: HashMap<UeIndex, PeriodicUci>,
}

impl UciScheduler {
    pub fn new(cfg: Arc<CellConfiguration>) -> Self {
        Self { cfg, ues: HashMap::new() }
    }

    /// Allocate the opportunities of the newest slot of the window
    pub fn run_slot(&mut self, pucch: &mut PucchAllocator, res_alloc: &mut CellResourceAllocator, ues: &UeRepository) {
        if res_alloc.last_slot().is_none() {
            return;
        }
        let cell_index = self.cfg.cell_index;
        let head = RING_ALLOCATOR_SIZE as u32 - 1;

        self.ues.retain(|ue_index, uci| {
            ues.get(*ue_index)
                .is_some_and(|ue| ue.crnti == uci.crnti && ue.pcell_index() == cell_index)
        });

        for ue in ues.iter().filter(|ue| ue.pcell_index() == cell_index) {
            let Some(ue_cell) = ue.find_cell(cell_index) else {
                continue;
            };
            let current = PeriodicUci::new(ue.crnti, &ue_cell.cfg);
            let previous = self.ues.insert(ue.ue_index, current.clone());
            if previous.as_ref() != Some(&current) {
                debug!(
                    "rnti={}: Periodic UCI {} over the allocation window",
                    ue.crnti,
                    if previous.is_none() { "allocated" } else { "updated" }
                );
                for offset in 0..head {
                    self.schedule_ue(pucch, res_alloc, &ue_cell.cfg, &current, previous.as_ref(), offset);
                }
            }
            self.schedule_ue(pucch, res_alloc, &ue_cell.cfg, &current, None, head);
        }
    }

    /// Occasions of `uci` at the slot `offset` of the window, minus those of `placed`
    fn schedule_ue(
        &self,
        pucch: &mut PucchAllocator,
        res_alloc: &mut CellResourceAllocator,
        ue_cell_cfg: &UeCellConfiguration,
        uci: &PeriodicUci,
        placed: Option<&PeriodicUci>,
        offset: u32,
    ) {
        let Ok(slot_alloc) = res_alloc.at_offset(offset) else {
            return;
        };
        let sl = slot_alloc.slot;
        if !self.cfg.is_ul_enabled(sl) {
            return;
        }
        let rnti = uci.crnti;

        if uci.is_sr_occasion(sl) && !placed.is_some_and(|p| p.is_sr_occasion(sl)) {
            if let Err(e) = pucch.pucch_allocate_sr_opportunity(slot_alloc, rnti, ue_cell_cfg) {
                warn!("rnti={}: SR opportunity not allocated at slot {}. Cause: {}", rnti, sl, e);
            }
        }

        if let Some(csi) = uci.csi.as_ref() {
            if uci.is_csi_occasion(sl) && !placed.is_some_and(|p| p.is_csi_occasion(sl)) {
                match pucch.pucch_allocate_csi_opportunity(slot_alloc, rnti, ue_cell_cfg, csi.part1_bits) {
                    Ok(()) => {}
                    Err(e @ PucchAllocError::UpgradeRequired { .. }) => {
                        debug!("rnti={}: CSI report skipped at slot {}. Cause: {}", rnti, sl, e);
                    }
                    Err(e) => {
                        warn!("rnti={}: CSI opportunity not allocated at slot {}. Cause: {}", rnti, sl, e);
                    }
                }
            }
        }
    }
}
