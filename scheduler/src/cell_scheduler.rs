//! Scheduler
//!
//! Owns the cells of a cell group, the UE repository and the event manager. One thread
//! drives `run_slot` for every cell of the group, in slot order; any other thread feeds
//! indications through the `UeEventHandle`.

use crate::config::{CellConfiguration, SchedulerExpertConfig};
use crate::events::{EventContext, EventRunStats, SchedEventLogger, SchedEventRecord, UeEventHandle, UeEventManager};
use crate::pdcch::PdcchScheduler;
use crate::pucch::PucchAllocator;
use crate::resource_grid::CellResourceAllocator;
use crate::result::SlotResult;
use crate::srb0_scheduler::Srb0Scheduler;
use crate::uci_scheduler::UciScheduler;
use crate::ue::UeRepository;
use crate::ue_scheduler::UeScheduler;
use crate::SchedError;
use common::types::{CellIndex, SlotPoint, UeIndex, MAX_NOF_DU_CELLS};
use crossbeam_channel::Receiver;
use std::sync::Arc;
use tracing::{debug, info};

struct CellScheduler {
    cfg: Arc<CellConfiguration>,
    res_alloc: CellResourceAllocator,
    pdcch: PdcchScheduler,
    pucch: PucchAllocator,
    uci: UciScheduler,
    srb0: Srb0Scheduler,
    ue_sched: UeScheduler,
}

impl CellScheduler {
    fn new(cfg: CellConfiguration, expert: &SchedulerExpertConfig) -> Self {
        let cfg = Arc::new(cfg);
        Self {
            res_alloc: CellResourceAllocator::new(cfg.clone()),
            pdcch: PdcchScheduler::new(cfg.clone(), expert.max_pdcchs_per_slot),
            pucch: PucchAllocator::new(cfg.clone(), expert.max_pucchs_per_slot),
            uci: UciScheduler::new(cfg.clone()),
            srb0: Srb0Scheduler::new(cfg.clone(), expert),
            ue_sched: UeScheduler::new(cfg.clone(), expert),
            cfg,
        }
    }

    fn slot_indication(&mut self, sl: SlotPoint) -> Result<(), SchedError> {
        self.res_alloc.slot_indication(sl)?;
        self.pdcch.slot_indication(sl)?;
        self.pucch.slot_indication(sl)?;
        Ok(())
    }
}

pub struct Scheduler {
    expert: SchedulerExpertConfig,
    cells: Vec<Option<CellScheduler>>,
    ues: UeRepository,
    events: UeEventManager,
    logger: SchedEventLogger,
    /// UEs with new SRB0 data, drained into the SRB0 scheduler of their PCell
    srb0_ues: Vec<UeIndex>,
    /// Last slot in which the UE timers were advanced
    last_ue_sl: Option<SlotPoint>,
}

impl Scheduler {
    /// Scheduler plus the receiving end of its event record channel
    pub fn new(expert: SchedulerExpertConfig) -> (Self, Receiver<SchedEventRecord>) {
        let (logger, records) = SchedEventLogger::new(expert.event_log_capacity.max(1));
        let sched = Self {
            expert,
            cells: (0..MAX_NOF_DU_CELLS).map(|_| None).collect(),
            ues: UeRepository::new(),
            events: UeEventManager::new(),
            logger,
            srb0_ues: Vec::new(),
            last_ue_sl: None,
        };
        (sched, records)
    }

    pub fn add_cell(&mut self, cfg: CellConfiguration) -> Result<(), SchedError> {
        cfg.validate()?;
        let cell_index = cfg.cell_index;
        let slot = self
            .cells
            .get_mut(cell_index.as_usize())
            .ok_or(SchedError::UnknownCell(cell_index))?;
        if slot.is_some() {
            return Err(SchedError::CellAlreadyExists(cell_index));
        }
        self.events.add_cell(cell_index)?;
        info!(
            "Cell {} added: pci={} scs={:?} crbs={}",
            cell_index, cfg.pci, cfg.scs, cfg.nof_crbs
        );
        *slot = Some(CellScheduler::new(cfg, &self.expert));
        Ok(())
    }

    /// Producer handle for indications, usable from any thread
    pub fn event_handle(&self) -> UeEventHandle {
        self.events.handle()
    }

    pub fn ues(&self) -> &UeRepository {
        &self.ues
    }

    pub fn cell_config(&self, cell_index: CellIndex) -> Option<&CellConfiguration> {
        self.cells
            .get(cell_index.as_usize())
            .and_then(|c| c.as_ref())
            .map(|c| c.cfg.as_ref())
    }

    /// Event records lost because the record channel was full
    pub fn nof_dropped_event_records(&self) -> u64 {
        self.logger.nof_dropped()
    }

    /// Compute the decision of `cell_index` for slot `sl`. Slots must be consecutive per
    /// cell.
    pub fn run_slot(&mut self, sl: SlotPoint, cell_index: CellIndex) -> Result<&SlotResult, SchedError> {
        let cell = self
            .cells
            .get_mut(cell_index.as_usize())
            .and_then(|c| c.as_mut())
            .ok_or(SchedError::UnknownCell(cell_index))?;
        cell.slot_indication(sl)?;

        if self.last_ue_sl != Some(sl) {
            self.last_ue_sl = Some(sl);
            for ue in self.ues.iter_mut() {
                ue.slot_indication(sl);
            }
        }

        let mut ctx = EventContext {
            ues: &mut self.ues,
            logger: &self.logger,
            expert: &self.expert,
            srb0_ues: &mut self.srb0_ues,
        };
        let stats: EventRunStats = self.events.run(sl, cell_index, &mut ctx);
        if stats.discarded > 0 {
            debug!("slot={} cell={}: {} events discarded", sl, cell_index, stats.discarded);
        }
        for ue_index in self.srb0_ues.drain(..) {
            let Some(pcell) = self.ues.get(ue_index).map(|ue| ue.pcell_index()) else {
                continue;
            };
            if let Some(Some(c)) = self.cells.get_mut(pcell.as_usize()) {
                c.srb0.handle_dl_buffer_state_indication(ue_index);
            }
        }

        // Feedback resources of removed UEs are released in every cell they used.
        for (rnti, cells) in self.ues.take_removed() {
            for removed_cell in cells {
                if let Some(Some(c)) = self.cells.get_mut(removed_cell.as_usize()) {
                    c.pucch.remove_ue(&mut c.res_alloc, rnti);
                }
            }
        }

        let cell = self
            .cells
            .get_mut(cell_index.as_usize())
            .and_then(|c| c.as_mut())
            .ok_or(SchedError::UnknownCell(cell_index))?;
        cell.uci.run_slot(&mut cell.pucch, &mut cell.res_alloc, &self.ues);
        // SRB0 goes first so that RRC setup is never starved by UE data.
        cell.srb0
            .run_slot(&mut cell.res_alloc, &mut cell.pdcch, &mut cell.pucch, &mut self.ues);
        cell.ue_sched
            .run_slot(&mut cell.res_alloc, &mut cell.pdcch, &mut cell.pucch, &mut self.ues);

        let result = &cell.res_alloc.get(sl)?.result;
        if !result.is_empty() {
            debug!(
                "slot={} cell={}: dl_pdcchs={} ul_pdcchs={} pdschs={} puschs={} pucchs={}",
                sl,
                cell_index,
                result.dl_pdcchs.len(),
                result.ul_pdcchs.len(),
                result.pdschs.len(),
                result.puschs.len(),
                result.pucchs.len()
            );
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::messages::{CsiReport, DlBufferStateIndication, UeConfigUpdateEvent, UeDeleteEvent};
    use crate::result::{PucchFormat, PucchUciBits};
    use crate::test_helpers;
    use crate::ue::harq::HarqAckValue;
    use common::types::{Lcid, Rnti, SubcarrierSpacing, UeIndex};

    const RNTI: Rnti = Rnti(0x4601);

    fn start() -> SlotPoint {
        SlotPoint::new(SubcarrierSpacing::Scs30, 0, 0)
    }

    fn scheduler_with_ue() -> (Scheduler, Receiver<SchedEventRecord>) {
        let (mut sched, records) = Scheduler::new(SchedulerExpertConfig::default());
        sched.add_cell(test_helpers::cell_config(CellIndex(0))).unwrap();
        let (ev, _outcome) =
            UeConfigUpdateEvent::new(test_helpers::ue_config(UeIndex(0), RNTI, CellIndex(0)));
        sched.event_handle().handle_ue_creation(ev);
        (sched, records)
    }

    fn bo(bs: u32) -> DlBufferStateIndication {
        DlBufferStateIndication { ue_index: UeIndex(0), lcid: Lcid(4), bs }
    }

    #[test]
    fn test_add_cell_errors() {
        let (mut sched, _records) = Scheduler::new(SchedulerExpertConfig::default());
        sched.add_cell(test_helpers::cell_config(CellIndex(0))).unwrap();
        assert_eq!(
            sched.add_cell(test_helpers::cell_config(CellIndex(0))),
            Err(SchedError::CellAlreadyExists(CellIndex(0)))
        );
        let mut invalid = test_helpers::cell_config(CellIndex(1));
        invalid.coresets[0].nof_rbs = 25;
        assert!(matches!(sched.add_cell(invalid), Err(SchedError::InvalidConfiguration(_))));
        assert!(matches!(
            sched.run_slot(start(), CellIndex(1)),
            Err(SchedError::UnknownCell(CellIndex(1)))
        ));
    }

    #[test]
    fn test_skipped_slot_is_an_ordering_violation() {
        let (mut sched, _records) = scheduler_with_ue();
        let sl = start();
        sched.run_slot(sl, CellIndex(0)).unwrap();
        assert_eq!(
            sched.run_slot(sl + 2, CellIndex(0)).err(),
            Some(SchedError::OrderingViolation { expected: sl + 1, received: sl + 2 })
        );
    }

    #[test]
    fn test_dl_data_acked_end_to_end() {
        let (mut sched, records) = scheduler_with_ue();
        let handle = sched.event_handle();
        handle.handle_dl_buffer_state_indication(bo(300));
        let sl = start();

        let result = sched.run_slot(sl, CellIndex(0)).unwrap();
        assert_eq!(result.pdschs.len(), 1);
        assert_eq!(result.pdschs[0].rnti, RNTI);
        let tbs = result.pdschs[0].tbs_bytes;

        for i in 1..=4u32 {
            let result = sched.run_slot(sl + i, CellIndex(0)).unwrap();
            assert!(result.pdschs.is_empty());
        }

        handle.handle_harq_ack_indication(CellIndex(0), UeIndex(0), RNTI, sl + 4, vec![HarqAckValue::Ack], None);
        sched.run_slot(sl + 5, CellIndex(0)).unwrap();

        let cell = sched.ues().get(UeIndex(0)).unwrap().find_cell(CellIndex(0)).unwrap();
        assert_eq!(cell.dl_harqs.nof_waiting_ack(), 0);
        let acked: Vec<SchedEventRecord> = records
            .try_iter()
            .filter(|r| matches!(r, SchedEventRecord::HarqAck { .. }))
            .collect();
        assert_eq!(
            acked,
            vec![SchedEventRecord::HarqAck {
                slot_rx: sl + 4,
                ue_index: UeIndex(0),
                rnti: RNTI,
                cell_index: CellIndex(0),
                ack: true,
                tbs_bytes: Some(tbs),
            }]
        );
    }

    #[test]
    fn test_nack_triggers_retransmission() {
        let (mut sched, _records) = scheduler_with_ue();
        let handle = sched.event_handle();
        handle.handle_dl_buffer_state_indication(bo(300));
        let sl = start();
        let tbs = sched.run_slot(sl, CellIndex(0)).unwrap().pdschs[0].tbs_bytes;
        for i in 1..=4u32 {
            sched.run_slot(sl + i, CellIndex(0)).unwrap();
        }
        handle.handle_harq_ack_indication(CellIndex(0), UeIndex(0), RNTI, sl + 4, vec![HarqAckValue::Nack], None);
        let result = sched.run_slot(sl + 5, CellIndex(0)).unwrap();
        assert_eq!(result.pdschs.len(), 1);
        assert!(result.pdschs[0].is_retx);
        assert_eq!(result.pdschs[0].tbs_bytes, tbs);
    }

    #[test]
    fn test_uci_moves_to_pusch_in_csi_slot() {
        let (mut sched, _records) = scheduler_with_ue();
        let handle = sched.event_handle();
        let sl = start();
        sched.run_slot(sl, CellIndex(0)).unwrap();

        handle.handle_dl_buffer_state_indication(bo(100));
        handle.handle_sr_indication(CellIndex(0), UeIndex(0), RNTI, sl);
        let result = sched.run_slot(sl + 1, CellIndex(0)).unwrap();
        assert_eq!(result.pdschs.len(), 1);
        assert_eq!(result.ul_pdcchs.len(), 1);

        for i in 2..=4u32 {
            sched.run_slot(sl + i, CellIndex(0)).unwrap();
        }
        // Slot 5 carries the periodic CSI report and the HARQ-ACK of slot 1.
        let result = sched.run_slot(sl + 5, CellIndex(0)).unwrap();
        assert!(result.pucchs.iter().all(|p| p.rnti != RNTI));
        assert_eq!(result.puschs.len(), 1);
        assert_eq!(
            result.puschs[0].uci,
            PucchUciBits { harq_ack_bits: 1, sr_bits: 0, csi_part1_bits: 4 }
        );
    }

    #[test]
    fn test_srb0_scheduled_before_ue_data() {
        let (mut sched, _records) = Scheduler::new(SchedulerExpertConfig::default());
        sched.add_cell(test_helpers::cell_config(CellIndex(0))).unwrap();
        let mut cfg = test_helpers::ue_config(UeIndex(0), RNTI, CellIndex(0));
        cfg.cells[0].pucch = None;
        let (ev, _outcome) = UeConfigUpdateEvent::new(cfg);
        let handle = sched.event_handle();
        handle.handle_ue_creation(ev);
        handle.handle_dl_buffer_state_indication(bo(300));
        handle.handle_dl_buffer_state_indication(DlBufferStateIndication {
            ue_index: UeIndex(0),
            lcid: Lcid::SRB0,
            bs: 101,
        });
        let sl = start();

        let result = sched.run_slot(sl, CellIndex(0)).unwrap();
        // 103 bytes at MCS 9 take 5 CRBs of 21 bytes.
        assert_eq!(result.pdschs[0].rnti, RNTI);
        assert_eq!(result.pdschs[0].mcs, 9);
        assert_eq!(result.pdschs[0].tbs_bytes, 105);
        assert_eq!(result.dl_pdcchs[0].ss_id, 1);
        let ue = sched.ues().get(UeIndex(0)).unwrap();
        assert_eq!(ue.dl_lc.pending_srb0_bytes(), 0);
    }

    #[test]
    fn test_csi_report_updates_cqi() {
        let (mut sched, _records) = scheduler_with_ue();
        let sl = start();
        sched.run_slot(sl, CellIndex(0)).unwrap();
        sched
            .event_handle()
            .handle_csi_indication(CellIndex(0), UeIndex(0), RNTI, sl, CsiReport { cqi: 3, ri: None });
        sched.run_slot(sl + 1, CellIndex(0)).unwrap();
        let cell = sched.ues().get(UeIndex(0)).unwrap().find_cell(CellIndex(0)).unwrap();
        assert_eq!(cell.channel_state.cqi, 3);
    }

    #[test]
    fn test_deleted_ue_releases_pucch_window() {
        let (mut sched, _records) = scheduler_with_ue();
        let sl = start();
        sched.run_slot(sl, CellIndex(0)).unwrap();

        let (ev, _outcome) = UeDeleteEvent::new(UeIndex(0));
        sched.event_handle().handle_ue_deletion(ev);
        sched.run_slot(sl + 1, CellIndex(0)).unwrap();
        assert!(sched.ues().is_empty());

        for i in 2..=10u32 {
            let result = sched.run_slot(sl + i, CellIndex(0)).unwrap();
            assert!(result.pucchs.is_empty(), "PUCCH left at slot {}", sl + i);
        }
    }

    #[tokio::test]
    async fn test_ue_creation_outcome_reported() {
        let (mut sched, _records) = Scheduler::new(SchedulerExpertConfig::default());
        sched.add_cell(test_helpers::cell_config(CellIndex(0))).unwrap();
        let (ev, outcome) = UeConfigUpdateEvent::new(test_helpers::ue_config(UeIndex(0), RNTI, CellIndex(0)));
        sched.event_handle().handle_ue_creation(ev);
        let result = sched.run_slot(start(), CellIndex(0)).unwrap();

        // The SR opportunity of slot 0 is placed as soon as the UE exists.
        assert_eq!(result.pucchs.len(), 1);
        assert_eq!(result.pucchs[0].format, PucchFormat::Format1);
        assert_eq!(outcome.await, Ok(crate::events::messages::ConfigOutcome::Applied));
    }
}
