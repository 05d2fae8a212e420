//! UE Event Manager
//!
//! Stages the indications received from any thread and applies them to the UE repository
//! at the start of the slot in which they become visible.
//!
//! Events come in three kinds:
//! - common events (UE lifecycle, BSR, DL MAC CE), executed while the UE PCell is processed,
//!   or by the first cell of the slot for UE creations;
//! - cell events (CRC, UCI, PHR), executed while their cell is processed;
//! - DL buffer occupancy updates, coalesced per bearer.

pub mod buffer_occupancy;
pub mod logger;
pub mod messages;
pub mod slot_event_list;

use crate::config::SchedulerExpertConfig;
use crate::ue::harq::{HarqAckValue, HarqFeedbackOutcome};
use crate::ue::{Ue, UeRepository};
use crate::SchedError;
use buffer_occupancy::BufferOccupancyManager;
use common::types::{CellIndex, Lcid, Rnti, SlotPoint, UeIndex, MAX_NOF_DU_CELLS};
use messages::*;
use slot_event_list::SlotEventList;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub use logger::{SchedEventLogger, SchedEventRecord};

enum CommonEvent {
    UeCreation(UeConfigUpdateEvent),
    UeReconfiguration(UeConfigUpdateEvent),
    UeDeletion(UeDeleteEvent),
    UlBsr(UlBsrIndication),
    DlMacCe(DlMacCeIndication),
}

impl CommonEvent {
    fn name(&self) -> &'static str {
        match self {
            CommonEvent::UeCreation(_) => "ue_create",
            CommonEvent::UeReconfiguration(_) => "ue_reconf",
            CommonEvent::UeDeletion(_) => "ue_delete",
            CommonEvent::UlBsr(_) => "ul_bsr",
            CommonEvent::DlMacCe(_) => "dl_mac_ce",
        }
    }

    /// Drop the event, reporting configuration procedures as aborted
    fn abort(self) {
        match self {
            CommonEvent::UeCreation(mut ev) | CommonEvent::UeReconfiguration(mut ev) => ev.abort(),
            CommonEvent::UeDeletion(mut ev) => ev.abort(),
            CommonEvent::UlBsr(_) | CommonEvent::DlMacCe(_) => {}
        }
    }
}

struct CommonEventEntry {
    /// `None` for UE creations
    ue_index: Option<UeIndex>,
    /// `None` once executed
    event: Option<CommonEvent>,
}

enum CellEvent {
    Crc { sl_rx: SlotPoint, pdu: UlCrcPdu },
    Uci { slot_rx: SlotPoint, pdu: UciIndicationPdu },
    Phr(UlPhrIndication),
}

struct CellEventEntry {
    ue_index: UeIndex,
    event: CellEvent,
    event_name: &'static str,
    /// Diagnostic level when the UE no longer exists
    warn_if_ignored: bool,
}

struct SharedEventQueues {
    common_events: SlotEventList<CommonEventEntry>,
    cell_events: Vec<SlotEventList<CellEventEntry>>,
    cell_active: Vec<AtomicBool>,
    dl_bo: BufferOccupancyManager,
}

/// Producer side of the event manager. Cheap to clone and usable from any thread.
#[derive(Clone)]
pub struct UeEventHandle {
    shared: Arc<SharedEventQueues>,
}

impl UeEventHandle {
    fn push_cell_event(&self, cell_index: CellIndex, entry: CellEventEntry) {
        let active = self
            .shared
            .cell_active
            .get(cell_index.as_usize())
            .is_some_and(|a| a.load(Ordering::Acquire));
        if !active {
            warn!(
                "ue={}: Discarding {} event. Cause: cell {} does not exist",
                entry.ue_index, entry.event_name, cell_index
            );
            return;
        }
        self.shared.cell_events[cell_index.as_usize()].push(entry);
    }

    pub fn handle_ue_creation(&self, ev: UeConfigUpdateEvent) {
        self.shared.common_events.push(CommonEventEntry {
            ue_index: None,
            event: Some(CommonEvent::UeCreation(ev)),
        });
    }

    pub fn handle_ue_reconfiguration(&self, ev: UeConfigUpdateEvent) {
        self.shared.common_events.push(CommonEventEntry {
            ue_index: Some(ev.config().ue_index),
            event: Some(CommonEvent::UeReconfiguration(ev)),
        });
    }

    pub fn handle_ue_deletion(&self, ev: UeDeleteEvent) {
        self.shared.common_events.push(CommonEventEntry {
            ue_index: Some(ev.ue_index()),
            event: Some(CommonEvent::UeDeletion(ev)),
        });
    }

    pub fn handle_ul_bsr_indication(&self, ind: UlBsrIndication) {
        self.shared.common_events.push(CommonEventEntry {
            ue_index: Some(ind.ue_index),
            event: Some(CommonEvent::UlBsr(ind)),
        });
    }

    pub fn handle_dl_mac_ce_indication(&self, ind: DlMacCeIndication) {
        self.shared.common_events.push(CommonEventEntry {
            ue_index: Some(ind.ue_index),
            event: Some(CommonEvent::DlMacCe(ind)),
        });
    }

    pub fn handle_crc_indication(&self, ind: UlCrcIndication) {
        for pdu in ind.crcs {
            let entry = CellEventEntry {
                ue_index: pdu.ue_index,
                event: CellEvent::Crc { sl_rx: ind.sl_rx, pdu },
                event_name: "crc",
                warn_if_ignored: true,
            };
            self.push_cell_event(ind.cell_index, entry);
        }
    }

    pub fn handle_uci_indication(&self, ind: UciIndication) {
        for pdu in ind.ucis {
            // UCI of a UE removed in the meantime is expected.
            let entry = CellEventEntry {
                ue_index: pdu.ue_index,
                event: CellEvent::Uci { slot_rx: ind.slot_rx, pdu },
                event_name: "uci",
                warn_if_ignored: false,
            };
            self.push_cell_event(ind.cell_index, entry);
        }
    }

    pub fn handle_ul_phr_indication(&self, ind: UlPhrIndication) {
        let entry = CellEventEntry {
            ue_index: ind.ue_index,
            event: CellEvent::Phr(ind),
            event_name: "phr",
            warn_if_ignored: true,
        };
        self.push_cell_event(ind.cell_index, entry);
    }

    pub fn handle_dl_buffer_state_indication(&self, ind: DlBufferStateIndication) {
        if !self.shared.dl_bo.handle_dl_buffer_state_indication(ind) {
            warn!("ue={} lcid={}: Discarding DL buffer state. Cause: invalid bearer", ind.ue_index, ind.lcid);
        }
    }

    /// HARQ-ACK bits decoded on PUCCH Format 0/1
    pub fn handle_harq_ack_indication(
        &self,
        cell_index: CellIndex,
        ue_index: UeIndex,
        crnti: Rnti,
        slot_rx: SlotPoint,
        harqs: Vec<HarqAckValue>,
        ul_sinr_db: Option<f32>,
    ) {
        self.handle_uci_indication(UciIndication {
            cell_index,
            slot_rx,
            ucis: vec![UciIndicationPdu {
                ue_index,
                crnti,
                pdu: UciPdu::PucchF0F1 {
                    harqs,
                    sr_detected: false,
                    ul_sinr_db,
                    time_advance_offset: None,
                },
            }],
        });
    }

    /// CSI report decoded on PUCCH Format 2
    pub fn handle_csi_indication(
        &self,
        cell_index: CellIndex,
        ue_index: UeIndex,
        crnti: Rnti,
        slot_rx: SlotPoint,
        csi: CsiReport,
    ) {
        self.handle_uci_indication(UciIndication {
            cell_index,
            slot_rx,
            ucis: vec![UciIndicationPdu {
                ue_index,
                crnti,
                pdu: UciPdu::PucchF2F3F4 {
                    harqs: Vec::new(),
                    sr_detected: false,
                    csi: Some(csi),
                    ul_sinr_db: None,
                },
            }],
        });
    }

    /// Positive SR detected on PUCCH Format 0/1
    pub fn handle_sr_indication(&self, cell_index: CellIndex, ue_index: UeIndex, crnti: Rnti, slot_rx: SlotPoint) {
        self.handle_uci_indication(UciIndication {
            cell_index,
            slot_rx,
            ucis: vec![UciIndicationPdu {
                ue_index,
                crnti,
                pdu: UciPdu::PucchF0F1 {
                    harqs: Vec::new(),
                    sr_detected: true,
                    ul_sinr_db: None,
                    time_advance_offset: None,
                },
            }],
        });
    }
}

/// State the staged events are applied to
pub struct EventContext<'a> {
    pub ues: &'a mut UeRepository,
    pub logger: &'a SchedEventLogger,
    pub expert: &'a SchedulerExpertConfig,
    /// UEs that received SRB0 data this slot
    pub srb0_ues: &'a mut Vec<UeIndex>,
}

/// Events handled by one `UeEventManager::run` call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventRunStats {
    pub executed: usize,
    pub discarded: usize,
}

#[derive(Default)]
struct CellEventState {
    last_sl: Option<SlotPoint>,
    current: Vec<CellEventEntry>,
}

/// Consumer side of the event manager, owned by the scheduler thread
pub struct UeEventManager {
    shared: Arc<SharedEventQueues>,
    last_sl: Option<SlotPoint>,
    current_common: Vec<CommonEventEntry>,
    cells: Vec<CellEventState>,
    bo_keys: Vec<u32>,
}

impl Default for UeEventManager {
    fn default() -> Self {
        Self::new()
    }
}

impl UeEventManager {
    pub fn new() -> Self {
        let shared = SharedEventQueues {
            common_events: SlotEventList::new(),
            cell_events: (0..MAX_NOF_DU_CELLS).map(|_| SlotEventList::new()).collect(),
            cell_active: (0..MAX_NOF_DU_CELLS).map(|_| AtomicBool::new(false)).collect(),
            dl_bo: BufferOccupancyManager::new(),
        };
        Self {
            shared: Arc::new(shared),
            last_sl: None,
            current_common: Vec::new(),
            cells: (0..MAX_NOF_DU_CELLS).map(|_| CellEventState::default()).collect(),
            bo_keys: Vec::new(),
        }
    }

    pub fn handle(&self) -> UeEventHandle {
        UeEventHandle { shared: self.shared.clone() }
    }

    /// Start accepting cell events for `cell_index`
    pub fn add_cell(&mut self, cell_index: CellIndex) -> Result<(), SchedError> {
        let active = self
            .shared
            .cell_active
            .get(cell_index.as_usize())
            .ok_or(SchedError::UnknownCell(cell_index))?;
        if active.swap(true, Ordering::AcqRel) {
            return Err(SchedError::CellAlreadyExists(cell_index));
        }
        Ok(())
    }

    fn is_cell_active(&self, cell_index: CellIndex) -> bool {
        self.shared
            .cell_active
            .get(cell_index.as_usize())
            .is_some_and(|a| a.load(Ordering::Acquire))
    }

    /// Apply the events visible at `sl` while `cell_index` is being scheduled
    pub fn run(&mut self, sl: SlotPoint, cell_index: CellIndex, ctx: &mut EventContext<'_>) -> EventRunStats {
        let mut stats = EventRunStats::default();

        let new_slot = self.last_sl != Some(sl);
        if new_slot {
            self.last_sl = Some(sl);
            // Events of the previous slot whose PCell was not processed.
            for entry in self.current_common.iter_mut() {
                if let Some(event) = entry.event.take() {
                    warn!("Discarding {} event. Cause: target cell was not processed", event.name());
                    event.abort();
                    stats.discarded += 1;
                }
            }
            self.shared.common_events.slot_indication(&mut self.current_common);
        }

        self.process_common(sl, cell_index, ctx, &mut stats);

        // Buffer states are applied after UE creations.
        if new_slot {
            self.process_dl_buffer_states(sl, ctx, &mut stats);
        }

        self.process_cell_events(sl, cell_index, ctx, &mut stats);

        if stats.executed > 0 || stats.discarded > 0 {
            debug!(
                "slot={} cell={}: {} events executed, {} discarded",
                sl, cell_index, stats.executed, stats.discarded
            );
        }
        stats
    }

    fn process_common(&mut self, sl: SlotPoint, cell_index: CellIndex, ctx: &mut EventContext<'_>, stats: &mut EventRunStats) {
        for i in 0..self.current_common.len() {
            let entry = &mut self.current_common[i];
            if entry.event.is_none() {
                continue;
            }
            match entry.ue_index {
                None => {
                    if let Some(event) = entry.event.take() {
                        self.execute_common(event, sl, cell_index, ctx);
                        stats.executed += 1;
                    }
                }
                Some(ue_index) => {
                    let pcell = ctx.ues.get(ue_index).map(|ue| ue.pcell_index());
                    match pcell {
                        None => {
                            if let Some(event) = entry.event.take() {
                                warn!("ue={}: Discarding {} event. Cause: UE does not exist", ue_index, event.name());
                                event.abort();
                                stats.discarded += 1;
                            }
                        }
                        Some(pcell) if pcell == cell_index => {
                            if let Some(event) = entry.event.take() {
                                self.execute_common(event, sl, cell_index, ctx);
                                stats.executed += 1;
                            }
                        }
                        Some(_) => {}
                    }
                }
            }
        }
    }

    fn execute_common(&self, event: CommonEvent, sl: SlotPoint, cell_index: CellIndex, ctx: &mut EventContext<'_>) {
        match event {
            CommonEvent::UeCreation(mut ev) => {
                let cfg = ev.config().clone();
                if let Err(e) = cfg.validate() {
                    warn!("ue={}: UE creation rejected. Cause: {}", cfg.ue_index, e);
                    ev.abort();
                    return;
                }
                let pcell = cfg.pcell().map(|c| c.cell_index).unwrap_or(cell_index);
                if !self.is_cell_active(pcell) {
                    warn!("ue={}: UE creation rejected. Cause: PCell {} does not exist", cfg.ue_index, pcell);
                    ev.abort();
                    return;
                }
                let (ue_index, rnti) = (cfg.ue_index, cfg.crnti);
                match ctx.ues.add_ue(Ue::new(cfg, ctx.expert, sl)) {
                    Ok(()) => {
                        info!("ue={} rnti={}: UE created in cell {}", ue_index, rnti, pcell);
                        ctx.logger.enqueue(SchedEventRecord::UeCreation { ue_index, rnti, pcell });
                    }
                    Err(_) => {
                        warn!("ue={} rnti={}: UE creation rejected. Cause: UE already exists", ue_index, rnti);
                        ev.abort();
                    }
                }
            }
            CommonEvent::UeReconfiguration(ev) => {
                let ue_index = ev.config().ue_index;
                if let Some(ue) = ctx.ues.get_mut(ue_index) {
                    ue.handle_reconfiguration(ev.config().clone(), ctx.expert, sl);
                    ctx.logger.enqueue(SchedEventRecord::UeReconfiguration { ue_index });
                }
            }
            CommonEvent::UeDeletion(ev) => {
                if let Some(ue) = ctx.ues.remove_ue(ev.ue_index()) {
                    info!("ue={} rnti={}: UE removed", ue.ue_index, ue.crnti);
                    ctx.logger.enqueue(SchedEventRecord::UeDeletion { ue_index: ue.ue_index, rnti: ue.crnti });
                }
            }
            CommonEvent::UlBsr(ind) => {
                if let Some(ue) = ctx.ues.get_mut(ind.ue_index) {
                    ue.ul_lc.handle_bsr_indication(ind.format, &ind.reported_lcgs);
                    ctx.logger.enqueue(SchedEventRecord::Bsr {
                        ue_index: ind.ue_index,
                        rnti: ind.crnti,
                        cell_index: ind.cell_index,
                        nof_bytes: ue.ul_lc.pending_bytes(),
                    });
                }
            }
            CommonEvent::DlMacCe(ind) => {
                if let Some(ue) = ctx.ues.get_mut(ind.ue_index) {
                    ue.dl_lc.handle_mac_ce_indication(ind.ce);
                    ctx.logger.enqueue(SchedEventRecord::DlMacCe { ue_index: ind.ue_index, ce: ind.ce });
                }
            }
        }
    }

    fn process_dl_buffer_states(&mut self, sl: SlotPoint, ctx: &mut EventContext<'_>, stats: &mut EventRunStats) {
        let ues = &mut *ctx.ues;
        let logger = ctx.logger;
        let srb0_ues = &mut *ctx.srb0_ues;
        self.shared.dl_bo.slot_indication(&mut self.bo_keys, |ind| {
            let Some(ue) = ues.get_mut(ind.ue_index) else {
                info!("ue={}: Discarding DL buffer state. Cause: UE does not exist", ind.ue_index);
                stats.discarded += 1;
                return;
            };
            if !ue.handle_dl_buffer_state(ind.lcid, ind.bs) {
                warn!("ue={} lcid={}: Discarding DL buffer state. Cause: inactive LCID", ind.ue_index, ind.lcid);
                stats.discarded += 1;
                return;
            }
            if ind.lcid == Lcid::SRB0 && ind.bs > 0 {
                srb0_ues.push(ind.ue_index);
            }
            logger.enqueue(SchedEventRecord::BufferOccupancy {
                slot: sl,
                ue_index: ind.ue_index,
                lcid: ind.lcid,
                bs: ind.bs,
            });
            stats.executed += 1;
        });
    }

    fn process_cell_events(&mut self, sl: SlotPoint, cell_index: CellIndex, ctx: &mut EventContext<'_>, stats: &mut EventRunStats) {
        let Some(cell) = self.cells.get_mut(cell_index.as_usize()) else {
            return;
        };
        if cell.last_sl == Some(sl) {
            // Already drained for this slot.
            return;
        }
        cell.last_sl = Some(sl);
        self.shared.cell_events[cell_index.as_usize()].slot_indication(&mut cell.current);

        for entry in cell.current.drain(..) {
            let Some(ue) = ctx.ues.get_mut(entry.ue_index) else {
                if entry.warn_if_ignored {
                    warn!("ue={}: Discarding {} event. Cause: UE does not exist", entry.ue_index, entry.event_name);
                } else {
                    info!("ue={}: Discarding {} event. Cause: UE does not exist", entry.ue_index, entry.event_name);
                }
                stats.discarded += 1;
                continue;
            };
            if ue.find_cell(cell_index).is_none() {
                warn!(
                    "ue={}: Discarding {} event. Cause: cell {} is not configured for the UE",
                    entry.ue_index, entry.event_name, cell_index
                );
                stats.discarded += 1;
                continue;
            }
            match entry.event {
                CellEvent::Crc { sl_rx, pdu } => handle_crc_pdu(ue, cell_index, sl_rx, &pdu, ctx.logger),
                CellEvent::Uci { slot_rx, pdu } => handle_uci_pdu(ue, cell_index, slot_rx, pdu, ctx.logger),
                CellEvent::Phr(ind) => {
                    if let Some(ue_cell) = ue.find_cell_mut(cell_index) {
                        ue_cell.channel_state.ph_db = Some(ind.ph_db);
                    }
                    ctx.logger.enqueue(SchedEventRecord::Phr {
                        slot_rx: ind.slot_rx,
                        ue_index: ind.ue_index,
                        rnti: ind.rnti,
                        cell_index,
                        ph_db: ind.ph_db,
                    });
                }
            }
            stats.executed += 1;
        }
    }
}

fn handle_crc_pdu(ue: &mut Ue, cell_index: CellIndex, sl_rx: SlotPoint, pdu: &UlCrcPdu, logger: &SchedEventLogger) {
    let (ue_index, rnti) = (ue.ue_index, ue.crnti);
    let Some(ue_cell) = ue.find_cell_mut(cell_index) else {
        return;
    };
    let tbs_bytes = ue_cell.handle_crc_pdu(sl_rx, pdu.harq_id, pdu.tb_crc_success, pdu.ul_sinr_db);
    if let Some(offset) = pdu.time_advance_offset {
        ue_cell.channel_state.ta_offset += offset;
    }
    logger.enqueue(SchedEventRecord::Crc {
        slot_rx: sl_rx,
        ue_index,
        rnti,
        cell_index,
        harq_id: pdu.harq_id,
        crc: pdu.tb_crc_success,
        tbs_bytes,
    });
}

fn handle_uci_pdu(ue: &mut Ue, cell_index: CellIndex, slot_rx: SlotPoint, pdu: UciIndicationPdu, logger: &SchedEventLogger) {
    let (ue_index, rnti) = (ue.ue_index, ue.crnti);
    let (harqs, sr_detected, csi, sinr) = match pdu.pdu {
        UciPdu::PucchF0F1 { harqs, sr_detected, ul_sinr_db, time_advance_offset } => {
            if let (Some(offset), Some(ue_cell)) = (time_advance_offset, ue.find_cell_mut(cell_index)) {
                ue_cell.channel_state.ta_offset += offset;
            }
            (harqs, sr_detected, None, ul_sinr_db)
        }
        UciPdu::Pusch { harqs, csi } => (harqs, false, csi, None),
        UciPdu::PucchF2F3F4 { harqs, sr_detected, csi, ul_sinr_db } => (harqs, sr_detected, csi, ul_sinr_db),
    };

    if sr_detected {
        ue.ul_lc.handle_sr_indication();
        logger.enqueue(SchedEventRecord::Sr { slot_rx, ue_index, rnti, cell_index });
    }

    let Some(ue_cell) = ue.find_cell_mut(cell_index) else {
        return;
    };
    if sinr.is_some() {
        ue_cell.channel_state.pucch_sinr_db = sinr;
    }
    for outcome in ue_cell.handle_dl_ack_info(slot_rx, &harqs) {
        let (ack, tbs_bytes) = match outcome {
            HarqFeedbackOutcome::Acked { tbs_bytes } => (true, Some(tbs_bytes)),
            HarqFeedbackOutcome::Nacked { .. } => (false, None),
            HarqFeedbackOutcome::Stale => continue,
        };
        logger.enqueue(SchedEventRecord::HarqAck { slot_rx, ue_index, rnti, cell_index, ack, tbs_bytes });
    }
    if let Some(csi) = csi {
        ue_cell.handle_csi_report(csi.cqi);
        logger.enqueue(SchedEventRecord::Csi { slot_rx, ue_index, rnti, cell_index, cqi: csi.cqi });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LogicalChannelConfig, UeConfiguration};
    use crate::test_helpers;
    use crate::ue::logical_channels::BsrFormat;
    use common::types::{HarqId, Lcg, Lcid, SubcarrierSpacing};
    use crossbeam_channel::Receiver;

    struct Fixture {
        mng: UeEventManager,
        handle: UeEventHandle,
        ues: UeRepository,
        logger: SchedEventLogger,
        records: Receiver<SchedEventRecord>,
        expert: SchedulerExpertConfig,
        srb0_ues: Vec<UeIndex>,
        sl: SlotPoint,
    }

    impl Fixture {
        fn new(cells: &[u8]) -> Self {
            let mut mng = UeEventManager::new();
            for c in cells {
                mng.add_cell(CellIndex(*c)).unwrap();
            }
            let handle = mng.handle();
            let (logger, records) = SchedEventLogger::new(1024);
            Self {
                mng,
                handle,
                ues: UeRepository::new(),
                logger,
                records,
                expert: SchedulerExpertConfig::default(),
                srb0_ues: Vec::new(),
                sl: SlotPoint::new(SubcarrierSpacing::Scs30, 0, 0),
            }
        }

        fn run(&mut self, sl: SlotPoint, cell: u8) -> EventRunStats {
            let mut ctx = EventContext {
                ues: &mut self.ues,
                logger: &self.logger,
                expert: &self.expert,
                srb0_ues: &mut self.srb0_ues,
            };
            self.mng.run(sl, CellIndex(cell), &mut ctx)
        }

        fn create_ue(&mut self, cfg: UeConfiguration) -> ConfigOutcomeReceiver {
            let (ev, rx) = UeConfigUpdateEvent::new(cfg);
            self.handle.handle_ue_creation(ev);
            rx
        }

        fn records(&self) -> Vec<SchedEventRecord> {
            self.records.try_iter().collect()
        }
    }

    fn ue_cfg(ue: u16, pcell: u8) -> UeConfiguration {
        test_helpers::ue_config(UeIndex(ue), Rnti(0x4601 + ue), CellIndex(pcell))
    }

    fn bo(ue: u16, lcid: u8, bs: u32) -> DlBufferStateIndication {
        DlBufferStateIndication { ue_index: UeIndex(ue), lcid: Lcid(lcid), bs }
    }

    #[test]
    fn test_bo_updates_coalesced_to_last_value() {
        let mut fx = Fixture::new(&[0]);
        let mut cfg = ue_cfg(2, 0);
        cfg.logical_channels.push(LogicalChannelConfig { lcid: Lcid(5), lcg: Lcg(1), priority: 9 });
        fx.create_ue(cfg);
        fx.run(fx.sl, 0);
        fx.records();

        for bs in [10, 0, 40] {
            fx.handle.handle_dl_buffer_state_indication(bo(2, 5, bs));
        }
        let stats = fx.run(fx.sl + 1, 0);
        assert_eq!(stats, EventRunStats { executed: 1, discarded: 0 });
        assert_eq!(
            fx.records(),
            vec![SchedEventRecord::BufferOccupancy {
                slot: fx.sl + 1,
                ue_index: UeIndex(2),
                lcid: Lcid(5),
                bs: 40
            }]
        );
        assert_eq!(fx.ues.get(UeIndex(2)).unwrap().dl_lc.pending_bytes_for(Lcid(5)), 40);
    }

    #[test]
    fn test_creation_applied_before_same_slot_bo() {
        let mut fx = Fixture::new(&[0]);
        fx.create_ue(ue_cfg(1, 0));
        fx.handle.handle_dl_buffer_state_indication(bo(1, 4, 300));
        let stats = fx.run(fx.sl, 0);
        assert_eq!(stats.executed, 2);
        assert_eq!(fx.ues.get(UeIndex(1)).unwrap().dl_lc.pending_bytes_for(Lcid(4)), 300);
    }

    #[test]
    fn test_srb0_buffer_state_queues_ue() {
        let mut fx = Fixture::new(&[0]);
        fx.create_ue(ue_cfg(1, 0));
        fx.create_ue(ue_cfg(2, 0));
        fx.handle.handle_dl_buffer_state_indication(bo(1, 0, 120));
        fx.handle.handle_dl_buffer_state_indication(bo(2, 4, 300));
        fx.run(fx.sl, 0);
        assert_eq!(fx.srb0_ues, vec![UeIndex(1)]);
        assert_eq!(fx.ues.get(UeIndex(1)).unwrap().dl_lc.pending_srb0_bytes(), 122);

        fx.srb0_ues.clear();
        fx.handle.handle_dl_buffer_state_indication(bo(1, 0, 0));
        fx.run(fx.sl + 1, 0);
        assert!(fx.srb0_ues.is_empty());
    }

    #[test]
    fn test_rerun_same_slot_executes_nothing() {
        let mut fx = Fixture::new(&[0]);
        fx.create_ue(ue_cfg(0, 0));
        fx.run(fx.sl, 0);

        let sl = fx.sl + 1;
        fx.handle.handle_sr_indication(CellIndex(0), UeIndex(0), Rnti(0x4601), sl);
        fx.handle.handle_dl_mac_ce_indication(DlMacCeIndication {
            ue_index: UeIndex(0),
            ce: crate::ue::logical_channels::DlMacCe::TaCmd,
        });
        assert_eq!(fx.run(sl, 0).executed, 2);
        assert_eq!(fx.run(sl, 0), EventRunStats::default());
    }

    #[test]
    fn test_event_after_boundary_deferred_to_next_slot() {
        let mut fx = Fixture::new(&[0]);
        fx.create_ue(ue_cfg(0, 0));
        fx.run(fx.sl, 0);

        fx.handle.handle_sr_indication(CellIndex(0), UeIndex(0), Rnti(0x4601), fx.sl);
        assert_eq!(fx.run(fx.sl, 0).executed, 0);
        assert!(!fx.ues.get(UeIndex(0)).unwrap().ul_lc.has_pending_sr());
        assert_eq!(fx.run(fx.sl + 1, 0).executed, 1);
        assert!(fx.ues.get(UeIndex(0)).unwrap().ul_lc.has_pending_sr());
    }

    #[test]
    fn test_creation_visible_to_any_cell_ue_events_on_pcell_only() {
        let mut fx = Fixture::new(&[0, 1]);
        fx.create_ue(ue_cfg(0, 1));
        // Cell 0 is processed first and applies the creation.
        assert_eq!(fx.run(fx.sl, 0).executed, 1);
        assert!(fx.ues.contains(UeIndex(0)));
        assert_eq!(fx.run(fx.sl, 1).executed, 0);

        fx.handle.handle_ul_bsr_indication(UlBsrIndication {
            cell_index: CellIndex(1),
            ue_index: UeIndex(0),
            crnti: Rnti(0x4601),
            format: BsrFormat::ShortBsr,
            reported_lcgs: vec![(Lcg(1), 500)],
        });
        let sl = fx.sl + 1;
        assert_eq!(fx.run(sl, 0).executed, 0);
        assert_eq!(fx.ues.get(UeIndex(0)).unwrap().ul_lc.pending_bytes(), 0);
        assert_eq!(fx.run(sl, 1).executed, 1);
        assert_eq!(fx.ues.get(UeIndex(0)).unwrap().ul_lc.pending_bytes(), 500);
    }

    #[test]
    fn test_unknown_ue_cell_event_discarded() {
        let mut fx = Fixture::new(&[0]);
        fx.handle.handle_harq_ack_indication(
            CellIndex(0),
            UeIndex(7),
            Rnti(0x4608),
            fx.sl,
            vec![HarqAckValue::Ack],
            None,
        );
        let stats = fx.run(fx.sl, 0);
        assert_eq!(stats, EventRunStats { executed: 0, discarded: 1 });
        assert!(fx.ues.is_empty());
        assert!(fx.records().is_empty());
    }

    #[test]
    fn test_event_for_unconfigured_cell_of_ue_discarded() {
        let mut fx = Fixture::new(&[0, 1]);
        fx.create_ue(ue_cfg(0, 0));
        fx.run(fx.sl, 0);
        fx.handle.handle_crc_indication(UlCrcIndication {
            cell_index: CellIndex(1),
            sl_rx: fx.sl,
            crcs: vec![UlCrcPdu {
                ue_index: UeIndex(0),
                rnti: Rnti(0x4601),
                harq_id: HarqId(0),
                tb_crc_success: true,
                ul_sinr_db: None,
                time_advance_offset: None,
            }],
        });
        fx.run(fx.sl + 1, 0);
        assert_eq!(fx.run(fx.sl + 1, 1), EventRunStats { executed: 0, discarded: 1 });
    }

    #[test]
    fn test_events_for_inactive_cell_rejected_at_producer() {
        let mut fx = Fixture::new(&[0]);
        fx.handle.handle_sr_indication(CellIndex(3), UeIndex(0), Rnti(0x4601), fx.sl);
        assert_eq!(fx.run(fx.sl, 3), EventRunStats::default());
    }

    #[test]
    fn test_csi_and_harq_feedback_applied() {
        let mut fx = Fixture::new(&[0]);
        fx.create_ue(ue_cfg(0, 0));
        fx.run(fx.sl, 0);
        {
            let ue = fx.ues.get_mut(UeIndex(0)).unwrap();
            let cell = ue.find_cell_mut(CellIndex(0)).unwrap();
            cell.dl_harqs.new_tx(HarqId(0), fx.sl, fx.sl + 4, 1200, 10);
        }
        fx.records();

        let sl = fx.sl + 4;
        fx.handle.handle_harq_ack_indication(CellIndex(0), UeIndex(0), Rnti(0x4601), sl, vec![HarqAckValue::Ack], Some(12.0));
        fx.handle.handle_csi_indication(CellIndex(0), UeIndex(0), Rnti(0x4601), sl, CsiReport { cqi: 13, ri: None });
        assert_eq!(fx.run(sl, 0).executed, 2);

        let cell = fx.ues.get(UeIndex(0)).unwrap().find_cell(CellIndex(0)).unwrap();
        assert_eq!(cell.channel_state.cqi, 13);
        assert_eq!(cell.channel_state.pucch_sinr_db, Some(12.0));
        assert_eq!(cell.dl_harqs.nof_waiting_ack(), 0);
        assert!(fx.records().contains(&SchedEventRecord::HarqAck {
            slot_rx: sl,
            ue_index: UeIndex(0),
            rnti: Rnti(0x4601),
            cell_index: CellIndex(0),
            ack: true,
            tbs_bytes: Some(1200),
        }));
    }

    #[test]
    fn test_concurrent_producers_single_drain() {
        let mut fx = Fixture::new(&[0]);
        let mut cfg = ue_cfg(0, 0);
        cfg.logical_channels = (1..=5u8)
            .map(|lcid| LogicalChannelConfig { lcid: Lcid(lcid), lcg: Lcg(1), priority: lcid })
            .collect();
        fx.create_ue(cfg);
        fx.run(fx.sl, 0);
        fx.records();

        let sl = fx.sl + 1;
        std::thread::scope(|s| {
            for t in 1..=4u8 {
                let handle = fx.handle.clone();
                s.spawn(move || {
                    for bs in 1..=500u32 {
                        handle.handle_dl_buffer_state_indication(bo(0, t, bs));
                        handle.handle_dl_buffer_state_indication(bo(0, 5, bs));
                        handle.handle_sr_indication(CellIndex(0), UeIndex(0), Rnti(0x4601), sl);
                    }
                });
            }
        });

        let stats = fx.run(sl, 0);
        // 5 bearers plus 2000 SR indications.
        assert_eq!(stats, EventRunStats { executed: 2005, discarded: 0 });
        let bo_records: Vec<SchedEventRecord> = fx
            .records()
            .into_iter()
            .filter(|r| matches!(r, SchedEventRecord::BufferOccupancy { .. }))
            .collect();
        assert_eq!(bo_records.len(), 5);
        let ue = fx.ues.get(UeIndex(0)).unwrap();
        for lcid in 1..=4u8 {
            assert_eq!(ue.dl_lc.pending_bytes_for(Lcid(lcid)), 500);
        }
        assert_eq!(fx.run(sl, 0), EventRunStats::default());
    }

    #[tokio::test]
    async fn test_duplicate_creation_aborted() {
        let mut fx = Fixture::new(&[0]);
        let first = fx.create_ue(ue_cfg(0, 0));
        let duplicate = fx.create_ue(ue_cfg(0, 0));
        fx.run(fx.sl, 0);
        assert_eq!(first.await, Ok(ConfigOutcome::Applied));
        assert_eq!(duplicate.await, Ok(ConfigOutcome::Aborted));
        assert_eq!(fx.ues.len(), 1);
    }

    #[tokio::test]
    async fn test_reconfiguration_and_deletion_outcomes() {
        let mut fx = Fixture::new(&[0]);
        fx.create_ue(ue_cfg(0, 0));
        fx.run(fx.sl, 0);

        let mut cfg = ue_cfg(0, 0);
        cfg.logical_channels.pop();
        let (ev, reconf) = UeConfigUpdateEvent::new(cfg);
        fx.handle.handle_ue_reconfiguration(ev);
        let (ev, unknown_reconf) = UeConfigUpdateEvent::new(ue_cfg(9, 0));
        fx.handle.handle_ue_reconfiguration(ev);
        fx.run(fx.sl + 1, 0);
        assert_eq!(reconf.await, Ok(ConfigOutcome::Applied));
        assert_eq!(unknown_reconf.await, Ok(ConfigOutcome::Aborted));
        assert!(!fx.ues.get(UeIndex(0)).unwrap().dl_lc.is_active(Lcid(4)));

        let (ev, deletion) = UeDeleteEvent::new(UeIndex(0));
        fx.handle.handle_ue_deletion(ev);
        fx.run(fx.sl + 2, 0);
        assert_eq!(deletion.await, Ok(ConfigOutcome::Applied));
        assert!(fx.ues.is_empty());
        assert_eq!(fx.ues.take_removed(), vec![(Rnti(0x4601), vec![CellIndex(0)])]);
    }

    #[tokio::test]
    async fn test_common_event_of_unprocessed_pcell_aborted() {
        let mut fx = Fixture::new(&[0, 1]);
        fx.create_ue(ue_cfg(0, 1));
        fx.run(fx.sl, 0);

        let (ev, reconf) = UeConfigUpdateEvent::new(ue_cfg(0, 1));
        fx.handle.handle_ue_reconfiguration(ev);
        // Only cell 0 runs in this slot.
        fx.run(fx.sl + 1, 0);
        let stats = fx.run(fx.sl + 2, 0);
        assert_eq!(stats.discarded, 1);
        assert_eq!(reconf.await, Ok(ConfigOutcome::Aborted));
    }
}
