//! Scheduler indication messages
//!
//! Decoded in-memory records handed to the scheduler by the PHY, RLC and RRC adapters.

use crate::config::UeConfiguration;
use crate::ue::harq::HarqAckValue;
use crate::ue::logical_channels::{BsrFormat, DlMacCe};
use common::types::{CellIndex, HarqId, Lcg, Lcid, Rnti, SlotPoint, UeIndex};
use tokio::sync::oneshot;

/// UL Buffer Status Report decoded by the MAC
#[derive(Debug, Clone)]
pub struct UlBsrIndication {
    pub cell_index: CellIndex,
    pub ue_index: UeIndex,
    pub crnti: Rnti,
    pub format: BsrFormat,
    /// Buffered bytes per reported LCG
    pub reported_lcgs: Vec<(Lcg, u32)>,
}

#[derive(Debug, Clone)]
pub struct UlCrcPdu {
    pub ue_index: UeIndex,
    pub rnti: Rnti,
    pub harq_id: HarqId,
    pub tb_crc_success: bool,
    pub ul_sinr_db: Option<f32>,
    /// Timing advance offset measured on the PUSCH, in TA units
    pub time_advance_offset: Option<i32>,
}

#[derive(Debug, Clone)]
pub struct UlCrcIndication {
    pub cell_index: CellIndex,
    pub sl_rx: SlotPoint,
    pub crcs: Vec<UlCrcPdu>,
}

/// CSI part 1 report
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CsiReport {
    pub cqi: u8,
    pub ri: Option<u8>,
}

/// UCI PDU shapes, by the channel that carried them
#[derive(Debug, Clone)]
pub enum UciPdu {
    PucchF0F1 {
        harqs: Vec<HarqAckValue>,
        sr_detected: bool,
        ul_sinr_db: Option<f32>,
        time_advance_offset: Option<i32>,
    },
    Pusch {
        harqs: Vec<HarqAckValue>,
        csi: Option<CsiReport>,
    },
    PucchF2F3F4 {
        harqs: Vec<HarqAckValue>,
        sr_detected: bool,
        csi: Option<CsiReport>,
        ul_sinr_db: Option<f32>,
    },
}

#[derive(Debug, Clone)]
pub struct UciIndicationPdu {
    pub ue_index: UeIndex,
    pub crnti: Rnti,
    pub pdu: UciPdu,
}

#[derive(Debug, Clone)]
pub struct UciIndication {
    pub cell_index: CellIndex,
    pub slot_rx: SlotPoint,
    pub ucis: Vec<UciIndicationPdu>,
}

#[derive(Debug, Clone, Copy)]
pub struct DlMacCeIndication {
    pub ue_index: UeIndex,
    pub ce: DlMacCe,
}

/// Power Headroom Report
#[derive(Debug, Clone, Copy)]
pub struct UlPhrIndication {
    pub cell_index: CellIndex,
    pub ue_index: UeIndex,
    pub rnti: Rnti,
    pub slot_rx: SlotPoint,
    pub ph_db: i8,
    pub p_cmax_dbm: Option<i8>,
}

/// RLC buffer state of one DL bearer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DlBufferStateIndication {
    pub ue_index: UeIndex,
    pub lcid: Lcid,
    pub bs: u32,
}

/// Result reported back to the caller of a UE configuration procedure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigOutcome {
    Applied,
    Aborted,
}

pub type ConfigOutcomeReceiver = oneshot::Receiver<ConfigOutcome>;

/// UE creation or reconfiguration request
///
/// The outcome is `Applied` when the event is dropped by the scheduler, unless it was
/// aborted first.
#[derive(Debug)]
pub struct UeConfigUpdateEvent {
    cfg: UeConfiguration,
    outcome: Option<oneshot::Sender<ConfigOutcome>>,
}

impl UeConfigUpdateEvent {
    pub fn new(cfg: UeConfiguration) -> (Self, ConfigOutcomeReceiver) {
        let (tx, rx) = oneshot::channel();
        (Self { cfg, outcome: Some(tx) }, rx)
    }

    pub fn config(&self) -> &UeConfiguration {
        &self.cfg
    }

    pub fn abort(&mut self) {
        if let Some(tx) = self.outcome.take() {
            // The caller may not wait for the outcome.
            let _ = tx.send(ConfigOutcome::Aborted);
        }
    }
}

impl Drop for UeConfigUpdateEvent {
    fn drop(&mut self) {
        if let Some(tx) = self.outcome.take() {
            let _ = tx.send(ConfigOutcome::Applied);
        }
    }
}

/// UE removal request
#[derive(Debug)]
pub struct UeDeleteEvent {
    ue_index: UeIndex,
    outcome: Option<oneshot::Sender<ConfigOutcome>>,
}

impl UeDeleteEvent {
    pub fn new(ue_index: UeIndex) -> (Self, ConfigOutcomeReceiver) {
        let (tx, rx) = oneshot::channel();
        (Self { ue_index, outcome: Some(tx) }, rx)
    }

    pub fn ue_index(&self) -> UeIndex {
        self.ue_index
    }

    pub fn abort(&mut self) {
        if let Some(tx) = self.outcome.take() {
            let _ = tx.send(ConfigOutcome::Aborted);
        }
    }
}

impl Drop for UeDeleteEvent {
    fn drop(&mut self) {
        if let Some(tx) = self.outcome.take() {
            let _ = tx.send(ConfigOutcome::Applied);
        }
    }
}
