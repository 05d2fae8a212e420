//! Scheduler event records
//!
//! Structured records of every applied UE event, pushed to a bounded side channel for
//! diagnostics. The scheduler thread never blocks on it: records are dropped when the
//! channel is full.

use crate::ue::logical_channels::DlMacCe;
use common::types::{CellIndex, HarqId, Lcid, Rnti, SlotPoint, UeIndex};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SchedEventRecord {
    UeCreation {
        ue_index: UeIndex,
        rnti: Rnti,
        pcell: CellIndex,
    },
    UeReconfiguration {
        ue_index: UeIndex,
    },
    UeDeletion {
        ue_index: UeIndex,
        rnti: Rnti,
    },
    BufferOccupancy {
        slot: SlotPoint,
        ue_index: UeIndex,
        lcid: Lcid,
        bs: u32,
    },
    Bsr {
        ue_index: UeIndex,
        rnti: Rnti,
        cell_index: CellIndex,
        nof_bytes: u32,
    },
    Sr {
        slot_rx: SlotPoint,
        ue_index: UeIndex,
        rnti: Rnti,
        cell_index: CellIndex,
    },
    HarqAck {
        slot_rx: SlotPoint,
        ue_index: UeIndex,
        rnti: Rnti,
        cell_index: CellIndex,
        ack: bool,
        tbs_bytes: Option<u32>,
    },
    Crc {
        slot_rx: SlotPoint,
        ue_index: UeIndex,
        rnti: Rnti,
        cell_index: CellIndex,
        harq_id: HarqId,
        crc: bool,
        tbs_bytes: Option<u32>,
    },
    Csi {
        slot_rx: SlotPoint,
        ue_index: UeIndex,
        rnti: Rnti,
        cell_index: CellIndex,
        cqi: u8,
    },
    Phr {
        slot_rx: SlotPoint,
        ue_index: UeIndex,
        rnti: Rnti,
        cell_index: CellIndex,
        ph_db: i8,
    },
    DlMacCe {
        ue_index: UeIndex,
        ce: DlMacCe,
    },
}

pub struct SchedEventLogger {
    tx: Option<Sender<SchedEventRecord>>,
    nof_dropped: AtomicU64,
}

impl SchedEventLogger {
    /// Logger with a side channel of `capacity` records
    pub fn new(capacity: usize) -> (Self, Receiver<SchedEventRecord>) {
        let (tx, rx) = bounded(capacity);
        (Self { tx: Some(tx), nof_dropped: AtomicU64::new(0) }, rx)
    }

    /// Logger that discards every record
    pub fn disabled() -> Self {
        Self { tx: None, nof_dropped: AtomicU64::new(0) }
    }

    pub fn enqueue(&self, record: SchedEventRecord) {
        let Some(tx) = &self.tx else {
            return;
        };
        match tx.try_send(record) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.nof_dropped.fetch_add(1, Ordering::Relaxed);
            }
            // Nobody drains the records anymore.
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    pub fn nof_dropped(&self) -> u64 {
        self.nof_dropped.load(Ordering::Relaxed)
    }
}
