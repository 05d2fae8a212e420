//! HARQ entities
//!
//! Stop-and-wait HARQ processes of one UE in one cell, for one link direction.

use common::types::{HarqId, Rnti, SlotPoint};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Slots after the expected feedback slot before a process is considered NACKed
pub const HARQ_FEEDBACK_TIMEOUT_SLOTS: i32 = 8;

/// Decoded HARQ-ACK bit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HarqAckValue {
    Ack,
    Nack,
    /// Discontinuous transmission: no feedback detected
    Dtx,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarqState {
    Empty,
    WaitingAck,
    PendingRetx,
}

/// Outcome of a HARQ feedback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarqFeedbackOutcome {
    /// Transport block delivered
    Acked { tbs_bytes: u32 },
    /// Transport block lost; `retx_pending` is false once the retransmission limit is reached
    Nacked { retx_pending: bool },
    /// No process was waiting for this feedback
    Stale,
}

#[derive(Debug, Clone)]
pub struct HarqProcess {
    pub id: HarqId,
    pub state: HarqState,
    pub slot_tx: SlotPoint,
    /// Slot of the HARQ-ACK (DL) or of the PUSCH reception (UL)
    pub slot_ack: SlotPoint,
    /// Position of the bit in the HARQ-ACK codebook of `slot_ack`
    pub harq_bit_idx: u8,
    pub nof_retxs: u8,
    pub tbs_bytes: u32,
    pub mcs: u8,
    pub ndi: bool,
}

impl HarqProcess {
    fn new(id: u8, slot: SlotPoint) -> Self {
        Self {
            id: HarqId(id),
            state: HarqState::Empty,
            slot_tx: slot,
            slot_ack: slot,
            harq_bit_idx: 0,
            nof_retxs: 0,
            tbs_bytes: 0,
            mcs: 0,
            ndi: false,
        }
    }
}

pub struct HarqEntity {
    rnti: Rnti,
    max_nof_retxs: u8,
    procs: Vec<HarqProcess>,
}

impl HarqEntity {
    pub fn new(rnti: Rnti, nof_harqs: usize, max_nof_retxs: u8, initial_slot: SlotPoint) -> Self {
        Self {
            rnti,
            max_nof_retxs,
            procs: (0..nof_harqs as u8).map(|id| HarqProcess::new(id, initial_slot)).collect(),
        }
    }

    pub fn get(&self, id: HarqId) -> Option<&HarqProcess> {
        self.procs.get(id.0 as usize)
    }

    pub fn find_empty(&self) -> Option<HarqId> {
        self.procs.iter().find(|h| h.state == HarqState::Empty).map(|h| h.id)
    }

    /// Oldest process waiting for a retransmission
    pub fn find_pending_retx(&self) -> Option<HarqId> {
        self.procs
            .iter()
            .filter(|h| h.state == HarqState::PendingRetx)
            .min_by_key(|h| h.slot_tx.to_uint())
            .map(|h| h.id)
    }

    pub fn nof_waiting_ack(&self) -> usize {
        self.procs.iter().filter(|h| h.state == HarqState::WaitingAck).count()
    }

    /// Start a new transmission on an empty process
    pub fn new_tx(&mut self, id: HarqId, slot_tx: SlotPoint, slot_ack: SlotPoint, tbs_bytes: u32, mcs: u8) -> bool {
        let Some(h) = self.procs.get_mut(id.0 as usize).filter(|h| h.state == HarqState::Empty) else {
            return false;
        };
        h.state = HarqState::WaitingAck;
        h.slot_tx = slot_tx;
        h.slot_ack = slot_ack;
        h.harq_bit_idx = 0;
        h.nof_retxs = 0;
        h.tbs_bytes = tbs_bytes;
        h.mcs = mcs;
        h.ndi = !h.ndi;
        true
    }

    /// Retransmit the transport block of a process pending retransmission
    pub fn new_retx(&mut self, id: HarqId, slot_tx: SlotPoint, slot_ack: SlotPoint) -> bool {
        let Some(h) = self.procs.get_mut(id.0 as usize).filter(|h| h.state == HarqState::PendingRetx) else {
            return false;
        };
        h.state = HarqState::WaitingAck;
        h.slot_tx = slot_tx;
        h.slot_ack = slot_ack;
        h.harq_bit_idx = 0;
        h.nof_retxs += 1;
        true
    }

    pub fn set_harq_bit_idx(&mut self, id: HarqId, harq_bit_idx: u8) {
        if let Some(h) = self.procs.get_mut(id.0 as usize) {
            h.harq_bit_idx = harq_bit_idx;
        }
    }

    fn apply_feedback(&mut self, idx: usize, ack: bool) -> HarqFeedbackOutcome {
        let max_nof_retxs = self.max_nof_retxs;
        let h = &mut self.procs[idx];
        if ack {
            h.state = HarqState::Empty;
            return HarqFeedbackOutcome::Acked { tbs_bytes: h.tbs_bytes };
        }
        if h.nof_retxs >= max_nof_retxs {
            debug!(
                "rnti={} h_id={}: Discarding TB after {} retransmissions",
                self.rnti, h.id.0, h.nof_retxs
            );
            h.state = HarqState::Empty;
            return HarqFeedbackOutcome::Nacked { retx_pending: false };
        }
        h.state = HarqState::PendingRetx;
        HarqFeedbackOutcome::Nacked { retx_pending: true }
    }

    /// Apply a DL HARQ-ACK bit received in `slot_ack`
    pub fn handle_ack_info(&mut self, slot_ack: SlotPoint, ack: HarqAckValue, harq_bit_idx: u8) -> HarqFeedbackOutcome {
        let found = self.procs.iter().position(|h| {
            h.state == HarqState::WaitingAck && h.slot_ack == slot_ack && h.harq_bit_idx == harq_bit_idx
        });
        match found {
            Some(idx) => self.apply_feedback(idx, ack == HarqAckValue::Ack),
            None => {
                warn!(
                    "rnti={}: Discarding HARQ-ACK for slot {} bit {}. Cause: no DL HARQ process waiting",
                    self.rnti, slot_ack, harq_bit_idx
                );
                HarqFeedbackOutcome::Stale
            }
        }
    }

    /// Apply the CRC of a PUSCH received in `slot_rx`
    pub fn handle_crc(&mut self, slot_rx: SlotPoint, id: HarqId, crc_ok: bool) -> HarqFeedbackOutcome {
        let idx = id.0 as usize;
        let waiting = self
            .procs
            .get(idx)
            .is_some_and(|h| h.state == HarqState::WaitingAck && h.slot_ack == slot_rx);
        if !waiting {
            warn!(
                "rnti={} h_id={}: Discarding CRC for slot {}. Cause: no UL HARQ process waiting",
                self.rnti, id.0, slot_rx
            );
            return HarqFeedbackOutcome::Stale;
        }
        self.apply_feedback(idx, crc_ok)
    }

    /// NACK the processes whose feedback never arrived
    pub fn slot_indication(&mut self, sl: SlotPoint) {
        let timed_out: Vec<usize> = self
            .procs
            .iter()
            .enumerate()
            .filter(|(_, h)| h.state == HarqState::WaitingAck && sl - h.slot_ack > HARQ_FEEDBACK_TIMEOUT_SLOTS)
            .map(|(idx, _)| idx)
            .collect();
        for idx in timed_out {
            debug!("rnti={} h_id={}: HARQ feedback timeout", self.rnti, idx);
            self.apply_feedback(idx, false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::types::SubcarrierSpacing;

    fn entity() -> (HarqEntity, SlotPoint) {
        let sl = SlotPoint::new(SubcarrierSpacing::Scs30, 0, 0);
        (HarqEntity::new(Rnti(0x4601), 8, 2, sl), sl)
    }

    #[test]
    fn test_ack_frees_process() {
        let (mut harqs, sl) = entity();
        let id = harqs.find_empty().unwrap();
        assert!(harqs.new_tx(id, sl, sl + 4, 1000, 10));
        assert_eq!(harqs.nof_waiting_ack(), 1);
        assert_eq!(
            harqs.handle_ack_info(sl + 4, HarqAckValue::Ack, 0),
            HarqFeedbackOutcome::Acked { tbs_bytes: 1000 }
        );
        assert_eq!(harqs.get(id).unwrap().state, HarqState::Empty);
    }

    #[test]
    fn test_stale_ack_does_not_mutate() {
        let (mut harqs, sl) = entity();
        let id = harqs.find_empty().unwrap();
        harqs.new_tx(id, sl, sl + 4, 1000, 10);
        assert_eq!(harqs.handle_ack_info(sl + 5, HarqAckValue::Ack, 0), HarqFeedbackOutcome::Stale);
        assert_eq!(harqs.get(id).unwrap().state, HarqState::WaitingAck);
    }

    #[test]
    fn test_nack_until_max_retx() {
        let (mut harqs, sl) = entity();
        let id = harqs.find_empty().unwrap();
        harqs.new_tx(id, sl, sl + 4, 500, 5);
        assert_eq!(
            harqs.handle_ack_info(sl + 4, HarqAckValue::Nack, 0),
            HarqFeedbackOutcome::Nacked { retx_pending: true }
        );
        assert_eq!(harqs.find_pending_retx(), Some(id));
        for retx in 1..=2u32 {
            assert!(harqs.new_retx(id, sl + retx * 10, sl + retx * 10 + 4));
            let outcome = harqs.handle_ack_info(sl + retx * 10 + 4, HarqAckValue::Dtx, 0);
            assert_eq!(outcome, HarqFeedbackOutcome::Nacked { retx_pending: retx < 2 });
        }
        assert_eq!(harqs.get(id).unwrap().state, HarqState::Empty);
    }

    #[test]
    fn test_crc_matches_harq_id_and_slot() {
        let (mut harqs, sl) = entity();
        harqs.new_tx(HarqId(3), sl, sl + 4, 300, 8);
        assert_eq!(harqs.handle_crc(sl + 4, HarqId(2), true), HarqFeedbackOutcome::Stale);
        assert_eq!(harqs.handle_crc(sl + 4, HarqId(3), true), HarqFeedbackOutcome::Acked { tbs_bytes: 300 });
    }

    #[test]
    fn test_feedback_timeout() {
        let (mut harqs, sl) = entity();
        harqs.new_tx(HarqId(0), sl, sl + 4, 300, 8);
        harqs.slot_indication(sl + 4 + HARQ_FEEDBACK_TIMEOUT_SLOTS as u32);
        assert_eq!(harqs.get(HarqId(0)).unwrap().state, HarqState::WaitingAck);
        harqs.slot_indication(sl + 5 + HARQ_FEEDBACK_TIMEOUT_SLOTS as u32);
        assert_eq!(harqs.get(HarqId(0)).unwrap().state, HarqState::PendingRetx);
    }
}
