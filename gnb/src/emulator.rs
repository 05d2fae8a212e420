//! PHY emulator
//!
//! Stands in for the PHY and the upper layers: it reads the scheduling decision of every
//! slot and answers with the feedback a set of UEs would produce (HARQ-ACKs, CRCs, SRs,
//! CSI reports, BSRs) plus DL traffic arrivals, all drawn from a seeded RNG.

use crate::config::EmulatorConfig;
use common::types::{CellIndex, HarqId, Lcg, Lcid, Rnti, UeIndex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use scheduler::events::messages::{
    CsiReport, DlBufferStateIndication, UciIndication, UciIndicationPdu, UciPdu, UlBsrIndication, UlCrcIndication,
    UlCrcPdu,
};
use scheduler::result::{PucchFormat, SlotResult};
use scheduler::ue::harq::HarqAckValue;
use scheduler::ue::logical_channels::BsrFormat;
use scheduler::UeEventHandle;
use std::collections::BTreeMap;
use tracing::{debug, trace};

/// Bearer carrying the emulated user traffic
const DATA_LCID: Lcid = Lcid(4);
const DATA_LCG: Lcg = Lcg(1);

/// Decision of one cell for one slot, as seen by the PHY
#[derive(Debug, Clone)]
pub struct SlotSummary {
    pub cell_index: CellIndex,
    pub result: SlotResult,
}

#[derive(Debug)]
struct EmulatedUe {
    ue_index: UeIndex,
    cell_index: CellIndex,
    /// Bytes waiting in the DL RLC buffer
    dl_pending: u32,
    /// Bytes waiting in the UE UL buffer
    ul_pending: u32,
    /// Last buffer size reported in a BSR
    ul_reported: u32,
}

/// Feedback counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmulatorStats {
    pub harq_acks: u64,
    pub harq_nacks: u64,
    pub crc_ok: u64,
    pub crc_ko: u64,
    pub srs: u64,
    pub csi_reports: u64,
}

pub struct PhyEmulator {
    cfg: EmulatorConfig,
    rng: StdRng,
    handle: UeEventHandle,
    ues: BTreeMap<Rnti, EmulatedUe>,
    stats: EmulatorStats,
}

#[derive(Default)]
struct PucchUci {
    harq_bits: u32,
    sr: bool,
    csi: bool,
    multi_bit: bool,
}

impl PhyEmulator {
    pub fn new(cfg: EmulatorConfig, handle: UeEventHandle) -> Self {
        Self {
            rng: StdRng::seed_from_u64(cfg.seed),
            cfg,
            handle,
            ues: BTreeMap::new(),
            stats: EmulatorStats::default(),
        }
    }

    pub fn add_ue(&mut self, ue_index: UeIndex, crnti: Rnti, cell_index: CellIndex) {
        self.ues.insert(
            crnti,
            EmulatedUe { ue_index, cell_index, dl_pending: 0, ul_pending: 0, ul_reported: 0 },
        );
    }

    pub fn stats(&self) -> EmulatorStats {
        self.stats
    }

    /// Produce the feedback of one slot decision
    pub fn handle_slot(&mut self, summary: &SlotSummary) {
        let cell_index = summary.cell_index;
        let res = &summary.result;
        let slot_rx = res.slot;

        self.handle_traffic(cell_index, res);

        let mut pucch_ucis: BTreeMap<Rnti, PucchUci> = BTreeMap::new();
        for pucch in &res.pucchs {
            let uci = pucch_ucis.entry(pucch.rnti).or_default();
            uci.harq_bits = uci.harq_bits.max(pucch.uci.harq_ack_bits);
            uci.sr |= pucch.uci.sr_bits > 0;
            uci.csi |= pucch.uci.csi_part1_bits > 0;
            uci.multi_bit |= pucch.format >= PucchFormat::Format2;
        }

        let mut ucis = Vec::new();
        for (rnti, uci) in pucch_ucis {
            let Some(ue_index) = self.ues.get(&rnti).map(|ue| ue.ue_index) else {
                continue;
            };
            let harqs = self.draw_harq_bits(uci.harq_bits);
            let sr_detected = uci.sr && self.wants_sr(rnti);
            let csi = uci.csi.then(|| self.draw_csi());
            let pdu = if uci.multi_bit {
                UciPdu::PucchF2F3F4 { harqs, sr_detected, csi, ul_sinr_db: Some(self.draw_sinr()) }
            } else {
                UciPdu::PucchF0F1 { harqs, sr_detected, ul_sinr_db: Some(self.draw_sinr()), time_advance_offset: None }
            };
            ucis.push(UciIndicationPdu { ue_index, crnti: rnti, pdu });
        }

        let mut crcs = Vec::new();
        for pusch in &res.puschs {
            let Some(ue_index) = self.ues.get(&pusch.rnti).map(|ue| ue.ue_index) else {
                continue;
            };
            if pusch.uci.total() > 0 {
                let harqs = self.draw_harq_bits(pusch.uci.harq_ack_bits);
                let csi = (pusch.uci.csi_part1_bits > 0).then(|| self.draw_csi());
                ucis.push(UciIndicationPdu { ue_index, crnti: pusch.rnti, pdu: UciPdu::Pusch { harqs, csi } });
            }
            let crc_ok = self.rng.gen_bool(self.cfg.success_rate);
            if crc_ok {
                self.stats.crc_ok += 1;
                self.handle_ul_decoded(cell_index, pusch.rnti, pusch.tbs_bytes);
            } else {
                self.stats.crc_ko += 1;
            }
            crcs.push(self.crc_pdu(ue_index, pusch.rnti, pusch.harq_id, crc_ok));
        }

        if !ucis.is_empty() {
            trace!("slot={} cell={}: {} UCI PDUs", slot_rx, cell_index, ucis.len());
            self.handle.handle_uci_indication(UciIndication { cell_index, slot_rx, ucis });
        }
        if !crcs.is_empty() {
            self.handle.handle_crc_indication(UlCrcIndication { cell_index, sl_rx: slot_rx, crcs });
        }
    }

    /// DL arrivals and drain of the DL buffers by the new transmissions of the slot
    fn handle_traffic(&mut self, cell_index: CellIndex, res: &SlotResult) {
        for pdsch in res.pdschs.iter().filter(|pdsch| !pdsch.is_retx) {
            if let Some(ue) = self.ues.get_mut(&pdsch.rnti) {
                ue.dl_pending = ue.dl_pending.saturating_sub(pdsch.tbs_bytes);
            }
        }

        let max_dl = self.cfg.dl_bytes_per_slot.saturating_mul(2);
        for ue in self.ues.values_mut().filter(|ue| ue.cell_index == cell_index) {
            let dl_arrival = if max_dl > 0 { self.rng.gen_range(0..=max_dl) } else { 0 };
            if dl_arrival > 0 {
                ue.dl_pending = ue.dl_pending.saturating_add(dl_arrival);
                self.handle.handle_dl_buffer_state_indication(DlBufferStateIndication {
                    ue_index: ue.ue_index,
                    lcid: DATA_LCID,
                    bs: ue.dl_pending,
                });
            }
            if self.rng.gen_bool(self.cfg.ul_arrival_rate) {
                ue.ul_pending = ue.ul_pending.saturating_add(self.cfg.ul_arrival_bytes);
            }
        }
    }

    fn handle_ul_decoded(&mut self, cell_index: CellIndex, rnti: Rnti, tbs_bytes: u32) {
        let Some(ue) = self.ues.get_mut(&rnti) else {
            return;
        };
        ue.ul_pending = ue.ul_pending.saturating_sub(tbs_bytes);
        if ue.ul_pending != ue.ul_reported {
            ue.ul_reported = ue.ul_pending;
            debug!("rnti={}: BSR of {} bytes", rnti, ue.ul_pending);
            self.handle.handle_ul_bsr_indication(UlBsrIndication {
                cell_index,
                ue_index: ue.ue_index,
                crnti: rnti,
                format: BsrFormat::ShortBsr,
                reported_lcgs: vec![(DATA_LCG, ue.ul_pending)],
            });
        }
    }

    /// A UE raises an SR when it holds UL data the scheduler has not been told about
    fn wants_sr(&mut self, rnti: Rnti) -> bool {
        let wants = self
            .ues
            .get(&rnti)
            .is_some_and(|ue| ue.ul_pending > 0 && ue.ul_reported == 0);
        if wants {
            self.stats.srs += 1;
        }
        wants
    }

    fn draw_harq_bits(&mut self, nof_bits: u32) -> Vec<HarqAckValue> {
        (0..nof_bits)
            .map(|_| {
                if self.rng.gen_bool(self.cfg.success_rate) {
                    self.stats.harq_acks += 1;
                    HarqAckValue::Ack
                } else {
                    self.stats.harq_nacks += 1;
                    HarqAckValue::Nack
                }
            })
            .collect()
    }

    fn draw_csi(&mut self) -> CsiReport {
        self.stats.csi_reports += 1;
        let cqi = (self.cfg.mean_cqi as i32 + self.rng.gen_range(-2..=2)).clamp(1, 15) as u8;
        CsiReport { cqi, ri: Some(1) }
    }

    fn draw_sinr(&mut self) -> f32 {
        self.rng.gen_range(5.0..25.0)
    }

    fn crc_pdu(&mut self, ue_index: UeIndex, rnti: Rnti, harq_id: HarqId, crc_ok: bool) -> UlCrcPdu {
        UlCrcPdu {
            ue_index,
            rnti,
            harq_id,
            tb_crc_success: crc_ok,
            ul_sinr_db: Some(self.draw_sinr()),
            time_advance_offset: None,
        }
    }
}
