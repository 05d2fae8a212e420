//! Logical channel state
//!
//! DL buffer occupancy per LCID plus pending MAC CEs, and UL buffer status per LCG.

use crate::config::LogicalChannelConfig;
use common::types::{Lcg, Lcid, MAX_NOF_LCGS, MAX_NOF_RB_LCIDS};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// MAC subheader size assumed for every SDU and CE
const MAC_SUBHEADER_BYTES: u32 = 2;

/// DL MAC control elements scheduled by the MAC
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DlMacCe {
    /// UE Contention Resolution Identity
    ConRes,
    /// Timing Advance Command
    TaCmd,
}

impl DlMacCe {
    /// CE payload size in bytes
    pub fn size(&self) -> u32 {
        match self {
            DlMacCe::ConRes => 6,
            DlMacCe::TaCmd => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct DlChannel {
    active: bool,
    priority: u8,
    buf_st: u32,
}

pub struct DlLogicalChannelManager {
    channels: Vec<DlChannel>,
    pending_ces: VecDeque<DlMacCe>,
}

impl DlLogicalChannelManager {
    pub fn new(cfgs: &[LogicalChannelConfig]) -> Self {
        let mut mng = Self {
            channels: vec![DlChannel::default(); MAX_NOF_RB_LCIDS],
            pending_ces: VecDeque::new(),
        };
        mng.configure(cfgs);
        mng
    }

    /// Apply a new logical channel configuration. SRB0 is always active.
    pub fn configure(&mut self, cfgs: &[LogicalChannelConfig]) {
        for ch in self.channels.iter_mut() {
            ch.active = false;
        }
        self.channels[Lcid::SRB0.as_usize()].active = true;
        for cfg in cfgs {
            if let Some(ch) = self.channels.get_mut(cfg.lcid.as_usize()) {
                ch.active = true;
                ch.priority = cfg.priority;
            }
        }
        for ch in self.channels.iter_mut().filter(|ch| !ch.active) {
            ch.buf_st = 0;
        }
    }

    pub fn is_active(&self, lcid: Lcid) -> bool {
        self.channels.get(lcid.as_usize()).is_some_and(|ch| ch.active)
    }

    /// Update the RLC buffer state. Returns false for inactive channels.
    pub fn handle_dl_buffer_status(&mut self, lcid: Lcid, bs: u32) -> bool {
        match self.channels.get_mut(lcid.as_usize()) {
            Some(ch) if ch.active => {
                ch.buf_st = bs;
                true
            }
            _ => false,
        }
    }

    pub fn handle_mac_ce_indication(&mut self, ce: DlMacCe) {
        self.pending_ces.push_back(ce);
    }

    pub fn pending_bytes_for(&self, lcid: Lcid) -> u32 {
        self.channels.get(lcid.as_usize()).map_or(0, |ch| ch.buf_st)
    }

    pub fn has_pending_ces(&self) -> bool {
        !self.pending_ces.is_empty()
    }

    fn pending_ce_bytes(&self) -> u32 {
        self.pending_ces.iter().map(|ce| ce.size() + MAC_SUBHEADER_BYTES).sum()
    }

    /// Bytes needed to empty every buffer but SRB0, MAC subheaders included
    pub fn pending_bytes(&self) -> u32 {
        let sdus: u32 = self
            .channels
            .iter()
            .enumerate()
            .filter(|(lcid, ch)| *lcid != Lcid::SRB0.as_usize() && ch.active && ch.buf_st > 0)
            .map(|(_, ch)| ch.buf_st + MAC_SUBHEADER_BYTES)
            .sum();
        self.pending_ce_bytes() + sdus
    }

    pub fn has_pending_bytes(&self) -> bool {
        self.pending_bytes() > 0
    }

    /// Size of the pending SRB0 PDU, CEs included. Zero without SRB0 data.
    pub fn pending_srb0_bytes(&self) -> u32 {
        match self.channels[Lcid::SRB0.as_usize()].buf_st {
            0 => 0,
            bs => self.pending_ce_bytes() + bs + MAC_SUBHEADER_BYTES,
        }
    }

    fn allocate_ces(&mut self, rem: &mut u32) {
        while let Some(ce) = self.pending_ces.front() {
            let len = ce.size() + MAC_SUBHEADER_BYTES;
            if len > *rem {
                break;
            }
            *rem -= len;
            self.pending_ces.pop_front();
        }
    }

    /// Fill a transport block of `tbs_bytes`: CEs first, then SDUs in priority order.
    /// SRB0 is left out. Returns the number of bytes scheduled.
    pub fn allocate(&mut self, tbs_bytes: u32) -> u32 {
        let mut rem = tbs_bytes;
        self.allocate_ces(&mut rem);

        let mut order: Vec<usize> = (0..self.channels.len())
            .filter(|&i| i != Lcid::SRB0.as_usize() && self.channels[i].active && self.channels[i].buf_st > 0)
            .collect();
        // Lower value means higher priority; LCID breaks ties.
        order.sort_by_key(|&i| (self.channels[i].priority, i));
        for i in order {
            if rem <= MAC_SUBHEADER_BYTES {
                break;
            }
            let ch = &mut self.channels[i];
            let sdu = ch.buf_st.min(rem - MAC_SUBHEADER_BYTES);
            ch.buf_st -= sdu;
            rem -= sdu + MAC_SUBHEADER_BYTES;
        }
        tbs_bytes - rem
    }

    /// Fill a transport block with the CEs and the whole SRB0 SDU. Returns the number of
    /// bytes scheduled, zero when the SDU does not fit.
    pub fn allocate_srb0(&mut self, tbs_bytes: u32) -> u32 {
        if self.pending_srb0_bytes() == 0 || self.pending_srb0_bytes() > tbs_bytes {
            return 0;
        }
        let mut rem = tbs_bytes;
        self.allocate_ces(&mut rem);
        let ch = &mut self.channels[Lcid::SRB0.as_usize()];
        rem -= ch.buf_st + MAC_SUBHEADER_BYTES;
        ch.buf_st = 0;
        tbs_bytes - rem
    }
}

/// BSR format of a UL indication
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BsrFormat {
    ShortBsr,
    ShortTruncatedBsr,
    LongBsr,
    LongTruncatedBsr,
}

pub struct UlLogicalChannelManager {
    active_lcgs: [bool; MAX_NOF_LCGS],
    buf_st: [u32; MAX_NOF_LCGS],
    sr_pending: bool,
}

impl UlLogicalChannelManager {
    pub fn new(cfgs: &[LogicalChannelConfig]) -> Self {
        let mut mng = Self {
            active_lcgs: [false; MAX_NOF_LCGS],
            buf_st: [0; MAX_NOF_LCGS],
            sr_pending: false,
        };
        mng.configure(cfgs);
        mng
    }

    pub fn configure(&mut self, cfgs: &[LogicalChannelConfig]) {
        self.active_lcgs = [false; MAX_NOF_LCGS];
        // LCG 0 carries SRB0.
        self.active_lcgs[0] = true;
        for cfg in cfgs {
            if let Some(active) = self.active_lcgs.get_mut(cfg.lcg.0 as usize) {
                *active = true;
            }
        }
        for (lcg, bs) in self.buf_st.iter_mut().enumerate() {
            if !self.active_lcgs[lcg] {
                *bs = 0;
            }
        }
    }

    /// Apply a BSR. Long formats report every LCG, so unreported LCGs are emptied.
    pub fn handle_bsr_indication(&mut self, format: BsrFormat, reports: &[(Lcg, u32)]) {
        if matches!(format, BsrFormat::LongBsr | BsrFormat::LongTruncatedBsr) {
            self.buf_st = [0; MAX_NOF_LCGS];
        }
        for (lcg, nof_bytes) in reports {
            let idx = lcg.0 as usize;
            if idx < MAX_NOF_LCGS && self.active_lcgs[idx] {
                self.buf_st[idx] = *nof_bytes;
            }
        }
        // A BSR tells the scheduler what the UE needs; the SR is served.
        self.sr_pending = false;
    }

    pub fn handle_sr_indication(&mut self) {
        self.sr_pending = true;
    }

    pub fn has_pending_sr(&self) -> bool {
        self.sr_pending
    }

    pub fn pending_bytes(&self) -> u32 {
        self.buf_st.iter().sum()
    }

    /// Account for a scheduled UL grant, highest LCG priority (lowest index) first
    pub fn handle_ul_grant(&mut self, tbs_bytes: u32) {
        self.sr_pending = false;
        let mut rem = tbs_bytes;
        for bs in self.buf_st.iter_mut() {
            let served = (*bs).min(rem);
            *bs -= served;
            rem -= served;
            if rem == 0 {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lc_cfgs() -> Vec<LogicalChannelConfig> {
        vec![
            LogicalChannelConfig { lcid: Lcid::SRB1, lcg: Lcg(0), priority: 1 },
            LogicalChannelConfig { lcid: Lcid(4), lcg: Lcg(1), priority: 8 },
        ]
    }

    #[test]
    fn test_inactive_channel_ignored() {
        let mut dl = DlLogicalChannelManager::new(&lc_cfgs());
        assert!(dl.handle_dl_buffer_status(Lcid(4), 100));
        assert!(!dl.handle_dl_buffer_status(Lcid(5), 100));
        assert!(dl.handle_dl_buffer_status(Lcid::SRB0, 10));
        assert_eq!(dl.pending_bytes(), 100 + MAC_SUBHEADER_BYTES);
        assert_eq!(dl.pending_srb0_bytes(), 10 + MAC_SUBHEADER_BYTES);
    }

    #[test]
    fn test_srb0_pdu_not_segmented() {
        let mut dl = DlLogicalChannelManager::new(&lc_cfgs());
        dl.handle_dl_buffer_status(Lcid::SRB0, 100);
        dl.handle_dl_buffer_status(Lcid(4), 50);
        dl.handle_mac_ce_indication(DlMacCe::ConRes);
        assert_eq!(dl.pending_srb0_bytes(), 8 + 102);

        assert_eq!(dl.allocate_srb0(109), 0);
        assert_eq!(dl.pending_bytes_for(Lcid::SRB0), 100);
        // The data scheduler never takes SRB0 bytes.
        assert_eq!(dl.allocate(200), 8 + 52);
        assert_eq!(dl.pending_bytes_for(Lcid::SRB0), 100);

        assert_eq!(dl.allocate_srb0(150), 102);
        assert_eq!(dl.pending_srb0_bytes(), 0);
        assert_eq!(dl.allocate_srb0(150), 0);
    }

    #[test]
    fn test_allocate_ces_then_priority() {
        let mut dl = DlLogicalChannelManager::new(&lc_cfgs());
        dl.handle_dl_buffer_status(Lcid(4), 100);
        dl.handle_dl_buffer_status(Lcid::SRB1, 20);
        dl.handle_mac_ce_indication(DlMacCe::ConRes);

        // 8 bytes of CE, 22 bytes of SRB1, 10 bytes on DRB.
        assert_eq!(dl.allocate(40), 40);
        assert!(!dl.has_pending_ces());
        assert_eq!(dl.pending_bytes_for(Lcid::SRB1), 0);
        assert_eq!(dl.pending_bytes_for(Lcid(4)), 92);
    }

    #[test]
    fn test_reconfiguration_clears_removed_channels() {
        let mut dl = DlLogicalChannelManager::new(&lc_cfgs());
        dl.handle_dl_buffer_status(Lcid(4), 100);
        dl.configure(&lc_cfgs()[..1]);
        assert!(!dl.is_active(Lcid(4)));
        assert_eq!(dl.pending_bytes_for(Lcid(4)), 0);
    }

    #[test]
    fn test_long_bsr_replaces_all_lcgs() {
        let mut ul = UlLogicalChannelManager::new(&lc_cfgs());
        ul.handle_sr_indication();
        ul.handle_bsr_indication(BsrFormat::ShortBsr, &[(Lcg(0), 50)]);
        ul.handle_bsr_indication(BsrFormat::ShortBsr, &[(Lcg(1), 70)]);
        assert_eq!(ul.pending_bytes(), 120);
        assert!(!ul.has_pending_sr());

        ul.handle_bsr_indication(BsrFormat::LongBsr, &[(Lcg(1), 10)]);
        assert_eq!(ul.pending_bytes(), 10);
    }

    #[test]
    fn test_ul_grant_consumes_buffer() {
        let mut ul = UlLogicalChannelManager::new(&lc_cfgs());
        ul.handle_bsr_indication(BsrFormat::LongBsr, &[(Lcg(0), 50), (Lcg(1), 70)]);
        ul.handle_ul_grant(80);
        assert_eq!(ul.pending_bytes(), 40);
    }
}
