//! GNodeB configuration file
//!
//! Cell list, scheduler expert parameters, the template used to configure emulated UEs
//! and the PHY emulator settings. Loaded from YAML or TOML depending on the file extension.

use anyhow::{anyhow, bail, Context};
use common::types::{CellIndex, Lcg, Lcid, Pci, Rnti, SlotPoint, UeIndex};
use scheduler::config::{
    CellConfiguration, CsiReportConfig, LogicalChannelConfig, MaxCodeRate, PucchConfig, PucchFormatParams,
    PucchResource, SchedulerExpertConfig, SrConfig, UeCellConfiguration, UeConfiguration,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GnbConfig {
    /// Scheduler expert parameters
    #[serde(default)]
    pub expert: SchedulerExpertConfig,
    /// Cells of the cell group
    pub cells: Vec<CellConfiguration>,
    /// Template for the emulated UEs
    #[serde(default)]
    pub ue_profile: UeProfileConfig,
    /// PHY emulator
    #[serde(default)]
    pub emulator: EmulatorConfig,
    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
}

/// Dedicated configuration applied to every emulated UE
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UeProfileConfig {
    /// Number of UEs created at startup, spread over the cells
    #[serde(default = "default_nof_ues")]
    pub nof_ues: u16,
    /// C-RNTI of the first UE
    #[serde(default = "default_first_crnti")]
    pub first_crnti: u16,
    /// UE-specific search space
    #[serde(default = "default_ue_ss_id")]
    pub ss_id: u8,
    /// Skip the dedicated PUCCH configuration (UEs use the common resources)
    #[serde(default)]
    pub fallback_only: bool,
    #[serde(default = "default_sr_period")]
    pub sr_period_slots: u32,
    #[serde(default = "default_csi_period")]
    pub csi_period_slots: u32,
    #[serde(default = "default_csi_part1_bits")]
    pub csi_part1_bits: u32,
}

fn default_nof_ues() -> u16 {
    4
}

fn default_first_crnti() -> u16 {
    0x4601
}

fn default_ue_ss_id() -> u8 {
    2
}

fn default_sr_period() -> u32 {
    10
}

fn default_csi_period() -> u32 {
    20
}

fn default_csi_part1_bits() -> u32 {
    4
}

impl Default for UeProfileConfig {
    fn default() -> Self {
        Self {
            nof_ues: default_nof_ues(),
            first_crnti: default_first_crnti(),
            ss_id: default_ue_ss_id(),
            fallback_only: false,
            sr_period_slots: default_sr_period(),
            csi_period_slots: default_csi_period(),
            csi_part1_bits: default_csi_part1_bits(),
        }
    }
}

/// First dedicated resource ID used for the per-UE SR resources
const SR_RESOURCE_BASE: u8 = 16;
/// Number of Format 1 SR resources that fit on one PRB pair (4 cyclic shifts x 7 OCCs)
const MAX_SR_RESOURCES_PER_PRB: u16 = 28;

impl UeProfileConfig {
    pub fn crnti(&self, ue_index: UeIndex) -> Rnti {
        Rnti(self.first_crnti.wrapping_add(ue_index.0))
    }

    /// Configuration of the UE `ue_index`, served by `pcell`
    pub fn ue_configuration(&self, ue_index: UeIndex, pcell: &CellConfiguration) -> UeConfiguration {
        let pucch = (!self.fallback_only).then(|| self.pucch_config(ue_index, pcell.nof_crbs));
        let sr = (!self.fallback_only).then(|| SrConfig {
            period_slots: self.sr_period_slots,
            offset: Self::ul_offset(pcell, self.sr_period_slots, (ue_index.0 / MAX_SR_RESOURCES_PER_PRB) as usize),
        });
        let csi = (!self.fallback_only && self.csi_period_slots > 0).then(|| CsiReportConfig {
            period_slots: self.csi_period_slots,
            offset: Self::ul_offset(pcell, self.csi_period_slots, ue_index.as_usize()),
            part1_bits: self.csi_part1_bits,
        });
        UeConfiguration {
            ue_index,
            crnti: self.crnti(ue_index),
            cells: vec![UeCellConfiguration {
                cell_index: pcell.cell_index,
                ss_id: self.ss_id,
                pucch,
                sr,
                csi,
            }],
            logical_channels: vec![
                LogicalChannelConfig { lcid: Lcid::SRB1, lcg: Lcg(0), priority: 1 },
                LogicalChannelConfig { lcid: Lcid(4), lcg: Lcg(1), priority: 8 },
            ],
        }
    }

    /// `n`-th UL-enabled offset of a periodic occasion, wrapping over the period
    fn ul_offset(pcell: &CellConfiguration, period_slots: u32, n: usize) -> u32 {
        let ul_offsets: Vec<u32> = (0..period_slots)
            .filter(|o| pcell.is_ul_enabled(SlotPoint::from_count(pcell.scs, *o)))
            .collect();
        if ul_offsets.is_empty() {
            0
        } else {
            ul_offsets[n % ul_offsets.len()]
        }
    }

    /// PUCCH layout at the carrier edges: HARQ set 0 = {0, 1, 2} (F1, PRB 1), set 1 = {4, 5}
    /// (F2), CSI on resource 6 and one F1 SR resource per UE on PRB 2.
    fn pucch_config(&self, ue_index: UeIndex, nof_crbs: u32) -> PucchConfig {
        let mirror = |prb: u32| nof_crbs.saturating_sub(1 + prb);
        let f1 = |res_id: u8, prb: u32, cs: u8, occ: u8| PucchResource {
            res_id,
            starting_prb: prb,
            second_hop_prb: Some(mirror(prb)),
            params: PucchFormatParams::Format1 {
                initial_cyclic_shift: cs,
                time_domain_occ: occ,
                starting_symbol: 0,
                nof_symbols: 14,
            },
        };
        let f2 = |res_id: u8, prb: u32, nof_prbs: u32| PucchResource {
            res_id,
            starting_prb: prb,
            second_hop_prb: None,
            params: PucchFormatParams::Format2 { nof_prbs, starting_symbol: 12, nof_symbols: 2 },
        };

        let sr_idx = ue_index.0 % MAX_SR_RESOURCES_PER_PRB;
        let sr_res_id = SR_RESOURCE_BASE + sr_idx as u8;
        PucchConfig {
            resources: vec![
                f1(0, 1, 0, 0),
                f1(1, 1, 4, 0),
                f1(2, 1, 8, 0),
                f2(4, 3, 2),
                f2(5, mirror(4), 2),
                f2(6, 6, 1),
                f1(sr_res_id, 2, ((sr_idx % 4) * 3) as u8, (sr_idx / 4) as u8),
            ],
            harq_set0: vec![0, 1, 2],
            harq_set1: vec![4, 5],
            sr_resource: sr_res_id,
            csi_resource: (self.csi_period_slots > 0).then_some(6),
            f2_max_code_rate: MaxCodeRate::Dot35,
        }
    }
}

/// PHY emulator settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmulatorConfig {
    /// RNG seed; runs with the same seed produce the same feedback
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Probability of a HARQ-ACK (DL) or CRC pass (UL) on a transmission
    #[serde(default = "default_success_rate")]
    pub success_rate: f64,
    /// Mean DL bytes arriving per UE and slot
    #[serde(default = "default_dl_bytes_per_slot")]
    pub dl_bytes_per_slot: u32,
    /// Probability that new UL data arrives at a UE in a slot
    #[serde(default = "default_ul_arrival_rate")]
    pub ul_arrival_rate: f64,
    /// Size of a UL data arrival
    #[serde(default = "default_ul_arrival_bytes")]
    pub ul_arrival_bytes: u32,
    /// Mean reported CQI
    #[serde(default = "default_mean_cqi")]
    pub mean_cqi: u8,
    /// Pace slots to the wall clock
    #[serde(default)]
    pub realtime: bool,
}

fn default_seed() -> u64 {
    1
}

fn default_success_rate() -> f64 {
    0.9
}

fn default_dl_bytes_per_slot() -> u32 {
    200
}

fn default_ul_arrival_rate() -> f64 {
    0.05
}

fn default_ul_arrival_bytes() -> u32 {
    1500
}

fn default_mean_cqi() -> u8 {
    11
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            seed: default_seed(),
            success_rate: default_success_rate(),
            dl_bytes_per_slot: default_dl_bytes_per_slot(),
            ul_arrival_rate: default_ul_arrival_rate(),
            ul_arrival_bytes: default_ul_arrival_bytes(),
            mean_cqi: default_mean_cqi(),
            realtime: false,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    /// Default filter when RUST_LOG is not set
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Statistics period in seconds, 0 disables it
    #[serde(default = "default_stats_period")]
    pub stats_period_s: u64,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_stats_period() -> u64 {
    5
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            stats_period_s: default_stats_period(),
        }
    }
}

impl GnbConfig {
    /// Load the configuration, YAML unless the file ends in `.toml`
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file {}", path.display()))?;
        let config = match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Self::from_toml_str(&contents)?,
            _ => Self::from_yaml_str(&contents)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_str(contents: &str) -> anyhow::Result<Self> {
        serde_yaml::from_str(contents).context("Invalid YAML configuration")
    }

    pub fn from_toml_str(contents: &str) -> anyhow::Result<Self> {
        toml::from_str(contents).context("Invalid TOML configuration")
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.cells.is_empty() {
            bail!("At least one cell must be configured");
        }
        let scs = self.cells[0].scs;
        for (i, cell) in self.cells.iter().enumerate() {
            if cell.cell_index != CellIndex(i as u8) {
                bail!("Cell {} must use cell_index {}", cell.cell_index, i);
            }
            Pci::new(cell.pci).ok_or_else(|| anyhow!("Invalid PCI: {}", cell.pci))?;
            if cell.scs != scs {
                bail!("All cells of the group must share the numerology");
            }
            cell.validate()
                .map_err(|e| anyhow!("Cell {}: {}", cell.cell_index, e))?;
        }
        if self.ue_profile.nof_ues as usize > common::types::MAX_NOF_DU_UES {
            bail!("nof_ues {} exceeds the DU limit", self.ue_profile.nof_ues);
        }
        if !(0.0..=1.0).contains(&self.emulator.success_rate) || !(0.0..=1.0).contains(&self.emulator.ul_arrival_rate) {
            bail!("Emulator rates must lie within [0, 1]");
        }
        Ok(())
    }

    /// PCell of the UE `ue_index`
    pub fn pcell_of(&self, ue_index: UeIndex) -> &CellConfiguration {
        &self.cells[ue_index.as_usize() % self.cells.len()]
    }
}
