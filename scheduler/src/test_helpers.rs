//! Shared test fixtures

use crate::config::*;
use common::types::{CellIndex, Lcg, Lcid, Rnti, SubcarrierSpacing, UeIndex};

/// 52 CRB, 30 kHz FDD cell with one 8-CCE CORESET
pub fn cell_config(cell_index: CellIndex) -> CellConfiguration {
    CellConfiguration {
        cell_index,
        pci: 1,
        scs: SubcarrierSpacing::Scs30,
        nof_crbs: 52,
        nof_symbols: 14,
        tdd: None,
        coresets: vec![CoresetConfig {
            id: 0,
            start_crb: 0,
            nof_rbs: 24,
            start_symbol: 0,
            duration: 2,
        }],
        search_spaces: vec![
            SearchSpaceConfig {
                id: 1,
                coreset_id: 0,
                ss_type: SearchSpaceType::Common,
                candidates: CceCandidates {
                    al4: vec![0, 4],
                    al8: vec![0],
                    ..Default::default()
                },
            },
            SearchSpaceConfig {
                id: 2,
                coreset_id: 0,
                ss_type: SearchSpaceType::UeSpecific,
                candidates: CceCandidates {
                    al1: (0..8).collect(),
                    al2: vec![0, 2, 4, 6],
                    al4: vec![0, 4],
                    al8: vec![0],
                    ..Default::default()
                },
            },
        ],
        common_ss_id: 1,
        pucch_resource_common: 11,
        k1_candidates: vec![4, 5, 6, 7],
        k2: 4,
        pdsch_start_symbol: 2,
        pdsch_td_alloc_list: Vec::new(),
    }
}

fn f1_resource(res_id: u8, prb: u32, cs: u8, occ: u8) -> PucchResource {
    PucchResource {
        res_id,
        starting_prb: prb,
        second_hop_prb: Some(51 - prb),
        params: PucchFormatParams::Format1 {
            initial_cyclic_shift: cs,
            time_domain_occ: occ,
            starting_symbol: 0,
            nof_symbols: 14,
        },
    }
}

fn f2_resource(res_id: u8, prb: u32, nof_prbs: u32) -> PucchResource {
    PucchResource {
        res_id,
        starting_prb: prb,
        second_hop_prb: None,
        params: PucchFormatParams::Format2 {
            nof_prbs,
            starting_symbol: 12,
            nof_symbols: 2,
        },
    }
}

/// Dedicated PUCCH configuration: HARQ set 0 = {0, 1, 2} (F1), set 1 = {4, 5} (F2, 2 PRBs),
/// CSI resource 6 (F2, 1 PRB) and a per-UE SR resource.
pub fn pucch_config(ue_index: UeIndex) -> PucchConfig {
    let sr_res_id = 8 + (ue_index.0 % 8) as u8;
    let sr_cs = ((ue_index.0 % 4) * 3) as u8;
    let sr_occ = ((ue_index.0 / 4) % 2) as u8;
    PucchConfig {
        resources: vec![
            f1_resource(0, 1, 0, 0),
            f1_resource(1, 1, 4, 0),
            f1_resource(2, 1, 8, 0),
            f2_resource(4, 3, 2),
            f2_resource(5, 8, 2),
            f2_resource(6, 6, 1),
            f1_resource(sr_res_id, 2, sr_cs, sr_occ),
        ],
        harq_set0: vec![0, 1, 2],
        harq_set1: vec![4, 5],
        sr_resource: sr_res_id,
        csi_resource: Some(6),
        f2_max_code_rate: MaxCodeRate::Dot35,
    }
}

pub fn ue_config(ue_index: UeIndex, crnti: Rnti, pcell: CellIndex) -> UeConfiguration {
    UeConfiguration {
        ue_index,
        crnti,
        cells: vec![UeCellConfiguration {
            cell_index: pcell,
            ss_id: 2,
            pucch: Some(pucch_config(ue_index)),
            sr: Some(SrConfig { period_slots: 10, offset: 0 }),
            csi: Some(CsiReportConfig { period_slots: 20, offset: 5, part1_bits: 4 }),
        }],
        logical_channels: vec![
            LogicalChannelConfig { lcid: Lcid::SRB1, lcg: Lcg(0), priority: 1 },
            LogicalChannelConfig { lcid: Lcid(4), lcg: Lcg(1), priority: 8 },
        ],
    }
}
