//! Albor Space 5G GNodeB MAC scheduler host
//!
//! Drives the MAC scheduler slot by slot for every configured cell, with a PHY emulator
//! closing the loop by feeding HARQ, CRC, SR, CSI and buffer state indications back.

mod config;
mod emulator;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use common::types::{CellIndex, SlotPoint, SubcarrierSpacing, UeIndex};
use common::utils::time::slot_duration_us;
use crossbeam_channel::{bounded, Receiver, Sender};
use scheduler::events::messages::{ConfigOutcome, UeConfigUpdateEvent};
use scheduler::{SchedEventRecord, Scheduler, SlotResult};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use config::GnbConfig;
use emulator::{PhyEmulator, SlotSummary};

/// Slot decisions buffered between the scheduler and the PHY emulator. Small enough for
/// the feedback to arrive within the HARQ feedback timeout when free-running.
const SLOT_QUEUE_SIZE: usize = 4;

/// Albor Space 5G GNodeB
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (YAML, or TOML with a .toml extension)
    #[arg(short, long, default_value = "gnb.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the configuration file
    #[arg(short, long)]
    log_level: Option<String>,

    /// Stop after this many slots
    #[arg(long)]
    slots: Option<u64>,

    /// Number of emulated UEs; overrides the configuration file
    #[arg(long)]
    ues: Option<u16>,

    /// Pace slots to the wall clock
    #[arg(long)]
    realtime: bool,

    /// PHY emulator RNG seed; overrides the configuration file
    #[arg(long)]
    seed: Option<u64>,
}

/// Grant counters shared with the statistics task
#[derive(Default)]
struct SlotStats {
    slots: AtomicU64,
    dl_grants: AtomicU64,
    ul_grants: AtomicU64,
    pucchs: AtomicU64,
    dl_bytes: AtomicU64,
    ul_bytes: AtomicU64,
}

impl SlotStats {
    fn record(&self, result: &SlotResult) {
        self.dl_grants.fetch_add(result.pdschs.len() as u64, Ordering::Relaxed);
        self.ul_grants.fetch_add(result.puschs.len() as u64, Ordering::Relaxed);
        self.pucchs.fetch_add(result.pucchs.len() as u64, Ordering::Relaxed);
        let dl_bytes: u64 = result.pdschs.iter().map(|p| p.tbs_bytes as u64).sum();
        let ul_bytes: u64 = result.puschs.iter().map(|p| p.tbs_bytes as u64).sum();
        self.dl_bytes.fetch_add(dl_bytes, Ordering::Relaxed);
        self.ul_bytes.fetch_add(ul_bytes, Ordering::Relaxed);
    }
}

struct SchedulerLoop {
    sched: Scheduler,
    cells: Vec<CellIndex>,
    scs: SubcarrierSpacing,
    slot_tx: Sender<SlotSummary>,
    running: Arc<AtomicBool>,
    stats: Arc<SlotStats>,
    max_slots: Option<u64>,
    realtime: bool,
}

impl SchedulerLoop {
    /// Run the cells slot after slot until stopped. Returns the number of slots run.
    fn run(mut self) -> Result<u64> {
        let slot_duration = Duration::from_micros(slot_duration_us(self.scs) as u64);
        let start = Instant::now();
        let mut sl = SlotPoint::new(self.scs, 0, 0);
        let mut nof_slots: u64 = 0;

        while self.running.load(Ordering::Relaxed) && self.max_slots.map_or(true, |max| nof_slots < max) {
            for &cell_index in &self.cells {
                let result = self
                    .sched
                    .run_slot(sl, cell_index)
                    .with_context(|| format!("Scheduler failed at slot {} of cell {}", sl, cell_index))?;
                self.stats.record(result);
                self.slot_tx
                    .send(SlotSummary { cell_index, result: result.clone() })
                    .map_err(|_| anyhow!("PHY emulator stopped"))?;
            }
            sl = sl + 1;
            nof_slots += 1;
            self.stats.slots.store(nof_slots, Ordering::Relaxed);

            if self.realtime {
                let deadline = start + slot_duration.saturating_mul(nof_slots as u32);
                let now = Instant::now();
                if deadline > now {
                    std::thread::sleep(deadline - now);
                } else if now - deadline > slot_duration {
                    debug!("slot={}: scheduler running {:?} late", sl, now - deadline);
                }
            }
        }

        let dropped = self.sched.nof_dropped_event_records();
        if dropped > 0 {
            warn!("{} scheduler event records dropped", dropped);
        }
        Ok(nof_slots)
    }
}

fn spawn_record_printer(records: Receiver<SchedEventRecord>) -> Result<std::thread::JoinHandle<()>> {
    let handle = std::thread::Builder::new()
        .name("sched-records".into())
        .spawn(move || {
            for record in records.iter() {
                match serde_json::to_string(&record) {
                    Ok(line) => debug!(target: "sched_events", "{}", line),
                    Err(e) => warn!("Failed to encode event record: {}", e),
                }
            }
        })?;
    Ok(handle)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut cfg = GnbConfig::from_file(&args.config)?;

    // Initialize logging
    let log_level = args.log_level.clone().unwrap_or_else(|| cfg.log.level.clone());
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_level));

    fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    if let Some(ues) = args.ues {
        cfg.ue_profile.nof_ues = ues;
    }
    if let Some(seed) = args.seed {
        cfg.emulator.seed = seed;
    }
    cfg.emulator.realtime |= args.realtime;
    cfg.validate()?;

    info!("Starting Albor Space 5G GNodeB");
    info!("Configuration file: {}", args.config.display());
    for cell in &cfg.cells {
        info!(
            "  Cell {}: PCI {}, {:?}, {} CRBs, {}",
            cell.cell_index,
            cell.pci,
            cell.scs,
            cell.nof_crbs,
            if cell.tdd.is_some() { "TDD" } else { "FDD" }
        );
    }
    info!(
        "  UEs: {}, emulator seed: {}, realtime: {}",
        cfg.ue_profile.nof_ues, cfg.emulator.seed, cfg.emulator.realtime
    );

    let (mut sched, records) = Scheduler::new(cfg.expert.clone());
    for cell in &cfg.cells {
        sched.add_cell(cell.clone())?;
    }
    let handle = sched.event_handle();

    // UEs enter the scheduler in the first slot
    let mut phy = PhyEmulator::new(cfg.emulator.clone(), handle.clone());
    for ue in 0..cfg.ue_profile.nof_ues {
        let ue_index = UeIndex(ue);
        let pcell = cfg.pcell_of(ue_index);
        let ue_cfg = cfg.ue_profile.ue_configuration(ue_index, pcell);
        let crnti = ue_cfg.crnti;
        phy.add_ue(ue_index, crnti, pcell.cell_index);

        let (ev, outcome) = UeConfigUpdateEvent::new(ue_cfg);
        handle.handle_ue_creation(ev);
        tokio::spawn(async move {
            match outcome.await {
                Ok(ConfigOutcome::Applied) => info!("ue={} rnti={}: UE created", ue_index, crnti),
                Ok(ConfigOutcome::Aborted) | Err(_) => warn!("ue={} rnti={}: UE creation aborted", ue_index, crnti),
            }
        });
    }

    let record_printer = spawn_record_printer(records)?;

    let (slot_tx, slot_rx) = bounded::<SlotSummary>(SLOT_QUEUE_SIZE);
    let phy_handle = std::thread::Builder::new()
        .name("phy-emulator".into())
        .spawn(move || {
            for summary in slot_rx.iter() {
                phy.handle_slot(&summary);
            }
            phy.stats()
        })?;

    let running = Arc::new(AtomicBool::new(true));
    let stats = Arc::new(SlotStats::default());
    let sched_loop = SchedulerLoop {
        sched,
        cells: cfg.cells.iter().map(|cell| cell.cell_index).collect(),
        scs: cfg.cells[0].scs,
        slot_tx,
        running: running.clone(),
        stats: stats.clone(),
        max_slots: args.slots,
        realtime: cfg.emulator.realtime,
    };
    let mut sched_handle = tokio::task::spawn_blocking(move || sched_loop.run());

    info!("GNodeB initialized successfully");

    // Start statistics reporting
    let stats_handle = (cfg.log.stats_period_s > 0).then(|| {
        let stats = stats.clone();
        let period = Duration::from_secs(cfg.log.stats_period_s);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                info!("Scheduler Statistics:");
                info!("  Slots: {}", stats.slots.load(Ordering::Relaxed));
                info!(
                    "  DL grants: {} ({} bytes), UL grants: {} ({} bytes), PUCCHs: {}",
                    stats.dl_grants.load(Ordering::Relaxed),
                    stats.dl_bytes.load(Ordering::Relaxed),
                    stats.ul_grants.load(Ordering::Relaxed),
                    stats.ul_bytes.load(Ordering::Relaxed),
                    stats.pucchs.load(Ordering::Relaxed)
                );
            }
        })
    });

    // Wait for shutdown signal or the end of the run
    let finished = tokio::select! {
        _ = tokio::signal::ctrl_c() => None,
        res = &mut sched_handle => Some(res),
    };
    let sched_result = match finished {
        Some(res) => res,
        None => {
            info!("Received shutdown signal");
            running.store(false, Ordering::Relaxed);
            sched_handle.await
        }
    };

    // Shutdown
    info!("Shutting down GNodeB");
    if let Some(stats_handle) = stats_handle {
        stats_handle.abort();
    }

    let nof_slots = match sched_result.context("Scheduler thread panicked")? {
        Ok(nof_slots) => nof_slots,
        Err(e) => {
            error!("Scheduler stopped: {:#}", e);
            return Err(e);
        }
    };

    let phy_stats = phy_handle
        .join()
        .map_err(|_| anyhow!("PHY emulator thread panicked"))?;
    record_printer
        .join()
        .map_err(|_| anyhow!("Event record thread panicked"))?;

    info!("Ran {} slots", nof_slots);
    info!(
        "  HARQ: {} ACK / {} NACK, CRC: {} OK / {} KO, SRs: {}, CSI reports: {}",
        phy_stats.harq_acks,
        phy_stats.harq_nacks,
        phy_stats.crc_ok,
        phy_stats.crc_ko,
        phy_stats.srs,
        phy_stats.csi_reports
    );
    info!("GNodeB shutdown complete");
    Ok(())
}
