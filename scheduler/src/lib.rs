//! 5G NR MAC Scheduler Library
//!
//! This crate implements the per-slot scheduling core of the gNodeB MAC layer: the
//! time-frequency resource grid, the PDCCH and PUCCH allocators and the event manager
//! that funnels asynchronous PHY/RLC/RRC indications into the slot decision pass.

pub mod cell_scheduler;
pub mod config;
pub mod events;
pub mod pdcch;
pub mod pucch;
pub mod resource_grid;
pub mod result;
pub mod srb0_scheduler;
pub mod uci_scheduler;
pub mod ue;
pub mod ue_scheduler;

#[cfg(test)]
pub(crate) mod test_helpers;

use common::types::{CellIndex, SlotPoint};
use thiserror::Error;

pub use cell_scheduler::Scheduler;
pub use config::{CellConfiguration, SchedulerExpertConfig, UeConfiguration};
pub use events::{SchedEventLogger, SchedEventRecord, UeEventHandle};
pub use resource_grid::CellResourceAllocator;
pub use result::SlotResult;

/// Number of slots tracked ahead of the current slot by every per-slot ring
pub const RING_ALLOCATOR_SIZE: usize = 20;

/// Errors surfaced by the scheduler
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchedError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The slot driver skipped or repeated a slot. Not recoverable.
    #[error("Slot ordering violation: expected {expected}, received {received}")]
    OrderingViolation {
        expected: SlotPoint,
        received: SlotPoint,
    },

    #[error("Slot {slot} outside of the allocation window starting at {last}")]
    SlotOutOfWindow { slot: SlotPoint, last: SlotPoint },

    #[error("Slot {0} accessed before the first slot indication")]
    NotStarted(SlotPoint),

    #[error("Unknown cell index {0}")]
    UnknownCell(CellIndex),

    #[error("Cell index {0} already configured")]
    CellAlreadyExists(CellIndex),
}
