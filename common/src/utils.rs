//! Common Utilities
//!
//! Provides interval helpers and timing utilities used across the scheduler

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::SubcarrierSpacing;

/// Half-open interval `[start, stop)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Interval {
    pub start: u32,
    pub stop: u32,
}

impl Interval {
    pub fn new(start: u32, stop: u32) -> Self {
        debug_assert!(start <= stop, "Invalid interval [{}, {})", start, stop);
        Self { start, stop }
    }

    /// Interval of `length` units beginning at `start`
    pub fn with_length(start: u32, length: u32) -> Self {
        Self::new(start, start + length)
    }

    pub fn length(&self) -> u32 {
        self.stop - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.stop
    }

    pub fn contains(&self, value: u32) -> bool {
        value >= self.start && value < self.stop
    }

    pub fn overlaps(&self, other: &Interval) -> bool {
        self.start < other.stop && other.start < self.stop
    }

    pub fn iter(&self) -> std::ops::Range<u32> {
        self.start..self.stop
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.stop)
    }
}

/// Time utilities for slot/frame calculations
pub mod time {
    use super::SubcarrierSpacing;

    /// Slot duration in microseconds
    pub fn slot_duration_us(scs: SubcarrierSpacing) -> u32 {
        match scs {
            SubcarrierSpacing::Scs15 => 1000,
            SubcarrierSpacing::Scs30 => 500,
            SubcarrierSpacing::Scs60 => 250,
            SubcarrierSpacing::Scs120 => 125,
            SubcarrierSpacing::Scs240 => 62, // 62.5 us, truncated
        }
    }
}
