//! Common Types for the 5G MAC scheduler
//!
//! Defines identifiers and slot arithmetic used throughout the scheduler

use serde::{Deserialize, Serialize};
use num_derive::{FromPrimitive, ToPrimitive};
use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, AddAssign, Sub};

/// Maximum number of UEs handled by one DU
pub const MAX_NOF_DU_UES: usize = 1024;

/// Maximum number of cells handled by one DU
pub const MAX_NOF_DU_CELLS: usize = 16;

/// Number of LCIDs that can carry radio bearers (SRB0..SRB3 plus DRBs, 0..=32)
pub const MAX_NOF_RB_LCIDS: usize = 33;

/// Number of logical channel groups
pub const MAX_NOF_LCGS: usize = 8;

/// Number of HARQ processes per carrier and direction
pub const MAX_NOF_HARQS: usize = 8;

/// Radio Network Temporary Identifier (RNTI)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Rnti(pub u16);

impl Rnti {
    /// System information RNTI
    pub const SI: Self = Self(0xFFFF);

    /// Create a new RNTI
    pub fn new(value: u16) -> Self {
        Self(value)
    }

    /// Get the RNTI value
    pub fn value(&self) -> u16 {
        self.0
    }
}

impl fmt::Display for Rnti {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

/// DU-local UE index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UeIndex(pub u16);

impl UeIndex {
    /// Create a new UE index if it is within the DU limits
    pub fn new(value: u16) -> Option<Self> {
        if (value as usize) < MAX_NOF_DU_UES {
            Some(Self(value))
        } else {
            None
        }
    }

    pub fn as_usize(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for UeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// DU-local cell index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellIndex(pub u8);

impl CellIndex {
    pub fn as_usize(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for CellIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Physical Cell Identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pci(pub u16);

impl Pci {
    /// Maximum valid PCI value (0-1007)
    pub const MAX: u16 = 1007;

    /// Create a new PCI with validation
    pub fn new(value: u16) -> Option<Self> {
        if value <= Self::MAX {
            Some(Self(value))
        } else {
            None
        }
    }
}

/// Logical channel identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Lcid(pub u8);

impl Lcid {
    /// SRB0, used before the UE dedicated configuration exists
    pub const SRB0: Self = Self(0);
    /// SRB1
    pub const SRB1: Self = Self(1);

    /// Create a new LCID if it can carry a radio bearer
    pub fn new(value: u8) -> Option<Self> {
        if (value as usize) < MAX_NOF_RB_LCIDS {
            Some(Self(value))
        } else {
            None
        }
    }

    pub fn as_usize(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Lcid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Logical channel group identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Lcg(pub u8);

impl Lcg {
    pub fn new(value: u8) -> Option<Self> {
        if (value as usize) < MAX_NOF_LCGS {
            Some(Self(value))
        } else {
            None
        }
    }
}

/// HARQ process identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HarqId(pub u8);

/// Subcarrier spacing values in kHz
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive, ToPrimitive, Serialize, Deserialize)]
pub enum SubcarrierSpacing {
    /// 15 kHz
    Scs15 = 15,
    /// 30 kHz
    Scs30 = 30,
    /// 60 kHz
    Scs60 = 60,
    /// 120 kHz
    Scs120 = 120,
    /// 240 kHz
    Scs240 = 240,
}

impl SubcarrierSpacing {
    /// Numerology index (mu)
    pub fn numerology(&self) -> u8 {
        match self {
            SubcarrierSpacing::Scs15 => 0,
            SubcarrierSpacing::Scs30 => 1,
            SubcarrierSpacing::Scs60 => 2,
            SubcarrierSpacing::Scs120 => 3,
            SubcarrierSpacing::Scs240 => 4,
        }
    }

    /// Build from kHz value
    pub fn from_khz(khz: u32) -> Option<Self> {
        num_traits::FromPrimitive::from_u32(khz)
    }

    /// Number of slots per 1 ms subframe
    pub fn slots_per_subframe(&self) -> u32 {
        1 << self.numerology()
    }

    /// Number of slots per 10 ms frame
    pub fn slots_per_frame(&self) -> u32 {
        10 * self.slots_per_subframe()
    }
}

/// Number of system frames before the SFN wraps around
pub const NOF_SFNS: u32 = 1024;

/// Slot point: numerology-aware slot counter with SFN wrap-around
///
/// Comparisons are made on the wrapped signed distance, so slots up to half the SFN
/// period apart compare correctly across the wrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotPoint {
    numerology: u8,
    count: u32,
}

impl SlotPoint {
    /// Create a slot point from SFN and slot index within the frame
    pub fn new(scs: SubcarrierSpacing, sfn: u32, slot_index: u32) -> Self {
        let spf = scs.slots_per_frame();
        let period = NOF_SFNS * spf;
        Self {
            numerology: scs.numerology(),
            count: (sfn * spf + slot_index % spf) % period,
        }
    }

    /// Create a slot point from an absolute slot count
    pub fn from_count(scs: SubcarrierSpacing, count: u32) -> Self {
        let period = NOF_SFNS * scs.slots_per_frame();
        Self {
            numerology: scs.numerology(),
            count: count % period,
        }
    }

    pub fn numerology(&self) -> u8 {
        self.numerology
    }

    fn slots_per_frame(&self) -> u32 {
        10 << self.numerology
    }

    fn period(&self) -> u32 {
        NOF_SFNS * self.slots_per_frame()
    }

    /// System frame number
    pub fn sfn(&self) -> u32 {
        self.count / self.slots_per_frame()
    }

    /// Slot index within the frame
    pub fn slot_index(&self) -> u32 {
        self.count % self.slots_per_frame()
    }

    /// Absolute slot count within the SFN period
    pub fn to_uint(&self) -> u32 {
        self.count
    }
}

impl Add<u32> for SlotPoint {
    type Output = SlotPoint;

    fn add(self, rhs: u32) -> SlotPoint {
        let period = self.period();
        SlotPoint {
            numerology: self.numerology,
            count: ((self.count as u64 + rhs as u64) % period as u64) as u32,
        }
    }
}

impl AddAssign<u32> for SlotPoint {
    fn add_assign(&mut self, rhs: u32) {
        *self = *self + rhs;
    }
}

impl Sub<u32> for SlotPoint {
    type Output = SlotPoint;

    fn sub(self, rhs: u32) -> SlotPoint {
        let period = self.period();
        SlotPoint {
            numerology: self.numerology,
            count: (self.count + period - rhs % period) % period,
        }
    }
}

impl Sub<SlotPoint> for SlotPoint {
    type Output = i32;

    /// Wrapped signed distance in slots
    fn sub(self, rhs: SlotPoint) -> i32 {
        debug_assert_eq!(self.numerology, rhs.numerology, "Comparing slots of different numerologies");
        let period = self.period() as i64;
        let mut diff = (self.count as i64 - rhs.count as i64).rem_euclid(period);
        if diff >= period / 2 {
            diff -= period;
        }
        diff as i32
    }
}

impl PartialOrd for SlotPoint {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self.numerology != other.numerology {
            return None;
        }
        Some((*self - *other).cmp(&0))
    }
}

impl fmt::Display for SlotPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.sfn(), self.slot_index())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pci_validation() {
        assert!(Pci::new(0).is_some());
        assert!(Pci::new(1007).is_some());
        assert!(Pci::new(1008).is_none());
    }

    #[test]
    fn test_identifier_bounds() {
        assert!(UeIndex::new(1023).is_some());
        assert!(UeIndex::new(1024).is_none());
        assert!(Lcid::new(32).is_some());
        assert!(Lcid::new(33).is_none());
        assert!(Lcg::new(8).is_none());
    }

    #[test]
    fn test_scs_from_khz() {
        assert_eq!(SubcarrierSpacing::from_khz(30), Some(SubcarrierSpacing::Scs30));
        assert_eq!(SubcarrierSpacing::from_khz(45), None);
        assert_eq!(SubcarrierSpacing::Scs30.slots_per_frame(), 20);
    }

    #[test]
    fn test_slot_point_wraps_around_sfn() {
        let last = SlotPoint::new(SubcarrierSpacing::Scs15, 1023, 9);
        let next = last + 1;
        assert_eq!(next.sfn(), 0);
        assert_eq!(next.slot_index(), 0);
        assert_eq!(next - last, 1);
        assert_eq!(last - next, -1);
        assert!(next > last);
        assert_eq!(next - 1, last);
    }

    #[test]
    fn test_slot_point_display() {
        let sl = SlotPoint::new(SubcarrierSpacing::Scs30, 5, 13);
        assert_eq!(sl.to_string(), "5.13");
        assert_eq!(sl.to_uint(), 5 * 20 + 13);
    }
}
