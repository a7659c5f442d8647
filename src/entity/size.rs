use std::fmt;
use std::iter::Sum;
use std::ops::{
    Add,
    AddAssign,
    Mul,
    Sub,
    SubAssign,
};
use std::str::FromStr;

use humanize_rs::bytes;
use serde::{
    Deserialize,
    Deserializer,
    Serialize,
    Serializer,
};

use crate::errors::PlanError;

/// Byte count used for all size arithmetic in the planner.
///
/// Arithmetic saturates, so the `unlimited` sentinel (all ones) absorbs
/// additions instead of wrapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct DiskSize(u64);

impl DiskSize {
    pub const fn new(bytes: u64) -> Self {
        DiskSize(bytes)
    }

    pub const fn zero() -> Self {
        DiskSize(0)
    }

    // Open-ended maximum, e.g. "grow as much as you can"
    pub const fn unlimited() -> Self {
        DiskSize(u64::MAX)
    }

    pub const fn kib(n: u64) -> Self {
        DiskSize(n << 10)
    }

    pub const fn mib(n: u64) -> Self {
        DiskSize(n << 20)
    }

    pub const fn gib(n: u64) -> Self {
        DiskSize(n << 30)
    }

    pub const fn bytes(&self) -> u64 {
        self.0
    }

    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub const fn is_unlimited(&self) -> bool {
        self.0 == u64::MAX
    }

    /// Round up to the next multiple of `grain`
    pub fn ceil_align(&self, grain: DiskSize) -> Self {
        if grain.is_zero() || self.is_unlimited() {
            return *self;
        }

        DiskSize(self.0.div_ceil(grain.0).saturating_mul(grain.0))
    }

    /// Round down to a multiple of `grain`
    pub fn floor_align(&self, grain: DiskSize) -> Self {
        if grain.is_zero() || self.is_unlimited() {
            return *self;
        }

        DiskSize((self.0 / grain.0) * grain.0)
    }

    pub fn saturating_sub(&self, other: DiskSize) -> Self {
        DiskSize(self.0.saturating_sub(other.0))
    }

    /// Parses human byte strings such as "40 GiB", "512M", or "unlimited";
    /// a bare number is a byte count
    pub fn parse(s: &str) -> Result<Self, PlanError> {
        let lower = s.trim().to_lowercase();
        if lower == "unlimited" || lower == "max" {
            return Ok(Self::unlimited());
        }
        if let Ok(bytes) = lower.parse::<u64>() {
            return Ok(DiskSize(bytes));
        }

        lower
            .parse::<bytes::Bytes>()
            .map(|b| DiskSize(b.size() as u64))
            .map_err(|err| {
                PlanError::BadScenario(format!("bad byte unit string {s}: {err}"))
            })
    }
}

impl Add for DiskSize {
    type Output = DiskSize;

    fn add(self, rhs: DiskSize) -> DiskSize {
        DiskSize(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign for DiskSize {
    fn add_assign(&mut self, rhs: DiskSize) {
        self.0 = self.0.saturating_add(rhs.0);
    }
}

impl Sub for DiskSize {
    type Output = DiskSize;

    fn sub(self, rhs: DiskSize) -> DiskSize {
        DiskSize(self.0.saturating_sub(rhs.0))
    }
}

impl SubAssign for DiskSize {
    fn sub_assign(&mut self, rhs: DiskSize) {
        self.0 = self.0.saturating_sub(rhs.0);
    }
}

impl Mul<u64> for DiskSize {
    type Output = DiskSize;

    fn mul(self, rhs: u64) -> DiskSize {
        DiskSize(self.0.saturating_mul(rhs))
    }
}

impl Sum for DiskSize {
    fn sum<I: Iterator<Item = DiskSize>>(iter: I) -> DiskSize {
        iter.fold(DiskSize::zero(), |acc, s| acc + s)
    }
}

impl fmt::Display for DiskSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unlimited() {
            return write!(f, "unlimited");
        }

        const UNITS: [(u64, &str); 4] = [
            (1 << 40, "TiB"),
            (1 << 30, "GiB"),
            (1 << 20, "MiB"),
            (1 << 10, "KiB"),
        ];

        for (unit, name) in UNITS {
            if self.0 < unit {
                continue;
            }

            return if self.0 % unit == 0 {
                write!(f, "{} {name}", self.0 / unit)
            } else {
                write!(f, "{:.2} {name}", self.0 as f64 / unit as f64)
            };
        }

        write!(f, "{} B", self.0)
    }
}

impl FromStr for DiskSize {
    type Err = PlanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for DiskSize {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for DiskSize {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        DiskSize::parse(&s).map_err(serde::de::Error::custom)
    }
}
