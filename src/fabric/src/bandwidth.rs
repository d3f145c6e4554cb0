use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum BandwidthUnit {
    Kbps = 1000,
    Mbps = 1_000_000,
    Gbps = 1_000_000_000,
}

impl std::fmt::Display for BandwidthUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use BandwidthUnit::*;
        match self {
            Kbps => write!(f, "Kb/s"),
            Mbps => write!(f, "Mb/s"),
            Gbps => write!(f, "Gb/s"),
        }
    }
}

pub trait BandwidthTrait {
    fn kbps(self) -> Bandwidth;
    fn mbps(self) -> Bandwidth;
    fn gbps(self) -> Bandwidth;
}

/// Link capacity. `val` is always in bits per second, `unit` only affects display.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Bandwidth {
    val: u64,
    unit: BandwidthUnit,
}

impl Bandwidth {
    /// Bits per second.
    #[inline]
    pub fn val(&self) -> u64 {
        self.val
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.val == 0
    }

    /// Fraction of this capacity used by `bits` transmitted over `secs` seconds.
    ///
    /// `None` for a zero capacity or a non-positive interval.
    pub fn utilization(&self, bits: f64, secs: f64) -> Option<f64> {
        if self.is_zero() || secs <= 0. {
            return None;
        }
        Some(bits / secs / self.val as f64)
    }
}

impl std::fmt::Display for Bandwidth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {}",
            self.val as f64 / self.unit as u64 as f64,
            self.unit
        )
    }
}

impl std::cmp::PartialEq for Bandwidth {
    fn eq(&self, other: &Self) -> bool {
        self.val.eq(&other.val)
    }
}

impl Eq for Bandwidth {}

impl std::cmp::PartialOrd for Bandwidth {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl std::cmp::Ord for Bandwidth {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.val.cmp(&other.val)
    }
}

macro_rules! impl_bandwidth_trait_for {
    ($($ty:ty),+ $(,)?) => (
        $(impl BandwidthTrait for $ty
        {
            fn kbps(self) -> Bandwidth {
                let unit = BandwidthUnit::Kbps;
                Bandwidth {
                    val: (self as f64 * unit as u64 as f64) as u64,
                    unit,
                }
            }
            fn mbps(self) -> Bandwidth {
                let unit = BandwidthUnit::Mbps;
                Bandwidth {
                    val: (self as f64 * unit as u64 as f64) as u64,
                    unit,
                }
            }
            fn gbps(self) -> Bandwidth {
                let unit = BandwidthUnit::Gbps;
                Bandwidth {
                    val: (self as f64 * unit as u64 as f64) as u64,
                    unit,
                }
            }
        })+
    )
}

impl_bandwidth_trait_for!(u8, u16, u32, u64, i32, i64, f32, f64, usize);
