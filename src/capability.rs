//! Hardware capability levels used to pick a scoring backend.
//!
//! The dispatcher never probes the CPU itself. It consumes a [`CapabilityReport`]
//! (three booleans, as a CPU-info prober would produce them) or the
//! [`CapabilityLevel`] derived from it. The levels form a small dense ordinal set:
//!
//! | Level | Ordinal | Wide-vector support |
//! |-------|---------|---------------------|
//! | [`CapabilityLevel::Baseline`] | 0 | SSE-class, 128-bit |
//! | [`CapabilityLevel::Avx`] | 1 | 256-bit float, no FMA |
//! | [`CapabilityLevel::Avx2`] | 2 | 256-bit with integer widening and FMA |
//! | [`CapabilityLevel::Avx512`] | 3 | 512-bit (AVX-512F) |
//!
//! A level implies every level below it, so a report that claims AVX2 without
//! AVX is treated as baseline.
//!
//! The process-wide level is computed once ([`process_capability_level`]) and is
//! immutable afterwards. Setting `MULTIDOT_MAX_LEVEL` caps it, which is how a
//! wide backend is disabled on a machine that supports it.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// Environment variable that caps the detected capability level.
pub const MAX_LEVEL_ENV: &str = "MULTIDOT_MAX_LEVEL";

/// Ordered classification of available wide-vector support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum CapabilityLevel {
    Baseline = 0,
    Avx = 1,
    Avx2 = 2,
    Avx512 = 3,
}

impl CapabilityLevel {
    /// Every level in ascending order.
    pub const ALL: [CapabilityLevel; 4] = [
        CapabilityLevel::Baseline,
        CapabilityLevel::Avx,
        CapabilityLevel::Avx2,
        CapabilityLevel::Avx512,
    ];

    pub const fn ordinal(self) -> usize {
        self as usize
    }

    pub const fn from_ordinal(ordinal: usize) -> Option<Self> {
        match ordinal {
            0 => Some(CapabilityLevel::Baseline),
            1 => Some(CapabilityLevel::Avx),
            2 => Some(CapabilityLevel::Avx2),
            3 => Some(CapabilityLevel::Avx512),
            _ => None,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            CapabilityLevel::Baseline => "baseline",
            CapabilityLevel::Avx => "avx",
            CapabilityLevel::Avx2 => "avx2",
            CapabilityLevel::Avx512 => "avx512",
        }
    }
}

impl fmt::Display for CapabilityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error returned when a capability level name is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown capability level `{0}` (expected baseline, avx, avx2 or avx512)")]
pub struct ParseLevelError(String);

impl FromStr for CapabilityLevel {
    type Err = ParseLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        match lower.as_str() {
            "baseline" | "sse" | "sse4" | "scalar" => Ok(CapabilityLevel::Baseline),
            "avx" => Ok(CapabilityLevel::Avx),
            "avx2" => Ok(CapabilityLevel::Avx2),
            "avx512" | "avx-512" | "avx512f" => Ok(CapabilityLevel::Avx512),
            _ => Err(ParseLevelError(s.to_string())),
        }
    }
}

/// Raw capability flags as reported by a CPU prober.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct CapabilityReport {
    pub avx: bool,
    /// AVX2 together with FMA.
    pub avx2: bool,
    pub avx512: bool,
}

impl CapabilityReport {
    /// A report with no wide-vector support.
    pub const fn baseline() -> Self {
        Self {
            avx: false,
            avx2: false,
            avx512: false,
        }
    }

    /// The normalized report for `level`: every flag up to and including it is set.
    pub const fn for_level(level: CapabilityLevel) -> Self {
        let ordinal = level.ordinal();
        Self {
            avx: ordinal >= 1,
            avx2: ordinal >= 2,
            avx512: ordinal >= 3,
        }
    }

    /// Probes the running CPU.
    pub fn detect() -> Self {
        #[cfg(target_arch = "x86_64")]
        {
            Self {
                avx: std::arch::is_x86_feature_detected!("avx"),
                avx2: std::arch::is_x86_feature_detected!("avx2")
                    && std::arch::is_x86_feature_detected!("fma"),
                avx512: std::arch::is_x86_feature_detected!("avx512f"),
            }
        }

        #[cfg(not(target_arch = "x86_64"))]
        {
            Self::baseline()
        }
    }

    /// Highest level whose flag and every lower flag are set.
    pub const fn level(self) -> CapabilityLevel {
        if !self.avx {
            CapabilityLevel::Baseline
        } else if !self.avx2 {
            CapabilityLevel::Avx
        } else if !self.avx512 {
            CapabilityLevel::Avx2
        } else {
            CapabilityLevel::Avx512
        }
    }

    /// Drops flags that are not backed by every lower level.
    pub const fn normalized(self) -> Self {
        Self::for_level(self.level())
    }

    /// The same report with its level lowered to at most `max`.
    pub fn capped(self, max: CapabilityLevel) -> Self {
        Self::for_level(self.level().min(max))
    }

    /// Dense ordinal used by the jump-table policy (`avx + avx2 + avx512` once normalized).
    pub const fn jump_index(self) -> usize {
        self.level().ordinal()
    }

    pub const fn baseline_only(self) -> bool {
        matches!(self.level(), CapabilityLevel::Baseline)
    }

    pub const fn avx_only(self) -> bool {
        matches!(self.level(), CapabilityLevel::Avx)
    }

    pub const fn avx2_only(self) -> bool {
        matches!(self.level(), CapabilityLevel::Avx2)
    }
}

impl From<CapabilityLevel> for CapabilityReport {
    fn from(level: CapabilityLevel) -> Self {
        Self::for_level(level)
    }
}

/// Probes the running CPU and returns its capability level.
///
/// Every call probes again; use [`process_capability_level`] for the cached value.
pub fn detect_capability_level() -> CapabilityLevel {
    CapabilityReport::detect().level()
}

/// The capability level of this process, computed on first use.
///
/// Honors the `MULTIDOT_MAX_LEVEL` cap. The value never changes afterwards, so it
/// is safe to read from any thread.
pub fn process_capability_level() -> CapabilityLevel {
    static LEVEL: OnceLock<CapabilityLevel> = OnceLock::new();
    *LEVEL.get_or_init(|| {
        let detected = detect_capability_level();
        let cap = level_cap();
        let level = cap.map_or(detected, |cap| detected.min(cap));
        tracing::info!(
            detected = %detected,
            cap = ?cap.map(CapabilityLevel::name),
            level = %level,
            "capability level resolved"
        );
        level
    })
}

/// Normalized report for [`process_capability_level`].
pub fn process_capability_report() -> CapabilityReport {
    CapabilityReport::for_level(process_capability_level())
}

fn level_cap() -> Option<CapabilityLevel> {
    let raw = std::env::var(MAX_LEVEL_ENV).ok()?;
    match raw.parse() {
        Ok(level) => Some(level),
        Err(err) => {
            tracing::warn!(%err, env = MAX_LEVEL_ENV, "ignoring capability cap");
            None
        }
    }
}
