//! Per-tier tunable windows and periods, plus the global enable flag.
//!
//! Mirrors the "sysctl-like numeric interface" the original exposes: six
//! per-tier knobs for windows and periods, a rotational/SSD period table
//! selector, and one global enable flag, all readable and writable at
//! runtime.

use core::sync::atomic::{AtomicBool, Ordering};

use slopos_abi::io_throttle::{IO_THROTTLE_TIER_COUNT, IoThrottleTier};
use slopos_lib::IrqMutex;

/// Window and period tunables for one tier set. Indices follow
/// `IoThrottleTier::as_index()`; entries for `None`/`Start`/`T0`/`End` are
/// always zero and unused.
#[derive(Clone, Copy)]
pub struct IoThrottleTunables {
    pub window_ms: [u64; IO_THROTTLE_TIER_COUNT],
    pub period_ms_hdd: [u64; IO_THROTTLE_TIER_COUNT],
    pub period_ms_ssd: [u64; IO_THROTTLE_TIER_COUNT],
}

impl IoThrottleTunables {
    pub const fn defaults() -> Self {
        let mut window_ms = [0u64; IO_THROTTLE_TIER_COUNT];
        let mut period_ms_hdd = [0u64; IO_THROTTLE_TIER_COUNT];
        let mut period_ms_ssd = [0u64; IO_THROTTLE_TIER_COUNT];

        window_ms[IoThrottleTier::T1.as_index()] = 25;
        window_ms[IoThrottleTier::T2.as_index()] = 100;
        window_ms[IoThrottleTier::T3.as_index()] = 500;

        period_ms_hdd[IoThrottleTier::T1.as_index()] = 40;
        period_ms_hdd[IoThrottleTier::T2.as_index()] = 85;
        period_ms_hdd[IoThrottleTier::T3.as_index()] = 200;

        period_ms_ssd[IoThrottleTier::T1.as_index()] = 5;
        period_ms_ssd[IoThrottleTier::T2.as_index()] = 15;
        period_ms_ssd[IoThrottleTier::T3.as_index()] = 25;

        Self {
            window_ms,
            period_ms_hdd,
            period_ms_ssd,
        }
    }

    pub fn window_ms(&self, tier: IoThrottleTier) -> u64 {
        self.window_ms[tier.as_index()]
    }

    /// Period table for the given media type. `fusion_forces_hdd` models
    /// `fusion_with_priority`, which forces the HDD table even on SSD media.
    pub fn period_ms(&self, tier: IoThrottleTier, is_ssd: bool, fusion_forces_hdd: bool) -> u64 {
        if is_ssd && !fusion_forces_hdd {
            self.period_ms_ssd[tier.as_index()]
        } else {
            self.period_ms_hdd[tier.as_index()]
        }
    }
}

impl Default for IoThrottleTunables {
    fn default() -> Self {
        Self::defaults()
    }
}

static TUNABLES: IrqMutex<IoThrottleTunables> = IrqMutex::new(IoThrottleTunables::defaults());
static THROTTLE_ENABLED: AtomicBool = AtomicBool::new(true);

/// Returns the table to use for period lookups given the device's media
/// type and fusion mode; kept for call sites that want the whole table
/// rather than a single tier's value.
pub fn period_table_for(is_ssd_effective: bool, tunables: &IoThrottleTunables) -> [u64; IO_THROTTLE_TIER_COUNT] {
    if is_ssd_effective {
        tunables.period_ms_ssd
    } else {
        tunables.period_ms_hdd
    }
}

/// Load tunables, optionally overridden once at init (the analogue of
/// "platform properties and boot arguments" for a kernel with no numeric
/// boot-argument parser for these knobs yet).
pub fn init_tunables(overrides: Option<IoThrottleTunables>) {
    let mut t = TUNABLES.lock();
    *t = overrides.unwrap_or_else(IoThrottleTunables::defaults);
    THROTTLE_ENABLED.store(true, Ordering::Release);
}

pub fn with_tunables<R>(f: impl FnOnce(&IoThrottleTunables) -> R) -> R {
    f(&TUNABLES.lock())
}

pub fn set_window_ms(tier: IoThrottleTier, value_ms: u64) {
    TUNABLES.lock().window_ms[tier.as_index()] = value_ms;
}

pub fn set_period_ms(tier: IoThrottleTier, is_ssd: bool, value_ms: u64) {
    let mut t = TUNABLES.lock();
    if is_ssd {
        t.period_ms_ssd[tier.as_index()] = value_ms;
    } else {
        t.period_ms_hdd[tier.as_index()] = value_ms;
    }
}

/// Global on/off override.
pub fn set_enabled(enabled: bool) {
    THROTTLE_ENABLED.store(enabled, Ordering::Release);
}

pub fn is_enabled() -> bool {
    THROTTLE_ENABLED.load(Ordering::Acquire)
}
