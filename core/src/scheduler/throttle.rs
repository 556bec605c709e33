//! Tiered I/O throttling scheduler: paces background block I/O so that
//! latency-sensitive foreground I/O is not starved.
//!
//! Ties together the leaf modules:
//! - [`device`] — per-device throttle record, wait queues, refcounting.
//! - [`thread_state`] — per-thread throttle descriptor and I/O policy table.
//! - [`tunables`] — per-tier window/period knobs and the global enable flag.
//! - [`sched`] — the admission/update routines and the rethrottle handshake.
//!
//! The timer is modeled as a tick-polled deadline check (`throttle_timer_poll`)
//! hooked into `scheduler_timer_tick()`, the same site `sleep::wake_due_sleepers`
//! uses, since this kernel has no generic deferred-callback/timer-wheel
//! facility to attach a one-shot `thread_call` to (see DESIGN.md).

pub mod device;
pub mod sched;
pub mod thread_state;
pub mod tunables;
pub mod tests;

use alloc::vec::Vec;

use slopos_abi::io_throttle::{IO_THROTTLE_TIER_COUNT, IoThrottleTier};
use slopos_lib::clock;

pub use device::{
    DeviceHandle, DeviceThrottleInfo, acquire_by_mask, create, device_at_index,
    disable_throttle as disable, mount_rel, mount_ref, release, release_by_mask, update_by_mount,
};
pub use sched::{
    IoBufAttr, ThrottleVerdict, block_if_throttled, end_io, end_io_buf, io_will_be_throttled,
    rethrottle, reset_window, set_thread_policy, thread_tier, update_on_issue, will_be_throttled,
};
pub use thread_state::{set_user_idle_level, user_idle_level};
pub use tunables::{IoThrottleTunables, is_enabled, set_period_ms, set_window_ms};

/// The tier whose period governs the timer's minimum deadline floor, and
/// the lower bound of the poll's rotate-and-wake scan (named `THROTTLED` in
/// the original: the first throttleable tier, T1).
const THROTTLED_TIER: IoThrottleTier = IoThrottleTier::T1;

/// One-time, idempotent-safe init: load tunables, (re)initialize the static
/// device table, and clear per-thread throttle state. Safe to call again
/// (e.g. from test fixtures).
pub fn init() {
    init_with_tunables(None);
}

/// Same as [`init`], but with an optional tunables override — the
/// "overridable once at init from platform properties and boot arguments"
/// path, modeled here as a caller-supplied override since this kernel has
/// no numeric boot-argument parser for these knobs yet (see DESIGN.md).
pub fn init_with_tunables(overrides: Option<IoThrottleTunables>) {
    tunables::init_tunables(overrides);
    device::init_devices();
    thread_state::reset_all();
}

/// Global on/off override — not named `override` since that is a reserved
/// word in Rust.
pub fn set_enabled(enabled: bool) {
    tunables::set_enabled(enabled);
}

/// The timer callback. Invoked once per tick from
/// `scheduler_timer_tick()`, scanning every device the throttler knows
/// about for one whose deadline has elapsed. A no-op for devices whose
/// timer isn't armed or hasn't reached its deadline.
pub fn throttle_timer_poll() {
    for device in device::all_pollable_devices() {
        poll_one_device(&device);
    }
}

fn poll_one_device(device: &DeviceHandle) {
    let now = clock::uptime_ms();

    let armed_and_due = {
        let info = device.lock();
        info.timer_active && now >= info.timer_deadline
    };
    if !armed_and_due {
        return;
    }

    let mut woken: Vec<u32> = Vec::new();
    let mut update_count = false;

    {
        let mut info = device.lock();
        info.timer_active = false;

        let threshold = tunables::with_tunables(|t| info.period_ms(THROTTLED_TIER, t));
        let period_elapsed = now
            .saturating_sub(info.period_start_ts[THROTTLED_TIER.as_index()])
            >= threshold;

        if period_elapsed {
            if let Some((tier, task_id)) = rotate_and_pop(&mut info, now) {
                info.next_wake_tier = tier.next();
                woken.push(task_id);
                update_count = true;
            }
        }
    }

    // Rearm (or disarm) the timer; this also advances `period_num` and
    // `io_count_begin` when `update_count` is set, per `timer_start`.
    let throttling_tier = sched::timer_start(device, update_count, THROTTLED_TIER);

    // Every tier from THROTTLED_TIER up to (but excluding) `throttling_tier`
    // no longer requires blocking now that the throttled set has shrunk;
    // every waiter still queued there is obsolete and must be woken too.
    {
        let mut info = device.lock();
        let mut tier = THROTTLED_TIER;
        while tier < throttling_tier {
            info.wait_queue[tier.as_index()].drain_all(|task_id| woken.push(task_id));
            tier = tier.next();
        }
    }

    for task_id in &woken {
        thread_state::set_on_list_tier(*task_id, IoThrottleTier::None);
    }
    for task_id in woken {
        sched::wake_task(task_id);
    }

    let should_release = {
        let mut info = device.lock();
        if !info.timer_active && info.timer_ref {
            info.timer_ref = false;
            true
        } else {
            false
        }
    };
    if should_release {
        device::unregister_armed(device);
    }
}

/// Scan tiers `THROTTLED_TIER..End`, starting at `next_wake_tier` and
/// wrapping, for the first non-empty queue whose period has elapsed;
/// dequeue and return its head waiter. `next_wake_tier` is the
/// round-robin cursor that keeps the timer from always favoring the
/// same tier when several have expired at once.
fn rotate_and_pop(info: &mut DeviceThrottleInfo, now: u64) -> Option<(IoThrottleTier, u32)> {
    let mut tier = info.next_wake_tier;
    if tier < THROTTLED_TIER || tier >= IoThrottleTier::End {
        tier = THROTTLED_TIER;
    }

    for _ in 0..IO_THROTTLE_TIER_COUNT {
        if !info.wait_queue[tier.as_index()].is_empty() {
            let period = tunables::with_tunables(|t| info.period_ms(tier, t));
            if now.saturating_sub(info.period_start_ts[tier.as_index()]) >= period {
                if let Some(task_id) = info.wait_queue[tier.as_index()].pop_head() {
                    return Some((tier, task_id));
                }
            }
        }
        tier = tier.next();
        if tier >= IoThrottleTier::End {
            tier = THROTTLED_TIER;
        }
    }
    None
}
