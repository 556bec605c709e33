//! Admission/update routines: `update_on_issue`, `end_io`,
//! `block_if_throttled`, the wait-queue/timer-arming helpers, and the
//! rethrottle entry point. This is the part of the subsystem the original
//! spends most of its weight on.

use slopos_abi::io_throttle::{IoThrottlePolicy, IoThrottleTier};
use slopos_abi::task::{BlockReason, INVALID_PROCESS_ID};
use slopos_lib::{clock, klog_debug, klog_trace};

use super::device::{self, DeviceHandle};
use super::thread_state;
use super::tunables::{self, IoThrottleTunables};
use crate::scheduler::scheduler::{scheduler_get_current_task, schedule, unschedule_task};
use crate::scheduler::task::{task_find_by_id, task_set_state_with_reason, TaskStatus};

/// The tier whose period governs the "deepest" timer deadline — T1, the
/// first throttleable tier (named `THROTTLED` in the original).
const THROTTLED_TIER: IoThrottleTier = IoThrottleTier::T1;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThrottleVerdict {
    Disengaged,
    Engaged,
    Now,
}

fn pid_of(task_id: u32) -> u32 {
    let task = task_find_by_id(task_id);
    if task.is_null() {
        return INVALID_PROCESS_ID;
    }
    unsafe { (*task).process_id }
}

/// The thread's effective tier for throttling purposes.
pub fn thread_tier(task_id: u32) -> IoThrottleTier {
    if thread_state::bootcache_flag(task_id) {
        return IoThrottleTier::T3;
    }

    let policy = thread_state::thread_policy(task_id);
    let mut tier = if policy.tier == IoThrottleTier::None {
        IoThrottleTier::T0
    } else {
        policy.tier
    };

    if tier == IoThrottleTier::T3 && thread_state::user_idle_level() > 0 {
        tier = IoThrottleTier::T2;
    }

    tier
}

/// Evaluate whether `thread_tier` is currently held back by a
/// higher-priority tier's recent or in-flight activity.
pub fn will_be_throttled(
    info: &device::DeviceThrottleInfo,
    thread_tier: IoThrottleTier,
    tunables: &IoThrottleTunables,
    now: u64,
) -> ThrottleVerdict {
    let mut any_hot = false;
    let mut h = IoThrottleTier::Start;
    while h < thread_tier {
        let elapsed = now.saturating_sub(info.window_start_ts[h.as_index()]);
        let hot = info.inflight_at(h) > 0 || elapsed < tunables.window_ms(thread_tier);
        if hot {
            any_hot = true;
            break;
        }
        h = h.next();
    }

    if !any_hot {
        return ThrottleVerdict::Disengaged;
    }

    if info.io_count != info.io_count_begin {
        ThrottleVerdict::Now
    } else {
        ThrottleVerdict::Engaged
    }
}

/// Mirrors the buffer-attribute bookkeeping the original stores on a `buf_t`
/// so that cluster I/O preserves the tier it was classified with when
/// queued, and `end_io` can find the tier it must credit back.
#[derive(Clone, Copy, Default)]
pub struct IoBufAttr {
    pub tier: Option<IoThrottleTier>,
    pub upgrade: bool,
    pub tracked: bool,
    /// Whether this buffer is a write, so `end_io_buf` only refreshes
    /// `last_write_ts` on write completion (see `end_io`).
    pub is_write: bool,
}

fn tier_minus_one(tier: IoThrottleTier) -> IoThrottleTier {
    IoThrottleTier::from_u8(tier.as_u8().saturating_sub(1))
}

/// Called on every I/O issue. `bootcache` is the caller's own
/// boot-cache-miss marker for *this* issue (there is no other way to learn
/// it — nothing else in this kernel tracks which thread is servicing a
/// boot-cache miss); it is OR'd with the thread's already-armed
/// `bootcache_flag` so the classification stays sticky across an issue's
/// lifetime once a thread has been marked once (see DESIGN.md).
pub fn update_on_issue(
    device: &DeviceHandle,
    task_id: u32,
    is_ssd: bool,
    inflight_track: bool,
    passive: bool,
    bootcache: bool,
    mut buf_attr: Option<&mut IoBufAttr>,
) -> IoThrottleTier {
    if !tunables::is_enabled() {
        return IoThrottleTier::None;
    }

    let now = clock::uptime_ms();
    let is_bootcache = bootcache || thread_state::bootcache_flag(task_id);

    let mut info = device.lock();
    if info.disabled {
        return IoThrottleTier::None;
    }
    info.is_ssd = is_ssd;

    let tier = if inflight_track && !is_bootcache {
        match buf_attr.as_ref().and_then(|a| a.tier) {
            Some(stored) => {
                if buf_attr.as_ref().is_some_and(|a| a.upgrade) {
                    tier_minus_one(stored)
                } else {
                    stored
                }
            }
            None => thread_tier(task_id),
        }
    } else {
        thread_tier(task_id)
    };

    if tier != IoThrottleTier::None && !passive {
        info.last_io_pid[tier.as_index()] = pid_of(task_id);

        if inflight_track && !is_bootcache {
            if let Some(attr) = buf_attr.as_mut() {
                attr.tracked = true;
                attr.tier = Some(tier);
            }
            info.inc_inflight(tier);
        } else {
            info.window_start_ts[tier.as_index()] = now;
        }
    }

    if tier != IoThrottleTier::None {
        info.last_io_ts[tier.as_index()] = now;
    }

    if tier >= IoThrottleTier::T1 && tier <= IoThrottleTier::T3 {
        info.io_count += 1;
    }

    drop(info);

    if tier >= IoThrottleTier::T1 && tier <= IoThrottleTier::T3 && !thread_state::has_device_ref(task_id) {
        let armed = device::device_acquire(device.clone());
        thread_state::arm(task_id, armed, is_bootcache);
    }

    tier
}

/// I/O completion. Refreshes the tier's window start and decrements
/// in-flight count. `is_write` gates `last_write_ts`, which is
/// specifically the last *write* completion time (see the query it backs);
/// a read completion must not touch it.
pub fn end_io(device: &DeviceHandle, tier: IoThrottleTier, is_write: bool) {
    if tier == IoThrottleTier::None {
        return;
    }
    let now = clock::uptime_ms();
    let mut info = device.lock();
    info.window_start_ts[tier.as_index()] = now;
    info.dec_inflight(tier);
    if is_write {
        info.last_write_ts = now;
    }
}

/// Public `end_io(buf)` wrapper: reads the tier out of `buf_attr` and
/// clears the tracked bit.
pub fn end_io_buf(device: &DeviceHandle, attr: &mut IoBufAttr) {
    if !attr.tracked {
        return;
    }
    if let Some(tier) = attr.tier {
        end_io(device, tier, attr.is_write);
    }
    attr.tracked = false;
}

fn remove_from_wait_queue(device: &DeviceHandle, tier: IoThrottleTier, task_id: u32) {
    if tier == IoThrottleTier::None || tier == IoThrottleTier::End {
        return;
    }
    device.lock().wait_queue[tier.as_index()].remove(task_id);
}

/// Enqueue a blocked thread and, if its queue was previously empty,
/// arm the timer for it.
pub fn add_to_wait_queue(
    device: &DeviceHandle,
    task_id: u32,
    tier: IoThrottleTier,
    insert_tail: bool,
) -> IoThrottleTier {
    let mut start_timer = false;
    {
        let mut info = device.lock();
        let idx = tier.as_index();
        if info.wait_queue[idx].is_empty() {
            info.period_start_ts[idx] = info.last_io_ts[idx];
            start_timer = true;
        }
        let enqueued = if insert_tail {
            info.wait_queue[idx].push_tail(task_id)
        } else {
            info.wait_queue[idx].push_head(task_id)
        };
        if !enqueued {
            klog_debug!("throttle: wait queue full at tier {:?}", tier);
        }
    }
    thread_state::set_on_list_tier(task_id, tier);
    klog_trace!("throttle: OPEN_THROTTLE_WINDOW tier={:?} task={}", tier, task_id);

    if start_timer {
        timer_start(device, false, IoThrottleTier::Start)
    } else {
        tier
    }
}

/// (Re)arm the device's timer. Since this kernel has no one-shot
/// deferred-callback primitive, "arming" means recomputing and storing a
/// deadline that `throttle_timer_poll` checks every tick; "cancel" simply
/// overwrites that deadline, so the "cancel failed, already dispatched"
/// branch from the original has no analogue here (see DESIGN.md).
///
/// Takes the device mutex before ever touching TUNABLES, matching
/// `block_if_throttled`, `io_will_be_throttled`, and `poll_one_device` —
/// never the reverse, or two CPUs taking the two locks in opposite order
/// can deadlock each other (see SPEC_FULL.md §5).
pub fn timer_start(device: &DeviceHandle, update_count: bool, wake_tier: IoThrottleTier) -> IoThrottleTier {
    let now = clock::uptime_ms();
    let mut info = device.lock();

    if update_count {
        info.io_count_begin = info.io_count;
        info.period_num += 1;
        let mut t = wake_tier;
        while t < IoThrottleTier::End {
            info.period_start_ts[t.as_index()] = now;
            t = t.next();
        }
        let throttled_period = tunables::with_tunables(|tunables| info.period_ms(THROTTLED_TIER, tunables));
        info.min_timer_deadline = now + throttled_period;
    }

    let mut throttled = false;
    let mut earliest_deadline: Option<u64> = None;
    let mut first_throttled_tier = IoThrottleTier::End;

    let mut tier = IoThrottleTier::Start;
    while tier < IoThrottleTier::End {
        if !info.wait_queue[tier.as_index()].is_empty() {
            let mut hot = false;
            let mut h = IoThrottleTier::Start;
            while h < tier {
                let elapsed = now.saturating_sub(info.window_start_ts[h.as_index()]);
                let window = tunables::with_tunables(|tunables| tunables.window_ms(tier));
                if elapsed < window || info.inflight_at(h) > 0 {
                    hot = true;
                    break;
                }
                h = h.next();
            }
            if hot {
                throttled = true;
                if first_throttled_tier == IoThrottleTier::End {
                    first_throttled_tier = tier;
                }
                let period = tunables::with_tunables(|tunables| info.period_ms(tier, tunables));
                let deadline = info.period_start_ts[tier.as_index()] + period;
                earliest_deadline = Some(earliest_deadline.map_or(deadline, |d| d.min(deadline)));
            }
        }
        tier = tier.next();
    }

    let need_new_ref = throttled && !info.timer_ref;
    if throttled {
        let deadline = earliest_deadline
            .unwrap_or(now)
            .max(info.min_timer_deadline)
            .max(now);
        info.timer_deadline = deadline;
        info.timer_active = true;
        info.timer_ref = true;
    } else {
        info.timer_active = false;
    }
    drop(info);

    if need_new_ref {
        device::register_armed(device);
    }

    first_throttled_tier
}

/// Block the current task on its attached device until a
/// higher-priority tier's window has closed or `sleep_budget` periods have
/// elapsed. Returns the number of times the thread actually slept.
pub fn block_if_throttled(sleep_budget: u32) -> u32 {
    let current = scheduler_get_current_task();
    if current.is_null() {
        return 0;
    }
    let task_id = unsafe { (*current).task_id };

    let Some(device) = thread_state::device_ref(task_id) else {
        return 0;
    };

    let period_num_snapshot = device.lock().period_num;
    let mut insert_tail = true;
    let mut sleep_count = 0u32;

    loop {
        let tier = thread_tier(task_id);
        let verdict = {
            let info = device.lock();
            tunables::with_tunables(|t| will_be_throttled(&info, tier, t, clock::uptime_ms()))
        };

        match verdict {
            ThrottleVerdict::Disengaged => break,
            ThrottleVerdict::Engaged => {
                if sleep_budget == 0 {
                    break;
                }
            }
            ThrottleVerdict::Now => {}
        }

        let periods_elapsed = device.lock().period_num.saturating_sub(period_num_snapshot);
        if periods_elapsed >= sleep_budget as u64 {
            break;
        }

        let current_tier = thread_state::on_list_tier(task_id);
        if current_tier != IoThrottleTier::None && current_tier != tier {
            remove_from_wait_queue(&device, current_tier, task_id);
            thread_state::set_on_list_tier(task_id, IoThrottleTier::None);
        }

        if thread_state::on_list_tier(task_id) == IoThrottleTier::None {
            let arrived = add_to_wait_queue(&device, task_id, tier, insert_tail);
            if arrived == IoThrottleTier::End {
                break;
            }
        }

        if !thread_state::begin_wait(task_id) {
            // A rethrottle arrived between loop iterations; retry without
            // sleeping, re-evaluating from scratch.
            continue;
        }

        klog_trace!("throttle: PROCESS_THROTTLED task={} tier={:?}", task_id, tier);
        task_set_state_with_reason(task_id, TaskStatus::Blocked, BlockReason::Throttled);
        unschedule_task(current);
        schedule();
        thread_state::end_wait(task_id);

        sleep_count += 1;

        let periods_elapsed_after = device.lock().period_num.saturating_sub(period_num_snapshot);
        if periods_elapsed_after >= sleep_budget as u64 {
            insert_tail = false;
        }
    }

    let final_tier = thread_state::on_list_tier(task_id);
    if final_tier != IoThrottleTier::None {
        remove_from_wait_queue(&device, final_tier, task_id);
        thread_state::set_on_list_tier(task_id, IoThrottleTier::None);
    }

    if let Some(released) = thread_state::clear(task_id) {
        device::release(released);
    }

    sleep_count
}

pub(super) fn wake_task(task_id: u32) {
    if task_id == slopos_abi::task::INVALID_TASK_ID {
        return;
    }
    let task = task_find_by_id(task_id);
    if task.is_null() {
        return;
    }
    if task_set_state_with_reason(task_id, TaskStatus::Ready, BlockReason::None) != 0 {
        return;
    }
    core::sync::atomic::fence(core::sync::atomic::Ordering::SeqCst);
    let _ = crate::scheduler::scheduler::schedule_task(task);
}

/// Re-evaluate a thread's tier while it may be blocked, called from
/// contexts where the device mutex cannot be acquired. Touches only the
/// thread-state table's lock.
pub fn rethrottle(task_id: u32) {
    let new_tier = thread_tier(task_id);
    if let Some(_old_tier) = thread_state::rethrottle(task_id, new_tier) {
        wake_task(task_id);
    }
}

/// Drop the thread's window without waiting (used when a bootcache-satisfied
/// read should not pay throttle cost). Idempotent: a second call on an
/// already-cleared thread is a no-op.
pub fn reset_window(task_id: u32) {
    if let Some(device) = thread_state::clear(task_id) {
        device::release(device);
    }
}

/// Query without side effects, using an explicit tier from a
/// caller-supplied I/O policy rather than the calling thread's own.
pub fn io_will_be_throttled(device: &DeviceHandle, policy: IoThrottlePolicy) -> ThrottleVerdict {
    let tier = if policy.tier == IoThrottleTier::None {
        IoThrottleTier::T0
    } else {
        policy.tier
    };
    let now = clock::uptime_ms();
    let info = device.lock();
    tunables::with_tunables(|t| will_be_throttled(&info, tier, t, now))
}

pub fn set_thread_policy(task_id: u32, policy: IoThrottlePolicy) {
    thread_state::set_thread_policy(task_id, policy);
}
