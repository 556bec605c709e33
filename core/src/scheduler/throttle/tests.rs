//! Throttler unit and integration tests.
//!
//! Most of these exercise the leaf modules directly with synthetic device
//! records and task ids, avoiding real scheduling. The last one drives a
//! real task created through `SchedFixture` into `Blocked` state and checks
//! that `throttle_timer_poll` dequeues and wakes it.

use core::ffi::c_void;
use core::ptr;

use slopos_abi::io_throttle::{IoThrottlePolicy, IoThrottleTier};
use slopos_abi::task::{BlockReason, INVALID_TASK_ID};
use slopos_lib::testing::TestResult;
use slopos_lib::{assert_eq_test, assert_ne_test, assert_test};

use super::device;
use super::sched::{self, IoBufAttr, ThrottleVerdict};
use super::thread_state;
use super::tunables::{self, IoThrottleTunables};

use crate::scheduler::sched_tests::SchedFixture;
use crate::scheduler::task::{
    task_create, task_find_by_id, task_set_state_with_reason, TaskStatus, TASK_FLAG_KERNEL_MODE,
    TASK_PRIORITY_NORMAL,
};

fn dummy_task_fn(_arg: *mut c_void) {}

fn spawn_task(name: &[u8]) -> u32 {
    task_create(
        name.as_ptr() as *const core::ffi::c_char,
        dummy_task_fn,
        ptr::null_mut(),
        TASK_PRIORITY_NORMAL,
        TASK_FLAG_KERNEL_MODE,
    )
}

fn reset_throttle_state() {
    tunables::init_tunables(None);
    device::init_devices();
    thread_state::reset_all();
}

// ---------------------------------------------------------------------------
// tunables
// ---------------------------------------------------------------------------

pub fn test_tunables_defaults_match_known_constants() -> TestResult {
    let t = IoThrottleTunables::defaults();
    assert_eq_test!(t.window_ms(IoThrottleTier::T1), 25);
    assert_eq_test!(t.window_ms(IoThrottleTier::T2), 100);
    assert_eq_test!(t.window_ms(IoThrottleTier::T3), 500);
    assert_eq_test!(t.period_ms(IoThrottleTier::T1, false, false), 40);
    assert_eq_test!(t.period_ms(IoThrottleTier::T2, false, false), 85);
    assert_eq_test!(t.period_ms(IoThrottleTier::T3, false, false), 200);
    assert_eq_test!(t.period_ms(IoThrottleTier::T1, true, false), 5);
    assert_eq_test!(t.period_ms(IoThrottleTier::T2, true, false), 15);
    assert_eq_test!(t.period_ms(IoThrottleTier::T3, true, false), 25);
    TestResult::Pass
}

pub fn test_tunables_fusion_forces_hdd_periods() -> TestResult {
    let t = IoThrottleTunables::defaults();
    // An SSD-backed fusion device still gets the HDD period table.
    assert_eq_test!(
        t.period_ms(IoThrottleTier::T1, true, true),
        t.period_ms(IoThrottleTier::T1, false, false)
    );
    TestResult::Pass
}

pub fn test_tunables_set_and_enable_round_trip() -> TestResult {
    reset_throttle_state();

    tunables::set_window_ms(IoThrottleTier::T1, 7);
    assert_eq_test!(tunables::with_tunables(|t| t.window_ms(IoThrottleTier::T1)), 7);

    tunables::set_period_ms(IoThrottleTier::T2, true, 3);
    assert_eq_test!(
        tunables::with_tunables(|t| t.period_ms(IoThrottleTier::T2, true, false)),
        3
    );

    tunables::set_enabled(false);
    assert_test!(!tunables::is_enabled());
    tunables::set_enabled(true);
    assert_test!(tunables::is_enabled());

    TestResult::Pass
}

// ---------------------------------------------------------------------------
// device: wait queue + refcounting
// ---------------------------------------------------------------------------

pub fn test_wait_queue_fifo_order() -> TestResult {
    let mut q = device::DeviceThrottleInfo::new().wait_queue[IoThrottleTier::T1.as_index()];
    assert_test!(q.is_empty());
    assert_test!(q.push_tail(1));
    assert_test!(q.push_tail(2));
    assert_test!(q.push_tail(3));
    assert_eq_test!(q.pop_head(), Some(1));
    assert_eq_test!(q.pop_head(), Some(2));
    assert_test!(q.remove(3));
    assert_eq_test!(q.pop_head(), None);
    TestResult::Pass
}

pub fn test_wait_queue_push_head_and_drain() -> TestResult {
    let mut q = device::DeviceThrottleInfo::new().wait_queue[IoThrottleTier::T1.as_index()];
    q.push_tail(1);
    q.push_head(2);
    // push_head puts 2 in front of 1.
    assert_eq_test!(q.pop_head(), Some(2));
    q.push_tail(3);
    q.push_tail(4);
    let mut drained = alloc::vec::Vec::new();
    q.drain_all(|id| drained.push(id));
    assert_eq_test!(drained.as_slice(), &[1, 3, 4]);
    assert_test!(q.is_empty());
    TestResult::Pass
}

pub fn test_device_dynamic_create_and_release() -> TestResult {
    let handle = device::create();
    let other = handle.clone();
    assert_test!(handle.same_as(&other));
    {
        let mut info = handle.lock();
        info.io_count = 5;
    }
    assert_eq_test!(other.lock().io_count, 5);
    device::release(handle);
    device::release(other);
    TestResult::Pass
}

pub fn test_device_static_slot_survives_release() -> TestResult {
    reset_throttle_state();
    let a = device::device_at_index(0).expect("slot 0 exists");
    let b = device::device_at_index(0).expect("slot 0 exists");
    assert_test!(a.same_as(&b));
    device::release(a);
    // Static slots are never freed; re-acquiring must still work.
    let c = device::device_at_index(0).expect("slot 0 exists");
    assert_test!(c.same_as(&b));
    device::release(b);
    device::release(c);
    TestResult::Pass
}

pub fn test_disable_throttle_fusion_never_fully_disables() -> TestResult {
    reset_throttle_state();
    device::disable_throttle(1, true);
    let handle = device::device_at_index(1).expect("slot 1 exists");
    {
        let info = handle.lock();
        assert_test!(info.fusion_with_priority);
        // Preserved literally: a fusion device can never be fully disabled
        // through this path, since `disabled` always recomputes to
        // `!fusion_with_priority`.
        assert_test!(!info.disabled);
    }
    device::release(handle);
    TestResult::Pass
}

pub fn test_disable_throttle_plain_device_disables() -> TestResult {
    reset_throttle_state();
    device::disable_throttle(2, false);
    let handle = device::device_at_index(2).expect("slot 2 exists");
    assert_test!(handle.lock().disabled);
    device::release(handle);
    TestResult::Pass
}

pub fn test_mount_ref_tracks_device_by_mount_id() -> TestResult {
    reset_throttle_state();
    let handle = device::device_at_index(3).expect("slot 3 exists");
    device::mount_ref(0, handle.clone());
    let looked_up = device::update_by_mount(0).expect("mount 0 has a device");
    assert_test!(looked_up.same_as(&handle));
    device::mount_rel(0);
    assert_test!(device::update_by_mount(0).is_none());
    device::release(handle);
    TestResult::Pass
}

// ---------------------------------------------------------------------------
// thread_state
// ---------------------------------------------------------------------------

pub fn test_thread_state_arm_is_sticky_once_set() -> TestResult {
    reset_throttle_state();
    let task_id = 1;
    let a = device::create();
    let b = device::create();

    assert_test!(!thread_state::has_device_ref(task_id));
    thread_state::arm(task_id, a.clone(), false);
    assert_test!(thread_state::has_device_ref(task_id));

    // A second arm() with a different device must not replace the first.
    thread_state::arm(task_id, b.clone(), true);
    let attached = thread_state::device_ref(task_id).expect("device attached");
    assert_test!(attached.same_as(&a));
    assert_test!(!thread_state::bootcache_flag(task_id));

    device::release(a);
    device::release(b);
    thread_state::reset_all();
    TestResult::Pass
}

pub fn test_thread_state_clear_releases_and_resets() -> TestResult {
    reset_throttle_state();
    let task_id = 2;
    let handle = device::create();
    thread_state::arm(task_id, handle.clone(), false);
    thread_state::set_on_list_tier(task_id, IoThrottleTier::T2);

    let released = thread_state::clear(task_id).expect("device was attached");
    assert_test!(released.same_as(&handle));
    assert_test!(!thread_state::has_device_ref(task_id));
    assert_eq_test!(thread_state::on_list_tier(task_id), IoThrottleTier::None);

    // Idempotent: clearing again finds nothing.
    assert_test!(thread_state::clear(task_id).is_none());

    device::release(handle);
    TestResult::Pass
}

pub fn test_thread_state_rethrottle_handshake() -> TestResult {
    reset_throttle_state();
    let task_id = 3;
    let handle = device::create();
    thread_state::arm(task_id, handle.clone(), false);
    thread_state::set_on_list_tier(task_id, IoThrottleTier::T1);

    // Rethrottle arriving before the thread calls begin_wait() is recorded,
    // not lost, and does not report a wake (the thread is not yet asleep).
    assert_test!(thread_state::rethrottle(task_id, IoThrottleTier::T2).is_none());

    // begin_wait() consumes the pending rethrottle and tells the caller to
    // retry immediately instead of sleeping.
    assert_test!(!thread_state::begin_wait(task_id));

    // Once actually blocked, a rethrottle to a different tier reports the
    // old tier so the caller can wake it.
    assert_test!(thread_state::begin_wait(task_id));
    let woken = thread_state::rethrottle(task_id, IoThrottleTier::T3);
    assert_eq_test!(woken, Some(IoThrottleTier::T1));

    thread_state::end_wait(task_id);
    thread_state::clear(task_id);
    device::release(handle);
    TestResult::Pass
}

pub fn test_thread_policy_default_and_override() -> TestResult {
    reset_throttle_state();
    let task_id = 4;
    assert_eq_test!(thread_state::thread_policy(task_id), IoThrottlePolicy::DEFAULT);

    let policy = IoThrottlePolicy::new(IoThrottleTier::T3, true);
    thread_state::set_thread_policy(task_id, policy);
    assert_eq_test!(thread_state::thread_policy(task_id), policy);
    TestResult::Pass
}

pub fn test_user_idle_level_round_trip() -> TestResult {
    thread_state::set_user_idle_level(0);
    assert_eq_test!(thread_state::user_idle_level(), 0);
    thread_state::set_user_idle_level(2);
    assert_eq_test!(thread_state::user_idle_level(), 2);
    thread_state::set_user_idle_level(0);
    TestResult::Pass
}

// ---------------------------------------------------------------------------
// sched: classification and admission
// ---------------------------------------------------------------------------

pub fn test_thread_tier_bootcache_forces_t3() -> TestResult {
    reset_throttle_state();
    let task_id = 5;
    let handle = device::create();
    thread_state::arm(task_id, handle.clone(), true);
    assert_eq_test!(sched::thread_tier(task_id), IoThrottleTier::T3);
    thread_state::clear(task_id);
    device::release(handle);
    TestResult::Pass
}

pub fn test_thread_tier_user_idle_demotes_t3_to_t2() -> TestResult {
    reset_throttle_state();
    let task_id = 6;
    thread_state::set_thread_policy(task_id, IoThrottlePolicy::new(IoThrottleTier::T3, false));
    thread_state::set_user_idle_level(0);
    assert_eq_test!(sched::thread_tier(task_id), IoThrottleTier::T3);
    thread_state::set_user_idle_level(1);
    assert_eq_test!(sched::thread_tier(task_id), IoThrottleTier::T2);
    thread_state::set_user_idle_level(0);
    thread_state::set_thread_policy(task_id, IoThrottlePolicy::DEFAULT);
    TestResult::Pass
}

pub fn test_thread_tier_default_policy_is_t0() -> TestResult {
    reset_throttle_state();
    let task_id = 7;
    assert_eq_test!(sched::thread_tier(task_id), IoThrottleTier::T0);
    TestResult::Pass
}

pub fn test_will_be_throttled_disengaged_when_nothing_hot() -> TestResult {
    let info = device::DeviceThrottleInfo::new();
    let tunables = IoThrottleTunables::defaults();
    // Fresh record, no recent foreground activity and nothing in flight: a
    // T1 issue sees no hot higher tier and should not be throttled at all.
    let verdict = sched::will_be_throttled(&info, IoThrottleTier::T1, &tunables, 10_000);
    assert_eq_test!(verdict, ThrottleVerdict::Disengaged);
    TestResult::Pass
}

pub fn test_will_be_throttled_engaged_vs_now_by_io_count() -> TestResult {
    let mut info = device::DeviceThrottleInfo::new();
    let tunables = IoThrottleTunables::defaults();
    // T0 just issued, inside its window: T1 is held back.
    info.window_start_ts[IoThrottleTier::T0.as_index()] = 100;
    info.io_count = 3;
    info.io_count_begin = 3;
    let engaged = sched::will_be_throttled(&info, IoThrottleTier::T1, &tunables, 100);
    assert_eq_test!(engaged, ThrottleVerdict::Engaged);

    // Once the device's global counter has moved since the timer last
    // snapshotted it, the same hot condition demands an immediate block.
    info.io_count = 4;
    let now_verdict = sched::will_be_throttled(&info, IoThrottleTier::T1, &tunables, 100);
    assert_eq_test!(now_verdict, ThrottleVerdict::Now);
    TestResult::Pass
}

pub fn test_update_on_issue_tracks_inflight_and_end_io_releases() -> TestResult {
    reset_throttle_state();
    tunables::set_enabled(true);
    let task_id = 8;
    let handle = device::create();

    let tier = sched::update_on_issue(&handle, task_id, false, true, false, false, None);
    assert_test!(tier.is_throttleable() || tier == IoThrottleTier::T0);

    if tier.is_throttleable() {
        assert_test!(handle.lock().inflight_at(tier) >= 1);
        assert_test!(thread_state::has_device_ref(task_id));
        sched::end_io(&handle, tier, false);
        assert_eq_test!(handle.lock().inflight_at(tier), 0);
    }

    if let Some(released) = thread_state::clear(task_id) {
        device::release(released);
    }
    TestResult::Pass
}

pub fn test_update_on_issue_disabled_device_returns_none_tier() -> TestResult {
    reset_throttle_state();
    tunables::set_enabled(true);
    let task_id = 9;
    let handle = device::create();
    handle.lock().disabled = true;

    let tier = sched::update_on_issue(&handle, task_id, false, true, false, false, None);
    assert_eq_test!(tier, IoThrottleTier::None);
    assert_test!(!thread_state::has_device_ref(task_id));
    TestResult::Pass
}

pub fn test_update_on_issue_globally_disabled_is_noop() -> TestResult {
    reset_throttle_state();
    tunables::set_enabled(false);
    let task_id = 10;
    let handle = device::create();
    let tier = sched::update_on_issue(&handle, task_id, false, true, false, false, None);
    assert_eq_test!(tier, IoThrottleTier::None);
    tunables::set_enabled(true);
    TestResult::Pass
}

pub fn test_end_io_buf_clears_tracked_bit() -> TestResult {
    reset_throttle_state();
    let handle = device::create();
    let mut attr = IoBufAttr {
        tier: Some(IoThrottleTier::T1),
        upgrade: false,
        tracked: true,
        is_write: false,
    };
    handle.lock().inc_inflight(IoThrottleTier::T1);
    sched::end_io_buf(&handle, &mut attr);
    assert_test!(!attr.tracked);
    assert_eq_test!(handle.lock().inflight_at(IoThrottleTier::T1), 0);

    // A second call is a no-op since `tracked` is already false.
    sched::end_io_buf(&handle, &mut attr);
    TestResult::Pass
}

pub fn test_end_io_read_does_not_touch_last_write_ts() -> TestResult {
    reset_throttle_state();
    let handle = device::create();
    handle.lock().last_write_ts = 123;
    handle.lock().inc_inflight(IoThrottleTier::T1);

    // A read completion must not disturb `last_write_ts`.
    sched::end_io(&handle, IoThrottleTier::T1, false);
    assert_eq_test!(handle.lock().last_write_ts, 123);

    handle.lock().inc_inflight(IoThrottleTier::T1);
    // A write completion does refresh it.
    sched::end_io(&handle, IoThrottleTier::T1, true);
    assert_ne_test!(handle.lock().last_write_ts, 123);

    TestResult::Pass
}

pub fn test_reset_window_is_idempotent() -> TestResult {
    reset_throttle_state();
    let task_id = 11;
    let handle = device::create();
    thread_state::arm(task_id, handle.clone(), false);

    sched::reset_window(task_id);
    assert_test!(!thread_state::has_device_ref(task_id));
    // Calling again on an already-cleared thread must not panic or double-release.
    sched::reset_window(task_id);
    TestResult::Pass
}

pub fn test_io_will_be_throttled_uses_explicit_policy_not_current_thread() -> TestResult {
    reset_throttle_state();
    let handle = device::create();
    {
        let mut info = handle.lock();
        info.inc_inflight(IoThrottleTier::T0);
        info.window_start_ts[IoThrottleTier::T0.as_index()] = 1_000;
    }
    let policy = IoThrottlePolicy::new(IoThrottleTier::T1, false);
    let verdict = sched::io_will_be_throttled(&handle, policy);
    assert_ne_test!(verdict, ThrottleVerdict::Disengaged);
    TestResult::Pass
}

pub fn test_wake_task_on_invalid_id_is_noop() -> TestResult {
    // Must not panic on the sentinel id.
    sched::wake_task(INVALID_TASK_ID);
    TestResult::Pass
}

// ---------------------------------------------------------------------------
// end-to-end: a real task actually blocks and is woken by the timer poll
// ---------------------------------------------------------------------------

/// Drives a real task through the wait-queue/timer path without going
/// through `block_if_throttled` itself (which calls `schedule()` and would
/// require a second runnable task to return control to this one). Instead
/// this puts the task in `Blocked` state directly, the same way
/// `block_if_throttled` does right before calling `schedule()`, then checks
/// that `throttle_timer_poll` dequeues it and transitions it back to `Ready`
/// once its tier's period has elapsed.
pub fn test_timer_poll_wakes_a_real_blocked_task() -> TestResult {
    let _fixture = SchedFixture::new();
    reset_throttle_state();
    tunables::set_enabled(true);
    tunables::set_window_ms(IoThrottleTier::T1, 1);
    tunables::set_period_ms(IoThrottleTier::T1, false, 1);

    let victim_id = spawn_task(b"ThrottleVictim\0");
    assert_ne_test!(victim_id, INVALID_TASK_ID);
    assert_test!(!task_find_by_id(victim_id).is_null());

    let handle = device::device_at_index(4).expect("slot 4 exists");

    thread_state::set_thread_policy(victim_id, IoThrottlePolicy::new(IoThrottleTier::T1, false));
    let victim_tier =
        sched::update_on_issue(&handle, victim_id, false, true, false, false, None);
    assert_eq_test!(victim_tier, IoThrottleTier::T1);

    let arrived = sched::add_to_wait_queue(&handle, victim_id, victim_tier, true);
    assert_eq_test!(arrived, IoThrottleTier::T1);
    thread_state::set_on_list_tier(victim_id, victim_tier);

    assert_eq_test!(
        task_set_state_with_reason(victim_id, TaskStatus::Blocked, BlockReason::Throttled),
        0
    );

    // Force the tier's period to already have elapsed relative to now, and
    // back-date the device's recorded deadline so the poll treats it as due
    // without needing a real clock tick to pass.
    {
        let mut info = handle.lock();
        let idx = victim_tier.as_index();
        info.period_start_ts[idx] = 0;
        info.timer_deadline = 0;
        info.timer_active = true;
    }

    let mut woke = false;
    for _ in 0..16 {
        super::throttle_timer_poll();
        if unsafe { (*task_find_by_id(victim_id)).status() } == TaskStatus::Ready {
            woke = true;
            break;
        }
    }
    assert_test!(woke, "timer poll never woke the blocked task");
    assert_eq_test!(thread_state::on_list_tier(victim_id), IoThrottleTier::None);

    if let Some(released) = thread_state::clear(victim_id) {
        device::release(released);
    }
    device::release(handle);
    thread_state::set_thread_policy(victim_id, IoThrottlePolicy::DEFAULT);

    TestResult::Pass
}

slopos_lib::define_test_suite!(
    io_throttle,
    [
        test_tunables_defaults_match_known_constants,
        test_tunables_fusion_forces_hdd_periods,
        test_tunables_set_and_enable_round_trip,
        test_wait_queue_fifo_order,
        test_wait_queue_push_head_and_drain,
        test_device_dynamic_create_and_release,
        test_device_static_slot_survives_release,
        test_disable_throttle_fusion_never_fully_disables,
        test_disable_throttle_plain_device_disables,
        test_mount_ref_tracks_device_by_mount_id,
        test_thread_state_arm_is_sticky_once_set,
        test_thread_state_clear_releases_and_resets,
        test_thread_state_rethrottle_handshake,
        test_thread_policy_default_and_override,
        test_user_idle_level_round_trip,
        test_thread_tier_bootcache_forces_t3,
        test_thread_tier_user_idle_demotes_t3_to_t2,
        test_thread_tier_default_policy_is_t0,
        test_will_be_throttled_disengaged_when_nothing_hot,
        test_will_be_throttled_engaged_vs_now_by_io_count,
        test_update_on_issue_tracks_inflight_and_end_io_releases,
        test_update_on_issue_disabled_device_returns_none_tier,
        test_update_on_issue_globally_disabled_is_noop,
        test_end_io_buf_clears_tracked_bit,
        test_end_io_read_does_not_touch_last_write_ts,
        test_reset_window_is_idempotent,
        test_io_will_be_throttled_uses_explicit_policy_not_current_thread,
        test_wake_task_on_invalid_id_is_noop,
        test_timer_poll_wakes_a_real_blocked_task,
    ]
);
