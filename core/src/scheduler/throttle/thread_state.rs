//! Per-thread throttle-state descriptor: a fixed-size table keyed by
//! `task_id`, mirroring `scheduler::sleep::SleepQueue`. Growing `Task`
//! itself is avoided since its early fields are laid out for raw assembly
//! context-switch access (see `task_struct.rs`).

use slopos_abi::io_throttle::{IoThrottlePolicy, IoThrottleTier};
use slopos_abi::task::{INVALID_TASK_ID, MAX_TASKS};
use slopos_lib::IrqMutex;

use super::device::DeviceHandle;

/// One thread's throttle descriptor. `is_blocked`/`was_rethrottled` play
/// the role of the handshake pair normally guarded by a dedicated
/// per-thread spinlock; here the whole table's `IrqMutex` stands in for
/// that lock (see DESIGN.md) since `FUTEX_TABLE` already establishes the
/// precedent of a few shared locks over many waiters rather than one lock
/// per thread in this codebase.
#[derive(Clone)]
struct ThrottleDescriptor {
    task_id: u32,
    active: bool,
    device_ref: Option<DeviceHandle>,
    low_pri_window: bool,
    bootcache_flag: bool,
    on_list_tier: IoThrottleTier,
    is_blocked: bool,
    was_rethrottled: bool,
}

impl ThrottleDescriptor {
    const fn empty() -> Self {
        Self {
            task_id: INVALID_TASK_ID,
            active: false,
            device_ref: None,
            low_pri_window: false,
            bootcache_flag: false,
            on_list_tier: IoThrottleTier::None,
            is_blocked: false,
            was_rethrottled: false,
        }
    }
}

struct ThrottleStateTable {
    slots: [Option<ThrottleDescriptor>; MAX_TASKS],
}

impl ThrottleStateTable {
    const fn new() -> Self {
        const NONE: Option<ThrottleDescriptor> = None;
        Self {
            slots: [NONE; MAX_TASKS],
        }
    }

    fn find_index(&self, task_id: u32) -> Option<usize> {
        self.slots.iter().position(|s| {
            s.as_ref()
                .is_some_and(|d| d.active && d.task_id == task_id)
        })
    }

    fn get_or_create(&mut self, task_id: u32) -> Option<usize> {
        if let Some(idx) = self.find_index(task_id) {
            return Some(idx);
        }
        let free = self.slots.iter().position(|s| s.is_none())?;
        let mut desc = ThrottleDescriptor::empty();
        desc.task_id = task_id;
        desc.active = true;
        self.slots[free] = Some(desc);
        Some(free)
    }

    fn clear(&mut self, task_id: u32) {
        if let Some(idx) = self.find_index(task_id) {
            self.slots[idx] = None;
        }
    }
}

static THROTTLE_STATE: IrqMutex<ThrottleStateTable> = IrqMutex::new(ThrottleStateTable::new());

/// Whether this task currently has an attached device reference
/// (`device_ref.is_some() <=> low_pri_window == true`).
pub fn has_device_ref(task_id: u32) -> bool {
    let table = THROTTLE_STATE.lock();
    table
        .find_index(task_id)
        .and_then(|i| table.slots[i].as_ref())
        .map(|d| d.low_pri_window)
        .unwrap_or(false)
}

pub fn device_ref(task_id: u32) -> Option<DeviceHandle> {
    let table = THROTTLE_STATE.lock();
    table
        .find_index(task_id)
        .and_then(|i| table.slots[i].as_ref())
        .and_then(|d| d.device_ref.clone())
}

/// Attach a device to the thread's descriptor, arming it for possible
/// blocking. Called from `update_on_issue` once a throttleable tier is
/// assigned and the thread has no device reference yet.
pub fn arm(task_id: u32, device: DeviceHandle, bootcache_flag: bool) {
    let mut table = THROTTLE_STATE.lock();
    let Some(idx) = table.get_or_create(task_id) else {
        return;
    };
    let desc = table.slots[idx].as_mut().unwrap();
    if desc.device_ref.is_none() {
        desc.device_ref = Some(device);
        desc.low_pri_window = true;
        desc.bootcache_flag = bootcache_flag;
    }
}

pub fn bootcache_flag(task_id: u32) -> bool {
    let table = THROTTLE_STATE.lock();
    table
        .find_index(task_id)
        .and_then(|i| table.slots[i].as_ref())
        .map(|d| d.bootcache_flag)
        .unwrap_or(false)
}

pub fn on_list_tier(task_id: u32) -> IoThrottleTier {
    let table = THROTTLE_STATE.lock();
    table
        .find_index(task_id)
        .and_then(|i| table.slots[i].as_ref())
        .map(|d| d.on_list_tier)
        .unwrap_or(IoThrottleTier::None)
}

pub fn set_on_list_tier(task_id: u32, tier: IoThrottleTier) {
    let mut table = THROTTLE_STATE.lock();
    if let Some(idx) = table.find_index(task_id) {
        table.slots[idx].as_mut().unwrap().on_list_tier = tier;
    }
}

/// Rethrottle handshake: record that this thread is about to assert-wait.
/// Returns `false` (caller must not sleep, must retry) if a rethrottle had
/// already arrived and was cleared instead.
pub fn begin_wait(task_id: u32) -> bool {
    let mut table = THROTTLE_STATE.lock();
    let Some(idx) = table.find_index(task_id) else {
        return true;
    };
    let desc = table.slots[idx].as_mut().unwrap();
    if desc.was_rethrottled {
        desc.was_rethrottled = false;
        false
    } else {
        desc.is_blocked = true;
        true
    }
}

pub fn end_wait(task_id: u32) {
    let mut table = THROTTLE_STATE.lock();
    if let Some(idx) = table.find_index(task_id) {
        table.slots[idx].as_mut().unwrap().is_blocked = false;
    }
}

/// The rethrottle entry point. Callable from contexts where the
/// device mutex cannot be acquired; only ever touches this table's lock.
///
/// Returns `Some(old_tier)` if the thread was asleep and needs to be woken
/// (its `on_list_tier` no longer matches `new_tier`), `None` otherwise.
pub fn rethrottle(task_id: u32, new_tier: IoThrottleTier) -> Option<IoThrottleTier> {
    let mut table = THROTTLE_STATE.lock();
    let idx = table.find_index(task_id)?;
    let desc = table.slots[idx].as_mut().unwrap();
    if desc.device_ref.is_none() {
        return None;
    }
    if !desc.is_blocked {
        desc.was_rethrottled = true;
        return None;
    }
    if desc.on_list_tier != new_tier {
        desc.is_blocked = false;
        let old = desc.on_list_tier;
        return Some(old);
    }
    None
}

/// Clear the thread's descriptor entirely, releasing its device reference.
/// Returns the released handle so the caller can drop its refcount.
pub fn clear(task_id: u32) -> Option<DeviceHandle> {
    let mut table = THROTTLE_STATE.lock();
    let Some(idx) = table.find_index(task_id) else {
        return None;
    };
    let released = table.slots[idx].as_mut().and_then(|d| d.device_ref.take());
    table.clear(task_id);
    released
}

pub fn reset_all() {
    let mut table = THROTTLE_STATE.lock();
    *table = ThrottleStateTable::new();
}

// ---------------------------------------------------------------------------
// Per-task I/O policy (supplements the distilled spec: this kernel has no
// pre-existing thread policy subsystem for `thread_tier` to read from).
// ---------------------------------------------------------------------------

#[derive(Clone, Copy)]
struct PolicyEntry {
    task_id: u32,
    policy: IoThrottlePolicy,
}

struct PolicyTable {
    slots: [Option<PolicyEntry>; MAX_TASKS],
}

impl PolicyTable {
    const fn new() -> Self {
        const NONE: Option<PolicyEntry> = None;
        Self {
            slots: [NONE; MAX_TASKS],
        }
    }
}

static POLICY_TABLE: IrqMutex<PolicyTable> = IrqMutex::new(PolicyTable::new());

pub fn set_thread_policy(task_id: u32, policy: IoThrottlePolicy) {
    let mut table = POLICY_TABLE.lock();
    if let Some(entry) = table
        .slots
        .iter_mut()
        .flatten()
        .find(|e| e.task_id == task_id)
    {
        entry.policy = policy;
        return;
    }
    if let Some(slot) = table.slots.iter_mut().find(|s| s.is_none()) {
        *slot = Some(PolicyEntry { task_id, policy });
    }
}

pub fn thread_policy(task_id: u32) -> IoThrottlePolicy {
    POLICY_TABLE
        .lock()
        .slots
        .iter()
        .flatten()
        .find(|e| e.task_id == task_id)
        .map(|e| e.policy)
        .unwrap_or_default()
}

static USER_IDLE_LEVEL: IrqMutex<i32> = IrqMutex::new(0);

pub fn set_user_idle_level(level: i32) {
    *USER_IDLE_LEVEL.lock() = level;
}

pub fn user_idle_level() -> i32 {
    *USER_IDLE_LEVEL.lock()
}
