//! Per-device throttle record: the mutex-guarded state machine the rest of
//! this module mutates on every I/O issue, completion, and timer tick.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicU32, Ordering};

use slopos_abi::io_throttle::{IO_THROTTLE_MAX_DEVICES, IO_THROTTLE_TIER_COUNT, IoThrottleTier};
use slopos_lib::{IrqMutex, klog_warn};

use super::tunables::IoThrottleTunables;

/// One wait-queue slot: a linked list would need an allocator per node, so
/// each tier's queue is a small fixed-capacity array of task ids, drained
/// from the head.
const WAIT_QUEUE_CAPACITY: usize = slopos_abi::task::MAX_TASKS as usize;

#[derive(Clone, Copy)]
pub struct WaitQueueTier {
    tasks: [u32; WAIT_QUEUE_CAPACITY],
    len: usize,
}

impl WaitQueueTier {
    const fn empty() -> Self {
        Self {
            tasks: [slopos_abi::task::INVALID_TASK_ID; WAIT_QUEUE_CAPACITY],
            len: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn push_tail(&mut self, task_id: u32) -> bool {
        if self.len >= WAIT_QUEUE_CAPACITY {
            return false;
        }
        self.tasks[self.len] = task_id;
        self.len += 1;
        true
    }

    pub fn push_head(&mut self, task_id: u32) -> bool {
        if self.len >= WAIT_QUEUE_CAPACITY {
            return false;
        }
        for i in (0..self.len).rev() {
            self.tasks[i + 1] = self.tasks[i];
        }
        self.tasks[0] = task_id;
        self.len += 1;
        true
    }

    pub fn remove(&mut self, task_id: u32) -> bool {
        if let Some(pos) = self.tasks[..self.len].iter().position(|&t| t == task_id) {
            for i in pos..self.len - 1 {
                self.tasks[i] = self.tasks[i + 1];
            }
            self.len -= 1;
            true
        } else {
            false
        }
    }

    pub fn pop_head(&mut self) -> Option<u32> {
        if self.len == 0 {
            return None;
        }
        let task_id = self.tasks[0];
        for i in 0..self.len - 1 {
            self.tasks[i] = self.tasks[i + 1];
        }
        self.len -= 1;
        Some(task_id)
    }

    pub fn drain_all(&mut self, mut f: impl FnMut(u32)) {
        for i in 0..self.len {
            f(self.tasks[i]);
        }
        self.len = 0;
    }
}

/// Per-device-record throttling state. Everything here lives behind one
/// `IrqMutex`, matching the "single mutex guards all mutable fields" design.
pub struct DeviceThrottleInfo {
    pub last_write_ts: u64,
    pub min_timer_deadline: u64,
    pub window_start_ts: [u64; IO_THROTTLE_TIER_COUNT],
    pub last_io_ts: [u64; IO_THROTTLE_TIER_COUNT],
    pub last_io_pid: [u32; IO_THROTTLE_TIER_COUNT],
    pub period_start_ts: [u64; IO_THROTTLE_TIER_COUNT],
    pub inflight: [i32; IO_THROTTLE_TIER_COUNT],
    pub wait_queue: [WaitQueueTier; IO_THROTTLE_TIER_COUNT],
    pub next_wake_tier: IoThrottleTier,
    pub timer_active: bool,
    pub timer_ref: bool,
    pub timer_deadline: u64,
    pub io_count: u64,
    pub io_count_begin: u64,
    pub period_num: u64,
    pub is_ssd: bool,
    pub disabled: bool,
    pub fusion_with_priority: bool,
}

impl DeviceThrottleInfo {
    pub const fn new() -> Self {
        Self {
            last_write_ts: 0,
            min_timer_deadline: 0,
            window_start_ts: [0; IO_THROTTLE_TIER_COUNT],
            last_io_ts: [0; IO_THROTTLE_TIER_COUNT],
            last_io_pid: [slopos_abi::task::INVALID_PROCESS_ID; IO_THROTTLE_TIER_COUNT],
            period_start_ts: [0; IO_THROTTLE_TIER_COUNT],
            inflight: [0; IO_THROTTLE_TIER_COUNT],
            wait_queue: [WaitQueueTier::empty(); IO_THROTTLE_TIER_COUNT],
            next_wake_tier: IoThrottleTier::Start,
            timer_active: false,
            timer_ref: false,
            timer_deadline: 0,
            io_count: 0,
            io_count_begin: 0,
            period_num: 0,
            is_ssd: false,
            disabled: false,
            fusion_with_priority: false,
        }
    }

    pub fn period_ms(&self, tier: IoThrottleTier, tunables: &IoThrottleTunables) -> u64 {
        tunables.period_ms(tier, self.is_ssd, self.fusion_with_priority)
    }

    pub fn inflight_at(&self, tier: IoThrottleTier) -> i32 {
        self.inflight[tier.as_index()]
    }

    pub fn inc_inflight(&mut self, tier: IoThrottleTier) {
        self.inflight[tier.as_index()] += 1;
    }

    pub fn dec_inflight(&mut self, tier: IoThrottleTier) {
        let slot = &mut self.inflight[tier.as_index()];
        if *slot <= 0 {
            klog_warn!("throttle: inflight underflow at tier {:?}", tier);
            *slot = 0;
        } else {
            *slot -= 1;
        }
    }
}

/// A reference to a device throttle record: either a slot in the static
/// table (never freed) or a dynamically allocated, reference-counted record.
#[derive(Clone)]
pub enum DeviceHandle {
    Static(&'static DeviceSlot),
    Dynamic(Arc<IrqMutex<DeviceThrottleInfo>>),
}

impl DeviceHandle {
    pub fn lock(&self) -> DeviceGuard<'_> {
        match self {
            DeviceHandle::Static(slot) => DeviceGuard::Static(slot.info.lock()),
            DeviceHandle::Dynamic(arc) => DeviceGuard::Dynamic(arc.lock()),
        }
    }

    /// Identity comparison: used to detect "is this the same device record".
    pub fn same_as(&self, other: &DeviceHandle) -> bool {
        match (self, other) {
            (DeviceHandle::Static(a), DeviceHandle::Static(b)) => core::ptr::eq(*a, *b),
            (DeviceHandle::Dynamic(a), DeviceHandle::Dynamic(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

pub enum DeviceGuard<'a> {
    Static(slopos_lib::IrqMutexGuard<'a, DeviceThrottleInfo>),
    Dynamic(slopos_lib::IrqMutexGuard<'a, DeviceThrottleInfo>),
}

impl<'a> core::ops::Deref for DeviceGuard<'a> {
    type Target = DeviceThrottleInfo;
    fn deref(&self) -> &DeviceThrottleInfo {
        match self {
            DeviceGuard::Static(g) => g,
            DeviceGuard::Dynamic(g) => g,
        }
    }
}

impl<'a> core::ops::DerefMut for DeviceGuard<'a> {
    fn deref_mut(&mut self) -> &mut DeviceThrottleInfo {
        match self {
            DeviceGuard::Static(g) => g,
            DeviceGuard::Dynamic(g) => g,
        }
    }
}

/// A static table slot. `refcnt` tracks callers for API consistency, but a
/// static slot is never actually freed, matching "records backed by the
/// static per-device table are never freed".
pub struct DeviceSlot {
    info: IrqMutex<DeviceThrottleInfo>,
    refcnt: AtomicU32,
}

impl DeviceSlot {
    const fn new() -> Self {
        Self {
            info: IrqMutex::new(DeviceThrottleInfo::new()),
            refcnt: AtomicU32::new(0),
        }
    }
}

static DEVICE_TABLE: [DeviceSlot; IO_THROTTLE_MAX_DEVICES] = {
    const SLOT: DeviceSlot = DeviceSlot::new();
    [SLOT; IO_THROTTLE_MAX_DEVICES]
};

const MAX_MOUNTS: usize = 16;
static MOUNT_DEVICE_REFS: [IrqMutex<Option<DeviceHandle>>; MAX_MOUNTS] = {
    const SLOT: IrqMutex<Option<DeviceHandle>> = IrqMutex::new(None);
    [SLOT; MAX_MOUNTS]
};

/// Registry of dynamically allocated device records with an armed timer.
/// The timer poll has no other way to reach a `Dynamic` record, since those
/// live only behind caller-held `Arc`s; this is the "explicit ownership
/// handle" the timer holds while armed (see DESIGN.md).
const MAX_ARMED_DYNAMIC: usize = IO_THROTTLE_MAX_DEVICES;
static ARMED_DYNAMIC: [IrqMutex<Option<DeviceHandle>>; MAX_ARMED_DYNAMIC] = {
    const SLOT: IrqMutex<Option<DeviceHandle>> = IrqMutex::new(None);
    [SLOT; MAX_ARMED_DYNAMIC]
};

/// Register a dynamic device as armed, taking the timer's reference. A
/// no-op for static handles (always reachable by index already).
pub(super) fn register_armed(handle: &DeviceHandle) {
    let DeviceHandle::Dynamic(_) = handle else {
        return;
    };
    for slot in ARMED_DYNAMIC.iter() {
        let mut guard = slot.lock();
        if guard.is_none() {
            *guard = Some(device_acquire(handle.clone()));
            return;
        }
    }
    klog_warn!("throttle: armed-dynamic registry full");
}

/// Unregister a dynamic device once its timer has finished and will not be
/// rearmed, dropping the timer's reference.
pub(super) fn unregister_armed(handle: &DeviceHandle) {
    let DeviceHandle::Dynamic(_) = handle else {
        return;
    };
    for slot in ARMED_DYNAMIC.iter() {
        let mut guard = slot.lock();
        if let Some(existing) = guard.as_ref() {
            if existing.same_as(handle) {
                let taken = guard.take().unwrap();
                drop(guard);
                release(taken);
                return;
            }
        }
    }
}

/// Every device the timer poll should consider: the whole static table
/// (cheap, fixed size) plus any currently-armed dynamic records.
pub fn all_pollable_devices() -> alloc::vec::Vec<DeviceHandle> {
    let mut out = alloc::vec::Vec::with_capacity(IO_THROTTLE_MAX_DEVICES * 2);
    for slot in DEVICE_TABLE.iter() {
        out.push(DeviceHandle::Static(slot));
    }
    for slot in ARMED_DYNAMIC.iter() {
        if let Some(handle) = slot.lock().clone() {
            out.push(handle);
        }
    }
    out
}

/// Re-initializes the static device table. Idempotent-safe: call at most
/// once during kernel init, but safe to call again (e.g. in tests).
pub fn init_devices() {
    for slot in DEVICE_TABLE.iter() {
        *slot.info.lock() = DeviceThrottleInfo::new();
        slot.refcnt.store(0, Ordering::Relaxed);
    }
    for m in MOUNT_DEVICE_REFS.iter() {
        *m.lock() = None;
    }
}

/// Returns the static device record at `index`, or `None` if out of range.
pub fn device_at_index(index: usize) -> Option<DeviceHandle> {
    DEVICE_TABLE
        .get(index)
        .map(|slot| device_acquire(DeviceHandle::Static(slot)))
}

/// Allocate a dynamic device record, refcount 1.
pub fn create() -> DeviceHandle {
    DeviceHandle::Dynamic(Arc::new(IrqMutex::new(DeviceThrottleInfo::new())))
}

/// Take a reference on a device record, returning the same handle for
/// call-site convenience (`let h = device_acquire(h);`).
pub fn device_acquire(handle: DeviceHandle) -> DeviceHandle {
    match &handle {
        DeviceHandle::Static(slot) => {
            slot.refcnt.fetch_add(1, Ordering::AcqRel);
        }
        DeviceHandle::Dynamic(_) => {
            // Arc::clone below performs the increment; nothing to do here.
        }
    }
    match handle {
        DeviceHandle::Static(slot) => DeviceHandle::Static(slot),
        DeviceHandle::Dynamic(arc) => DeviceHandle::Dynamic(arc.clone()),
    }
}

/// Drop one reference. Dynamic records are freed (by dropping the last
/// `Arc`) when the count reaches zero; static records are never freed.
pub fn release(handle: DeviceHandle) {
    match handle {
        DeviceHandle::Static(slot) => {
            slot.refcnt.fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| {
                Some(v.saturating_sub(1))
            }).ok();
        }
        DeviceHandle::Dynamic(arc) => {
            drop(arc);
        }
    }
}

/// Returns the record whose index equals the position of the lowest set
/// bit of `mask`, or `None` if the mask is zero or out of range.
pub fn acquire_by_mask(mask: u64) -> Option<DeviceHandle> {
    if mask == 0 {
        return None;
    }
    let index = mask.trailing_zeros() as usize;
    device_at_index(index)
}

pub fn release_by_mask(handle: DeviceHandle) {
    release(handle);
}

/// Attach a reference owned by filesystem mount `mount_id`. `mount_id`
/// indexes a small fixed table rather than a real `MountPoint`, because
/// `slopos_fs` does not depend on `slopos_core` in this workspace and the
/// throttler lives in `core`.
pub fn mount_ref(mount_id: usize, handle: DeviceHandle) {
    if mount_id >= MAX_MOUNTS {
        klog_warn!("throttle: mount_ref index {} out of range", mount_id);
        return;
    }
    let mut slot = MOUNT_DEVICE_REFS[mount_id].lock();
    if let Some(prev) = slot.take() {
        release(prev);
    }
    *slot = Some(device_acquire(handle));
}

pub fn mount_rel(mount_id: usize) {
    if mount_id >= MAX_MOUNTS {
        return;
    }
    if let Some(prev) = MOUNT_DEVICE_REFS[mount_id].lock().take() {
        release(prev);
    }
}

pub fn update_by_mount(mount_id: usize) -> Option<DeviceHandle> {
    MOUNT_DEVICE_REFS.get(mount_id).and_then(|s| s.lock().clone())
}

/// Disables throttling for a device that supports its own I/O scheduling
/// (e.g. NVMe). `is_fusion` selects the "fusion drive" mode which forces
/// HDD periods and leaves `disabled` unset.
///
/// The source sets `disabled = !fusion_with_priority` unconditionally,
/// meaning a fusion device can never be fully disabled through this path.
/// That behavior is preserved here rather than "fixed" (see DESIGN.md).
pub fn disable_throttle(device_index: usize, is_fusion: bool) {
    let Some(handle) = device_at_index(device_index) else {
        klog_warn!("throttle: disable_throttle bad index {}", device_index);
        return;
    };
    {
        let mut info = handle.lock();
        if is_fusion {
            info.fusion_with_priority = true;
        }
        info.disabled = !info.fusion_with_priority;
    }
    release(handle);
}
