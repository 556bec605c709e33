use core::ffi::{c_char, c_int, c_void};

use core::ptr;
use slopos_lib::testing::TestResult;

use slopos_lib::klog_info;
use slopos_lib::string;

use super::scheduler;
use super::task::{
    INVALID_PROCESS_ID, INVALID_TASK_ID, IdtEntry, TASK_FLAG_KERNEL_MODE, TASK_FLAG_USER_MODE,
    TASK_PRIORITY_NORMAL, Task, TaskContext, TaskIterateCb, task_create, task_get_info,
    task_get_total_yields, task_iterate_active, task_shutdown_all, task_state_to_string,
};
use crate::platform;

use super::ffi_boundary::simple_context_switch;

use slopos_mm::kernel_heap::kmalloc;
use slopos_mm::mm_constants::{PAGE_SIZE_4KB, PROCESS_CODE_START_VA};

use slopos_abi::arch::{SYSCALL_VECTOR, SegmentSelector};

/* ========================================================================
 * TEST TASK IMPLEMENTATIONS
 * ======================================================================== */
pub fn test_task_a(arg: *mut c_void) {
    let _ = arg;
    let mut counter: u32 = 0;

    klog_info!("Task A starting execution");

    while counter < 20 {
        klog_info!("Task A: iteration {}", counter);
        counter = counter.wrapping_add(1);

        if counter % 3 == 0 {
            klog_info!("Task A: yielding CPU");
            scheduler::r#yield();
        }
    }

    klog_info!("Task A completed");
}
pub fn test_task_b(arg: *mut c_void) {
    let _ = arg;

    let mut current_char: u8 = b'A';
    let mut iterations: u32 = 0;

    klog_info!("Task B starting execution");

    while iterations < 15 {
        klog_info!(
            "Task B: printing character '{}' ({}) (",
            current_char as char,
            current_char as c_int
        );
        platform::console_putc(current_char);
        klog_info!(")");

        current_char = current_char.wrapping_add(1);
        if current_char > b'Z' {
            current_char = b'A';
        }

        iterations = iterations.wrapping_add(1);
        if iterations % 2 == 0 {
            klog_info!("Task B: yielding CPU");
            scheduler::r#yield();
        }
    }

    klog_info!("Task B completed");
}

/* ========================================================================
 * SCHEDULER TEST FUNCTIONS
 * ======================================================================== */
pub fn run_scheduler_test() -> c_int {
    klog_info!("=== Starting SlopOS Cooperative Scheduler Test ===");

    if crate::task::init_task_manager() != 0 {
        klog_info!("Failed to initialize task manager");
        return -1;
    }

    if scheduler::init_scheduler() != 0 {
        klog_info!("Failed to initialize scheduler");
        return -1;
    }

    if scheduler::create_idle_task() != 0 {
        klog_info!("Failed to create idle task");
        return -1;
    }

    klog_info!("Creating test tasks...");

    let task_a_id = task_create(
        b"TestTaskA\0".as_ptr() as *const c_char,
        test_task_a,
        ptr::null_mut(),
        1,
        TASK_FLAG_KERNEL_MODE,
    );

    if task_a_id == INVALID_TASK_ID {
        klog_info!("Failed to create test task A");
        return -1;
    }

    klog_info!("Created Task A with ID {}", task_a_id);

    let task_b_id = task_create(
        b"TestTaskB\0".as_ptr() as *const c_char,
        test_task_b,
        ptr::null_mut(),
        1,
        TASK_FLAG_KERNEL_MODE,
    );

    if task_b_id == INVALID_TASK_ID {
        klog_info!("Failed to create test task B");
        return -1;
    }

    klog_info!("Created Task B with ID {}", task_b_id);

    let mut task_a_info: *mut Task = ptr::null_mut();
    let mut task_b_info: *mut Task = ptr::null_mut();

    if task_get_info(task_a_id, &mut task_a_info) != 0 {
        klog_info!("Failed to get task A info");
        return -1;
    }

    if task_get_info(task_b_id, &mut task_b_info) != 0 {
        klog_info!("Failed to get task B info");
        return -1;
    }

    if scheduler::schedule_task(task_a_info) != 0 {
        klog_info!("Failed to schedule task A");
        crate::task::task_terminate(task_a_id);
        crate::task::task_terminate(task_b_id);
        return -1;
    }

    if scheduler::schedule_task(task_b_info) != 0 {
        klog_info!("Failed to schedule task B");
        crate::task::task_terminate(task_a_id);
        crate::task::task_terminate(task_b_id);
        return -1;
    }

    klog_info!("Tasks scheduled, starting scheduler...");

    scheduler::enter_scheduler(0);
}

/* ========================================================================
 * PRIVILEGE SEPARATION TEST
 * ======================================================================== */

pub fn run_privilege_separation_invariant_test() -> TestResult {
    klog_info!("PRIVSEP_TEST: Checking privilege separation invariants");

    if crate::task::init_task_manager() != 0
        || scheduler::init_scheduler() != 0
        || scheduler::create_idle_task() != 0
    {
        klog_info!("PRIVSEP_TEST: init failed");
        return TestResult::Fail;
    }

    let user_task_id = task_create(
        b"UserStub\0".as_ptr() as *const c_char,
        unsafe { core::mem::transmute(PROCESS_CODE_START_VA as usize) },
        ptr::null_mut(),
        TASK_PRIORITY_NORMAL,
        TASK_FLAG_USER_MODE,
    );
    if user_task_id == INVALID_TASK_ID {
        klog_info!("PRIVSEP_TEST: user task creation failed");
        return TestResult::Fail;
    }

    let mut task_info: *mut Task = ptr::null_mut();
    if task_get_info(user_task_id, &mut task_info) != 0 || task_info.is_null() {
        klog_info!("PRIVSEP_TEST: task lookup failed");
        return TestResult::Fail;
    }

    let mut failed = 0;

    unsafe {
        if (*task_info).process_id == INVALID_PROCESS_ID {
            klog_info!("PRIVSEP_TEST: user task missing process VM");
            failed = 1;
        }
        if (*task_info).kernel_stack_top == 0 {
            klog_info!("PRIVSEP_TEST: user task missing kernel RSP0 stack");
            failed = 1;
        }
        let cs = (*task_info).context.cs;
        let ss = (*task_info).context.ss;
        if cs != SegmentSelector::USER_CODE.bits() as u64
            || ss != SegmentSelector::USER_DATA.bits() as u64
        {
            klog_info!(
                "PRIVSEP_TEST: user task selectors incorrect (cs=0x{:x} ss=0x{:x})",
                cs,
                ss
            );
            failed = 1;
        }
    }

    let mut gate = IdtEntry {
        offset_low: 0,
        selector: 0,
        ist: 0,
        type_attr: 0,
        offset_mid: 0,
        offset_high: 0,
        zero: 0,
    };

    let gate_ptr = &mut gate as *mut IdtEntry as *mut c_void;
    if crate::platform::idt_get_gate(SYSCALL_VECTOR, gate_ptr) != 0 {
        klog_info!("PRIVSEP_TEST: cannot read syscall gate");
        failed = 1;
    } else {
        let dpl = (gate.type_attr >> 5) & 0x3;
        if dpl != 3 {
            klog_info!("PRIVSEP_TEST: syscall gate DPL={} expected 3", dpl as u32);
            failed = 1;
        }
    }

    task_shutdown_all();
    scheduler::scheduler_shutdown();

    if failed != 0 {
        klog_info!("PRIVSEP_TEST: FAILED");
        return TestResult::Fail;
    }

    klog_info!("PRIVSEP_TEST: PASSED");
    TestResult::Pass
}

/* ========================================================================
 * CONTEXT SWITCH SMOKE TEST
 * ======================================================================== */

#[repr(C)]
pub struct SmokeTestContext {
    pub initial_stack_top: u64,
    pub min_stack_pointer: u64,
    pub max_stack_pointer: u64,
    pub yield_count: u32,
    pub test_failed: c_int,
    pub task_name: *const c_char,
}

static mut KERNEL_RETURN_CONTEXT: TaskContext = const { TaskContext::zero() };
static mut TEST_COMPLETED_PTR: *mut c_int = ptr::null_mut();
pub fn smoke_test_task_impl(ctx: *mut SmokeTestContext) {
    if ctx.is_null() {
        return;
    }
    let ctx_ref = unsafe { &mut *ctx };
    let mut stack_base: u64 = 0;

    unsafe {
        core::arch::asm!("mov {}, rsp", out(reg) stack_base);
    }
    ctx_ref.initial_stack_top = stack_base;
    ctx_ref.min_stack_pointer = stack_base;
    ctx_ref.max_stack_pointer = stack_base;
    ctx_ref.yield_count = 0;
    ctx_ref.test_failed = 0;

    let name = if ctx_ref.task_name.is_null() {
        b"SmokeTest\0".as_ptr() as *const c_char
    } else {
        ctx_ref.task_name
    };

    let name_str = unsafe { string::cstr_to_str(name) };
    klog_info!("{}: Starting (initial RSP=0x{:x})", name_str, stack_base);

    let mut iteration: u32 = 0;
    let target_yields: u32 = 100;

    while ctx_ref.yield_count < target_yields {
        let mut current_rsp: u64 = 0;
        unsafe {
            core::arch::asm!("mov {}, rsp", out(reg) current_rsp);
        }

        if current_rsp < ctx_ref.min_stack_pointer {
            ctx_ref.min_stack_pointer = current_rsp;
        }
        if current_rsp > ctx_ref.max_stack_pointer {
            ctx_ref.max_stack_pointer = current_rsp;
        }

        let stack_growth = ctx_ref
            .initial_stack_top
            .saturating_sub(ctx_ref.min_stack_pointer);
        if stack_growth > PAGE_SIZE_4KB {
            klog_info!(
                "{}: ERROR - Stack growth exceeds one page: 0x{:x} bytes",
                name_str,
                stack_growth
            );
            ctx_ref.test_failed = 1;
            break;
        }

        iteration = iteration.wrapping_add(1);
        if iteration % 50 == 0 {
            klog_info!(
                "{}: Iteration {} (yields: {}, RSP=0x{:x})",
                name_str,
                iteration,
                ctx_ref.yield_count,
                current_rsp
            );
        }

        scheduler::r#yield();
        ctx_ref.yield_count = ctx_ref.yield_count.wrapping_add(1);
    }

    klog_info!("{}: Completed {} yields", name_str, ctx_ref.yield_count);
    klog_info!(
        "{}: Stack range: min=0x{:x} max=0x{:x} growth=0x{:x} bytes",
        name_str,
        ctx_ref.min_stack_pointer,
        ctx_ref.max_stack_pointer,
        ctx_ref
            .initial_stack_top
            .saturating_sub(ctx_ref.min_stack_pointer)
    );
    if ctx_ref.test_failed != 0 {
        klog_info!("{}: FAILED - Stack corruption detected", name_str);
    } else {
        klog_info!("{}: PASSED - No stack corruption", name_str);
    }
}
pub fn smoke_test_task_a(arg: *mut c_void) {
    let ctx = arg as *mut SmokeTestContext;
    if ctx.is_null() {
        return;
    }
    unsafe { (*ctx).task_name = b"SmokeTestA\0".as_ptr() as *const c_char };
    smoke_test_task_impl(ctx);
}
pub fn smoke_test_task_b(arg: *mut c_void) {
    let ctx = arg as *mut SmokeTestContext;
    if ctx.is_null() {
        return;
    }
    unsafe { (*ctx).task_name = b"SmokeTestB\0".as_ptr() as *const c_char };
    smoke_test_task_impl(ctx);
}
pub fn run_context_switch_smoke_test() -> c_int {
    klog_info!("=== Context Switch Stack Discipline Smoke Test ===");
    klog_info!("Testing basic context switch functionality");

    static mut TEST_COMPLETED: c_int = 0;
    unsafe {
        TEST_COMPLETED = 0;
        TEST_COMPLETED_PTR = &raw mut TEST_COMPLETED;
    }

    let mut test_ctx = TaskContext::default();
    test_ctx.rax = 0;
    test_ctx.rbx = 0;
    test_ctx.rcx = 0;
    test_ctx.rdx = 0;
    test_ctx.rsi = 0;
    test_ctx.rdi = unsafe { TEST_COMPLETED_PTR as u64 };
    test_ctx.rbp = 0;
    test_ctx.rip = test_task_function as *const () as usize as u64;
    test_ctx.rflags = 0x202;
    test_ctx.cs = 0x08;
    test_ctx.ds = 0x10;
    test_ctx.es = 0x10;
    test_ctx.fs = 0;
    test_ctx.gs = 0;
    test_ctx.ss = 0x10;
    test_ctx.cr3 = 0;

    let stack = kmalloc(PAGE_SIZE_4KB as usize) as *mut u64;
    if stack.is_null() {
        klog_info!("Failed to allocate stack for test task");
        return -1;
    }
    let stack_slots = PAGE_SIZE_4KB as usize / core::mem::size_of::<u64>();
    test_ctx.rsp = unsafe { stack.add(stack_slots) } as u64;

    klog_info!("Switching to test context...");

    let mut current_rsp: u64 = 0;
    unsafe {
        core::arch::asm!("mov {}, rsp", out(reg) current_rsp);
        KERNEL_RETURN_CONTEXT.rip = context_switch_return_trampoline as *const () as usize as u64;
        KERNEL_RETURN_CONTEXT.rsp = current_rsp;
        KERNEL_RETURN_CONTEXT.cs = 0x08;
        KERNEL_RETURN_CONTEXT.ss = 0x10;
        KERNEL_RETURN_CONTEXT.ds = 0x10;
        KERNEL_RETURN_CONTEXT.es = 0x10;
        KERNEL_RETURN_CONTEXT.fs = 0;
        KERNEL_RETURN_CONTEXT.gs = 0;
        KERNEL_RETURN_CONTEXT.rflags = 0x202;
    }

    let mut dummy_old = TaskContext::default();
    unsafe {
        simple_context_switch(&mut dummy_old, &test_ctx);
    }

    unsafe { core::hint::unreachable_unchecked() }
}
pub fn test_task_function(completed_flag: *mut c_int) {
    klog_info!("Test task function executed successfully");
    if !completed_flag.is_null() {
        unsafe {
            *completed_flag = 1;
        }
    }

    let mut dummy = TaskContext::default();
    unsafe {
        simple_context_switch(&mut dummy, &raw const KERNEL_RETURN_CONTEXT);
    }
}
pub fn context_switch_return_trampoline() -> c_int {
    klog_info!("Context switch returned successfully");

    let completed = unsafe {
        if TEST_COMPLETED_PTR.is_null() {
            0
        } else {
            *TEST_COMPLETED_PTR
        }
    };

    if completed != 0 {
        klog_info!("CONTEXT_SWITCH_TEST: Basic switch test PASSED");
        0
    } else {
        klog_info!("CONTEXT_SWITCH_TEST: Basic switch test FAILED");
        -1
    }
}

/* ========================================================================
 * SCHEDULER STATISTICS AND MONITORING
 * ======================================================================== */

#[repr(C)]
struct TaskStatPrintCtx {
    index: u32,
}

fn print_task_stat_line(task: *mut Task, context: *mut c_void) {
    let ctx = unsafe { &mut *(context as *mut TaskStatPrintCtx) };
    ctx.index = ctx.index.wrapping_add(1);

    let name_str = string::bytes_as_str(&unsafe { &*task }.name);
    let state_str = task_state_to_string(unsafe { (*task).status() });
    unsafe {
        klog_info!(
            "  #{} '{}' (ID {}) [{}] runtime={} ticks yields={}",
            ctx.index,
            name_str,
            (*task).task_id,
            state_str,
            (*task).total_runtime as u64,
            (*task).yield_count as u64
        );
    }
}
pub fn print_scheduler_stats() {
    use super::scheduler::get_scheduler_stats;
    use super::task::get_task_stats;

    let mut sched_switches: u64 = 0;
    let mut sched_yields: u64 = 0;
    let mut ready_tasks: u32 = 0;
    let mut schedule_calls: u32 = 0;
    let mut total_tasks: u32 = 0;
    let mut active_tasks: u32 = 0;
    let mut task_switches: u64 = 0;
    let task_yields = task_get_total_yields();

    get_scheduler_stats(
        &mut sched_switches,
        &mut sched_yields,
        &mut ready_tasks,
        &mut schedule_calls,
    );
    get_task_stats(&mut total_tasks, &mut active_tasks, &mut task_switches);

    klog_info!("\n=== Scheduler Statistics ===");
    klog_info!("Context switches: {}", sched_switches);
    klog_info!("Voluntary yields: {}", sched_yields);
    klog_info!("Schedule calls: {}", schedule_calls);
    klog_info!("Ready tasks: {}", ready_tasks);
    klog_info!("Total tasks created: {}", total_tasks);
    klog_info!("Active tasks: {}", active_tasks);
    klog_info!("Task yields (aggregate): {}", task_yields);
    klog_info!("Active task metrics:");

    let mut ctx = TaskStatPrintCtx { index: 0 };
    let callback: TaskIterateCb = Some(print_task_stat_line);
    task_iterate_active(callback, &mut ctx as *mut _ as *mut c_void);
    if ctx.index == 0 {
        klog_info!("  (no active tasks)");
    }
}

slopos_lib::define_test_suite!(privsep, run_privilege_separation_invariant_test, single);
