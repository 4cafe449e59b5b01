use core::ffi::c_void;

use slopos_abi::task::ProcTaskSnapshot;

/// Callback invoked once per live task by `for_each_task`. `snapshot` points
/// at a stack-local `ProcTaskSnapshot` valid only for the duration of the
/// call; copy out anything needed.
pub type ProcTaskVisitor = fn(snapshot: *const ProcTaskSnapshot, context: *mut c_void);

crate::define_service! {
    process_info => ProcessInfoServices {
        snapshot_task(task_id: u32, out: *mut ProcTaskSnapshot) -> bool;
        for_each_task(callback: Option<ProcTaskVisitor>, context: *mut c_void);
        task_count() -> u32;
    }
}
