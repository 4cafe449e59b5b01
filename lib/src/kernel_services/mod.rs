pub mod driver_runtime;
pub mod platform;
pub mod process_info;
pub mod syscall_services;
