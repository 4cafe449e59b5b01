//! Builtin filesystem bring-up.
//!
//! Mounts the filesystems that exist independent of any block device: a
//! tmpfs at `/` so early boot (and tests) always have a writable root, and
//! devfs at `/dev` for device nodes. Disk-backed filesystems (ext2, FAT32)
//! mount later once the storage driver has enumerated a device.

use core::sync::atomic::{AtomicBool, Ordering};

use crate::devfs::DevFs;
use crate::procfs::ProcFs;
use crate::ramfs::RamFs;
use crate::vfs::mount::mount;
use crate::vfs::traits::VfsResult;

static ROOT_TMPFS: RamFs = RamFs::new_const();
static DEV_DEVFS: DevFs = DevFs::new();
static PROC_PROCFS: ProcFs = ProcFs::new();

static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Mounts the builtin, device-independent filesystems. Idempotent: later
/// callers after the first successful call are no-ops.
pub fn vfs_init_builtin_filesystems() -> VfsResult<()> {
    if INITIALIZED.load(Ordering::Acquire) {
        return Ok(());
    }

    mount(b"/", &ROOT_TMPFS, 0)?;
    mount(b"/dev", &DEV_DEVFS, 0)?;
    mount(b"/proc", &PROC_PROCFS, 0)?;

    INITIALIZED.store(true, Ordering::Release);
    Ok(())
}

pub fn vfs_is_initialized() -> bool {
    INITIALIZED.load(Ordering::Acquire)
}
