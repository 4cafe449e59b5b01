use crate::pty::{self, PtyError};
use crate::vfs::{FileStat, FileSystem, FileType, InodeId, VfsError, VfsResult};
use slopos_lib::IrqMutex;
use slopos_lib::kernel_services::driver_runtime::current_task_id;

const ROOT_INODE: InodeId = 1;
const NULL_INODE: InodeId = 2;
const ZERO_INODE: InodeId = 3;
const URANDOM_INODE: InodeId = 4;
const CONSOLE_INODE: InodeId = 5;
const PTMX_INODE: InodeId = 6;
const PTS_DIR_INODE: InodeId = 7;

/// Base of the synthetic per-pair inode range `devfs` hands back from
/// `lookup("ptmx")`/`lookup("pts", "<N>")`, matching the `PTMX_INODE_BASE +
/// index` scheme in the design note this implements — later read/write/ioctl
/// recover the pair index by subtracting the base rather than chasing a
/// pointer.
const PTY_MASTER_BASE: InodeId = 0x1_0000_0000;
const PTY_SLAVE_BASE: InodeId = 0x2_0000_0000;

fn pty_master_inode(idx: usize) -> InodeId {
    PTY_MASTER_BASE + idx as InodeId
}

fn pty_slave_inode(idx: usize) -> InodeId {
    PTY_SLAVE_BASE + idx as InodeId
}

fn as_pty_master_idx(inode: InodeId) -> Option<usize> {
    if inode >= PTY_MASTER_BASE && inode < PTY_MASTER_BASE + pty::PTY_MAX as InodeId {
        Some((inode - PTY_MASTER_BASE) as usize)
    } else {
        None
    }
}

fn as_pty_slave_idx(inode: InodeId) -> Option<usize> {
    if inode >= PTY_SLAVE_BASE && inode < PTY_SLAVE_BASE + pty::PTY_MAX as InodeId {
        Some((inode - PTY_SLAVE_BASE) as usize)
    } else {
        None
    }
}

fn pty_error_to_vfs(err: PtyError) -> VfsError {
    match err {
        PtyError::PoolExhausted => VfsError::NoSpace,
        PtyError::NotAllocated => VfsError::NotFound,
        PtyError::SlaveLocked => VfsError::PermissionDenied,
        PtyError::WouldBlock => VfsError::WouldBlock,
        PtyError::Eof => VfsError::IoError,
        PtyError::NotATty => VfsError::NotSupported,
        PtyError::Fault => VfsError::IoError,
    }
}

/// Formats `n` into decimal ASCII for the `/dev/pts/<N>` directory listing.
fn write_decimal(mut n: usize, out: &mut [u8; 20]) -> usize {
    if n == 0 {
        out[0] = b'0';
        return 1;
    }
    let mut tmp = [0u8; 20];
    let mut i = 0;
    while n > 0 {
        tmp[i] = b'0' + (n % 10) as u8;
        n /= 10;
        i += 1;
    }
    for j in 0..i {
        out[j] = tmp[i - 1 - j];
    }
    i
}

/// Parses a `/dev/pts/<N>` directory entry name back into a pool index.
fn parse_decimal(name: &[u8]) -> Option<usize> {
    if name.is_empty() {
        return None;
    }
    let mut value: usize = 0;
    for &b in name {
        if !b.is_ascii_digit() {
            return None;
        }
        value = value.checked_mul(10)?.checked_add((b - b'0') as usize)?;
    }
    Some(value)
}

/// Number of RDRAND retries before a read is treated as failed, matching
/// Intel's guidance that a transient underflow can fail several reads in a
/// row without the generator itself being broken.
const RDRAND_RETRIES: u32 = 10;

fn cpu_has_rdrand() -> bool {
    use core::sync::atomic::{AtomicU8, Ordering};
    static CACHED: AtomicU8 = AtomicU8::new(2);
    match CACHED.load(Ordering::Relaxed) {
        0 => return false,
        1 => return true,
        _ => {}
    }
    let supported = unsafe { (core::arch::x86_64::__cpuid(1).ecx & (1 << 30)) != 0 };
    CACHED.store(if supported { 1 } else { 0 }, Ordering::Relaxed);
    supported
}

/// Draw one RDRAND word, retrying on transient underflow. `None` means the
/// CPU lacks RDRAND or it failed on every retry.
fn rdrand_u64() -> Option<u64> {
    if !cpu_has_rdrand() {
        return None;
    }
    for _ in 0..RDRAND_RETRIES {
        let mut value: u64 = 0;
        // SAFETY: RDRAND support was just checked via CPUID.01h:ECX.30.
        if unsafe { core::arch::x86_64::_rdrand64_step(&mut value) } == 1 {
            return Some(value);
        }
    }
    None
}

use crate::MAX_NAME_LEN;

struct DeviceEntry {
    name: [u8; MAX_NAME_LEN],
    name_len: usize,
    inode: InodeId,
    major: u32,
    minor: u32,
}

impl DeviceEntry {
    const fn new(name: &[u8], inode: InodeId, major: u32, minor: u32) -> Self {
        let mut entry = Self {
            name: [0; MAX_NAME_LEN],
            name_len: 0,
            inode,
            major,
            minor,
        };
        let len = if name.len() < MAX_NAME_LEN {
            name.len()
        } else {
            MAX_NAME_LEN
        };
        let mut i = 0;
        while i < len {
            entry.name[i] = name[i];
            i += 1;
        }
        entry.name_len = len;
        entry
    }
}

static DEVICES: [DeviceEntry; 6] = [
    DeviceEntry::new(b"null", NULL_INODE, 1, 3),
    DeviceEntry::new(b"zero", ZERO_INODE, 1, 5),
    DeviceEntry::new(b"urandom", URANDOM_INODE, 1, 9),
    DeviceEntry::new(b"console", CONSOLE_INODE, 5, 1),
    DeviceEntry::new(b"ptmx", PTMX_INODE, 5, 2),
    DeviceEntry::new(b"pts", PTS_DIR_INODE, 0, 0),
];

struct DevFsInner {
    /// XORed with writes to /dev/urandom, in the spirit of Linux's entropy
    /// pool feedback, though it never influences RDRAND output itself.
    write_feedback: u64,
}

impl DevFsInner {
    const fn new() -> Self {
        Self {
            write_feedback: 0,
        }
    }
}

pub struct DevFs {
    inner: IrqMutex<DevFsInner>,
}

impl DevFs {
    pub const fn new() -> Self {
        Self {
            inner: IrqMutex::new(DevFsInner::new()),
        }
    }
}

impl Default for DevFs {
    fn default() -> Self {
        Self::new()
    }
}

impl FileSystem for DevFs {
    fn name(&self) -> &'static str {
        "devfs"
    }

    fn root_inode(&self) -> InodeId {
        ROOT_INODE
    }

    fn lookup(&self, parent: InodeId, name: &[u8]) -> VfsResult<InodeId> {
        if parent == PTS_DIR_INODE {
            if name == b"." {
                return Ok(PTS_DIR_INODE);
            }
            if name == b".." {
                return Ok(ROOT_INODE);
            }
            let idx = parse_decimal(name).ok_or(VfsError::NotFound)?;
            if idx < pty::PTY_MAX && pty::pty_is_allocated(idx) {
                return Ok(pty_slave_inode(idx));
            }
            return Err(VfsError::NotFound);
        }

        if parent != ROOT_INODE {
            return Err(VfsError::NotDirectory);
        }

        if name == b"." || name == b".." {
            return Ok(ROOT_INODE);
        }

        // Unlike the other static devices, `ptmx` mints a fresh pair on
        // every lookup rather than naming a fixed inode.
        if name == b"ptmx" {
            let idx = pty::pty_alloc().map_err(pty_error_to_vfs)?;
            return Ok(pty_master_inode(idx));
        }

        for dev in &DEVICES {
            if dev.name_len == name.len() && &dev.name[..dev.name_len] == name {
                return Ok(dev.inode);
            }
        }

        Err(VfsError::NotFound)
    }

    fn stat(&self, inode: InodeId) -> VfsResult<FileStat> {
        if inode == ROOT_INODE || inode == PTS_DIR_INODE {
            return Ok(FileStat::new_directory(inode));
        }

        if let Some(idx) = as_pty_master_idx(inode) {
            return Ok(FileStat::new_char_device(inode, 5, 2 + idx as u32));
        }
        if let Some(idx) = as_pty_slave_idx(inode) {
            return Ok(FileStat::new_char_device(inode, 136, idx as u32));
        }

        for dev in &DEVICES {
            if dev.inode == inode && dev.inode != PTS_DIR_INODE {
                return Ok(FileStat::new_char_device(inode, dev.major, dev.minor));
            }
        }

        Err(VfsError::NotFound)
    }

    fn read(&self, inode: InodeId, _offset: u64, buf: &mut [u8]) -> VfsResult<usize> {
        if let Some(idx) = as_pty_master_idx(inode) {
            return pty::pty_master_read(idx, buf).map_err(pty_error_to_vfs);
        }
        if let Some(idx) = as_pty_slave_idx(inode) {
            return pty::pty_slave_read(idx, buf).map_err(pty_error_to_vfs);
        }

        match inode {
            NULL_INODE => Ok(0),

            ZERO_INODE => {
                buf.fill(0);
                Ok(buf.len())
            }

            URANDOM_INODE => {
                let mut pos = 0;
                while pos < buf.len() {
                    let Some(val) = rdrand_u64() else {
                        return Err(VfsError::IoError);
                    };
                    let bytes = val.to_le_bytes();
                    let take = (buf.len() - pos).min(8);
                    buf[pos..pos + take].copy_from_slice(&bytes[..take]);
                    pos += take;
                }
                Ok(pos)
            }

            CONSOLE_INODE => Ok(0),

            ROOT_INODE | PTS_DIR_INODE => Err(VfsError::IsDirectory),

            _ => Err(VfsError::NotFound),
        }
    }

    fn write(&self, inode: InodeId, _offset: u64, buf: &[u8]) -> VfsResult<usize> {
        if let Some(idx) = as_pty_master_idx(inode) {
            return pty::pty_master_write(idx, buf).map_err(pty_error_to_vfs);
        }
        if let Some(idx) = as_pty_slave_idx(inode) {
            return pty::pty_slave_write(idx, buf).map_err(pty_error_to_vfs);
        }

        match inode {
            NULL_INODE | ZERO_INODE => Ok(buf.len()),

            URANDOM_INODE => {
                // Linux treats writes to /dev/urandom as entropy contributions
                // that stir the pool but never determine future output.
                let mut inner = self.inner.lock();
                for chunk in buf.chunks(8) {
                    let mut bytes = [0u8; 8];
                    bytes[..chunk.len()].copy_from_slice(chunk);
                    inner.write_feedback ^= u64::from_le_bytes(bytes);
                }
                Ok(buf.len())
            }

            CONSOLE_INODE => Ok(buf.len()),

            ROOT_INODE | PTS_DIR_INODE => Err(VfsError::IsDirectory),

            _ => Err(VfsError::NotFound),
        }
    }

    fn create(&self, _parent: InodeId, _name: &[u8], _file_type: FileType) -> VfsResult<InodeId> {
        Err(VfsError::ReadOnly)
    }

    fn unlink(&self, _parent: InodeId, _name: &[u8]) -> VfsResult<()> {
        Err(VfsError::ReadOnly)
    }

    fn readdir(
        &self,
        inode: InodeId,
        offset: usize,
        callback: &mut dyn FnMut(&[u8], InodeId, FileType) -> bool,
    ) -> VfsResult<usize> {
        if inode == PTS_DIR_INODE {
            let mut count = 0;
            let mut current = 0;

            for (name, dir_inode) in [(&b"."[..], PTS_DIR_INODE), (&b".."[..], ROOT_INODE)] {
                if current >= offset {
                    if !callback(name, dir_inode, FileType::Directory) {
                        return Ok(count);
                    }
                    count += 1;
                }
                current += 1;
            }

            for idx in 0..pty::PTY_MAX {
                if !pty::pty_is_allocated(idx) {
                    continue;
                }
                if current >= offset {
                    let mut digits = [0u8; 20];
                    let len = write_decimal(idx, &mut digits);
                    if !callback(&digits[..len], pty_slave_inode(idx), FileType::CharDevice) {
                        return Ok(count);
                    }
                    count += 1;
                }
                current += 1;
            }

            return Ok(count);
        }

        if inode != ROOT_INODE {
            return Err(VfsError::NotDirectory);
        }

        let mut count = 0;
        let mut current = 0;

        if current >= offset {
            if !callback(b".", ROOT_INODE, FileType::Directory) {
                return Ok(count);
            }
            count += 1;
        }
        current += 1;

        if current >= offset {
            if !callback(b"..", ROOT_INODE, FileType::Directory) {
                return Ok(count);
            }
            count += 1;
        }
        current += 1;

        for dev in &DEVICES {
            if current >= offset {
                let file_type = if dev.inode == PTS_DIR_INODE {
                    FileType::Directory
                } else {
                    FileType::CharDevice
                };
                if !callback(&dev.name[..dev.name_len], dev.inode, file_type) {
                    return Ok(count);
                }
                count += 1;
            }
            current += 1;
        }

        Ok(count)
    }

    fn truncate(&self, _inode: InodeId, _size: u64) -> VfsResult<()> {
        Err(VfsError::NotSupported)
    }

    fn sync(&self) -> VfsResult<()> {
        Ok(())
    }

    fn ioctl(&self, inode: InodeId, request: u64, arg: usize) -> VfsResult<i64> {
        let task_id = current_task_id();
        if let Some(idx) = as_pty_master_idx(inode) {
            return pty::pty_ioctl(idx, request, arg, task_id).map_err(pty_error_to_vfs);
        }
        if let Some(idx) = as_pty_slave_idx(inode) {
            return pty::pty_ioctl(idx, request, arg, task_id).map_err(pty_error_to_vfs);
        }
        Err(VfsError::NotSupported)
    }

    fn poll(&self, inode: InodeId, events: u16) -> VfsResult<u16> {
        if let Some(idx) = as_pty_master_idx(inode) {
            return Ok(pty::pty_master_poll(idx, events));
        }
        if let Some(idx) = as_pty_slave_idx(inode) {
            return Ok(pty::pty_slave_poll(idx, events));
        }
        Ok(events & (slopos_abi::syscall::POLLIN | slopos_abi::syscall::POLLOUT))
    }

    fn isatty(&self, inode: InodeId) -> bool {
        inode == CONSOLE_INODE
            || as_pty_master_idx(inode).is_some()
            || as_pty_slave_idx(inode).is_some()
    }

    /// `ptmx`'s fresh pair is already minted by `lookup`; the slave side of
    /// an existing pair still needs its open-time lock check and refcount
    /// bump, matching the pty pool's "slave open increments refcount"
    /// lifecycle rule.
    fn open(&self, inode: InodeId) -> VfsResult<InodeId> {
        if let Some(idx) = as_pty_slave_idx(inode) {
            pty::pty_slave_open(idx).map_err(pty_error_to_vfs)?;
        }
        Ok(inode)
    }

    fn close(&self, inode: InodeId) {
        if let Some(idx) = as_pty_master_idx(inode) {
            pty::pty_master_close(idx);
        } else if let Some(idx) = as_pty_slave_idx(inode) {
            pty::pty_slave_close(idx);
        }
    }
}

unsafe impl Send for DevFs {}
unsafe impl Sync for DevFs {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ptmx_lookup_allocates_and_opens_master() {
        let fs = DevFs::new();
        let inode = fs.lookup(ROOT_INODE, b"ptmx").expect("ptmx resolves");
        assert!(as_pty_master_idx(inode).is_some());
        assert!(fs.isatty(inode));
    }

    #[test]
    fn pts_entry_appears_after_ptmx_lookup() {
        let fs = DevFs::new();
        let master = fs.lookup(ROOT_INODE, b"ptmx").expect("ptmx resolves");
        let idx = as_pty_master_idx(master).unwrap();

        let mut digits = [0u8; 20];
        let len = write_decimal(idx, &mut digits);
        let pts_dir = fs.lookup(ROOT_INODE, b"pts").expect("pts dir resolves");
        let slave = fs
            .lookup(pts_dir, &digits[..len])
            .expect("pts/<N> resolves once allocated");
        assert_eq!(slave, pty_slave_inode(idx));
    }

    #[test]
    fn pts_slave_open_fails_while_locked() {
        let fs = DevFs::new();
        let master = fs.lookup(ROOT_INODE, b"ptmx").expect("ptmx resolves");
        let idx = as_pty_master_idx(master).unwrap();
        let slave_inode = pty_slave_inode(idx);
        assert_eq!(fs.open(slave_inode), Err(VfsError::PermissionDenied));
    }
}
