//! `/proc` — synthesised, read-only process information files.
//!
//! Grounded on `examples/original_source/modules/kern/src/vfs/fs/procfs.cpp`:
//! `status`/`exe`/`self`/`mounts` content generation mirrors
//! `generate_status`/`generate_mounts`/the `self`-link formatting there, but
//! content is regenerated fresh on every `read()` rather than cached in a
//! `kmalloc`'d buffer hung off `File::private_data` — this port has no
//! per-open file state to hang a cache from, and a `/proc` file is cheap
//! enough to regenerate that the cache bought nothing but the free-on-close
//! bookkeeping the original needed.
//!
//! Task data crosses from `slopos-core` through the `process_info` service
//! seam (`slopos_lib::kernel_services::process_info`) so this crate never
//! depends on the scheduler directly.

use core::ffi::c_void;

use crate::vfs::mount::with_mount_table;
use crate::vfs::{FileStat, FileSystem, FileType, InodeId, VfsError, VfsResult};
use slopos_abi::task::ProcTaskSnapshot;
use slopos_lib::kernel_services::driver_runtime::current_task_id;
use slopos_lib::kernel_services::process_info::{ProcTaskVisitor, for_each_task, snapshot_task};

const ROOT_INODE: InodeId = 1;
const MOUNTS_INODE: InodeId = 2;
const SELF_INODE: InodeId = 3;

const KIND_PID_DIR: u64 = 1;
const KIND_STATUS: u64 = 2;
const KIND_EXE: u64 = 3;

/// Large enough for a `status` dump or an `exe_path`; procfs files are small
/// and synthetic, never user-supplied.
const CONTENT_BUF_LEN: usize = 4096;

fn pack(kind: u64, task_id: u32) -> InodeId {
    (kind << 32) | task_id as InodeId
}

fn unpack(inode: InodeId) -> (u64, u32) {
    (inode >> 32, inode as u32)
}

fn parse_pid(name: &[u8]) -> Option<u32> {
    if name.is_empty() {
        return None;
    }
    let mut value: u32 = 0;
    for &b in name {
        if !b.is_ascii_digit() {
            return None;
        }
        value = value.checked_mul(10)?.checked_add((b - b'0') as u32)?;
    }
    Some(value)
}

fn write_decimal(mut n: u64, out: &mut [u8; 20]) -> usize {
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

/// Appends ASCII into a fixed buffer, truncating silently past capacity —
/// matches the original's `append`/`append_int` lambdas, which stop writing
/// once `off < bufsz - 1` fails rather than growing the buffer.
struct Writer<'a> {
    buf: &'a mut [u8],
    len: usize,
}

impl<'a> Writer<'a> {
    fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, len: 0 }
    }

    fn push(&mut self, s: &[u8]) {
        let avail = self.buf.len() - self.len;
        let take = s.len().min(avail);
        self.buf[self.len..self.len + take].copy_from_slice(&s[..take]);
        self.len += take;
    }

    fn push_u64(&mut self, v: u64) {
        let mut digits = [0u8; 20];
        let n = write_decimal(v, &mut digits);
        self.push(&digits[..n]);
    }
}

fn lookup_snapshot(task_id: u32) -> Option<ProcTaskSnapshot> {
    let mut snap = ProcTaskSnapshot::empty();
    if snapshot_task(task_id, &mut snap as *mut ProcTaskSnapshot) {
        Some(snap)
    } else {
        None
    }
}

fn task_exists(task_id: u32) -> bool {
    lookup_snapshot(task_id).is_some()
}

fn generate_status(task_id: u32, buf: &mut [u8]) -> VfsResult<usize> {
    let snap = lookup_snapshot(task_id).ok_or(VfsError::NotFound)?;
    let mut w = Writer::new(buf);
    w.push(b"Name:\t");
    if snap.exe_path_len > 0 {
        w.push(&snap.exe_path[..snap.exe_path_len as usize]);
    } else {
        w.push(b"(unknown)");
    }
    w.push(b"\nPid:\t");
    w.push_u64(snap.task_id as u64);
    w.push(b"\nPPid:\t");
    w.push_u64(snap.parent_task_id as u64);
    w.push(b"\nUid:\t");
    w.push_u64(snap.uid as u64);
    w.push(b"\t");
    w.push_u64(snap.euid as u64);
    w.push(b"\t");
    w.push_u64(snap.suid as u64);
    w.push(b"\t");
    w.push_u64(snap.uid as u64);
    w.push(b"\nGid:\t");
    w.push_u64(snap.gid as u64);
    w.push(b"\t");
    w.push_u64(snap.egid as u64);
    w.push(b"\t");
    w.push_u64(snap.sgid as u64);
    w.push(b"\t");
    w.push_u64(snap.gid as u64);
    w.push(b"\n");
    Ok(w.len)
}

fn generate_exe(task_id: u32, buf: &mut [u8]) -> VfsResult<usize> {
    let snap = lookup_snapshot(task_id).ok_or(VfsError::NotFound)?;
    let mut w = Writer::new(buf);
    w.push(&snap.exe_path[..snap.exe_path_len as usize]);
    Ok(w.len)
}

fn generate_self(buf: &mut [u8]) -> VfsResult<usize> {
    let task_id = current_task_id();
    let mut w = Writer::new(buf);
    w.push(b"/proc/");
    w.push_u64(task_id as u64);
    Ok(w.len)
}

fn generate_mounts(buf: &mut [u8]) -> VfsResult<usize> {
    let mut w = Writer::new(buf);
    with_mount_table(|mt| {
        mt.for_each_mount(&mut |fstype, path| {
            w.push(fstype.as_bytes());
            w.push(b" ");
            w.push(path);
            w.push(b" ");
            w.push(fstype.as_bytes());
            w.push(b" rw 0 0\n");
            true
        });
    });
    Ok(w.len)
}

fn generate_content(inode: InodeId, buf: &mut [u8]) -> VfsResult<usize> {
    if inode == MOUNTS_INODE {
        return generate_mounts(buf);
    }
    if inode == SELF_INODE {
        return generate_self(buf);
    }
    let (kind, task_id) = unpack(inode);
    match kind {
        KIND_STATUS => generate_status(task_id, buf),
        KIND_EXE => generate_exe(task_id, buf),
        _ => Err(VfsError::NotFound),
    }
}

/// Context threaded through `for_each_task` while listing `/proc`'s root
/// directory, mirroring `TaskVisitContext` in `slopos_core::driver_hooks`.
struct DirVisitContext<'cb> {
    offset: usize,
    current: usize,
    count: usize,
    stop: bool,
    callback: &'cb mut dyn FnMut(&[u8], InodeId, FileType) -> bool,
}

fn visit_task_for_readdir(snapshot: *const ProcTaskSnapshot, ctx: *mut c_void) {
    if snapshot.is_null() || ctx.is_null() {
        return;
    }
    // SAFETY: `ctx` was built from a live `&mut DirVisitContext` in
    // `readdir_root` for the duration of the `for_each_task` call below.
    let ctx = unsafe { &mut *ctx.cast::<DirVisitContext>() };
    if ctx.stop {
        return;
    }
    // SAFETY: valid for the duration of this call per `ProcTaskVisitor`'s contract.
    let snap = unsafe { &*snapshot };

    if ctx.current >= ctx.offset {
        let mut digits = [0u8; 20];
        let len = write_decimal(snap.task_id as u64, &mut digits);
        if !(ctx.callback)(
            &digits[..len],
            pack(KIND_PID_DIR, snap.task_id),
            FileType::Directory,
        ) {
            ctx.stop = true;
            return;
        }
        ctx.count += 1;
    }
    ctx.current += 1;
}

pub struct ProcFs;

impl ProcFs {
    pub const fn new() -> Self {
        Self
    }
}

impl Default for ProcFs {
    fn default() -> Self {
        Self::new()
    }
}

impl FileSystem for ProcFs {
    fn name(&self) -> &'static str {
        "procfs"
    }

    fn root_inode(&self) -> InodeId {
        ROOT_INODE
    }

    fn lookup(&self, parent: InodeId, name: &[u8]) -> VfsResult<InodeId> {
        if parent == ROOT_INODE {
            if name == b"." || name == b".." {
                return Ok(ROOT_INODE);
            }
            if name == b"mounts" {
                return Ok(MOUNTS_INODE);
            }
            if name == b"self" {
                return Ok(SELF_INODE);
            }
            if let Some(pid) = parse_pid(name) {
                if task_exists(pid) {
                    return Ok(pack(KIND_PID_DIR, pid));
                }
            }
            return Err(VfsError::NotFound);
        }

        let (kind, task_id) = unpack(parent);
        if kind != KIND_PID_DIR {
            return Err(VfsError::NotDirectory);
        }
        if name == b"." {
            return Ok(parent);
        }
        if name == b".." {
            return Ok(ROOT_INODE);
        }
        if !task_exists(task_id) {
            return Err(VfsError::NotFound);
        }
        if name == b"status" {
            return Ok(pack(KIND_STATUS, task_id));
        }
        if name == b"exe" {
            return Ok(pack(KIND_EXE, task_id));
        }
        Err(VfsError::NotFound)
    }

    fn stat(&self, inode: InodeId) -> VfsResult<FileStat> {
        if inode == ROOT_INODE {
            return Ok(FileStat::new_directory(ROOT_INODE));
        }

        let mut buf = [0u8; CONTENT_BUF_LEN];

        if inode == MOUNTS_INODE {
            let len = generate_content(inode, &mut buf)?;
            return Ok(FileStat::new_file(inode, len as u64));
        }
        if inode == SELF_INODE {
            let len = generate_content(inode, &mut buf)?;
            let mut stat = FileStat::new_file(inode, len as u64);
            stat.file_type = FileType::Symlink;
            stat.mode = 0o777;
            return Ok(stat);
        }

        let (kind, task_id) = unpack(inode);
        match kind {
            KIND_PID_DIR => {
                if !task_exists(task_id) {
                    return Err(VfsError::NotFound);
                }
                Ok(FileStat::new_directory(inode))
            }
            KIND_STATUS => {
                let len = generate_content(inode, &mut buf)?;
                Ok(FileStat::new_file(inode, len as u64))
            }
            KIND_EXE => {
                let len = generate_content(inode, &mut buf)?;
                let mut stat = FileStat::new_file(inode, len as u64);
                stat.file_type = FileType::Symlink;
                stat.mode = 0o777;
                Ok(stat)
            }
            _ => Err(VfsError::NotFound),
        }
    }

    fn read(&self, inode: InodeId, offset: u64, buf: &mut [u8]) -> VfsResult<usize> {
        if inode == ROOT_INODE {
            return Err(VfsError::IsDirectory);
        }
        if inode != MOUNTS_INODE && inode != SELF_INODE {
            let (kind, _) = unpack(inode);
            if kind == KIND_PID_DIR {
                return Err(VfsError::IsDirectory);
            }
        }

        let mut content = [0u8; CONTENT_BUF_LEN];
        let content_len = generate_content(inode, &mut content)?;
        let offset = offset as usize;
        if offset >= content_len {
            return Ok(0);
        }
        let avail = content_len - offset;
        let take = buf.len().min(avail);
        buf[..take].copy_from_slice(&content[offset..offset + take]);
        Ok(take)
    }

    fn write(&self, _inode: InodeId, _offset: u64, _buf: &[u8]) -> VfsResult<usize> {
        Err(VfsError::ReadOnly)
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
        if inode == ROOT_INODE {
            let mut count = 0;
            let mut current = 0;

            let fixed: [(&[u8], InodeId, FileType); 4] = [
                (b".", ROOT_INODE, FileType::Directory),
                (b"..", ROOT_INODE, FileType::Directory),
                (b"mounts", MOUNTS_INODE, FileType::Regular),
                (b"self", SELF_INODE, FileType::Symlink),
            ];
            for (name, child, ft) in fixed {
                if current >= offset {
                    if !callback(name, child, ft) {
                        return Ok(count);
                    }
                    count += 1;
                }
                current += 1;
            }

            let mut ctx = DirVisitContext {
                offset: offset.saturating_sub(current),
                current: 0,
                count: 0,
                stop: false,
                callback,
            };
            let visitor: ProcTaskVisitor = visit_task_for_readdir;
            for_each_task(Some(visitor), (&mut ctx as *mut DirVisitContext).cast());
            count += ctx.count;

            return Ok(count);
        }

        let (kind, task_id) = unpack(inode);
        if kind != KIND_PID_DIR {
            return Err(VfsError::NotDirectory);
        }
        if !task_exists(task_id) {
            return Err(VfsError::NotFound);
        }

        let mut count = 0;
        let mut current = 0;

        let fixed: [(&[u8], InodeId, FileType); 4] = [
            (b".", inode, FileType::Directory),
            (b"..", ROOT_INODE, FileType::Directory),
            (b"status", pack(KIND_STATUS, task_id), FileType::Regular),
            (b"exe", pack(KIND_EXE, task_id), FileType::Symlink),
        ];
        for (name, child, ft) in fixed {
            if current >= offset {
                if !callback(name, child, ft) {
                    return Ok(count);
                }
                count += 1;
            }
            current += 1;
        }

        Ok(count)
    }

    fn sync(&self) -> VfsResult<()> {
        Ok(())
    }
}

unsafe impl Send for ProcFs {}
unsafe impl Sync for ProcFs {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_lookup_resolves_mounts_and_self() {
        let fs = ProcFs::new();
        assert_eq!(fs.lookup(ROOT_INODE, b"mounts").unwrap(), MOUNTS_INODE);
        assert_eq!(fs.lookup(ROOT_INODE, b"self").unwrap(), SELF_INODE);
    }

    #[test]
    fn unknown_pid_is_not_found() {
        let fs = ProcFs::new();
        assert_eq!(fs.lookup(ROOT_INODE, b"999999"), Err(VfsError::NotFound));
    }

    #[test]
    fn non_numeric_root_entry_is_not_found() {
        let fs = ProcFs::new();
        assert_eq!(fs.lookup(ROOT_INODE, b"bogus"), Err(VfsError::NotFound));
    }

    #[test]
    fn mounts_read_returns_generated_lines() {
        let fs = ProcFs::new();
        let mut buf = [0u8; 512];
        // /proc/mounts is always readable even with an empty mount table.
        let n = fs.read(MOUNTS_INODE, 0, &mut buf).unwrap();
        assert_eq!(n, 0);
    }

    #[test]
    fn pid_inode_pack_roundtrips() {
        let inode = pack(KIND_STATUS, 42);
        assert_eq!(unpack(inode), (KIND_STATUS, 42));
    }
}
