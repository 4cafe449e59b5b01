use crate::blockdev::{CallbackBlockDevice, CapacityFn, PartitionView, ReadFn, WriteFn};
use crate::fat32::{FAT32_ROOT_INODE, Fat32Error, Fat32Fs};
use crate::gpt::{self, GptError};
use crate::vfs::{FileStat, FileSystem, FileType, InodeId, VfsError, VfsResult};
use slopos_lib::{InitFlag, IrqMutex};

/// GPT addresses partitions in fixed 512-byte LBAs regardless of the FAT32
/// volume's own `bytes_per_sector` (see `gpt::SECTOR_SIZE`).
const GPT_SECTOR_SIZE: u64 = 512;

// ============================================================================
// Global FAT32 VFS adapter using virtio-blk/AHCI callbacks
// ============================================================================

/// Storage for the global FAT32 VFS adapter
struct GlobalFat32Vfs {
    device: Option<CallbackBlockDevice>,
    partition_start_lba: u64,
}

impl GlobalFat32Vfs {
    const fn new() -> Self {
        Self {
            device: None,
            partition_start_lba: 0,
        }
    }
}

static GLOBAL_FAT32_VFS: IrqMutex<GlobalFat32Vfs> = IrqMutex::new(GlobalFat32Vfs::new());
static FAT32_VFS_INIT: InitFlag = InitFlag::new();

/// Static wrapper that implements FileSystem by delegating to the global
/// FAT32 state. This enables mounting FAT32 at "/mnt/disk" through the VFS
/// layer, the same way `StaticExt2Vfs` mounts ext2 at "/".
pub struct StaticFat32Vfs;

impl StaticFat32Vfs {
    fn with_fs<R>(&self, f: impl FnOnce(&mut Fat32Fs) -> Result<R, Fat32Error>) -> VfsResult<R> {
        if !FAT32_VFS_INIT.is_set() {
            return Err(VfsError::IoError);
        }
        let mut guard = GLOBAL_FAT32_VFS.lock();
        let partition_start_lba = guard.partition_start_lba;
        let device = guard.device.as_mut().ok_or(VfsError::IoError)?;
        let mut view = PartitionView::new(device, partition_start_lba, GPT_SECTOR_SIZE);
        let mut fs = Fat32Fs::init(&mut view).map_err(fat32_error_to_vfs)?;
        f(&mut fs).map_err(fat32_error_to_vfs)
    }
}

trait Fat32VfsBackend {
    fn with_fat32<R>(&self, f: impl FnOnce(&mut Fat32Fs) -> Result<R, Fat32Error>) -> VfsResult<R>;
}

impl Fat32VfsBackend for StaticFat32Vfs {
    fn with_fat32<R>(&self, f: impl FnOnce(&mut Fat32Fs) -> Result<R, Fat32Error>) -> VfsResult<R> {
        self.with_fs(f)
    }
}

impl<T: Fat32VfsBackend + Send + Sync> FileSystem for T {
    fn name(&self) -> &'static str {
        "fat32"
    }

    fn root_inode(&self) -> InodeId {
        FAT32_ROOT_INODE as InodeId
    }

    fn lookup(&self, parent: InodeId, name: &[u8]) -> VfsResult<InodeId> {
        self.with_fat32(|fs| fs.lookup(parent as u64, name))
    }

    fn stat(&self, inode: InodeId) -> VfsResult<FileStat> {
        self.with_fat32(|fs| {
            let entry = fs.stat(inode as u64)?;
            Ok(FileStat {
                inode,
                file_type: if entry.is_directory() {
                    FileType::Directory
                } else {
                    FileType::Regular
                },
                size: entry.size as u64,
                mode: if entry.is_directory() { 0o755 } else { 0o644 },
                nlink: 1,
                uid: 0,
                gid: 0,
                atime: 0,
                mtime: 0,
                ctime: 0,
                dev_major: 0,
                dev_minor: 0,
            })
        })
    }

    fn read(&self, inode: InodeId, offset: u64, buf: &mut [u8]) -> VfsResult<usize> {
        self.with_fat32(|fs| fs.read_file(inode as u64, offset as u32, buf))
    }

    fn write(&self, inode: InodeId, offset: u64, buf: &[u8]) -> VfsResult<usize> {
        self.with_fat32(|fs| fs.write_file(inode as u64, offset as u32, buf))
    }

    /// The original's `fat32_unlink_path`/`fat32_rmdir_path` are declared in
    /// `fat32.hpp` but never defined in `fat32.cpp` — this port carries that
    /// same gap forward rather than inventing directory entry allocation
    /// that has no grounding source.
    fn create(&self, _parent: InodeId, _name: &[u8], _file_type: FileType) -> VfsResult<InodeId> {
        Err(VfsError::NotSupported)
    }

    fn unlink(&self, _parent: InodeId, _name: &[u8]) -> VfsResult<()> {
        Err(VfsError::NotSupported)
    }

    fn readdir(
        &self,
        inode: InodeId,
        offset: usize,
        callback: &mut dyn FnMut(&[u8], InodeId, FileType) -> bool,
    ) -> VfsResult<usize> {
        self.with_fat32(|fs| {
            let mut count = 0usize;
            let mut current = 0usize;
            fs.for_each_dir_entry(inode as u64, |name, child_inode, is_dir| {
                if current < offset {
                    current += 1;
                    return true;
                }
                let ft = if is_dir {
                    FileType::Directory
                } else {
                    FileType::Regular
                };
                let cont = callback(name, child_inode as InodeId, ft);
                count += 1;
                current += 1;
                cont
            })?;
            Ok(count)
        })
    }

    fn truncate(&self, _inode: InodeId, _size: u64) -> VfsResult<()> {
        Err(VfsError::NotSupported)
    }

    fn sync(&self) -> VfsResult<()> {
        Ok(())
    }
}

unsafe impl Send for StaticFat32Vfs {}
unsafe impl Sync for StaticFat32Vfs {}

/// Global static instance for mounting
pub static FAT32_VFS_STATIC: StaticFat32Vfs = StaticFat32Vfs;

/// Locates the FAT32-flavoured GPT partition via `gpt::find_partition_by_type`
/// and initializes the global FAT32 VFS adapter against it.
pub fn fat32_vfs_init_with_callbacks(
    read_fn: ReadFn,
    write_fn: WriteFn,
    capacity_fn: CapacityFn,
) -> VfsResult<()> {
    if !FAT32_VFS_INIT.init_once() {
        return Ok(());
    }

    let probe_device = CallbackBlockDevice::new(read_fn, write_fn, capacity_fn);
    let partition_start_lba =
        gpt::find_partition_by_type(&probe_device).map_err(gpt_error_to_vfs)?;

    // Verify the FAT32 boot sector at the discovered partition offset is valid
    {
        let mut test_device = CallbackBlockDevice::new(read_fn, write_fn, capacity_fn);
        let mut view = PartitionView::new(&mut test_device, partition_start_lba, GPT_SECTOR_SIZE);
        Fat32Fs::init(&mut view).map_err(fat32_error_to_vfs)?;
    }

    let mut guard = GLOBAL_FAT32_VFS.lock();
    guard.device = Some(CallbackBlockDevice::new(read_fn, write_fn, capacity_fn));
    guard.partition_start_lba = partition_start_lba;

    Ok(())
}

pub fn fat32_vfs_is_initialized() -> bool {
    FAT32_VFS_INIT.is_set()
}

// ============================================================================
// Helper functions
// ============================================================================

fn fat32_error_to_vfs(e: Fat32Error) -> VfsError {
    match e {
        Fat32Error::InvalidBootSector => VfsError::IoError,
        Fat32Error::UnsupportedSectorSize => VfsError::IoError,
        Fat32Error::InvalidCluster => VfsError::IoError,
        Fat32Error::DirectoryFormat => VfsError::IoError,
        Fat32Error::NotDirectory => VfsError::NotDirectory,
        Fat32Error::NotFile => VfsError::NotFile,
        Fat32Error::PathNotFound => VfsError::NotFound,
        Fat32Error::NoSpace => VfsError::NoSpace,
        Fat32Error::DeviceError => VfsError::IoError,
    }
}

fn gpt_error_to_vfs(e: GptError) -> VfsError {
    match e {
        GptError::Io => VfsError::IoError,
        GptError::BadSignature => VfsError::IoError,
        GptError::NotFound => VfsError::NotFound,
    }
}
