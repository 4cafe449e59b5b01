//! VFS trait definitions for the SlopOS Virtual File System layer.
//!
//! This module defines the core abstractions that all filesystem implementations
//! must adhere to. The design is inspired by Linux VFS but simplified for SlopOS.

/// Unique identifier for an inode within a filesystem.
/// Each filesystem maintains its own inode number space.
pub type InodeId = u64;

/// File type enumeration matching Unix file types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FileType {
    /// Regular file
    Regular = 1,
    /// Directory
    Directory = 2,
    /// Character device (e.g., /dev/null)
    CharDevice = 3,
    /// Block device
    BlockDevice = 4,
    /// Symbolic link
    Symlink = 5,
    /// Named pipe (FIFO)
    Pipe = 6,
    /// Unix domain socket
    Socket = 7,
}

/// Metadata about a file or directory.
/// Returned by stat operations.
#[derive(Debug, Clone)]
pub struct FileStat {
    /// Inode number within the filesystem
    pub inode: InodeId,
    /// Type of file (regular, directory, device, etc.)
    pub file_type: FileType,
    /// Size in bytes (0 for directories, devices)
    pub size: u64,
    /// Unix permission bits (rwxrwxrwx)
    pub mode: u16,
    /// Number of hard links
    pub nlink: u32,
    /// Owner user ID
    pub uid: u32,
    /// Owner group ID
    pub gid: u32,
    /// Last access time (Unix timestamp)
    pub atime: u64,
    /// Last modification time (Unix timestamp)
    pub mtime: u64,
    /// Last status change time (Unix timestamp)
    pub ctime: u64,
    /// Major device number (for device files)
    pub dev_major: u32,
    /// Minor device number (for device files)
    pub dev_minor: u32,
}

impl FileStat {
    /// Create a new FileStat with default values for a regular file.
    pub const fn new_file(inode: InodeId, size: u64) -> Self {
        Self {
            inode,
            file_type: FileType::Regular,
            size,
            mode: 0o644,
            nlink: 1,
            uid: 0,
            gid: 0,
            atime: 0,
            mtime: 0,
            ctime: 0,
            dev_major: 0,
            dev_minor: 0,
        }
    }

    /// Create a new FileStat with default values for a directory.
    pub const fn new_directory(inode: InodeId) -> Self {
        Self {
            inode,
            file_type: FileType::Directory,
            size: 0,
            mode: 0o755,
            nlink: 2,
            uid: 0,
            gid: 0,
            atime: 0,
            mtime: 0,
            ctime: 0,
            dev_major: 0,
            dev_minor: 0,
        }
    }

    /// Create a new FileStat for a character device.
    pub const fn new_char_device(inode: InodeId, major: u32, minor: u32) -> Self {
        Self {
            inode,
            file_type: FileType::CharDevice,
            size: 0,
            mode: 0o666,
            nlink: 1,
            uid: 0,
            gid: 0,
            atime: 0,
            mtime: 0,
            ctime: 0,
            dev_major: major,
            dev_minor: minor,
        }
    }
}

/// Result type for VFS operations.
pub type VfsResult<T> = Result<T, VfsError>;

/// Errors that can occur during VFS operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VfsError {
    /// File or directory not found (ENOENT)
    NotFound,
    /// Path component is not a directory (ENOTDIR)
    NotDirectory,
    /// Expected a file but got something else
    NotFile,
    /// Operation not permitted on a directory (EISDIR)
    IsDirectory,
    /// Permission denied (EACCES)
    PermissionDenied,
    /// Filesystem is read-only (EROFS)
    ReadOnly,
    /// No space left on device (ENOSPC)
    NoSpace,
    /// I/O error (EIO)
    IoError,
    /// Invalid path format
    InvalidPath,
    /// File or directory already exists (EEXIST)
    AlreadyExists,
    /// Directory is not empty (ENOTEMPTY)
    NotEmpty,
    /// Cross-device link not permitted (EXDEV)
    CrossDevice,
    /// Operation not supported (ENOTSUP)
    NotSupported,
    /// Too many symbolic links (ELOOP)
    TooManyLinks,
    /// Filename too long (ENAMETOOLONG)
    NameTooLong,
    /// Invalid argument (EINVAL)
    InvalidArgument,
    /// Bad file descriptor
    BadFileDescriptor,
    /// Resource busy (EBUSY)
    Busy,
    /// Operation would block and the file is non-blocking (EAGAIN)
    WouldBlock,
}

/// A filesystem implementation.
///
/// All filesystem types (ext2, ramfs, devfs, etc.) implement this trait.
/// Operations are inode-based internally, with path resolution handled
/// by the VFS layer above.
pub trait FileSystem: Send + Sync {
    /// Get the name of this filesystem type (e.g., "ext2", "ramfs", "devfs").
    fn name(&self) -> &'static str;

    /// Get the root inode of this filesystem.
    /// This is the entry point for all path traversal within this mount.
    fn root_inode(&self) -> InodeId;

    /// Look up a child entry in a directory by name.
    ///
    /// # Arguments
    /// * `parent` - Inode of the parent directory
    /// * `name` - Name of the entry to look up (without path separators)
    ///
    /// # Returns
    /// The inode of the found entry, or `VfsError::NotFound`.
    fn lookup(&self, parent: InodeId, name: &[u8]) -> VfsResult<InodeId>;

    /// Get metadata (stat) for an inode.
    fn stat(&self, inode: InodeId) -> VfsResult<FileStat>;

    /// Read data from a file.
    ///
    /// # Arguments
    /// * `inode` - The file's inode
    /// * `offset` - Byte offset to start reading from
    /// * `buf` - Buffer to read into
    ///
    /// # Returns
    /// Number of bytes actually read (may be less than buffer size at EOF).
    fn read(&self, inode: InodeId, offset: u64, buf: &mut [u8]) -> VfsResult<usize>;

    /// Write data to a file.
    ///
    /// # Arguments
    /// * `inode` - The file's inode
    /// * `offset` - Byte offset to start writing at
    /// * `buf` - Data to write
    ///
    /// # Returns
    /// Number of bytes actually written.
    fn write(&self, inode: InodeId, offset: u64, buf: &[u8]) -> VfsResult<usize>;

    /// Create a new file or directory in a parent directory.
    ///
    /// # Arguments
    /// * `parent` - Inode of the parent directory
    /// * `name` - Name for the new entry
    /// * `file_type` - Type of entry to create (Regular or Directory)
    ///
    /// # Returns
    /// The inode of the newly created entry.
    fn create(&self, parent: InodeId, name: &[u8], file_type: FileType) -> VfsResult<InodeId>;

    /// Remove an entry from a directory.
    ///
    /// For directories, this is rmdir (must be empty).
    /// For files, this is unlink.
    fn unlink(&self, parent: InodeId, name: &[u8]) -> VfsResult<()>;

    /// Iterate over directory entries.
    ///
    /// # Arguments
    /// * `inode` - Directory inode to read
    /// * `offset` - Entry offset to start from (0 for beginning)
    /// * `callback` - Called for each entry; return false to stop iteration
    ///
    /// # Returns
    /// The number of entries visited.
    fn readdir(
        &self,
        inode: InodeId,
        offset: usize,
        callback: &mut dyn FnMut(&[u8], InodeId, FileType) -> bool,
    ) -> VfsResult<usize>;

    /// Truncate a file to a specified length.
    ///
    /// If the file is larger, data is discarded.
    /// If smaller, the file is extended with zeros (on supporting filesystems).
    fn truncate(&self, inode: InodeId, size: u64) -> VfsResult<()> {
        let _ = (inode, size);
        Err(VfsError::NotSupported)
    }

    /// Rename/move an entry within the same filesystem.
    ///
    /// # Arguments
    /// * `old_parent` - Inode of the source directory
    /// * `old_name` - Name of the entry to rename
    /// * `new_parent` - Inode of the destination directory
    /// * `new_name` - New name for the entry
    ///
    /// # Errors
    /// * `NotFound` - Source entry doesn't exist
    /// * `NotDirectory` - Parent is not a directory
    /// * `AlreadyExists` - Destination name already exists (overwrite not supported)
    /// * `NotSupported` - Filesystem doesn't support rename
    fn rename(
        &self,
        old_parent: InodeId,
        old_name: &[u8],
        new_parent: InodeId,
        new_name: &[u8],
    ) -> VfsResult<()> {
        let _ = (old_parent, old_name, new_parent, new_name);
        Err(VfsError::NotSupported)
    }

    /// Sync filesystem metadata and data to backing store.
    fn sync(&self) -> VfsResult<()> {
        // Default: no-op for in-memory filesystems
        Ok(())
    }

    /// Device control. Only character devices (PTYs, the console) implement
    /// this; regular filesystems inherit the `NotSupported` default, which
    /// callers map to ENOTTY.
    fn ioctl(&self, inode: InodeId, request: u64, arg: usize) -> VfsResult<i64> {
        let _ = (inode, request, arg);
        Err(VfsError::NotSupported)
    }

    /// Readiness bitmask for poll()/select(), using the same POLLIN/POLLOUT/
    /// etc. bit values as `slopos_abi::syscall`. The default treats the inode
    /// as always readable and writable, matching a plain regular file.
    fn poll(&self, inode: InodeId, events: u16) -> VfsResult<u16> {
        let _ = inode;
        Ok(events & (slopos_abi::syscall::POLLIN | slopos_abi::syscall::POLLOUT))
    }

    /// Whether this inode is a terminal device (POSIX isatty()).
    fn isatty(&self, inode: InodeId) -> bool {
        let _ = inode;
        false
    }

    /// Called once per `open()` of this inode, before the first read/write.
    ///
    /// Most filesystems just hand back the resolved inode unchanged. Devices
    /// with per-open state (a PTY pair allocated fresh every time `/dev/ptmx`
    /// is opened) override this to return a *different* inode identifying
    /// the newly allocated instance.
    fn open(&self, inode: InodeId) -> VfsResult<InodeId> {
        Ok(inode)
    }

    /// Called when the last file descriptor referencing this inode is
    /// closed. Default is a no-op; PTYs use it to release a master/slave
    /// half back to the pool.
    fn close(&self, inode: InodeId) {
        let _ = inode;
    }
}
