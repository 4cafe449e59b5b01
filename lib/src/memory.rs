//! Low-level raw memory helpers shared by code that manipulates physical
//! mappings directly (page allocator, DMA buffers, early boot setup) and
//! can't go through a typed slice because the region isn't necessarily valid
//! Rust memory yet.

/// Zeroes `len` bytes starting at `dst`.
///
/// # Safety
///
/// `dst` must be valid for `len` bytes and writable.
#[inline]
pub unsafe fn zero(dst: *mut u8, len: usize) {
    unsafe {
        core::ptr::write_bytes(dst, 0, len);
    }
}

/// Copies `len` bytes from `src` to `dst`. The regions must not overlap.
///
/// # Safety
///
/// `src` must be valid for reads of `len` bytes, `dst` valid for writes of
/// `len` bytes, and the two regions must not overlap.
#[inline]
pub unsafe fn copy_nonoverlapping(src: *const u8, dst: *mut u8, len: usize) {
    unsafe {
        core::ptr::copy_nonoverlapping(src, dst, len);
    }
}

/// Copies `len` bytes from `src` to `dst`. The regions may overlap.
///
/// # Safety
///
/// `src` must be valid for reads of `len` bytes and `dst` valid for writes
/// of `len` bytes.
#[inline]
pub unsafe fn copy(src: *const u8, dst: *mut u8, len: usize) {
    unsafe {
        core::ptr::copy(src, dst, len);
    }
}

#[inline]
pub const fn is_aligned(addr: u64, align: u64) -> bool {
    debug_assert!(align.is_power_of_two());
    addr & (align - 1) == 0
}
