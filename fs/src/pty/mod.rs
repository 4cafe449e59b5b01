//! Pseudo-terminal pool and line discipline.
//!
//! A fixed pool of [`PtyPair`]s backs `/dev/ptmx` and `/dev/pts/<N>`. Each
//! pair owns two fixed-capacity byte rings (master→slave, slave→master), a
//! canonical-mode staging buffer, and a kernel-side `termios` record. The
//! line discipline — input-flag transforms, signal generation, canonical
//! editing, echo — lives here rather than in `devfs` so the pool can be unit
//! tested without going through the VFS layer at all.
//!
//! Locking follows the design note in the spec this pool implements: each
//! pair is independent and gets its own [`IrqMutex`], rather than one lock
//! shared by the whole pool. A pair is touched by at most one master and one
//! slave handle at a time, so a per-pair lock is sufficient to serialise
//! ring/canonical-buffer mutation between them.

use slopos_abi::signal::{SIGINT, SIGQUIT, SIGTSTP};
use slopos_abi::syscall::{
    ECHO, ECHOE, ECHOK, ICANON, ICRNL, IGNCR, INLCR, ISIG, ISTRIP, NOFLSH, ONLCR, OPOST, POLLIN,
    POLLOUT, TCFLSH, TCGETS, TCIFLUSH, TCIOFLUSH, TCOFLUSH, TCSETS, TCSETSF, TCSETSW, TIOCGPGRP,
    TIOCGPTN, TIOCGWINSZ, TIOCNOTTY, TIOCSCTTY, TIOCSPGRP, TIOCSPTLCK, TIOCSWINSZ, UserTermios,
    UserWinsize, VEOF, VERASE, VINTR, VKILL, VQUIT, VSUSP,
};
use slopos_lib::IrqMutex;
use slopos_lib::kernel_services::driver_runtime::{current_task_pgid, signal_process_group};
use slopos_lib::ring_buffer::RingBuffer;
use slopos_mm::user_copy::{copy_from_user, copy_to_user};
use slopos_mm::user_ptr::UserPtr;

/// Number of pty pairs in the pool, matching the Linux `/dev/pts/<N>` range
/// this design targets — large enough for a shell plus a handful of
/// multiplexed sessions, small enough to keep the pool's static footprint
/// modest.
pub const PTY_MAX: usize = 64;

const RING_CAPACITY: usize = 4096;
const CANON_CAPACITY: usize = 4096;

/// Errors internal to the pty pool, converted to [`VfsError`](crate::vfs::VfsError)
/// at the `devfs` boundary the way `Ext2Error` converts to `VfsError` in
/// `ext2_vfs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PtyError {
    /// No unallocated pair in the pool (`-ENOMEM` at the syscall boundary).
    PoolExhausted,
    /// The pair index named by the caller was never allocated.
    NotAllocated,
    /// The slave side is still locked (`TIOCSPTLCK` has not cleared it).
    SlaveLocked,
    /// The destination ring had no room for the next byte.
    WouldBlock,
    /// Read-side source is closed and drained; caller should see EOF.
    Eof,
    /// `ioctl` request code this device does not implement.
    NotATty,
    /// The caller's buffer pointer was invalid or unmapped (EFAULT).
    Fault,
}

pub type PtyResult<T> = Result<T, PtyError>;

#[derive(Clone, Copy, PartialEq, Eq)]
enum HalfState {
    Closed,
    Open,
}

/// One master/slave pair. See the module's state-machine doc in the design
/// this pool implements: unallocated -> slave-locked -> slave-openable ->
/// in-use -> half-closed -> unallocated.
struct PtyPair {
    allocated: bool,
    slave_locked: bool,
    master: HalfState,
    slave: HalfState,
    master_refs: u32,
    slave_refs: u32,
    termios: UserTermios,
    winsize: UserWinsize,
    fg_pgid: u32,
    /// master write -> slave read
    m2s: RingBuffer<u8, RING_CAPACITY>,
    /// slave write -> master read
    s2m: RingBuffer<u8, RING_CAPACITY>,
    canon: [u8; CANON_CAPACITY],
    canon_len: usize,
    /// Count of pending "empty canonical line" EOF markers produced by
    /// VEOF on an empty line, queued ahead of ordinary ring data so a
    /// slave read sees EOF exactly once per such VEOF rather than being
    /// indistinguishable from "no data yet".
    eof_pending: u32,
}

impl PtyPair {
    const fn new() -> Self {
        Self {
            allocated: false,
            slave_locked: true,
            master: HalfState::Closed,
            slave: HalfState::Closed,
            master_refs: 0,
            slave_refs: 0,
            termios: UserTermios::cooked(),
            winsize: UserWinsize {
                ws_row: 24,
                ws_col: 80,
                ws_xpixel: 0,
                ws_ypixel: 0,
            },
            fg_pgid: 0,
            m2s: RingBuffer::new_with(0),
            s2m: RingBuffer::new_with(0),
            canon: [0u8; CANON_CAPACITY],
            canon_len: 0,
            eof_pending: 0,
        }
    }

    fn reset(&mut self) {
        *self = Self::new();
    }

    fn is_canonical(&self) -> bool {
        self.termios.c_lflag & ICANON != 0
    }

    fn echo_on(&self) -> bool {
        self.termios.c_lflag & ECHO != 0
    }
}

static PAIRS: [IrqMutex<PtyPair>; PTY_MAX] = [const { IrqMutex::new(PtyPair::new()) }; PTY_MAX];

/// Controlling-tty assignment, indexed by task id. `TIOCSCTTY` populates an
/// entry; `TIOCNOTTY` clears it. Kept outside `Task` itself (see the design
/// note on raw pointer graphs this pool follows) so the scheduler crate does
/// not need to know pty indices exist.
const NO_CTTY: u32 = u32::MAX;
const MAX_CTTY_TASKS: usize = 4096;
static CONTROLLING_TTY: IrqMutex<[u32; MAX_CTTY_TASKS]> =
    IrqMutex::new([NO_CTTY; MAX_CTTY_TASKS]);

fn set_controlling_tty(task_id: u32, pair_index: Option<usize>) {
    let idx = task_id as usize;
    if idx >= MAX_CTTY_TASKS {
        return;
    }
    let mut table = CONTROLLING_TTY.lock();
    table[idx] = pair_index.map(|i| i as u32).unwrap_or(NO_CTTY);
}

/// Allocates the first unallocated pair, resets it to cooked defaults, and
/// marks the slave locked. Returns the pool index (the `/dev/pts/<N>`
/// number and the `TIOCGPTN` answer).
pub fn pty_alloc() -> PtyResult<usize> {
    for (idx, slot) in PAIRS.iter().enumerate() {
        let mut pair = slot.lock();
        if !pair.allocated {
            pair.reset();
            pair.allocated = true;
            pair.slave_locked = true;
            pair.master = HalfState::Open;
            pair.master_refs = 1;
            return Ok(idx);
        }
    }
    Err(PtyError::PoolExhausted)
}

pub fn pty_is_allocated(idx: usize) -> bool {
    idx < PTY_MAX && PAIRS[idx].lock().allocated
}

pub fn pty_slave_openable(idx: usize) -> bool {
    idx < PTY_MAX && {
        let pair = PAIRS[idx].lock();
        pair.allocated && !pair.slave_locked
    }
}

fn release_if_both_closed(pair: &mut PtyPair) {
    if pair.master == HalfState::Closed && pair.slave == HalfState::Closed {
        pair.reset();
    }
}

pub fn pty_master_open_ref(idx: usize) {
    if idx >= PTY_MAX {
        return;
    }
    let mut pair = PAIRS[idx].lock();
    pair.master_refs += 1;
    pair.master = HalfState::Open;
}

pub fn pty_master_close(idx: usize) {
    if idx >= PTY_MAX {
        return;
    }
    let mut pair = PAIRS[idx].lock();
    if pair.master_refs > 0 {
        pair.master_refs -= 1;
    }
    if pair.master_refs == 0 {
        pair.master = HalfState::Closed;
        release_if_both_closed(&mut pair);
    }
}

pub fn pty_slave_open(idx: usize) -> PtyResult<()> {
    if idx >= PTY_MAX {
        return Err(PtyError::NotAllocated);
    }
    let mut pair = PAIRS[idx].lock();
    if !pair.allocated {
        return Err(PtyError::NotAllocated);
    }
    if pair.slave_locked {
        return Err(PtyError::SlaveLocked);
    }
    pair.slave_refs += 1;
    pair.slave = HalfState::Open;
    Ok(())
}

pub fn pty_slave_close(idx: usize) {
    if idx >= PTY_MAX {
        return;
    }
    let mut pair = PAIRS[idx].lock();
    if pair.slave_refs > 0 {
        pair.slave_refs -= 1;
    }
    if pair.slave_refs == 0 {
        pair.slave = HalfState::Closed;
        release_if_both_closed(&mut pair);
    }
}

// ============================================================================
// Echo helpers
// ============================================================================

/// Writes `bytes` into the slave->master ring, dropping any bytes past the
/// point the ring fills (echo is best-effort, matching a real tty where a
/// burst of editing keystrokes can outrun a slow reader).
fn echo_to_s2m(pair: &mut PtyPair, bytes: &[u8]) {
    for &b in bytes {
        let _ = pair.s2m.try_push(b);
    }
}

/// Echoes one input byte the way a cooked tty does: printables and `\n`/`\t`
/// literally (newline through the same ONLCR-aware post-processing as slave
/// writes), control characters as `^X`.
fn echo_input_byte(pair: &mut PtyPair, byte: u8) {
    if byte == b'\n' {
        if pair.termios.c_oflag & OPOST != 0 && pair.termios.c_oflag & ONLCR != 0 {
            echo_to_s2m(pair, b"\r\n");
        } else {
            echo_to_s2m(pair, b"\n");
        }
    } else if byte == b'\t' || (0x20..0x7f).contains(&byte) {
        echo_to_s2m(pair, &[byte]);
    } else {
        echo_to_s2m(pair, &[b'^', byte ^ 0x40]);
    }
}

fn flush_canonical(pair: &mut PtyPair) {
    pair.canon_len = 0;
}

fn flush_m2s(pair: &mut PtyPair) {
    pair.m2s.reset();
}

fn flush_s2m(pair: &mut PtyPair) {
    pair.s2m.reset();
}

// ============================================================================
// Master write (input processing) — spec 4.5 "Master write"
// ============================================================================

/// Feeds `bytes` through the line discipline as input arriving at the
/// master (i.e. typed by the user driving the terminal). Returns the number
/// of bytes consumed, or `WouldBlock` if the very first byte cannot be
/// queued because its destination ring is full.
pub fn pty_master_write(idx: usize, bytes: &[u8]) -> PtyResult<usize> {
    if idx >= PTY_MAX {
        return Err(PtyError::NotAllocated);
    }
    let mut pair = PAIRS[idx].lock();
    if !pair.allocated {
        return Err(PtyError::NotAllocated);
    }

    for (processed, &raw) in bytes.iter().enumerate() {
        let iflag = pair.termios.c_iflag;
        let lflag = pair.termios.c_lflag;

        // 1. Input-flag transforms.
        let mut byte = raw;
        if byte == b'\r' {
            if iflag & IGNCR != 0 {
                continue;
            }
            if iflag & ICRNL != 0 {
                byte = b'\n';
            }
        } else if byte == b'\n' && iflag & INLCR != 0 {
            byte = b'\r';
        }
        if iflag & ISTRIP != 0 {
            byte &= 0x7f;
        }

        // 2. ISIG.
        if lflag & ISIG != 0 {
            let cc = pair.termios.c_cc;
            let signum = if byte != 0 && byte == cc[VINTR] {
                Some(SIGINT)
            } else if byte != 0 && byte == cc[VQUIT] {
                Some(SIGQUIT)
            } else if byte != 0 && byte == cc[VSUSP] {
                Some(SIGTSTP)
            } else {
                None
            };

            if let Some(signum) = signum {
                let pgid = pair.fg_pgid;
                if pair.echo_on() {
                    echo_to_s2m(&mut pair, &[b'^', byte ^ 0x40, b'\n']);
                }
                if lflag & NOFLSH == 0 {
                    flush_m2s(&mut pair);
                    flush_canonical(&mut pair);
                }
                if pgid != 0 {
                    drop(pair);
                    signal_process_group(pgid, signum);
                    pair = PAIRS[idx].lock();
                }
                continue;
            }
        }

        // 3/4. Canonical vs raw processing.
        if pair.is_canonical() {
            let cc = pair.termios.c_cc;
            if byte == cc[VERASE] || byte == 0x08 || byte == 0x7f {
                if pair.canon_len > 0 {
                    pair.canon_len -= 1;
                    if lflag & ECHOE != 0 {
                        echo_to_s2m(&mut pair, b"\x08 \x08");
                    }
                }
            } else if byte == cc[VKILL] {
                while pair.canon_len > 0 {
                    pair.canon_len -= 1;
                    if lflag & (ECHOK | ECHOE) != 0 {
                        echo_to_s2m(&mut pair, b"\x08 \x08");
                    }
                }
            } else if byte == cc[VEOF] {
                if pair.canon_len == 0 {
                    pair.eof_pending += 1;
                } else {
                    let len = pair.canon_len;
                    let mut staged = [0u8; CANON_CAPACITY];
                    staged[..len].copy_from_slice(&pair.canon[..len]);
                    for &b in &staged[..len] {
                        if !pair.m2s.try_push(b) {
                            break;
                        }
                    }
                    pair.canon_len = 0;
                }
            } else if byte == b'\n' {
                let len = pair.canon_len;
                let mut staged = [0u8; CANON_CAPACITY];
                staged[..len].copy_from_slice(&pair.canon[..len]);
                if pair.echo_on() {
                    echo_input_byte(&mut pair, byte);
                }
                for &b in &staged[..len] {
                    let _ = pair.m2s.try_push(b);
                }
                let _ = pair.m2s.try_push(b'\n');
                pair.canon_len = 0;
            } else if pair.canon_len < CANON_CAPACITY {
                pair.canon[pair.canon_len] = byte;
                pair.canon_len += 1;
                if pair.echo_on() {
                    echo_input_byte(&mut pair, byte);
                }
            }
        } else {
            if pair.echo_on() {
                echo_input_byte(&mut pair, byte);
            }
            if !pair.m2s.try_push(byte) {
                if processed == 0 {
                    return Err(PtyError::WouldBlock);
                }
                return Ok(processed);
            }
        }
    }

    Ok(bytes.len())
}

// ============================================================================
// Slave write (output processing) — spec 4.5 "Slave write"
// ============================================================================

/// Feeds `bytes` written by the slave-side application into the s2m ring,
/// translating `\n` to `\r\n` when `OPOST|ONLCR` is set.
pub fn pty_slave_write(idx: usize, bytes: &[u8]) -> PtyResult<usize> {
    if idx >= PTY_MAX {
        return Err(PtyError::NotAllocated);
    }
    let mut pair = PAIRS[idx].lock();
    if !pair.allocated {
        return Err(PtyError::NotAllocated);
    }

    let onlcr = pair.termios.c_oflag & OPOST != 0 && pair.termios.c_oflag & ONLCR != 0;

    for (processed, &byte) in bytes.iter().enumerate() {
        if byte == b'\n' && onlcr {
            if pair.s2m.capacity() - pair.s2m.len() < 2 {
                if processed == 0 {
                    return Err(PtyError::WouldBlock);
                }
                return Ok(processed);
            }
            let _ = pair.s2m.try_push(b'\r');
            let _ = pair.s2m.try_push(b'\n');
        } else if !pair.s2m.try_push(byte) {
            if processed == 0 {
                return Err(PtyError::WouldBlock);
            }
            return Ok(processed);
        }
    }

    Ok(bytes.len())
}

// ============================================================================
// Reads
// ============================================================================

/// Slave read: drains m2s. EOF (`Ok(0)`) once the master side is fully
/// closed and the ring is empty, or once an EOF marker queued by VEOF on an
/// empty canonical line is consumed.
pub fn pty_slave_read(idx: usize, buf: &mut [u8]) -> PtyResult<usize> {
    if idx >= PTY_MAX {
        return Err(PtyError::NotAllocated);
    }
    let mut pair = PAIRS[idx].lock();
    if !pair.allocated {
        return Err(PtyError::NotAllocated);
    }

    if pair.m2s.is_empty() {
        if pair.eof_pending > 0 {
            pair.eof_pending -= 1;
            return Ok(0);
        }
        if pair.master == HalfState::Closed {
            return Ok(0);
        }
        return Err(PtyError::WouldBlock);
    }

    let mut n = 0;
    while n < buf.len() {
        match pair.m2s.try_pop() {
            Some(b) => {
                buf[n] = b;
                n += 1;
            }
            None => break,
        }
    }
    Ok(n)
}

/// Master read: drains s2m. EOF once the slave side is closed and the ring
/// is empty.
pub fn pty_master_read(idx: usize, buf: &mut [u8]) -> PtyResult<usize> {
    if idx >= PTY_MAX {
        return Err(PtyError::NotAllocated);
    }
    let mut pair = PAIRS[idx].lock();
    if !pair.allocated {
        return Err(PtyError::NotAllocated);
    }

    if pair.s2m.is_empty() {
        if pair.slave == HalfState::Closed {
            return Ok(0);
        }
        return Err(PtyError::WouldBlock);
    }

    let mut n = 0;
    while n < buf.len() {
        match pair.s2m.try_pop() {
            Some(b) => {
                buf[n] = b;
                n += 1;
            }
            None => break,
        }
    }
    Ok(n)
}

// ============================================================================
// Poll
// ============================================================================

pub fn pty_master_poll(idx: usize, events: u16) -> u16 {
    if idx >= PTY_MAX {
        return 0;
    }
    let pair = PAIRS[idx].lock();
    let mut revents = 0u16;
    if events & POLLIN != 0 && (!pair.s2m.is_empty() || pair.slave == HalfState::Closed) {
        revents |= POLLIN;
    }
    if events & POLLOUT != 0 && !pair.m2s.is_full() {
        revents |= POLLOUT;
    }
    revents
}

pub fn pty_slave_poll(idx: usize, events: u16) -> u16 {
    if idx >= PTY_MAX {
        return 0;
    }
    let pair = PAIRS[idx].lock();
    let mut revents = 0u16;
    if events & POLLIN != 0
        && (!pair.m2s.is_empty() || pair.eof_pending > 0 || pair.master == HalfState::Closed)
    {
        revents |= POLLIN;
    }
    if events & POLLOUT != 0 && !pair.s2m.is_full() {
        revents |= POLLOUT;
    }
    revents
}

// ============================================================================
// ioctl — spec 4.5 "Ioctl surface" / section 6 table
// ============================================================================

/// Dispatches an ioctl request against pair `idx`. `arg` is the raw register
/// value from the syscall: a user virtual address for the pointer-shaped
/// requests (`TCGETS`/`TCSETS*`/`TIOCGWINSZ`/`TIOCSWINSZ`/`TIOCGPGRP`/
/// `TIOCSPGRP`), and a plain value for the rest (`TIOCSPTLCK`, `TCFLSH`),
/// matching the console ioctl handler this mirrors.
pub fn pty_ioctl(idx: usize, request: u64, arg: usize, task_id: u32) -> PtyResult<i64> {
    if idx >= PTY_MAX {
        return Err(PtyError::NotAllocated);
    }
    let mut pair = PAIRS[idx].lock();
    if !pair.allocated {
        return Err(PtyError::NotAllocated);
    }

    match request {
        TIOCGPTN => Ok(idx as i64),

        TIOCSPTLCK => {
            pair.slave_locked = arg != 0;
            Ok(0)
        }

        TIOCGWINSZ => {
            let ptr = UserPtr::<UserWinsize>::try_new(arg as u64).map_err(|_| PtyError::Fault)?;
            copy_to_user(ptr, &pair.winsize).map_err(|_| PtyError::Fault)?;
            Ok(0)
        }

        TIOCSWINSZ => {
            let ptr = UserPtr::<UserWinsize>::try_new(arg as u64).map_err(|_| PtyError::Fault)?;
            pair.winsize = copy_from_user(ptr).map_err(|_| PtyError::Fault)?;
            Ok(0)
        }

        TCGETS => {
            let ptr = UserPtr::<UserTermios>::try_new(arg as u64).map_err(|_| PtyError::Fault)?;
            copy_to_user(ptr, &pair.termios).map_err(|_| PtyError::Fault)?;
            Ok(0)
        }

        TCSETS | TCSETSW | TCSETSF => {
            let ptr = UserPtr::<UserTermios>::try_new(arg as u64).map_err(|_| PtyError::Fault)?;
            let termios = copy_from_user(ptr).map_err(|_| PtyError::Fault)?;
            if request == TCSETSF {
                flush_m2s(&mut pair);
                flush_canonical(&mut pair);
            }
            pair.termios = termios;
            Ok(0)
        }

        TCFLSH => {
            let which = arg as u64;
            if which == TCIFLUSH || which == TCIOFLUSH {
                flush_m2s(&mut pair);
                flush_canonical(&mut pair);
            }
            if which == TCOFLUSH || which == TCIOFLUSH {
                flush_s2m(&mut pair);
            }
            Ok(0)
        }

        TIOCSCTTY => {
            let pgid = current_task_pgid();
            pair.fg_pgid = pgid;
            drop(pair);
            set_controlling_tty(task_id, Some(idx));
            Ok(0)
        }

        TIOCNOTTY => {
            drop(pair);
            set_controlling_tty(task_id, None);
            Ok(0)
        }

        TIOCGPGRP => {
            let ptr = UserPtr::<u32>::try_new(arg as u64).map_err(|_| PtyError::Fault)?;
            copy_to_user(ptr, &pair.fg_pgid).map_err(|_| PtyError::Fault)?;
            Ok(0)
        }

        TIOCSPGRP => {
            let ptr = UserPtr::<u32>::try_new(arg as u64).map_err(|_| PtyError::Fault)?;
            pair.fg_pgid = copy_from_user(ptr).map_err(|_| PtyError::Fault)?;
            Ok(0)
        }

        _ => Err(PtyError::NotATty),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_pair() -> usize {
        let idx = pty_alloc().expect("pool has room");
        pty_ioctl(idx, TIOCSPTLCK, 0, 1).expect("unlock via plain-value arg");
        pty_slave_open(idx).expect("slave openable after unlock");
        idx
    }

    #[test]
    fn canonical_echo_roundtrip() {
        let idx = fresh_pair();
        let n = pty_master_write(idx, b"abc\n").unwrap();
        assert_eq!(n, 4);

        let mut slave_buf = [0u8; 16];
        let read = pty_slave_read(idx, &mut slave_buf).unwrap();
        assert_eq!(&slave_buf[..read], b"abc\n");

        let mut master_buf = [0u8; 16];
        let read = pty_master_read(idx, &mut master_buf).unwrap();
        assert_eq!(&master_buf[..read], b"abc\r\n");
    }

    #[test]
    fn verase_with_echoe() {
        let idx = fresh_pair();
        pty_master_write(idx, b"abc\x7f").unwrap();

        let mut master_buf = [0u8; 16];
        let read = pty_master_read(idx, &mut master_buf).unwrap();
        assert_eq!(&master_buf[..read], b"abc\x08 \x08");

        {
            let pair = PAIRS[idx].lock();
            assert_eq!(pair.canon_len, 2);
        }
    }

    #[test]
    fn slave_read_eof_after_master_close() {
        let idx = fresh_pair();
        pty_master_close(idx);
        let mut buf = [0u8; 4];
        assert_eq!(pty_slave_read(idx, &mut buf), Ok(0));
    }

    #[test]
    fn ptn_matches_pool_index() {
        let idx = fresh_pair();
        assert_eq!(pty_ioctl(idx, TIOCGPTN, 0, 1), Ok(idx as i64));
    }

    #[test]
    fn relock_blocks_further_slave_opens() {
        let idx = fresh_pair();
        pty_ioctl(idx, TIOCSPTLCK, 1, 1).unwrap();
        assert_eq!(pty_slave_open(idx), Err(PtyError::SlaveLocked));
    }

    #[test]
    fn tcflsh_drains_both_rings() {
        let idx = fresh_pair();
        pty_master_write(idx, b"queued").unwrap();
        pty_slave_write(idx, b"reply").unwrap();
        pty_ioctl(idx, TCFLSH, TCIOFLUSH as usize, 1).unwrap();

        let mut buf = [0u8; 8];
        assert_eq!(pty_slave_read(idx, &mut buf), Err(PtyError::WouldBlock));
        assert_eq!(pty_master_read(idx, &mut buf), Err(PtyError::WouldBlock));
    }
}
