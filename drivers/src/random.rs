use slopos_lib::tsc;
use slopos_lib::{IrqMutex, OnceLock};

const DEFAULT_LFSR_SEED: u64 = 0xACE1u64;

#[derive(Clone, Copy)]
pub struct Lfsr64 {
    state: u64,
}

impl Lfsr64 {
    pub fn with_seed(seed: u64) -> Self {
        let s = if seed == 0 { DEFAULT_LFSR_SEED } else { seed };
        Self { state: s }
    }

    pub fn from_tsc() -> Self {
        let seed = tsc::rdtsc() | 1;
        Self::with_seed(seed)
    }

    pub fn next(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = if x == 0 { 0xfeedc0de } else { x };
        self.state
    }
}

static RNG: OnceLock<IrqMutex<Lfsr64>> = OnceLock::new();

pub fn random_next() -> u64 {
    RNG.call_once(|| IrqMutex::new(Lfsr64::from_tsc()));
    let rng = RNG.get().expect("RNG missing");
    rng.lock().next()
}

/// Number of retries before RDRAND is considered failed, per Intel's
/// guidance that a transient underflow can fail several consecutive reads.
const RDRAND_RETRIES: u32 = 10;

/// Draw one 64-bit word from RDRAND, retrying on transient underflow.
///
/// Returns `None` if RDRAND is unsupported on this CPU or fails on every
/// retry, which `/dev/urandom` surfaces to userspace as a read error.
pub fn rdrand_u64() -> Option<u64> {
    if !rdrand_supported() {
        return None;
    }
    for _ in 0..RDRAND_RETRIES {
        let mut value: u64 = 0;
        // SAFETY: RDRAND is supported per the CPUID check above; `value` is a
        // valid 8-byte target for the instruction's output operand.
        let ok = unsafe { core::arch::x86_64::_rdrand64_step(&mut value) };
        if ok == 1 {
            return Some(value);
        }
    }
    None
}

fn rdrand_supported() -> bool {
    use core::sync::atomic::{AtomicU8, Ordering};
    static CACHED: AtomicU8 = AtomicU8::new(2);
    match CACHED.load(Ordering::Relaxed) {
        0 => return false,
        1 => return true,
        _ => {}
    }

    let supported = unsafe {
        let result = core::arch::x86_64::__cpuid(1);
        (result.ecx & (1 << 30)) != 0
    };
    CACHED.store(if supported { 1 } else { 0 }, Ordering::Relaxed);
    supported
}

/// Fill `buf` with RDRAND output, 8 bytes at a time. Returns `Ok(())` only if
/// every word succeeded; a partial fill on failure is not exposed to callers.
pub fn rdrand_fill(buf: &mut [u8]) -> Result<(), ()> {
    let mut pos = 0;
    while pos < buf.len() {
        let word = rdrand_u64().ok_or(())?;
        let bytes = word.to_le_bytes();
        let take = (buf.len() - pos).min(8);
        buf[pos..pos + take].copy_from_slice(&bytes[..take]);
        pos += take;
    }
    Ok(())
}
