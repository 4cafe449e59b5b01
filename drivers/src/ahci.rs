//! AHCI (Advanced Host Controller Interface) SATA driver.
//!
//! Follows the same PCI capability-table registration idiom as `virtio_blk`:
//! [`ahci_register_driver`] hands a [`PciDriver`] to [`pci_register_driver`],
//! and [`ahci_probe`] runs when the PCI bus walk finds a class 0x01/subclass
//! 0x06 mass-storage controller. BAR5 carries the HBA MMIO window.

use core::ffi::c_int;
use core::ptr;

use slopos_lib::{InitFlag, IrqMutex, klog_debug, klog_info};
use slopos_mm::addr::PhysAddr;
use slopos_mm::mmio::MmioRegion;
use slopos_mm::page_alloc::OwnedPageFrame;

use crate::pci::{PciDeviceInfo, PciDriver, pci_config_read16, pci_config_write16, pci_register_driver};

const PCI_CLASS_MASS_STORAGE: u8 = 0x01;
const PCI_SUBCLASS_SATA: u8 = 0x06;

const PCI_COMMAND_OFFSET: u8 = 0x04;
const PCI_COMMAND_MEMORY_SPACE: u16 = 0x0002;
const PCI_COMMAND_BUS_MASTER: u16 = 0x0004;

const MAX_PORTS: usize = 32;
const MAX_SLOTS: usize = 32;

// Global Host Control register offsets (relative to ABAR)
const GHC_CAP: usize = 0x00;
const GHC_GHC: usize = 0x04;
const GHC_PI: usize = 0x0C;

const HBA_GHC_AE: u32 = 0x8000_0000;
const HBA_GHC_IE: u32 = 0x0000_0002;

// Port register block: base 0x100, stride 0x80
const PORT_BASE: usize = 0x100;
const PORT_STRIDE: usize = 0x80;
const PORT_CLB: usize = 0x00;
const PORT_CLBU: usize = 0x04;
const PORT_FB: usize = 0x08;
const PORT_FBU: usize = 0x0C;
const PORT_IS: usize = 0x10;
const PORT_CMD: usize = 0x18;
const PORT_TFD: usize = 0x20;
const PORT_SIG: usize = 0x24;
const PORT_SSTS: usize = 0x28;
const PORT_SACT: usize = 0x34;
const PORT_CI: usize = 0x38;

const HBA_PXCMD_ST: u32 = 0x0001;
const HBA_PXCMD_FRE: u32 = 0x0010;
const HBA_PXCMD_FR: u32 = 0x4000;
const HBA_PXCMD_CR: u32 = 0x8000;
const HBA_PXIS_TFES: u32 = 0x4000_0000;

const ATA_DEV_BUSY: u32 = 0x80;
const ATA_DEV_DRQ: u32 = 0x08;
const ATA_CMD_READ_DMA_EX: u8 = 0x25;
const ATA_CMD_WRITE_DMA_EX: u8 = 0x35;

const SATA_SIG_ATA: u32 = 0x0000_0101;
const SATA_SIG_ATAPI: u32 = 0xEB14_0101;
const SATA_SIG_SEMB: u32 = 0xC33C_0101;
const SATA_SIG_PM: u32 = 0x9669_0101;

const HBA_PORT_DET_PRESENT: u32 = 3;
const HBA_PORT_IPM_ACTIVE: u32 = 1;

const FIS_TYPE_REG_H2D: u8 = 0x27;

const MAX_SPIN: u32 = 1_000_000;

/// Default sector count used until IDENTIFY DEVICE is issued (see DESIGN.md).
const DEFAULT_TOTAL_SECTORS: u64 = 131072;
const SECTOR_SIZE: u64 = 512;

#[derive(Clone, Copy, PartialEq, Eq)]
enum DeviceKind {
    None,
    Sata,
    Satapi,
    Other,
}

/// Per-port command-structure allocations, kept alive for the lifetime of the
/// controller. One page each; AHCI only needs 1 KiB/256 B per structure but
/// this codebase's allocator hands out whole pages, same granularity
/// `virtio_blk`'s `RequestBuffers` already accepts for its DMA buffers.
struct PortMemory {
    clb: Option<OwnedPageFrame>,
    fb: Option<OwnedPageFrame>,
    cmd_tables: [Option<OwnedPageFrame>; MAX_SLOTS],
}

impl PortMemory {
    const fn empty() -> Self {
        const NONE: Option<OwnedPageFrame> = None;
        Self {
            clb: None,
            fb: None,
            cmd_tables: [NONE; MAX_SLOTS],
        }
    }
}

struct AhciState {
    abar: MmioRegion,
    port_implemented: u32,
    kind: [DeviceKind; MAX_PORTS],
    total_sectors: [u64; MAX_PORTS],
    primary_port: Option<usize>,
}

impl AhciState {
    const fn empty() -> Self {
        Self {
            abar: MmioRegion::empty(),
            port_implemented: 0,
            kind: [DeviceKind::None; MAX_PORTS],
            total_sectors: [0; MAX_PORTS],
            primary_port: None,
        }
    }
}

unsafe impl Send for AhciState {}

static AHCI_INIT: InitFlag = InitFlag::new();
static AHCI_STATE: IrqMutex<AhciState> = IrqMutex::new(AhciState::empty());

// Port command-structure allocations live outside the lock: they are written
// once during rebase and never reassigned, only read afterwards via raw MMIO
// access under the port's own single-in-flight-command discipline.
static mut PORT_MEMORY: [PortMemory; MAX_PORTS] = {
    const EMPTY: PortMemory = PortMemory::empty();
    [EMPTY; MAX_PORTS]
};

#[repr(C)]
struct HbaCmdHeader {
    cfl_etc: u8,
    flags: u8,
    prdtl: u16,
    prdbc: u32,
    ctba: u32,
    ctbau: u32,
    reserved: [u32; 4],
}

#[repr(C)]
struct HbaPrdtEntry {
    dba: u32,
    dbau: u32,
    reserved: u32,
    dbc_i: u32,
}

#[repr(C)]
struct FisRegH2D {
    fis_type: u8,
    flags: u8,
    command: u8,
    featurel: u8,
    lba0: u8,
    lba1: u8,
    lba2: u8,
    device: u8,
    lba3: u8,
    lba4: u8,
    lba5: u8,
    featureh: u8,
    countl: u8,
    counth: u8,
    icc: u8,
    control: u8,
    reserved: [u8; 4],
}

fn port_offset(portno: usize) -> usize {
    PORT_BASE + portno * PORT_STRIDE
}

fn port_read(abar: &MmioRegion, portno: usize, reg: usize) -> u32 {
    abar.read::<u32>(port_offset(portno) + reg)
}

fn port_write(abar: &MmioRegion, portno: usize, reg: usize, value: u32) {
    abar.write::<u32>(port_offset(portno) + reg, value);
}

fn ahci_match(info: *const PciDeviceInfo, _context: *mut core::ffi::c_void) -> bool {
    if info.is_null() {
        return false;
    }
    let info = unsafe { &*info };
    info.class_code == PCI_CLASS_MASS_STORAGE && info.subclass == PCI_SUBCLASS_SATA
}

fn enable_bus_master(info: &PciDeviceInfo) {
    let cmd = pci_config_read16(info.bus, info.device, info.function, PCI_COMMAND_OFFSET);
    pci_config_write16(
        info.bus,
        info.device,
        info.function,
        PCI_COMMAND_OFFSET,
        cmd | PCI_COMMAND_BUS_MASTER | PCI_COMMAND_MEMORY_SPACE,
    );
}

fn stop_cmd(abar: &MmioRegion, portno: usize) {
    let mut cmd = port_read(abar, portno, PORT_CMD);
    cmd &= !HBA_PXCMD_ST;
    cmd &= !HBA_PXCMD_FRE;
    port_write(abar, portno, PORT_CMD, cmd);

    let mut spin = 0u32;
    while spin < MAX_SPIN {
        let cmd = port_read(abar, portno, PORT_CMD);
        if cmd & (HBA_PXCMD_FR | HBA_PXCMD_CR) == 0 {
            break;
        }
        spin += 1;
    }
}

fn start_cmd(abar: &MmioRegion, portno: usize) {
    let mut spin = 0u32;
    while port_read(abar, portno, PORT_CMD) & HBA_PXCMD_CR != 0 {
        if spin == MAX_SPIN {
            klog_info!("ahci: start_cmd timeout waiting for CR to clear");
            break;
        }
        spin += 1;
    }

    let mut cmd = port_read(abar, portno, PORT_CMD);
    cmd |= HBA_PXCMD_FRE;
    cmd |= HBA_PXCMD_ST;
    port_write(abar, portno, PORT_CMD, cmd);
}

fn check_type(abar: &MmioRegion, portno: usize) -> DeviceKind {
    let ssts = port_read(abar, portno, PORT_SSTS);
    let ipm = (ssts >> 8) & 0x0F;
    let det = ssts & 0x0F;

    if det != HBA_PORT_DET_PRESENT || ipm != HBA_PORT_IPM_ACTIVE {
        return DeviceKind::None;
    }

    match port_read(abar, portno, PORT_SIG) {
        SATA_SIG_ATA => DeviceKind::Sata,
        SATA_SIG_ATAPI => DeviceKind::Satapi,
        SATA_SIG_SEMB | SATA_SIG_PM => DeviceKind::Other,
        _ => DeviceKind::Sata,
    }
}

/// Allocate and wire up command list, FIS buffer, and per-slot command
/// tables for a port, then restart its command engine.
fn port_rebase(abar: &MmioRegion, portno: usize) -> bool {
    stop_cmd(abar, portno);

    let clb = match OwnedPageFrame::alloc_zeroed() {
        Some(p) => p,
        None => return false,
    };
    port_write(abar, portno, PORT_CLB, clb.phys_u64() as u32);
    port_write(abar, portno, PORT_CLBU, (clb.phys_u64() >> 32) as u32);

    let fb = match OwnedPageFrame::alloc_zeroed() {
        Some(p) => p,
        None => return false,
    };
    port_write(abar, portno, PORT_FB, fb.phys_u64() as u32);
    port_write(abar, portno, PORT_FBU, (fb.phys_u64() >> 32) as u32);

    let headers = clb.as_mut_ptr::<HbaCmdHeader>();

    // SAFETY: PORT_MEMORY is only mutated here, once per port, before the
    // driver is published via AHCI_STATE.primary_port.
    let mem = unsafe { &mut PORT_MEMORY[portno] };

    for slot in 0..MAX_SLOTS {
        let ctb = match OwnedPageFrame::alloc_zeroed() {
            Some(p) => p,
            None => return false,
        };
        let header = unsafe { &mut *headers.add(slot) };
        header.prdtl = 8;
        header.ctba = ctb.phys_u64() as u32;
        header.ctbau = (ctb.phys_u64() >> 32) as u32;
        mem.cmd_tables[slot] = Some(ctb);
    }

    mem.clb = Some(clb);
    mem.fb = Some(fb);

    start_cmd(abar, portno);
    true
}

fn find_cmdslot(abar: &MmioRegion, portno: usize, cap: u32) -> Option<u32> {
    let mut slots = port_read(abar, portno, PORT_SACT) | port_read(abar, portno, PORT_CI);
    let cmdslots = (cap & 0x1F00) >> 8;
    for i in 0..cmdslots {
        if slots & 1 == 0 {
            return Some(i);
        }
        slots >>= 1;
    }
    None
}

/// Issue one read or write transfer of `count` contiguous 512-byte sectors
/// starting at `lba`, against a buffer that must be physically contiguous.
fn read_write_disk(
    abar: &MmioRegion,
    portno: usize,
    cap: u32,
    lba: u64,
    count: u32,
    buf_phys: u64,
    write: bool,
) -> bool {
    if count == 0 {
        return true;
    }

    port_write(abar, portno, PORT_IS, 0xFFFF_FFFF);

    let slot = match find_cmdslot(abar, portno, cap) {
        Some(s) => s,
        None => {
            klog_info!("ahci: no free command slot on port {}", portno);
            return false;
        }
    };

    // SAFETY: command-table/list pointers were allocated during port_rebase
    // and outlive the controller; single in-flight command per port is
    // enforced by the caller holding AHCI_STATE's lock for the duration.
    let mem = unsafe { &PORT_MEMORY[portno] };
    let clb = match &mem.clb {
        Some(p) => p,
        None => return false,
    };
    let ctb = match &mem.cmd_tables[slot as usize] {
        Some(p) => p,
        None => return false,
    };

    let headers = clb.as_mut_ptr::<HbaCmdHeader>();
    let header = unsafe { &mut *headers.add(slot as usize) };
    header.cfl_etc = (core::mem::size_of::<FisRegH2D>() / 4) as u8;
    header.flags = if write { 0x40 } else { 0x00 };
    let prdtl = ((count - 1) >> 4) + 1;
    header.prdtl = prdtl as u16;
    header.prdbc = 0;

    let ctb_base = ctb.as_mut_ptr::<u8>();
    unsafe {
        core::ptr::write_bytes(ctb_base, 0, 256);
    }
    let prdt_base = unsafe { ctb_base.add(0x80) } as *mut HbaPrdtEntry;

    let mut remaining = count;
    let mut phys = buf_phys;
    for i in 0..prdtl {
        let entry = unsafe { &mut *prdt_base.add(i as usize) };
        entry.dba = phys as u32;
        entry.dbau = (phys >> 32) as u32;
        if i + 1 < prdtl {
            entry.dbc_i = (8 * 1024 - 1) | (1 << 31);
            phys += 8 * 1024;
            remaining -= 16;
        } else {
            entry.dbc_i = ((remaining << 9) - 1) | (1 << 31);
        }
    }

    let cmdfis = ctb_base as *mut FisRegH2D;
    unsafe {
        (*cmdfis).fis_type = FIS_TYPE_REG_H2D;
        (*cmdfis).flags = 1 << 7; // command, not control
        (*cmdfis).command = if write {
            ATA_CMD_WRITE_DMA_EX
        } else {
            ATA_CMD_READ_DMA_EX
        };
        (*cmdfis).lba0 = lba as u8;
        (*cmdfis).lba1 = (lba >> 8) as u8;
        (*cmdfis).lba2 = (lba >> 16) as u8;
        (*cmdfis).device = 1 << 6;
        (*cmdfis).lba3 = (lba >> 24) as u8;
        (*cmdfis).lba4 = (lba >> 32) as u8;
        (*cmdfis).lba5 = (lba >> 40) as u8;
        (*cmdfis).countl = (count & 0xFF) as u8;
        (*cmdfis).counth = ((count >> 8) & 0xFF) as u8;
    }

    let mut spin = 0u32;
    while port_read(abar, portno, PORT_TFD) & (ATA_DEV_BUSY | ATA_DEV_DRQ) != 0 {
        if spin == MAX_SPIN {
            klog_info!("ahci: port {} hung before issue", portno);
            return false;
        }
        spin += 1;
    }

    port_write(abar, portno, PORT_CI, 1 << slot);

    loop {
        if port_read(abar, portno, PORT_CI) & (1 << slot) == 0 {
            break;
        }
        if port_read(abar, portno, PORT_IS) & HBA_PXIS_TFES != 0 {
            klog_info!("ahci: task file error on port {}", portno);
            return false;
        }
    }

    if port_read(abar, portno, PORT_IS) & HBA_PXIS_TFES != 0 {
        klog_info!("ahci: task file error on port {} (post-check)", portno);
        return false;
    }

    true
}

fn ahci_probe(info: *const PciDeviceInfo, _context: *mut core::ffi::c_void) -> c_int {
    if !AHCI_INIT.init_once() {
        klog_debug!("ahci: already initialized");
        return -1;
    }

    let info = unsafe { &*info };
    klog_info!(
        "ahci: probing {:04x}:{:04x} at {:02x}:{:02x}.{}",
        info.vendor_id,
        info.device_id,
        info.bus,
        info.device,
        info.function
    );

    enable_bus_master(info);

    let bar5 = info.bars[5];
    if bar5.base == 0 || bar5.is_io != 0 {
        klog_info!("ahci: BAR5 is not a valid MMIO window");
        return -1;
    }

    let abar = match MmioRegion::map(PhysAddr::new(bar5.base), bar5.size.max(0x1100) as usize) {
        Some(r) => r,
        None => {
            klog_info!("ahci: failed to map HBA MMIO region");
            return -1;
        }
    };

    let mut ghc = abar.read::<u32>(GHC_GHC);
    ghc |= HBA_GHC_AE;
    ghc |= HBA_GHC_IE;
    abar.write::<u32>(GHC_GHC, ghc);

    let cap = abar.read::<u32>(GHC_CAP);
    let port_implemented = abar.read::<u32>(GHC_PI);

    let mut state = AHCI_STATE.lock();
    state.abar = abar;
    state.port_implemented = port_implemented;

    for portno in 0..MAX_PORTS {
        if port_implemented & (1 << portno) == 0 {
            continue;
        }
        klog_debug!("ahci: rebasing port {}", portno);
        if !port_rebase(&state.abar, portno) {
            klog_info!("ahci: failed to rebase port {}", portno);
            continue;
        }

        let kind = check_type(&state.abar, portno);
        state.kind[portno] = kind;
        if kind == DeviceKind::Sata {
            klog_info!("ahci: SATA drive found at port {}", portno);
            state.total_sectors[portno] = DEFAULT_TOTAL_SECTORS;
            if state.primary_port.is_none() {
                state.primary_port = Some(portno);
            }
        } else if kind == DeviceKind::Satapi {
            klog_debug!("ahci: SATAPI drive found at port {} (ignored)", portno);
        }
    }

    let _ = cap;

    if state.primary_port.is_some() {
        0
    } else {
        klog_info!("ahci: no usable SATA drive found");
        -1
    }
}

static AHCI_DRIVER: PciDriver = PciDriver {
    name: b"ahci\0".as_ptr(),
    match_fn: Some(ahci_match),
    probe: Some(ahci_probe),
    context: ptr::null_mut(),
};

pub fn ahci_register_driver() {
    if pci_register_driver(&AHCI_DRIVER) != 0 {
        klog_info!("ahci: driver registration failed");
    }
}

pub fn ahci_is_ready() -> bool {
    AHCI_STATE.lock().primary_port.is_some()
}

pub fn ahci_capacity() -> u64 {
    let state = AHCI_STATE.lock();
    match state.primary_port {
        Some(p) => state.total_sectors[p] * SECTOR_SIZE,
        None => 0,
    }
}

/// Physically-contiguous bounce buffer: AHCI PRDs need a translatable
/// physical address per transfer, same constraint `virtio_blk` works around.
struct BounceBuffer {
    page: OwnedPageFrame,
}

impl BounceBuffer {
    fn allocate() -> Option<Self> {
        Some(Self {
            page: OwnedPageFrame::alloc_zeroed()?,
        })
    }
}

fn primary_port_transfer(sector: u64, buf: &mut [u8; 512], write: bool) -> bool {
    let state = AHCI_STATE.lock();
    let portno = match state.primary_port {
        Some(p) => p,
        None => return false,
    };

    let cap = state.abar.read::<u32>(GHC_CAP);

    let bounce = match BounceBuffer::allocate() {
        Some(b) => b,
        None => return false,
    };

    if write {
        unsafe {
            core::ptr::copy_nonoverlapping(buf.as_ptr(), bounce.page.as_mut_ptr::<u8>(), 512);
        }
    }

    let ok = read_write_disk(
        &state.abar,
        portno,
        cap,
        sector,
        1,
        bounce.page.phys_u64(),
        write,
    );

    if ok && !write {
        unsafe {
            core::ptr::copy_nonoverlapping(bounce.page.as_ptr::<u8>(), buf.as_mut_ptr(), 512);
        }
    }

    ok
}

pub fn ahci_read(offset: u64, buffer: &mut [u8]) -> bool {
    if buffer.is_empty() {
        return true;
    }
    if !ahci_is_ready() {
        return false;
    }

    let start_sector = offset / SECTOR_SIZE;
    let sector_offset = (offset % SECTOR_SIZE) as usize;
    let sectors_needed = (sector_offset + buffer.len() + 511) / 512;

    let mut sector_buf = [0u8; 512];
    let mut buf_pos = 0usize;
    for i in 0..sectors_needed {
        if !primary_port_transfer(start_sector + i as u64, &mut sector_buf, false) {
            return false;
        }
        let src_start = if i == 0 { sector_offset } else { 0 };
        let src_end = 512.min(src_start + (buffer.len() - buf_pos));
        let copy_len = src_end - src_start;
        buffer[buf_pos..buf_pos + copy_len].copy_from_slice(&sector_buf[src_start..src_end]);
        buf_pos += copy_len;
        if buf_pos >= buffer.len() {
            break;
        }
    }
    true
}

pub fn ahci_write(offset: u64, buffer: &[u8]) -> bool {
    if buffer.is_empty() {
        return true;
    }
    if !ahci_is_ready() {
        return false;
    }

    let start_sector = offset / SECTOR_SIZE;
    let sector_offset = (offset % SECTOR_SIZE) as usize;
    let sectors_needed = (sector_offset + buffer.len() + 511) / 512;

    let mut sector_buf = [0u8; 512];
    let mut buf_pos = 0usize;
    for i in 0..sectors_needed {
        let dst_start = if i == 0 { sector_offset } else { 0 };
        let dst_end = 512.min(dst_start + (buffer.len() - buf_pos));
        let copy_len = dst_end - dst_start;

        if dst_start != 0 || dst_end != 512 {
            if !primary_port_transfer(start_sector + i as u64, &mut sector_buf, false) {
                return false;
            }
        }

        sector_buf[dst_start..dst_end].copy_from_slice(&buffer[buf_pos..buf_pos + copy_len]);

        if !primary_port_transfer(start_sector + i as u64, &mut sector_buf, true) {
            return false;
        }

        buf_pos += copy_len;
        if buf_pos >= buffer.len() {
            break;
        }
    }
    true
}
