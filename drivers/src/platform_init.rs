//! Early platform bring-up that must happen before the priority-ordered boot
//! steps run (`boot::boot_drivers`), so drivers registered here are already
//! in the PCI driver registry by the time `pci_probe_drivers()` walks it.

use crate::ahci::ahci_register_driver;

pub fn init_platform_services() {
    ahci_register_driver();
}
