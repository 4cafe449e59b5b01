//! GPT partition table parsing.
//!
//! Locates the first partition of a GUID Partition Table whose type GUID
//! matches FAT32, Microsoft Basic Data, or the Linux filesystem data GUID —
//! the same three candidates the source's `gpt_find_fat32_partition` checks,
//! in the same order. Reads go through [`BlockDevice`] rather than a raw
//! `block_read` free function, and the scratch sector buffer is freed
//! normally on every return path instead of being leaked, unlike the source
//! (see this repo's design note on GPT's scratch-buffer lifetime).

extern crate alloc;

use alloc::vec;

use crate::blockdev::{BlockDevice, BlockDeviceError};

const GPT_SIGNATURE: u64 = 0x5452_4150_2049_4645; // "EFI PART"
const GPT_HEADER_LBA: u64 = 1;
const SECTOR_SIZE: usize = 512;

pub const FAT32_PARTITION_GUID: [u8; 16] = [
    0xEB, 0x3B, 0xA1, 0x3D, 0xB6, 0x10, 0xA7, 0x46, 0xBB, 0x38, 0x25, 0x25, 0x83, 0x13, 0xB5, 0x78,
];

pub const BASIC_DATA_PARTITION_GUID: [u8; 16] = [
    0xEB, 0xD0, 0xA0, 0xA2, 0xB9, 0xE5, 0x44, 0x33, 0x87, 0xC0, 0x68, 0xB6, 0xB7, 0x26, 0x99, 0xC7,
];

pub const LINUX_DATA_PARTITION_GUID: [u8; 16] = [
    0xAF, 0x3D, 0xC6, 0x0F, 0x83, 0x84, 0x72, 0x47, 0x8E, 0x79, 0x3D, 0x69, 0xD8, 0x47, 0x7D, 0xE4,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GptError {
    Io,
    BadSignature,
    NotFound,
}

impl From<BlockDeviceError> for GptError {
    fn from(_: BlockDeviceError) -> Self {
        GptError::Io
    }
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
struct GptHeaderRaw {
    signature: u64,
    revision: u32,
    header_size: u32,
    header_crc32: u32,
    reserved: u32,
    current_lba: u64,
    backup_lba: u64,
    first_usable_lba: u64,
    last_usable_lba: u64,
    disk_guid: [u8; 16],
    partition_entries_lba: u64,
    num_partition_entries: u32,
    partition_entry_size: u32,
    partition_entries_crc32: u32,
}

const GPT_HEADER_SIZE: usize = core::mem::size_of::<GptHeaderRaw>();

#[repr(C, packed)]
#[derive(Clone, Copy)]
struct GptPartitionEntryRaw {
    partition_type_guid: [u8; 16],
    unique_partition_guid: [u8; 16],
    starting_lba: u64,
    ending_lba: u64,
    attributes: u64,
    partition_name: [u16; 36],
}

fn read_header(device: &dyn BlockDevice) -> Result<GptHeaderRaw, GptError> {
    let mut sector = [0u8; SECTOR_SIZE];
    device.read_at(GPT_HEADER_LBA * SECTOR_SIZE as u64, &mut sector)?;

    // SAFETY: `GptHeaderRaw` is `repr(C, packed)` and no larger than one
    // sector, so every byte pattern is a valid (if not necessarily
    // meaningful) instance.
    let header = unsafe { (sector.as_ptr() as *const GptHeaderRaw).read_unaligned() };
    if header.signature != GPT_SIGNATURE {
        return Err(GptError::BadSignature);
    }
    if header.header_size as usize > SECTOR_SIZE || (header.header_size as usize) < GPT_HEADER_SIZE
    {
        return Err(GptError::BadSignature);
    }
    Ok(header)
}

/// Parses and validates the primary GPT header at LBA 1. Exposed separately
/// from [`find_partition_by_type`] so callers (and tests) can inspect
/// `num_partition_entries`/`partition_entries_lba` without forcing a scan.
pub fn parse_gpt_header(device: &dyn BlockDevice) -> Result<(), GptError> {
    read_header(device).map(|_| ())
}

/// Scans the partition entry array for the first entry whose type GUID is in
/// `candidates`, returning its starting LBA.
fn find_partition_by_guids(
    device: &dyn BlockDevice,
    candidates: &[[u8; 16]],
) -> Result<u64, GptError> {
    let header = read_header(device)?;

    let entry_size = header.partition_entry_size as usize;
    if entry_size == 0 {
        return Err(GptError::BadSignature);
    }
    let entries_per_sector = SECTOR_SIZE / entry_size;
    if entries_per_sector == 0 {
        return Err(GptError::BadSignature);
    }
    let num_entries = header.num_partition_entries;
    let num_sectors_needed = num_entries.div_ceil(entries_per_sector as u32);

    let mut sector = vec![0u8; SECTOR_SIZE];
    for sector_idx in 0..num_sectors_needed {
        let lba = header.partition_entries_lba + sector_idx as u64;
        device.read_at(lba * SECTOR_SIZE as u64, &mut sector)?;

        let entries_in_sector = if sector_idx == num_sectors_needed - 1 {
            let remaining = num_entries - sector_idx * entries_per_sector as u32;
            remaining.min(entries_per_sector as u32)
        } else {
            entries_per_sector as u32
        };

        for i in 0..entries_in_sector as usize {
            let offset = i * entry_size;
            if offset + core::mem::size_of::<GptPartitionEntryRaw>() > sector.len() {
                break;
            }
            // SAFETY: bounds checked above; struct is packed and fits the slice.
            let entry = unsafe {
                (sector.as_ptr().add(offset) as *const GptPartitionEntryRaw).read_unaligned()
            };

            if entry.partition_type_guid == [0u8; 16] {
                continue;
            }

            if candidates
                .iter()
                .any(|guid| *guid == entry.partition_type_guid)
            {
                return Ok(entry.starting_lba);
            }
        }
    }

    Err(GptError::NotFound)
}

/// Finds the starting LBA of the first FAT32-flavoured partition on `device`,
/// trying the FAT32, Microsoft Basic Data, then Linux filesystem data GUIDs
/// in that order, matching `gpt_find_fat32_partition`.
pub fn find_partition_by_type(device: &dyn BlockDevice) -> Result<u64, GptError> {
    find_partition_by_guids(
        device,
        &[
            FAT32_PARTITION_GUID,
            BASIC_DATA_PARTITION_GUID,
            LINUX_DATA_PARTITION_GUID,
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockdev::MemoryBlockDevice;

    fn write_header(image: &mut MemoryBlockDevice, entries_lba: u64, num_entries: u32) {
        let header = GptHeaderRaw {
            signature: GPT_SIGNATURE,
            revision: 0x0001_0000,
            header_size: GPT_HEADER_SIZE as u32,
            header_crc32: 0,
            reserved: 0,
            current_lba: 1,
            backup_lba: 0,
            first_usable_lba: entries_lba + 32,
            last_usable_lba: 0,
            disk_guid: [0u8; 16],
            partition_entries_lba: entries_lba,
            num_partition_entries: num_entries,
            partition_entry_size: core::mem::size_of::<GptPartitionEntryRaw>() as u32,
            partition_entries_crc32: 0,
        };
        let mut sector = [0u8; SECTOR_SIZE];
        unsafe {
            core::ptr::copy_nonoverlapping(
                &header as *const GptHeaderRaw as *const u8,
                sector.as_mut_ptr(),
                GPT_HEADER_SIZE,
            );
        }
        image
            .write_at(GPT_HEADER_LBA * SECTOR_SIZE as u64, &sector)
            .unwrap();
    }

    fn write_entry(
        image: &mut MemoryBlockDevice,
        entries_lba: u64,
        index: usize,
        guid: [u8; 16],
        start_lba: u64,
    ) {
        let entry = GptPartitionEntryRaw {
            partition_type_guid: guid,
            unique_partition_guid: [0u8; 16],
            starting_lba: start_lba,
            ending_lba: start_lba + 1000,
            attributes: 0,
            partition_name: [0u16; 36],
        };
        let entry_size = core::mem::size_of::<GptPartitionEntryRaw>();
        let mut sector = [0u8; SECTOR_SIZE];
        unsafe {
            core::ptr::copy_nonoverlapping(
                &entry as *const GptPartitionEntryRaw as *const u8,
                sector.as_mut_ptr().add(index * entry_size),
                entry_size,
            );
        }
        image
            .write_at(entries_lba * SECTOR_SIZE as u64, &sector)
            .unwrap();
    }

    #[test]
    fn finds_fat32_partition() {
        let mut image = MemoryBlockDevice::allocate(64 * SECTOR_SIZE).unwrap();
        write_header(&mut image, 2, 1);
        write_entry(&mut image, 2, 0, FAT32_PARTITION_GUID, 2048);

        let lba = find_partition_by_type(&image).unwrap();
        assert_eq!(lba, 2048);
    }

    #[test]
    fn falls_back_to_basic_data_guid() {
        let mut image = MemoryBlockDevice::allocate(64 * SECTOR_SIZE).unwrap();
        write_header(&mut image, 2, 1);
        write_entry(&mut image, 2, 0, BASIC_DATA_PARTITION_GUID, 4096);

        let lba = find_partition_by_type(&image).unwrap();
        assert_eq!(lba, 4096);
    }

    #[test]
    fn rejects_bad_signature() {
        let image = MemoryBlockDevice::allocate(64 * SECTOR_SIZE).unwrap();
        assert_eq!(find_partition_by_type(&image), Err(GptError::BadSignature));
    }

    #[test]
    fn reports_not_found_when_no_guid_matches() {
        let mut image = MemoryBlockDevice::allocate(64 * SECTOR_SIZE).unwrap();
        write_header(&mut image, 2, 1);
        write_entry(&mut image, 2, 0, [0xAAu8; 16], 4096);

        assert_eq!(find_partition_by_type(&image), Err(GptError::NotFound));
    }
}
