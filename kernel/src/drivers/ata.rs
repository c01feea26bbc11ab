//! ATA PIO disk driver (primary bus)
//!
//! Polling LBA28 sector reads and writes, enough to back the FAT32 driver.
//! No DMA, no IRQ completion: every transfer spins on BSY/DRQ.

use spin::Mutex;
use x86_64::instructions::interrupts;
use x86_64::instructions::port::Port;

pub const SECTOR_SIZE: usize = 512;

const ATA_DATA: u16 = 0x1F0;
const ATA_SECTOR_COUNT: u16 = 0x1F2;
const ATA_LBA_LOW: u16 = 0x1F3;
const ATA_LBA_MID: u16 = 0x1F4;
const ATA_LBA_HIGH: u16 = 0x1F5;
const ATA_DRIVE_SELECT: u16 = 0x1F6;
const ATA_STATUS: u16 = 0x1F7;
const ATA_COMMAND: u16 = 0x1F7;

const ATA_CMD_READ_SECTORS: u8 = 0x20;
const ATA_CMD_WRITE_SECTORS: u8 = 0x30;
const ATA_CMD_FLUSH_CACHE: u8 = 0xE7;

const ATA_STATUS_BSY: u8 = 0x80;
const ATA_STATUS_DRQ: u8 = 0x08;
const ATA_STATUS_ERR: u8 = 0x01;

/// Drive on the primary bus
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Drive {
    Master,
    Slave,
}

struct AtaState {
    drive: Drive,
}

static ATA: Mutex<AtaState> = Mutex::new(AtaState {
    drive: Drive::Master,
});

fn status() -> u8 {
    let mut port: Port<u8> = Port::new(ATA_STATUS);
    unsafe { port.read() }
}

/// Spin until BSY clears. Returns false on timeout or drive error.
fn wait_ready() -> bool {
    for _ in 0..1_000_000 {
        let s = status();
        if s & ATA_STATUS_BSY == 0 {
            return s & ATA_STATUS_ERR == 0;
        }
    }
    false
}

/// Spin until the drive requests data
fn wait_drq() -> bool {
    for _ in 0..1_000_000 {
        let s = status();
        if s & ATA_STATUS_ERR != 0 {
            return false;
        }
        if s & ATA_STATUS_BSY == 0 && s & ATA_STATUS_DRQ != 0 {
            return true;
        }
    }
    false
}

fn setup_transfer(drive: Drive, lba: u32, count: u8) -> bool {
    if !wait_ready() {
        return false;
    }
    let select = match drive {
        Drive::Master => 0xE0u8,
        Drive::Slave => 0xF0u8,
    };
    unsafe {
        Port::<u8>::new(ATA_DRIVE_SELECT).write(select | ((lba >> 24) as u8 & 0x0F));
        Port::<u8>::new(ATA_SECTOR_COUNT).write(count);
        Port::<u8>::new(ATA_LBA_LOW).write(lba as u8);
        Port::<u8>::new(ATA_LBA_MID).write((lba >> 8) as u8);
        Port::<u8>::new(ATA_LBA_HIGH).write((lba >> 16) as u8);
    }
    true
}

/// Probe the bus and log what answered
pub fn init() {
    let s = status();
    if s == 0xFF {
        crate::log_warn!("[ATA] no drive on primary bus (status 0xFF)");
    } else {
        crate::log!("[ATA] primary bus present, status {:#04x}", s);
    }
}

/// Choose which drive subsequent transfers address
pub fn select_drive(drive: Drive) {
    ATA.lock().drive = drive;
    crate::log!("[ATA] selected {:?} drive", drive);
}

/// Read `count` sectors starting at `lba` into `buf`
pub fn read_sectors(lba: u32, count: u8, buf: &mut [u8]) -> Result<(), ()> {
    if count == 0 || buf.len() < count as usize * SECTOR_SIZE {
        return Err(());
    }
    interrupts::without_interrupts(|| {
        let drive = ATA.lock().drive;
        if !setup_transfer(drive, lba, count) {
            return Err(());
        }
        unsafe {
            Port::<u8>::new(ATA_COMMAND).write(ATA_CMD_READ_SECTORS);
        }
        let mut data: Port<u16> = Port::new(ATA_DATA);
        for sector in 0..count as usize {
            if !wait_drq() {
                return Err(());
            }
            for word in 0..SECTOR_SIZE / 2 {
                let value = unsafe { data.read() };
                let off = sector * SECTOR_SIZE + word * 2;
                buf[off] = value as u8;
                buf[off + 1] = (value >> 8) as u8;
            }
        }
        Ok(())
    })
}

/// Write `count` sectors starting at `lba` from `buf`, then flush the
/// drive cache.
pub fn write_sectors(lba: u32, count: u8, buf: &[u8]) -> Result<(), ()> {
    if count == 0 || buf.len() < count as usize * SECTOR_SIZE {
        return Err(());
    }
    interrupts::without_interrupts(|| {
        let drive = ATA.lock().drive;
        if !setup_transfer(drive, lba, count) {
            return Err(());
        }
        unsafe {
            Port::<u8>::new(ATA_COMMAND).write(ATA_CMD_WRITE_SECTORS);
        }
        let mut data: Port<u16> = Port::new(ATA_DATA);
        for sector in 0..count as usize {
            if !wait_drq() {
                return Err(());
            }
            for word in 0..SECTOR_SIZE / 2 {
                let off = sector * SECTOR_SIZE + word * 2;
                let value = buf[off] as u16 | (buf[off + 1] as u16) << 8;
                unsafe { data.write(value) };
            }
        }
        unsafe {
            Port::<u8>::new(ATA_COMMAND).write(ATA_CMD_FLUSH_CACHE);
        }
        if wait_ready() {
            Ok(())
        } else {
            Err(())
        }
    })
}
