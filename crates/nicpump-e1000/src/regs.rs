//! 8254x register offsets and the register access seam.
//!
//! Offsets are byte offsets into BAR0; a register's word index is `offset / 4`.

use core::ptr::NonNull;
use std::cell::RefCell;
use std::rc::Rc;

use bitflags::bitflags;

pub const CTRL: usize = 0x0000;
pub const STATUS: usize = 0x0008;
pub const RCTL: usize = 0x0100;
pub const TCTL: usize = 0x0400;
pub const TIPG: usize = 0x0410;
pub const RDBAL: usize = 0x2800;
pub const RDBAH: usize = 0x2804;
pub const RDLEN: usize = 0x2808;
pub const RDH: usize = 0x2810;
pub const RDT: usize = 0x2818;
pub const TDBAL: usize = 0x3800;
pub const TDBAH: usize = 0x3804;
pub const TDLEN: usize = 0x3808;
pub const TDH: usize = 0x3810;
pub const TDT: usize = 0x3818;
pub const RAL0: usize = 0x5400;
pub const RAH0: usize = 0x5404;

/// Size of the BAR0 register window on 8254x parts.
pub const MMIO_WINDOW_LEN: usize = 0x20000;

bitflags! {
    /// Device Status (STATUS).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Status: u32 {
        const FD = 1 << 0;
        const LU = 1 << 1;
    }
}

bitflags! {
    /// Transmit Control (TCTL). CT and COLD are multi-bit fields, see [`tctl_value`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Tctl: u32 {
        const EN = 1 << 1;
        const PSP = 1 << 3;
    }
}

bitflags! {
    /// Receive Control (RCTL).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Rctl: u32 {
        const EN = 1 << 1;
        const BAM = 1 << 15;
        const SECRC = 1 << 26;
    }
}

/// RCTL.BSIZE = 00 with BSEX clear selects 2048-byte receive buffers.
pub const RCTL_BSIZE_2048: u32 = 0;

/// Receive Address High: Address Valid.
pub const RAH_AV: u32 = 1 << 31;

pub const TCTL_CT_SHIFT: u32 = 4;
pub const TCTL_COLD_SHIFT: u32 = 12;
/// Collision threshold recommended by the 8254x manual.
pub const TCTL_CT_DEFAULT: u32 = 0x10;
/// Collision distance for full-duplex operation.
pub const TCTL_COLD_DEFAULT: u32 = 0x40;

pub const TIPG_IPGT: u32 = 10;
pub const TIPG_IPGR1: u32 = 4;
pub const TIPG_IPGR2: u32 = 6;

pub const fn tctl_value() -> u32 {
    Tctl::EN.bits()
        | Tctl::PSP.bits()
        | (TCTL_CT_DEFAULT << TCTL_CT_SHIFT)
        | (TCTL_COLD_DEFAULT << TCTL_COLD_SHIFT)
}

pub const fn tipg_value() -> u32 {
    TIPG_IPGT | (TIPG_IPGR1 << 10) | (TIPG_IPGR2 << 20)
}

pub const fn rctl_value() -> u32 {
    Rctl::EN.bits() | Rctl::BAM.bits() | RCTL_BSIZE_2048 | Rctl::SECRC.bits()
}

/// Access to a block of 32-bit device registers.
///
/// Every call is one device access; implementations must not cache or batch.
pub trait RegisterAccess {
    fn read(&self, offset: usize) -> u32;
    fn write(&mut self, offset: usize, value: u32);
}

impl<T: RegisterAccess + ?Sized> RegisterAccess for &mut T {
    fn read(&self, offset: usize) -> u32 {
        <T as RegisterAccess>::read(&**self, offset)
    }

    fn write(&mut self, offset: usize, value: u32) {
        <T as RegisterAccess>::write(&mut **self, offset, value);
    }
}

impl<T: RegisterAccess + ?Sized> RegisterAccess for Box<T> {
    fn read(&self, offset: usize) -> u32 {
        <T as RegisterAccess>::read(&**self, offset)
    }

    fn write(&mut self, offset: usize, value: u32) {
        <T as RegisterAccess>::write(&mut **self, offset, value);
    }
}

impl<T: RegisterAccess + ?Sized> RegisterAccess for Rc<RefCell<T>> {
    fn read(&self, offset: usize) -> u32 {
        self.borrow().read(offset)
    }

    fn write(&mut self, offset: usize, value: u32) {
        self.borrow_mut().write(offset, value);
    }
}

/// Volatile view of a mapped BAR0 window.
pub struct MmioRegisters {
    base: NonNull<u32>,
    len: usize,
}

impl MmioRegisters {
    /// Wrap a mapped register window.
    ///
    /// # Safety
    /// `base` must point to `len` bytes of device memory mapped uncached, 4-byte aligned, and
    /// valid for the lifetime of the returned value. No other code may access the window.
    pub unsafe fn new(base: *mut u8, len: usize) -> Option<Self> {
        let base = NonNull::new(base.cast::<u32>())?;
        if base.as_ptr().align_offset(4) != 0 {
            return None;
        }
        Some(Self { base, len })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn word(&self, offset: usize) -> *mut u32 {
        assert!(
            offset % 4 == 0 && offset + 4 <= self.len,
            "register offset {offset:#x} outside {:#x}-byte window",
            self.len
        );
        // SAFETY: bounds checked above; `new` guarantees the window is mapped.
        unsafe { self.base.as_ptr().add(offset / 4) }
    }
}

impl RegisterAccess for MmioRegisters {
    fn read(&self, offset: usize) -> u32 {
        // SAFETY: `word` returns an in-bounds, aligned register address.
        unsafe { self.word(offset).read_volatile() }
    }

    fn write(&mut self, offset: usize, value: u32) {
        // SAFETY: `word` returns an in-bounds, aligned register address.
        unsafe { self.word(offset).write_volatile(value) }
    }
}
