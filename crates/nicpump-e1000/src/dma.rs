//! DMA memory seam.
//!
//! The driver never sees raw pointers to descriptor or packet memory. The platform hands out
//! opaque [`DmaBuffer`] handles and translates them to bus addresses on request; all CPU-side
//! accesses go through [`DmaMemory::read`] / [`DmaMemory::write`].

use std::cell::RefCell;
use std::rc::Rc;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DmaError {
    #[error("DMA memory exhausted (requested {len} bytes)")]
    Exhausted { len: usize },

    #[error("unsupported DMA alignment {align}")]
    BadAlignment { align: usize },
}

/// Opaque handle to a platform-owned, device-visible buffer.
///
/// The `token` is meaningful only to the [`DmaMemory`] that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DmaBuffer {
    token: u64,
    len: usize,
}

impl DmaBuffer {
    pub const fn new(token: u64, len: usize) -> Self {
        Self { token, len }
    }

    pub const fn token(self) -> u64 {
        self.token
    }

    pub const fn len(self) -> usize {
        self.len
    }

    pub const fn is_empty(self) -> bool {
        self.len == 0
    }
}

/// Platform memory shared between the CPU and the NIC.
///
/// Reads take `&mut self` because device-shared memory may need cache maintenance or
/// barriers on access.
pub trait DmaMemory {
    /// Allocate `len` zeroed bytes aligned to `align` (a power of two) in bus address space.
    fn alloc(&mut self, len: usize, align: usize) -> Result<DmaBuffer, DmaError>;

    /// Address the device must use to reach `buf`.
    fn bus_addr(&self, buf: DmaBuffer) -> u64;

    fn read(&mut self, buf: DmaBuffer, offset: usize, out: &mut [u8]);
    fn write(&mut self, buf: DmaBuffer, offset: usize, data: &[u8]);

    fn fill(&mut self, buf: DmaBuffer, byte: u8) {
        const CHUNK: usize = 256;
        let chunk = [byte; CHUNK];
        let mut offset = 0;
        while offset < buf.len() {
            let n = (buf.len() - offset).min(CHUNK);
            self.write(buf, offset, &chunk[..n]);
            offset += n;
        }
    }
}

impl<T: DmaMemory + ?Sized> DmaMemory for &mut T {
    fn alloc(&mut self, len: usize, align: usize) -> Result<DmaBuffer, DmaError> {
        <T as DmaMemory>::alloc(&mut **self, len, align)
    }

    fn bus_addr(&self, buf: DmaBuffer) -> u64 {
        <T as DmaMemory>::bus_addr(&**self, buf)
    }

    fn read(&mut self, buf: DmaBuffer, offset: usize, out: &mut [u8]) {
        <T as DmaMemory>::read(&mut **self, buf, offset, out);
    }

    fn write(&mut self, buf: DmaBuffer, offset: usize, data: &[u8]) {
        <T as DmaMemory>::write(&mut **self, buf, offset, data);
    }

    fn fill(&mut self, buf: DmaBuffer, byte: u8) {
        <T as DmaMemory>::fill(&mut **self, buf, byte);
    }
}

impl<T: DmaMemory + ?Sized> DmaMemory for Rc<RefCell<T>> {
    fn alloc(&mut self, len: usize, align: usize) -> Result<DmaBuffer, DmaError> {
        self.borrow_mut().alloc(len, align)
    }

    fn bus_addr(&self, buf: DmaBuffer) -> u64 {
        self.borrow().bus_addr(buf)
    }

    fn read(&mut self, buf: DmaBuffer, offset: usize, out: &mut [u8]) {
        self.borrow_mut().read(buf, offset, out);
    }

    fn write(&mut self, buf: DmaBuffer, offset: usize, data: &[u8]) {
        self.borrow_mut().write(buf, offset, data);
    }

    fn fill(&mut self, buf: DmaBuffer, byte: u8) {
        self.borrow_mut().fill(buf, byte);
    }
}
