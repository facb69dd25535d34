//! In-memory stand-ins for the register window, DMA memory, and the device side of the rings.
//!
//! These let the driver (and anything built on it) run on the host. [`DeviceModel`] plays the
//! NIC: it only touches descriptors inside the head/tail windows the driver published, advances
//! TDH/RDH itself, and reaches buffers by bus address, the same way hardware would.

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;

use crate::desc::{RxDesc, RxStatus, TxDesc, TxStatus};
use crate::dma::{DmaBuffer, DmaError, DmaMemory};
use crate::regs::{self, RegisterAccess};
use crate::{AttachError, PciFunction, E1000_DEVICE_ID, INTEL_VENDOR_ID, STATUS_SIGNATURE};

/// Register file that remembers every value and logs every write.
#[derive(Debug, Clone, Default)]
pub struct RegisterFile {
    values: BTreeMap<usize, u32>,
    writes: Vec<(usize, u32)>,
}

impl RegisterFile {
    pub fn new() -> Self {
        Self::default()
    }

    /// A register file whose STATUS reads back the attach signature.
    pub fn with_status(status: u32) -> Self {
        let mut file = Self::default();
        file.values.insert(regs::STATUS, status);
        file
    }

    pub fn get(&self, offset: usize) -> u32 {
        self.values.get(&offset).copied().unwrap_or(0)
    }

    /// Set a register without logging it as a driver write (e.g. hardware advancing TDH).
    pub fn set(&mut self, offset: usize, value: u32) {
        self.values.insert(offset, value);
    }

    pub fn writes(&self) -> &[(usize, u32)] {
        &self.writes
    }

    pub fn writes_to(&self, offset: usize) -> Vec<u32> {
        self.writes
            .iter()
            .filter(|(reg, _)| *reg == offset)
            .map(|(_, value)| *value)
            .collect()
    }

    pub fn clear_log(&mut self) {
        self.writes.clear();
    }
}

impl RegisterAccess for RegisterFile {
    fn read(&self, offset: usize) -> u32 {
        self.get(offset)
    }

    fn write(&mut self, offset: usize, value: u32) {
        self.values.insert(offset, value);
        self.writes.push((offset, value));
    }
}

#[derive(Debug, Clone)]
struct Region {
    base: u64,
    bytes: Vec<u8>,
}

/// Heap-backed DMA memory with a bump allocator over a fake bus address space.
#[derive(Debug, Clone)]
pub struct HeapDma {
    regions: Vec<Region>,
    next_base: u64,
    limit: usize,
    used: usize,
}

impl Default for HeapDma {
    fn default() -> Self {
        Self::new()
    }
}

impl HeapDma {
    /// First bus address handed out; keeps zero free so a null address stands out.
    pub const BASE: u64 = 0x0010_0000;

    pub fn new() -> Self {
        Self::with_limit(usize::MAX)
    }

    /// Fail allocations once `limit` bytes are handed out.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            regions: Vec::new(),
            next_base: Self::BASE,
            limit,
            used: 0,
        }
    }

    pub fn allocated_bytes(&self) -> usize {
        self.used
    }

    fn region(&self, buf: DmaBuffer) -> &Region {
        &self.regions[buf.token() as usize]
    }

    fn locate(&self, addr: u64, len: usize) -> (usize, usize) {
        self.regions
            .iter()
            .enumerate()
            .find_map(|(idx, region)| {
                let end = region.base + region.bytes.len() as u64;
                (addr >= region.base && addr + len as u64 <= end)
                    .then(|| (idx, (addr - region.base) as usize))
            })
            .unwrap_or_else(|| panic!("bus access {addr:#x}+{len} hits no DMA region"))
    }

    /// Device-side read by bus address.
    pub fn read_bus(&self, addr: u64, out: &mut [u8]) {
        let (idx, offset) = self.locate(addr, out.len());
        out.copy_from_slice(&self.regions[idx].bytes[offset..offset + out.len()]);
    }

    /// Device-side write by bus address.
    pub fn write_bus(&mut self, addr: u64, data: &[u8]) {
        let (idx, offset) = self.locate(addr, data.len());
        self.regions[idx].bytes[offset..offset + data.len()].copy_from_slice(data);
    }

    pub fn read_bus_vec(&self, addr: u64, len: usize) -> Vec<u8> {
        let mut out = vec![0u8; len];
        self.read_bus(addr, &mut out);
        out
    }
}

impl DmaMemory for HeapDma {
    fn alloc(&mut self, len: usize, align: usize) -> Result<DmaBuffer, DmaError> {
        if !align.is_power_of_two() {
            return Err(DmaError::BadAlignment { align });
        }
        if self.used.saturating_add(len) > self.limit {
            return Err(DmaError::Exhausted { len });
        }

        let align = align as u64;
        let base = (self.next_base + align - 1) & !(align - 1);
        self.next_base = base + len as u64;
        self.used += len;

        let token = self.regions.len() as u64;
        self.regions.push(Region {
            base,
            bytes: vec![0u8; len],
        });
        Ok(DmaBuffer::new(token, len))
    }

    fn bus_addr(&self, buf: DmaBuffer) -> u64 {
        self.region(buf).base
    }

    fn read(&mut self, buf: DmaBuffer, offset: usize, out: &mut [u8]) {
        let bytes = &self.regions[buf.token() as usize].bytes;
        out.copy_from_slice(&bytes[offset..offset + out.len()]);
    }

    fn write(&mut self, buf: DmaBuffer, offset: usize, data: &[u8]) {
        let bytes = &mut self.regions[buf.token() as usize].bytes;
        bytes[offset..offset + data.len()].copy_from_slice(data);
    }
}

/// PCI function backed by a shared [`RegisterFile`].
pub struct FakePci {
    pub vendor: u16,
    pub device: u16,
    pub regs: Rc<RefCell<RegisterFile>>,
    pub enabled: bool,
    pub fail_map: bool,
}

impl FakePci {
    pub fn e1000(regs: Rc<RefCell<RegisterFile>>) -> Self {
        Self {
            vendor: INTEL_VENDOR_ID,
            device: E1000_DEVICE_ID,
            regs,
            enabled: false,
            fail_map: false,
        }
    }
}

impl PciFunction for FakePci {
    type Registers = Rc<RefCell<RegisterFile>>;

    fn vendor_id(&self) -> u16 {
        self.vendor
    }

    fn device_id(&self) -> u16 {
        self.device
    }

    fn enable(&mut self) -> Result<Self::Registers, AttachError> {
        if self.fail_map {
            return Err(AttachError::Map("BAR0 not assigned".into()));
        }
        self.enabled = true;
        Ok(self.regs.clone())
    }
}

/// The device side of a fake NIC: reads ring geometry from the registers the driver programmed
/// and touches descriptors by bus address.
#[derive(Clone)]
pub struct DeviceModel {
    pub regs: Rc<RefCell<RegisterFile>>,
    pub dma: Rc<RefCell<HeapDma>>,
    /// TX slots fetched past TDH whose DD has not been written back yet, oldest first.
    tx_fetched: Rc<RefCell<VecDeque<usize>>>,
}

impl DeviceModel {
    /// Fresh register file (reporting the attach signature) and DMA memory.
    pub fn new() -> Self {
        Self {
            regs: Rc::new(RefCell::new(RegisterFile::with_status(STATUS_SIGNATURE))),
            dma: Rc::new(RefCell::new(HeapDma::new())),
            tx_fetched: Rc::default(),
        }
    }

    pub fn pci(&self) -> FakePci {
        FakePci::e1000(self.regs.clone())
    }

    fn ring_base(&self, lo: usize, hi: usize) -> u64 {
        let regs = self.regs.borrow();
        u64::from(regs.get(lo)) | (u64::from(regs.get(hi)) << 32)
    }

    fn ring_len(&self, len_reg: usize, desc_len: usize) -> usize {
        (self.regs.borrow().get(len_reg) as usize / desc_len).max(1)
    }

    fn tx_desc_addr(&self, slot: usize) -> u64 {
        self.ring_base(regs::TDBAL, regs::TDBAH) + (slot * TxDesc::LEN) as u64
    }

    fn rx_desc_addr(&self, slot: usize) -> u64 {
        self.ring_base(regs::RDBAL, regs::RDBAH) + (slot * RxDesc::LEN) as u64
    }

    pub fn tx_desc(&self, slot: usize) -> TxDesc {
        let mut bytes = [0u8; TxDesc::LEN];
        self.dma.borrow().read_bus(self.tx_desc_addr(slot), &mut bytes);
        TxDesc::from_bytes(bytes)
    }

    pub fn set_tx_desc(&self, slot: usize, desc: &TxDesc) {
        let addr = self.tx_desc_addr(slot);
        self.dma.borrow_mut().write_bus(addr, &desc.to_bytes());
    }

    pub fn rx_desc(&self, slot: usize) -> RxDesc {
        let mut bytes = [0u8; RxDesc::LEN];
        self.dma.borrow().read_bus(self.rx_desc_addr(slot), &mut bytes);
        RxDesc::from_bytes(bytes)
    }

    pub fn set_rx_desc(&self, slot: usize, desc: &RxDesc) {
        let addr = self.rx_desc_addr(slot);
        self.dma.borrow_mut().write_bus(addr, &desc.to_bytes());
    }

    /// Frame bytes the driver queued in a TX slot.
    pub fn tx_frame(&self, slot: usize) -> Vec<u8> {
        let desc = self.tx_desc(slot);
        self.dma
            .borrow()
            .read_bus_vec(desc.addr, usize::from(desc.length))
    }

    /// Pull every descriptor in `[TDH, TDT)` into the transmit FIFO and advance TDH past them.
    /// DD stays clear until [`DeviceModel::write_back_tx`]. Returns how many were fetched.
    pub fn fetch_tx(&self) -> usize {
        let len = self.ring_len(regs::TDLEN, TxDesc::LEN);
        let mut fetched = 0;
        loop {
            let (head, tail) = {
                let regs = self.regs.borrow();
                (regs.get(regs::TDH) as usize, regs.get(regs::TDT) as usize)
            };
            if head == tail {
                return fetched;
            }
            self.tx_fetched.borrow_mut().push_back(head);
            self.regs.borrow_mut().set(regs::TDH, ((head + 1) % len) as u32);
            fetched += 1;
        }
    }

    /// Finish sending up to `count` fetched descriptors, oldest first: set DD and return the
    /// frames as they went out on the wire.
    pub fn write_back_tx(&self, count: usize) -> Vec<Vec<u8>> {
        let mut sent = Vec::new();
        while sent.len() < count {
            let Some(slot) = self.tx_fetched.borrow_mut().pop_front() else {
                break;
            };
            sent.push(self.tx_frame(slot));
            let mut desc = self.tx_desc(slot);
            desc.status.insert(TxStatus::DD);
            self.set_tx_desc(slot, &desc);
        }
        sent
    }

    /// Send everything the driver has published so far.
    pub fn poll_tx(&self) -> Vec<Vec<u8>> {
        self.fetch_tx();
        self.write_back_tx(usize::MAX)
    }

    /// Force a TX slot to look in flight: clear DD without touching anything else.
    pub fn hold_tx(&self, slot: usize) {
        let mut desc = self.tx_desc(slot);
        desc.status.remove(TxStatus::DD);
        self.set_tx_desc(slot, &desc);
    }

    /// RX buffers hardware may fill, i.e. the size of `[RDH, RDT)`.
    ///
    /// RDH == RDT means none. A tail of `capacity` (the value written at init) sits above every
    /// head, so it offers the whole ring.
    pub fn rx_buffers_available(&self) -> usize {
        let len = self.ring_len(regs::RDLEN, RxDesc::LEN);
        let regs = self.regs.borrow();
        let (head, tail) = (regs.get(regs::RDH) as usize, regs.get(regs::RDT) as usize);
        if head < tail {
            tail - head
        } else if head > tail {
            len + tail - head
        } else {
            0
        }
    }

    /// A frame arrives from the wire: store it in the descriptor at RDH with DD | EOP and
    /// advance RDH. Returns false (frame dropped) when the driver has left no buffers.
    pub fn receive_frame(&self, frame: &[u8]) -> bool {
        self.receive_frame_with_errors(frame, 0)
    }

    pub fn receive_frame_with_errors(&self, frame: &[u8], errors: u8) -> bool {
        if self.rx_buffers_available() == 0 {
            return false;
        }
        let len = self.ring_len(regs::RDLEN, RxDesc::LEN);
        let slot = self.regs.borrow().get(regs::RDH) as usize;

        let mut desc = self.rx_desc(slot);
        self.dma.borrow_mut().write_bus(desc.addr, frame);
        desc.length = frame.len() as u16;
        desc.status = RxStatus::DD | RxStatus::EOP;
        desc.errors = errors;
        self.set_rx_desc(slot, &desc);

        self.regs.borrow_mut().set(regs::RDH, ((slot + 1) % len) as u32);
        true
    }
}

impl Default for DeviceModel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heap_dma_aligns_and_translates() {
        let mut dma = HeapDma::new();
        let a = dma.alloc(10, 16).unwrap();
        let b = dma.alloc(1024, 128).unwrap();

        assert_eq!(dma.bus_addr(a), HeapDma::BASE);
        assert_eq!(dma.bus_addr(b) % 128, 0);
        assert!(dma.bus_addr(b) >= HeapDma::BASE + 10);

        dma.write(b, 4, &[1, 2, 3]);
        assert_eq!(dma.read_bus_vec(dma.bus_addr(b) + 4, 3), vec![1, 2, 3]);
    }

    #[test]
    fn heap_dma_enforces_limit() {
        let mut dma = HeapDma::with_limit(100);
        dma.alloc(64, 16).unwrap();
        assert_eq!(dma.alloc(64, 16), Err(DmaError::Exhausted { len: 64 }));
        assert_eq!(dma.alloc(8, 3), Err(DmaError::BadAlignment { align: 3 }));
    }

    #[test]
    fn register_file_logs_driver_writes_only() {
        let mut regs = RegisterFile::with_status(STATUS_SIGNATURE);
        regs.write(regs::TDT, 3);
        regs.set(regs::TDH, 2);

        assert_eq!(regs.read(regs::STATUS), STATUS_SIGNATURE);
        assert_eq!(regs.read(regs::TDH), 2);
        assert_eq!(regs.writes(), &[(regs::TDT, 3)]);
    }
}
