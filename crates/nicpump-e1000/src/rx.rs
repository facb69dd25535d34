//! Receive descriptor ring.

use thiserror::Error;
use tracing::{debug, trace};

use crate::desc::{RxDesc, RxStatus};
use crate::dma::{DmaBuffer, DmaError, DmaMemory};
use crate::regs::{self, RegisterAccess};
use crate::{RING_ALIGN, RX_BUFFER_SIZE, RX_RING_LEN};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RxError {
    /// Nothing has arrived; poll again later.
    #[error("no packet available")]
    NoPacketAvailable,

    /// The frame was dropped and its slot returned to hardware.
    #[error("receive buffer too small: frame is {needed} bytes, buffer holds {provided}")]
    BufferTooSmall { needed: usize, provided: usize },

    /// Hardware flagged the frame; it was dropped and its slot returned to hardware.
    #[error("frame received with errors {errors:#04x}")]
    FrameError { errors: u8 },
}

impl RxError {
    pub fn is_empty(&self) -> bool {
        matches!(self, RxError::NoPacketAvailable)
    }
}

pub struct RxRing {
    descs: DmaBuffer,
    buffers: Vec<DmaBuffer>,
    /// Next slot to consume.
    next: usize,
    /// Last value written to RDT. Hardware owns `[RDH, RDT)`, so the most recently consumed
    /// slot stays with software until the following receive publishes past it.
    tail: usize,
}

impl RxRing {
    /// Allocate the ring, offer every slot to hardware, and program the receive unit.
    pub fn init<R, M>(regs: &mut R, dma: &mut M, mac: [u8; 6]) -> Result<Self, DmaError>
    where
        R: RegisterAccess + ?Sized,
        M: DmaMemory + ?Sized,
    {
        let descs = dma.alloc(RX_RING_LEN * RxDesc::LEN, RING_ALIGN)?;
        dma.fill(descs, 0);

        let mut buffers = Vec::with_capacity(RX_RING_LEN);
        for slot in 0..RX_RING_LEN {
            let buf = dma.alloc(RX_BUFFER_SIZE, 16)?;
            dma.fill(buf, 0);
            let desc = RxDesc {
                addr: dma.bus_addr(buf),
                length: 0,
                checksum: 0,
                status: RxStatus::empty(),
                errors: 0,
                special: 0,
            };
            dma.write(descs, slot * RxDesc::LEN, &desc.to_bytes());
            buffers.push(buf);
        }

        let (ral, rah) = receive_address(mac);
        regs.write(regs::RAL0, ral);
        regs.write(regs::RAH0, rah);

        let base = dma.bus_addr(descs);
        let len = (RX_RING_LEN * RxDesc::LEN) as u32;
        regs.write(regs::RDBAL, base as u32);
        regs.write(regs::RDBAH, (base >> 32) as u32);
        regs.write(regs::RDLEN, len);
        regs.write(regs::RDH, 0);
        regs.write(regs::RDT, RX_RING_LEN as u32);
        regs.write(regs::RCTL, regs::rctl_value());
        debug!(base = format_args!("{base:#x}"), len, "rx ring initialized");

        Ok(Self {
            descs,
            buffers,
            next: 0,
            tail: RX_RING_LEN,
        })
    }

    pub fn capacity(&self) -> usize {
        RX_RING_LEN
    }

    pub fn tail(&self) -> usize {
        self.tail
    }

    /// Slot the next frame is consumed from.
    pub fn cursor(&self) -> usize {
        self.next
    }

    pub fn descriptor<M: DmaMemory + ?Sized>(&self, dma: &mut M, slot: usize) -> RxDesc {
        let mut bytes = [0u8; RxDesc::LEN];
        dma.read(self.descs, (slot % RX_RING_LEN) * RxDesc::LEN, &mut bytes);
        RxDesc::from_bytes(bytes)
    }

    /// Consume the frame at the cursor, if hardware has deposited one.
    ///
    /// Any DD descriptor is cleared and becomes the new RDT, including ones reported as errors.
    /// Publishing the consumed slot (not the one after it) keeps RDT behind RDH when software
    /// keeps pace, so hardware never runs out of buffers.
    pub fn receive<R, M>(&mut self, regs: &mut R, dma: &mut M, out: &mut [u8]) -> Result<usize, RxError>
    where
        R: RegisterAccess + ?Sized,
        M: DmaMemory + ?Sized,
    {
        let slot = self.cursor();
        let mut desc = self.descriptor(dma, slot);
        if !desc.is_done() {
            return Err(RxError::NoPacketAvailable);
        }

        let len = usize::from(desc.length).min(RX_BUFFER_SIZE);
        let result = if desc.errors != 0 {
            Err(RxError::FrameError {
                errors: desc.errors,
            })
        } else if out.len() < len {
            Err(RxError::BufferTooSmall {
                needed: len,
                provided: out.len(),
            })
        } else {
            dma.read(self.buffers[slot], 0, &mut out[..len]);
            Ok(len)
        };

        desc.status.remove(RxStatus::DD | RxStatus::EOP);
        desc.errors = 0;
        dma.write(self.descs, slot * RxDesc::LEN, &desc.to_bytes());

        self.tail = slot;
        regs.write(regs::RDT, slot as u32);
        self.next = (slot + 1) % RX_RING_LEN;
        trace!(slot, len, ok = result.is_ok(), "rx descriptor released");
        result
    }
}

/// Split a MAC address into RAL/RAH words, with Address Valid set.
pub fn receive_address(mac: [u8; 6]) -> (u32, u32) {
    let ral = u32::from_le_bytes([mac[0], mac[1], mac[2], mac[3]]);
    let rah = u32::from(u16::from_le_bytes([mac[4], mac[5]])) | regs::RAH_AV;
    (ral, rah)
}
