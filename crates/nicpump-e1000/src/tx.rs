//! Transmit descriptor ring.

use thiserror::Error;
use tracing::{debug, trace};

use crate::desc::{TxCmd, TxDesc, TxStatus};
use crate::dma::{DmaBuffer, DmaError, DmaMemory};
use crate::regs::{self, RegisterAccess};
use crate::{MAX_FRAME_LEN, RING_ALIGN, TX_BUFFER_SIZE, TX_RING_LEN};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TxError {
    /// The frame can never be sent; retrying will not help.
    #[error("packet of {len} bytes exceeds the {max}-byte frame limit")]
    PacketTooLarge { len: usize, max: usize },

    /// Hardware still owns the next slot.
    #[error("transmit ring full")]
    RingFull,
}

impl TxError {
    pub fn is_transient(&self) -> bool {
        matches!(self, TxError::RingFull)
    }
}

pub struct TxRing {
    descs: DmaBuffer,
    buffers: Vec<DmaBuffer>,
    /// Software copy of TDT. Hardware owns slots `[TDH, tail)`.
    tail: usize,
}

impl TxRing {
    /// Allocate the ring, mark every slot free, and program the transmit unit.
    pub fn init<R, M>(regs: &mut R, dma: &mut M) -> Result<Self, DmaError>
    where
        R: RegisterAccess + ?Sized,
        M: DmaMemory + ?Sized,
    {
        let descs = dma.alloc(TX_RING_LEN * TxDesc::LEN, RING_ALIGN)?;
        dma.fill(descs, 0);

        let mut buffers = Vec::with_capacity(TX_RING_LEN);
        for slot in 0..TX_RING_LEN {
            let buf = dma.alloc(TX_BUFFER_SIZE, 16)?;
            dma.fill(buf, 0);
            let desc = TxDesc {
                addr: dma.bus_addr(buf),
                length: 0,
                cso: 0,
                cmd: TxCmd::empty(),
                status: TxStatus::DD,
                css: 0,
                special: 0,
            };
            dma.write(descs, slot * TxDesc::LEN, &desc.to_bytes());
            buffers.push(buf);
        }

        let base = dma.bus_addr(descs);
        let len = (TX_RING_LEN * TxDesc::LEN) as u32;
        regs.write(regs::TDBAL, base as u32);
        regs.write(regs::TDBAH, (base >> 32) as u32);
        regs.write(regs::TDLEN, len);
        regs.write(regs::TDH, 0);
        regs.write(regs::TDT, 0);
        regs.write(regs::TCTL, regs::tctl_value());
        regs.write(regs::TIPG, regs::tipg_value());
        debug!(base = format_args!("{base:#x}"), len, "tx ring initialized");

        Ok(Self {
            descs,
            buffers,
            tail: 0,
        })
    }

    pub fn capacity(&self) -> usize {
        TX_RING_LEN
    }

    pub fn tail(&self) -> usize {
        self.tail
    }

    /// Slot the next frame is written to.
    ///
    /// This is the descriptor the tail sweeps over when it advances, i.e. the one hardware will
    /// fetch once the new tail is published. Its DD bit is the only one that proves hardware has
    /// finished with the buffer about to be overwritten.
    pub fn candidate_slot(&self) -> usize {
        self.tail
    }

    pub fn descriptor<M: DmaMemory + ?Sized>(&self, dma: &mut M, slot: usize) -> TxDesc {
        let mut bytes = [0u8; TxDesc::LEN];
        dma.read(self.descs, (slot % TX_RING_LEN) * TxDesc::LEN, &mut bytes);
        TxDesc::from_bytes(bytes)
    }

    fn store<M: DmaMemory + ?Sized>(&self, dma: &mut M, slot: usize, desc: &TxDesc) {
        dma.write(self.descs, slot * TxDesc::LEN, &desc.to_bytes());
    }

    /// Queue one frame for transmission and publish the new tail.
    pub fn transmit<R, M>(&mut self, regs: &mut R, dma: &mut M, frame: &[u8]) -> Result<(), TxError>
    where
        R: RegisterAccess + ?Sized,
        M: DmaMemory + ?Sized,
    {
        if frame.len() >= MAX_FRAME_LEN {
            return Err(TxError::PacketTooLarge {
                len: frame.len(),
                max: MAX_FRAME_LEN,
            });
        }

        let slot = self.candidate_slot();
        let mut desc = self.descriptor(dma, slot);
        if !desc.is_done() {
            return Err(TxError::RingFull);
        }

        dma.write(self.buffers[slot], 0, frame);
        desc.length = frame.len() as u16;
        desc.status = TxStatus::empty();
        desc.cmd = TxCmd::RS | TxCmd::EOP;
        self.store(dma, slot, &desc);

        self.tail = (slot + 1) % TX_RING_LEN;
        regs.write(regs::TDT, self.tail as u32);
        trace!(slot, len = frame.len(), "tx frame queued");
        Ok(())
    }
}
