//! Polled driver for Intel 8254x (e1000) NICs.
//!
//! The driver owns the register window and both descriptor rings. Everything is polled:
//! [`E1000::transmit`] queues a frame and returns immediately, [`E1000::receive`] returns
//! [`RxError::NoPacketAvailable`] when hardware has nothing to hand over.
//!
//! Hardware access goes through two seams so the ring logic runs unchanged against fakes:
//! - [`RegisterAccess`] for BAR0 registers ([`MmioRegisters`] on real hardware).
//! - [`DmaMemory`] for descriptor and packet memory, addressed by opaque [`DmaBuffer`] handles.

pub mod desc;
pub mod dma;
pub mod regs;
pub mod rx;
pub mod testing;
pub mod tx;

use thiserror::Error;
use tracing::{error, info};

pub use desc::{RxDesc, RxStatus, TxCmd, TxDesc, TxStatus};
pub use dma::{DmaBuffer, DmaError, DmaMemory};
pub use regs::{MmioRegisters, RegisterAccess};
pub use rx::{RxError, RxRing};
pub use tx::{TxError, TxRing};

pub const INTEL_VENDOR_ID: u16 = 0x8086;
/// 82540EM, the part QEMU emulates as `e1000`.
pub const E1000_DEVICE_ID: u16 = 0x100E;

/// STATUS value of a freshly enabled 82540EM with link up (full duplex, 1000 Mb/s).
pub const STATUS_SIGNATURE: u32 = 0x8008_0783;

/// Largest Ethernet frame, header and CRC included.
pub const MAX_FRAME_LEN: usize = 1518;
pub const TX_RING_LEN: usize = 64;
pub const TX_BUFFER_SIZE: usize = MAX_FRAME_LEN;
pub const RX_RING_LEN: usize = 128;
/// Matches RCTL.BSIZE; larger than [`MAX_FRAME_LEN`] to meet the hardware granularity.
pub const RX_BUFFER_SIZE: usize = 2048;
/// TDLEN/RDLEN must be multiples of 128 bytes, and the ring base 16-byte aligned.
pub const RING_ALIGN: usize = 128;

const _: () = assert!((TX_RING_LEN * TxDesc::LEN) % RING_ALIGN == 0);
const _: () = assert!((RX_RING_LEN * RxDesc::LEN) % RING_ALIGN == 0);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct E1000Config {
    /// Address programmed into the receive filter (RAL0/RAH0).
    pub mac: [u8; 6],
}

impl Default for E1000Config {
    fn default() -> Self {
        Self {
            mac: [0x52, 0x54, 0x00, 0x12, 0x34, 0x56],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttachError {
    #[error("unsupported PCI function {vendor:04x}:{device:04x}")]
    UnsupportedDevice { vendor: u16, device: u16 },

    #[error("failed to enable device or map BAR0: {0}")]
    Map(String),

    #[error("device status {found:#010x} does not match {expected:#010x}")]
    StatusMismatch { expected: u32, found: u32 },

    #[error(transparent)]
    Dma(#[from] DmaError),
}

/// A discovered PCI function, provided by the platform's bus enumeration.
pub trait PciFunction {
    type Registers: RegisterAccess;

    fn vendor_id(&self) -> u16;
    fn device_id(&self) -> u16;

    /// Enable memory decoding and bus mastering, then map BAR0.
    fn enable(&mut self) -> Result<Self::Registers, AttachError>;
}

/// An attached 8254x NIC.
pub struct E1000<R, M> {
    regs: R,
    dma: M,
    tx: TxRing,
    rx: RxRing,
    mac: [u8; 6],
}

impl<R: RegisterAccess, M: DmaMemory> E1000<R, M> {
    /// Enable the function, validate the device, and bring up both rings (TX first).
    ///
    /// Failure leaves nothing to tear down; callers abort and restart from scratch.
    pub fn attach<P>(mut pci: P, mut dma: M, config: E1000Config) -> Result<Self, AttachError>
    where
        P: PciFunction<Registers = R>,
    {
        let (vendor, device) = (pci.vendor_id(), pci.device_id());
        if (vendor, device) != (INTEL_VENDOR_ID, E1000_DEVICE_ID) {
            return Err(AttachError::UnsupportedDevice { vendor, device });
        }

        let mut regs = pci.enable()?;

        let status = regs.read(regs::STATUS);
        if status != STATUS_SIGNATURE {
            error!(
                status = format_args!("{status:#010x}"),
                "e1000 status signature mismatch"
            );
            return Err(AttachError::StatusMismatch {
                expected: STATUS_SIGNATURE,
                found: status,
            });
        }

        let tx = TxRing::init(&mut regs, &mut dma)?;
        let rx = RxRing::init(&mut regs, &mut dma, config.mac)?;
        info!(
            status = format_args!("{status:#010x}"),
            mac = %format_mac(config.mac),
            "e1000 attached"
        );

        Ok(Self {
            regs,
            dma,
            tx,
            rx,
            mac: config.mac,
        })
    }

    pub fn transmit(&mut self, frame: &[u8]) -> Result<(), TxError> {
        self.tx.transmit(&mut self.regs, &mut self.dma, frame)
    }

    /// Copy the next received frame into `buf` and return its length.
    pub fn receive(&mut self, buf: &mut [u8]) -> Result<usize, RxError> {
        self.rx.receive(&mut self.regs, &mut self.dma, buf)
    }

    pub fn mac_address(&self) -> [u8; 6] {
        self.mac
    }

    pub fn link_up(&self) -> bool {
        regs::Status::from_bits_retain(self.regs.read(regs::STATUS)).contains(regs::Status::LU)
    }

    pub fn full_duplex(&self) -> bool {
        regs::Status::from_bits_retain(self.regs.read(regs::STATUS)).contains(regs::Status::FD)
    }

    pub fn tx_ring(&self) -> &TxRing {
        &self.tx
    }

    pub fn rx_ring(&self) -> &RxRing {
        &self.rx
    }

    pub fn registers(&self) -> &R {
        &self.regs
    }

    pub fn dma_mut(&mut self) -> &mut M {
        &mut self.dma
    }
}

pub fn format_mac(mac: [u8; 6]) -> String {
    format!(
        "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
        mac[0], mac[1], mac[2], mac[3], mac[4], mac[5]
    )
}
