//! Legacy 8254x descriptor formats (16 bytes each, little-endian, no padding).

use bitflags::bitflags;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TxCmd: u8 {
        /// End of Packet.
        const EOP = 1 << 0;
        /// Insert FCS.
        const IFCS = 1 << 1;
        /// Report Status: hardware sets DD once the descriptor is processed.
        const RS = 1 << 3;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TxStatus: u8 {
        /// Descriptor Done.
        const DD = 1 << 0;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RxStatus: u8 {
        /// Descriptor Done.
        const DD = 1 << 0;
        /// End of Packet.
        const EOP = 1 << 1;
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxDesc {
    pub addr: u64,
    pub length: u16,
    pub cso: u8,
    pub cmd: TxCmd,
    pub status: TxStatus,
    pub css: u8,
    pub special: u16,
}

const _: () = assert!(core::mem::size_of::<TxDesc>() == TxDesc::LEN);

impl TxDesc {
    pub const LEN: usize = 16;

    pub fn from_bytes(bytes: [u8; Self::LEN]) -> Self {
        Self {
            addr: u64::from_le_bytes(bytes[0..8].try_into().unwrap()),
            length: u16::from_le_bytes([bytes[8], bytes[9]]),
            cso: bytes[10],
            cmd: TxCmd::from_bits_retain(bytes[11]),
            status: TxStatus::from_bits_retain(bytes[12]),
            css: bytes[13],
            special: u16::from_le_bytes([bytes[14], bytes[15]]),
        }
    }

    pub fn to_bytes(&self) -> [u8; Self::LEN] {
        let mut bytes = [0u8; Self::LEN];
        bytes[0..8].copy_from_slice(&self.addr.to_le_bytes());
        bytes[8..10].copy_from_slice(&self.length.to_le_bytes());
        bytes[10] = self.cso;
        bytes[11] = self.cmd.bits();
        bytes[12] = self.status.bits();
        bytes[13] = self.css;
        bytes[14..16].copy_from_slice(&self.special.to_le_bytes());
        bytes
    }

    pub fn is_done(&self) -> bool {
        self.status.contains(TxStatus::DD)
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RxDesc {
    pub addr: u64,
    pub length: u16,
    pub checksum: u16,
    pub status: RxStatus,
    pub errors: u8,
    pub special: u16,
}

const _: () = assert!(core::mem::size_of::<RxDesc>() == RxDesc::LEN);

impl RxDesc {
    pub const LEN: usize = 16;

    pub fn from_bytes(bytes: [u8; Self::LEN]) -> Self {
        Self {
            addr: u64::from_le_bytes(bytes[0..8].try_into().unwrap()),
            length: u16::from_le_bytes([bytes[8], bytes[9]]),
            checksum: u16::from_le_bytes([bytes[10], bytes[11]]),
            status: RxStatus::from_bits_retain(bytes[12]),
            errors: bytes[13],
            special: u16::from_le_bytes([bytes[14], bytes[15]]),
        }
    }

    pub fn to_bytes(&self) -> [u8; Self::LEN] {
        let mut bytes = [0u8; Self::LEN];
        bytes[0..8].copy_from_slice(&self.addr.to_le_bytes());
        bytes[8..10].copy_from_slice(&self.length.to_le_bytes());
        bytes[10..12].copy_from_slice(&self.checksum.to_le_bytes());
        bytes[12] = self.status.bits();
        bytes[13] = self.errors;
        bytes[14..16].copy_from_slice(&self.special.to_le_bytes());
        bytes
    }

    pub fn is_done(&self) -> bool {
        self.status.contains(RxStatus::DD)
    }
}
