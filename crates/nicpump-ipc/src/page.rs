//! Page-sized packet messages.
//!
//! Layout (little-endian):
//! - `u32` frame length
//! - frame bytes, immediately after

use core::fmt;

use thiserror::Error;

pub const PAGE_SIZE: usize = 4096;

const HEADER_LEN: usize = 4;

/// Most frame bytes a single page can carry.
pub const MAX_PAGE_PAYLOAD: usize = PAGE_SIZE - HEADER_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EncodeError {
    #[error("packet of {len} bytes does not fit in a page (max {max})")]
    TooLarge { len: usize, max: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("packet length {len} exceeds page payload (max {max})")]
    LengthOutOfRange { len: u32, max: usize },
}

/// One page of memory, transferred by ownership between processes.
pub struct Page(Box<[u8; PAGE_SIZE]>);

impl Page {
    pub fn zeroed() -> Self {
        Self(Box::new([0u8; PAGE_SIZE]))
    }

    /// A page holding `frame` in packet layout.
    pub fn with_packet(frame: &[u8]) -> Result<Self, EncodeError> {
        let mut page = Self::zeroed();
        page.write_packet(frame)?;
        Ok(page)
    }

    pub fn as_bytes(&self) -> &[u8; PAGE_SIZE] {
        &self.0
    }

    pub fn as_mut_bytes(&mut self) -> &mut [u8; PAGE_SIZE] {
        &mut self.0
    }

    /// Address of the backing memory; stable for the page's lifetime.
    pub fn as_ptr(&self) -> *const u8 {
        self.0.as_ptr()
    }

    pub fn write_packet(&mut self, frame: &[u8]) -> Result<(), EncodeError> {
        if frame.len() > MAX_PAGE_PAYLOAD {
            return Err(EncodeError::TooLarge {
                len: frame.len(),
                max: MAX_PAGE_PAYLOAD,
            });
        }
        self.0[..HEADER_LEN].copy_from_slice(&(frame.len() as u32).to_le_bytes());
        self.0[HEADER_LEN..HEADER_LEN + frame.len()].copy_from_slice(frame);
        Ok(())
    }

    pub fn packet_len(&self) -> u32 {
        u32::from_le_bytes([self.0[0], self.0[1], self.0[2], self.0[3]])
    }

    /// The frame bytes named by the length header.
    ///
    /// The length comes from another process and is checked against the page, not against any
    /// frame limit; the device decides what it can send.
    pub fn packet(&self) -> Result<&[u8], DecodeError> {
        let len = self.packet_len();
        let end = usize::try_from(len)
            .ok()
            .filter(|&len| len <= MAX_PAGE_PAYLOAD)
            .ok_or(DecodeError::LengthOutOfRange {
                len,
                max: MAX_PAGE_PAYLOAD,
            })?;
        Ok(&self.0[HEADER_LEN..HEADER_LEN + end])
    }
}

impl fmt::Debug for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Page")
            .field("addr", &self.as_ptr())
            .field("packet_len", &self.packet_len())
            .finish()
    }
}
