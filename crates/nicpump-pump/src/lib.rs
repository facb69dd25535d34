//! Polling loops that move Ethernet frames between an e1000 and the network stack.
//!
//! Two independent pumps, each meant to run as its own process:
//! - [`InputPump`]: device RX ring -> `INPUT` messages to the stack.
//! - [`OutputPump`]: `OUTPUT` messages from the stack -> device TX ring.
//!
//! Neither pump ever blocks on the device; when there is nothing to do they call their
//! [`Backoff`] policy, which also decides whether to keep going.
#![forbid(unsafe_code)]

pub mod backoff;
pub mod config;
pub mod input;
pub mod output;

use std::cell::RefCell;
use std::rc::Rc;

use nicpump_e1000::{DmaMemory, RegisterAccess, RxError, TxError, E1000};

pub use backoff::{Backoff, BackoffKind, BoundedRetries};
pub use config::{ConfigError, PumpConfig};
pub use input::{InputPump, InputStats};
pub use output::{OutputPump, OutputStats};

/// The device operations the pumps need.
pub trait NetDevice {
    fn transmit(&mut self, frame: &[u8]) -> Result<(), TxError>;
    fn receive(&mut self, buf: &mut [u8]) -> Result<usize, RxError>;
}

impl<R: RegisterAccess, M: DmaMemory> NetDevice for E1000<R, M> {
    fn transmit(&mut self, frame: &[u8]) -> Result<(), TxError> {
        E1000::transmit(self, frame)
    }

    fn receive(&mut self, buf: &mut [u8]) -> Result<usize, RxError> {
        E1000::receive(self, buf)
    }
}

impl<T: NetDevice + ?Sized> NetDevice for &mut T {
    fn transmit(&mut self, frame: &[u8]) -> Result<(), TxError> {
        <T as NetDevice>::transmit(&mut **self, frame)
    }

    fn receive(&mut self, buf: &mut [u8]) -> Result<usize, RxError> {
        <T as NetDevice>::receive(&mut **self, buf)
    }
}

impl<T: NetDevice + ?Sized> NetDevice for Box<T> {
    fn transmit(&mut self, frame: &[u8]) -> Result<(), TxError> {
        <T as NetDevice>::transmit(&mut **self, frame)
    }

    fn receive(&mut self, buf: &mut [u8]) -> Result<usize, RxError> {
        <T as NetDevice>::receive(&mut **self, buf)
    }
}

/// Lets both pumps share one driver in a single process.
impl<T: NetDevice + ?Sized> NetDevice for Rc<RefCell<T>> {
    fn transmit(&mut self, frame: &[u8]) -> Result<(), TxError> {
        self.borrow_mut().transmit(frame)
    }

    fn receive(&mut self, buf: &mut [u8]) -> Result<usize, RxError> {
        self.borrow_mut().receive(buf)
    }
}
