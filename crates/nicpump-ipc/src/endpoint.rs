//! Rendezvous IPC between the pumps and the network stack.
//!
//! A send succeeds only while the receiver is blocked in `recv`; otherwise it fails with
//! [`IpcError::NotReceiving`] and hands the page back to the sender.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use thiserror::Error;

use crate::page::Page;

/// Identity of a process on the IPC channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcessId(pub u32);

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

/// Tag carried in a message's value word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum RequestKind {
    /// Frame received from the wire, driver to stack.
    Input = 10,
    /// Frame to put on the wire, stack to driver.
    Output = 11,
}

impl RequestKind {
    pub const fn value(self) -> u32 {
        self as u32
    }

    pub fn from_value(value: u32) -> Option<Self> {
        match value {
            10 => Some(Self::Input),
            11 => Some(Self::Output),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum IpcError {
    #[error("receiver is not waiting")]
    NotReceiving,

    #[error("out of memory")]
    NoMemory,

    #[error("no message pending")]
    NoMessage,

    #[error("no such process")]
    BadProcess,

    #[error("invalid argument")]
    Invalid,
}

impl IpcError {
    /// Whether retrying the same call can succeed later.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            IpcError::NotReceiving | IpcError::NoMemory | IpcError::NoMessage
        )
    }
}

/// A failed send. The page comes back so the sender can retry without re-encoding.
#[derive(Debug, Error)]
#[error("send failed: {error}")]
pub struct SendError {
    pub page: Page,
    #[source]
    pub error: IpcError,
}

impl SendError {
    pub fn into_page(self) -> Page {
        self.page
    }
}

/// A delivered message.
#[derive(Debug)]
pub struct Received {
    pub from: ProcessId,
    pub value: u32,
    pub page: Option<Page>,
}

impl Received {
    pub fn kind(&self) -> Option<RequestKind> {
        RequestKind::from_value(self.value)
    }
}

pub trait IpcEndpoint {
    /// A fresh zeroed page owned by the caller.
    fn page_alloc(&mut self) -> Result<Page, IpcError> {
        Ok(Page::zeroed())
    }

    /// Hand `page` to `to`, tagged with `value`, if `to` is waiting in `recv`.
    fn try_send(&mut self, to: ProcessId, value: u32, page: Page) -> Result<(), SendError>;

    /// Wait for the next message addressed to this process.
    fn recv(&mut self) -> Result<Received, IpcError>;
}

impl<T: IpcEndpoint + ?Sized> IpcEndpoint for &mut T {
    fn page_alloc(&mut self) -> Result<Page, IpcError> {
        <T as IpcEndpoint>::page_alloc(&mut **self)
    }

    fn try_send(&mut self, to: ProcessId, value: u32, page: Page) -> Result<(), SendError> {
        <T as IpcEndpoint>::try_send(&mut **self, to, value, page)
    }

    fn recv(&mut self) -> Result<Received, IpcError> {
        <T as IpcEndpoint>::recv(&mut **self)
    }
}

impl<T: IpcEndpoint + ?Sized> IpcEndpoint for Rc<RefCell<T>> {
    fn page_alloc(&mut self) -> Result<Page, IpcError> {
        self.borrow_mut().page_alloc()
    }

    fn try_send(&mut self, to: ProcessId, value: u32, page: Page) -> Result<(), SendError> {
        self.borrow_mut().try_send(to, value, page)
    }

    fn recv(&mut self) -> Result<Received, IpcError> {
        self.borrow_mut().recv()
    }
}
