//! Messages exchanged between the NIC pumps and the network stack.
//!
//! Each message is a value word (the [`RequestKind`]) plus at most one [`Page`], whose
//! ownership moves from sender to receiver.

pub mod endpoint;
pub mod page;
pub mod testing;

pub use endpoint::{IpcEndpoint, IpcError, ProcessId, Received, RequestKind, SendError};
pub use page::{DecodeError, EncodeError, Page, MAX_PAGE_PAYLOAD, PAGE_SIZE};
