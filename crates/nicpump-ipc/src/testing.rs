//! Scripted in-memory endpoint.

use std::collections::VecDeque;

use tracing::trace;

use crate::endpoint::{IpcEndpoint, IpcError, ProcessId, Received, SendError};
use crate::page::{EncodeError, Page};

/// A message accepted by [`Mailbox::try_send`].
#[derive(Debug)]
pub struct Sent {
    pub to: ProcessId,
    pub value: u32,
    pub page: Page,
}

/// Endpoint that serves queued messages and records sends.
///
/// Sent pages are kept alive, so their addresses stay distinct across a test.
#[derive(Debug, Default)]
pub struct Mailbox {
    inbox: VecDeque<Received>,
    sent: Vec<Sent>,
    refused_sends: usize,
    failed_allocs: usize,
    pub send_attempts: usize,
    pub alloc_attempts: usize,
}

impl Mailbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, from: ProcessId, value: u32, page: Option<Page>) {
        self.inbox.push_back(Received { from, value, page });
    }

    /// Queue a message carrying `frame` in packet layout.
    pub fn push_packet(&mut self, from: ProcessId, value: u32, frame: &[u8]) -> Result<(), EncodeError> {
        let page = Page::with_packet(frame)?;
        self.push(from, value, Some(page));
        Ok(())
    }

    /// Refuse the next `n` sends as if the receiver were busy.
    pub fn refuse_sends(&mut self, n: usize) {
        self.refused_sends = n;
    }

    /// Fail the next `n` page allocations.
    pub fn fail_allocs(&mut self, n: usize) {
        self.failed_allocs = n;
    }

    pub fn sent(&self) -> &[Sent] {
        &self.sent
    }

    pub fn pending(&self) -> usize {
        self.inbox.len()
    }
}

impl IpcEndpoint for Mailbox {
    fn page_alloc(&mut self) -> Result<Page, IpcError> {
        self.alloc_attempts += 1;
        if self.failed_allocs > 0 {
            self.failed_allocs -= 1;
            return Err(IpcError::NoMemory);
        }
        Ok(Page::zeroed())
    }

    fn try_send(&mut self, to: ProcessId, value: u32, page: Page) -> Result<(), SendError> {
        self.send_attempts += 1;
        if self.refused_sends > 0 {
            self.refused_sends -= 1;
            return Err(SendError {
                page,
                error: IpcError::NotReceiving,
            });
        }
        trace!(%to, value, "mailbox accepted message");
        self.sent.push(Sent { to, value, page });
        Ok(())
    }

    fn recv(&mut self) -> Result<Received, IpcError> {
        self.inbox.pop_front().ok_or(IpcError::NoMessage)
    }
}
