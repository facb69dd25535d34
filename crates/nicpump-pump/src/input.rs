//! Device -> stack.

use core::ops::ControlFlow;

use nicpump_e1000::RX_BUFFER_SIZE;
use nicpump_ipc::{IpcEndpoint, ProcessId, RequestKind, SendError};
use tracing::{debug, trace, warn};

use crate::backoff::Backoff;
use crate::NetDevice;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InputStats {
    /// Frames delivered to the stack.
    pub forwarded: u64,
    /// Polls that found the RX ring empty.
    pub empty_polls: u64,
    /// Frames the device reported but that could not be forwarded.
    pub dropped: u64,
    pub alloc_retries: u64,
    pub send_retries: u64,
}

/// Forwards every received frame to the stack as an `INPUT` message, one page per frame.
pub struct InputPump<D, E, B> {
    device: D,
    endpoint: E,
    backoff: B,
    stack: ProcessId,
    stats: InputStats,
}

impl<D: NetDevice, E: IpcEndpoint, B: Backoff> InputPump<D, E, B> {
    pub fn new(device: D, endpoint: E, backoff: B, stack: ProcessId) -> Self {
        Self {
            device,
            endpoint,
            backoff,
            stack,
            stats: InputStats::default(),
        }
    }

    /// Poll until one frame has been forwarded or dropped.
    ///
    /// Returns `Break` only when the backoff policy gives up.
    pub fn pump_one(&mut self) -> ControlFlow<()> {
        let mut buf = [0u8; RX_BUFFER_SIZE];
        let len = loop {
            match self.device.receive(&mut buf) {
                Ok(len) => break len,
                Err(err) if err.is_empty() => {
                    self.stats.empty_polls += 1;
                    if self.backoff.pause().is_break() {
                        return ControlFlow::Break(());
                    }
                }
                Err(err) => {
                    self.stats.dropped += 1;
                    debug!(error = %err, "dropping received frame");
                    return ControlFlow::Continue(());
                }
            }
        };
        self.forward(&buf[..len])
    }

    fn forward(&mut self, frame: &[u8]) -> ControlFlow<()> {
        // A fresh page per frame: the stack owns the previous one now.
        let mut page = loop {
            match self.endpoint.page_alloc() {
                Ok(page) => break page,
                Err(err) => {
                    self.stats.alloc_retries += 1;
                    debug!(error = %err, "page allocation failed");
                    if self.backoff.pause().is_break() {
                        return ControlFlow::Break(());
                    }
                }
            }
        };

        if let Err(err) = page.write_packet(frame) {
            self.stats.dropped += 1;
            warn!(error = %err, "received frame does not fit in a page");
            return ControlFlow::Continue(());
        }

        loop {
            match self
                .endpoint
                .try_send(self.stack, RequestKind::Input.value(), page)
            {
                Ok(()) => {
                    self.stats.forwarded += 1;
                    trace!(len = frame.len(), stack = %self.stack, "frame forwarded");
                    return ControlFlow::Continue(());
                }
                Err(SendError { page: returned, error }) => {
                    page = returned;
                    self.stats.send_retries += 1;
                    if !error.is_transient() {
                        warn!(%error, stack = %self.stack, "send to stack failed");
                    }
                    if self.backoff.pause().is_break() {
                        return ControlFlow::Break(());
                    }
                }
            }
        }
    }

    /// Pump until the backoff policy stops it.
    pub fn run(&mut self) {
        while self.pump_one().is_continue() {}
    }

    pub fn stats(&self) -> InputStats {
        self.stats
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn endpoint(&self) -> &E {
        &self.endpoint
    }

    pub fn into_parts(self) -> (D, E, B) {
        (self.device, self.endpoint, self.backoff)
    }
}
