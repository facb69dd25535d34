//! Stack -> device.

use core::ops::ControlFlow;

use nicpump_ipc::{IpcEndpoint, ProcessId, RequestKind};
use tracing::{debug, trace};

use crate::backoff::Backoff;
use crate::NetDevice;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OutputStats {
    /// Frames handed to the TX ring.
    pub transmitted: u64,
    /// Messages from the wrong process or with the wrong tag.
    pub misaddressed: u64,
    /// Well-addressed messages whose frame could not be sent.
    pub dropped: u64,
    pub ring_full_retries: u64,
    pub recv_errors: u64,
}

/// Transmits the frame of every `OUTPUT` message from the stack.
pub struct OutputPump<D, E, B> {
    device: D,
    endpoint: E,
    backoff: B,
    stack: ProcessId,
    stats: OutputStats,
}

impl<D: NetDevice, E: IpcEndpoint, B: Backoff> OutputPump<D, E, B> {
    pub fn new(device: D, endpoint: E, backoff: B, stack: ProcessId) -> Self {
        Self {
            device,
            endpoint,
            backoff,
            stack,
            stats: OutputStats::default(),
        }
    }

    /// Handle one message.
    ///
    /// Returns `Break` only when the backoff policy gives up.
    pub fn pump_one(&mut self) -> ControlFlow<()> {
        let msg = match self.endpoint.recv() {
            Ok(msg) => msg,
            Err(err) => {
                self.stats.recv_errors += 1;
                debug!(error = %err, "recv failed");
                return self.backoff.pause();
            }
        };

        if msg.from != self.stack || msg.kind() != Some(RequestKind::Output) {
            self.stats.misaddressed += 1;
            debug!(from = %msg.from, value = msg.value, "ignoring unexpected message");
            return ControlFlow::Continue(());
        }

        let Some(page) = msg.page else {
            self.stats.dropped += 1;
            debug!("output request without a page");
            return ControlFlow::Continue(());
        };
        let frame = match page.packet() {
            Ok(frame) => frame,
            Err(err) => {
                self.stats.dropped += 1;
                debug!(error = %err, "malformed output request");
                return ControlFlow::Continue(());
            }
        };

        loop {
            match self.device.transmit(frame) {
                Ok(()) => {
                    self.stats.transmitted += 1;
                    trace!(len = frame.len(), "frame transmitted");
                    return ControlFlow::Continue(());
                }
                Err(err) if err.is_transient() => {
                    self.stats.ring_full_retries += 1;
                    if self.backoff.pause().is_break() {
                        return ControlFlow::Break(());
                    }
                }
                Err(err) => {
                    self.stats.dropped += 1;
                    debug!(error = %err, "dropping output frame");
                    return ControlFlow::Continue(());
                }
            }
        }
    }

    /// Pump until the backoff policy stops it.
    pub fn run(&mut self) {
        while self.pump_one().is_continue() {}
    }

    pub fn stats(&self) -> OutputStats {
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
