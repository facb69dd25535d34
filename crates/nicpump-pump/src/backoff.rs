//! What a pump does while it waits: yield, spin, or give up.

use core::ops::ControlFlow;
use std::str::FromStr;

/// Called each time a pump has to wait for the device or the stack.
///
/// `Break` stops the pump. Production policies never break.
pub trait Backoff {
    fn pause(&mut self) -> ControlFlow<()>;
}

impl<B: Backoff + ?Sized> Backoff for &mut B {
    fn pause(&mut self) -> ControlFlow<()> {
        <B as Backoff>::pause(&mut **self)
    }
}

impl<B: Backoff + ?Sized> Backoff for Box<B> {
    fn pause(&mut self) -> ControlFlow<()> {
        <B as Backoff>::pause(&mut **self)
    }
}

/// Production policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackoffKind {
    /// Give the CPU to other processes.
    #[default]
    Yield,
    /// Busy-wait.
    Spin,
}

impl Backoff for BackoffKind {
    fn pause(&mut self) -> ControlFlow<()> {
        match self {
            BackoffKind::Yield => std::thread::yield_now(),
            BackoffKind::Spin => core::hint::spin_loop(),
        }
        ControlFlow::Continue(())
    }
}

impl FromStr for BackoffKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "yield" => Ok(Self::Yield),
            "spin" => Ok(Self::Spin),
            _ => Err(()),
        }
    }
}

/// Allows a fixed number of pauses, then stops the pump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundedRetries {
    remaining: usize,
    pauses: usize,
}

impl BoundedRetries {
    pub fn new(retries: usize) -> Self {
        Self {
            remaining: retries,
            pauses: 0,
        }
    }

    /// Pauses granted so far.
    pub fn pauses(&self) -> usize {
        self.pauses
    }
}

impl Backoff for BoundedRetries {
    fn pause(&mut self) -> ControlFlow<()> {
        if self.remaining == 0 {
            return ControlFlow::Break(());
        }
        self.remaining -= 1;
        self.pauses += 1;
        ControlFlow::Continue(())
    }
}

/// Adapts a closure into a [`Backoff`].
pub fn from_fn<F: FnMut() -> ControlFlow<()>>(f: F) -> FromFn<F> {
    FromFn(f)
}

pub struct FromFn<F>(F);

impl<F: FnMut() -> ControlFlow<()>> Backoff for FromFn<F> {
    fn pause(&mut self) -> ControlFlow<()> {
        (self.0)()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounded_retries_break_after_budget() {
        let mut backoff = BoundedRetries::new(2);
        assert!(backoff.pause().is_continue());
        assert!(backoff.pause().is_continue());
        assert!(backoff.pause().is_break());
        assert!(backoff.pause().is_break());
        assert_eq!(backoff.pauses(), 2);
    }

    #[test]
    fn production_policies_never_stop() {
        for mut kind in [BackoffKind::Yield, BackoffKind::Spin] {
            for _ in 0..16 {
                assert!(kind.pause().is_continue());
            }
        }
    }

    #[test]
    fn backoff_kind_parses_case_insensitively() {
        assert_eq!("yield".parse::<BackoffKind>(), Ok(BackoffKind::Yield));
        assert_eq!(" SPIN ".parse::<BackoffKind>(), Ok(BackoffKind::Spin));
        assert_eq!("sleep".parse::<BackoffKind>(), Err(()));
    }

    #[test]
    fn closures_can_drive_the_pump() {
        let mut calls = 0;
        let mut backoff = from_fn(|| {
            calls += 1;
            if calls < 3 {
                ControlFlow::Continue(())
            } else {
                ControlFlow::Break(())
            }
        });
        while backoff.pause().is_continue() {}
        drop(backoff);
        assert_eq!(calls, 3);
    }
}
