use crate::cancel::CancelToken;
use crate::config::BasicJobConfig;

use std::time::Duration;

/// Decision of a gate before an iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Next {
    Continue,
    Stop,
}

/// Decides whether another iteration may run. A gate may block to pace the loop.
pub trait Gate {
    fn poll(&mut self) -> Next;
}

impl<F: FnMut() -> Next> Gate for F {
    fn poll(&mut self) -> Next {
        self()
    }
}

/// Waits `interval_ms` before each iteration and stops after `count` iterations
/// (unlimited when 0) or when the token is cancelled
#[derive(Debug)]
pub struct BasicGate {
    interval: Duration,
    remaining: Option<u64>,
    cancel: CancelToken,
}

impl BasicGate {
    pub fn new(config: &BasicJobConfig, cancel: CancelToken) -> Self {
        BasicGate {
            interval: Duration::from_millis(config.interval_ms),
            remaining: (config.count > 0).then_some(config.count),
            cancel,
        }
    }
}

impl Gate for BasicGate {
    fn poll(&mut self) -> Next {
        if self.cancel.is_cancelled() || self.remaining == Some(0) {
            return Next::Stop;
        }
        if !self.interval.is_zero() && !self.cancel.sleep(self.interval) {
            return Next::Stop;
        }
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining -= 1;
        }
        Next::Continue
    }
}
