//! Digit delivery from an external DTMF detector into a running call

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::trace;

use crate::{Error, Result};

/// Next event seen while waiting for a digit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigitEvent {
    Digit(char),
    Timeout,
    ChannelGone,
}

/// Creates a connected sender/receiver pair for one call.
pub fn dtmf_channel() -> (DtmfSender, DtmfReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (DtmfSender { tx }, DtmfReceiver { rx })
}

/// Detector side: pushes one digit at a time.
#[derive(Debug, Clone)]
pub struct DtmfSender {
    tx: mpsc::UnboundedSender<char>,
}

impl DtmfSender {
    /// Queues `digit` for the call. Fails with `ChannelGone` once the call's
    /// executor has gone away.
    pub fn send(&self, digit: char) -> Result<()> {
        self.tx.send(digit).map_err(|_| Error::ChannelGone)
    }

    pub fn send_all(&self, digits: &str) -> Result<()> {
        digits.chars().try_for_each(|digit| self.send(digit))
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Executor side: waits for digits with a timeout.
///
/// Dropping every [`DtmfSender`] is treated as the channel going away.
#[derive(Debug)]
pub struct DtmfReceiver {
    rx: mpsc::UnboundedReceiver<char>,
}

impl DtmfReceiver {
    pub async fn next_digit(&mut self, timeout: Duration) -> DigitEvent {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(digit)) => {
                trace!("DTMF {}", digit);
                DigitEvent::Digit(digit)
            }
            Ok(None) => DigitEvent::ChannelGone,
            Err(_) => DigitEvent::Timeout,
        }
    }

    /// Removes and returns every digit already queued.
    pub fn drain(&mut self) -> String {
        let mut digits = String::new();
        while let Ok(digit) = self.rx.try_recv() {
            digits.push(digit);
        }
        digits
    }

    /// Collects between `min` and `max` digits.
    ///
    /// Stops early on any digit in `terminators` (not included in the
    /// result). Each digit gets its own `timeout`; when it runs out the digits
    /// gathered so far are returned if there are at least `min` of them,
    /// otherwise the result is empty.
    pub async fn collect_digits(
        &mut self,
        min: usize,
        max: usize,
        terminators: &str,
        timeout: Duration,
    ) -> Result<String> {
        let mut digits = String::new();
        while digits.len() < max {
            match self.next_digit(timeout).await {
                DigitEvent::Digit(digit) if terminators.contains(digit) => break,
                DigitEvent::Digit(digit) => digits.push(digit),
                DigitEvent::Timeout => break,
                DigitEvent::ChannelGone => return Err(Error::ChannelGone),
            }
        }
        if digits.len() >= min {
            Ok(digits)
        } else {
            Ok(String::new())
        }
    }
}
