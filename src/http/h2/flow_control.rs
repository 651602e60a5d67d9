//! HTTP/2 flow control
//!
//! Flow control as defined in RFC 7540 Section 5.2. Every DATA payload is
//! charged against two windows, the connection's and the stream's; the same
//! [`FlowControl`] pair is used at both levels.

use super::error::{Error, Result};
use super::settings::MAX_WINDOW_SIZE;
use super::DEFAULT_INITIAL_WINDOW_SIZE;

/// Flow control window
///
/// The current size is signed: a SETTINGS change of the initial window may
/// legitimately drive an open stream's send window negative.
#[derive(Debug, Clone)]
pub struct FlowControlWindow {
    initial_size: u32,
    current_size: i64,
}

impl FlowControlWindow {
    /// Create a window of the protocol default size
    pub fn new() -> Self {
        Self::with_initial_size(DEFAULT_INITIAL_WINDOW_SIZE)
    }

    pub fn with_initial_size(initial_size: u32) -> Self {
        FlowControlWindow {
            initial_size,
            current_size: initial_size as i64,
        }
    }

    /// Current window size
    pub fn size(&self) -> i64 {
        self.current_size
    }

    pub fn initial_size(&self) -> u32 {
        self.initial_size
    }

    /// Bytes that may be sent right now (0 when exhausted or negative)
    pub fn available(&self) -> usize {
        self.current_size.max(0) as usize
    }

    /// Take up to `amount` bytes of capacity; returns what was granted
    pub fn consume(&mut self, amount: usize) -> usize {
        let granted = amount.min(self.available());
        self.current_size -= granted as i64;
        granted
    }

    /// Apply a WINDOW_UPDATE increment
    pub fn increase(&mut self, increment: u32) -> Result<i64> {
        if increment == 0 {
            return Err(Error::Protocol(
                "Window update increment must be non-zero".to_string(),
            ));
        }

        let new_size = self.current_size + increment as i64;
        if new_size > MAX_WINDOW_SIZE as i64 {
            return Err(Error::FlowControl(format!(
                "Window size {} exceeds maximum (2^31-1)",
                new_size
            )));
        }

        self.current_size = new_size;
        Ok(self.current_size)
    }

    /// Charge received data against the window
    ///
    /// A peer that sends more than the window allows violates flow control.
    pub fn decrease(&mut self, amount: usize) -> Result<()> {
        if amount as i64 > self.current_size {
            return Err(Error::FlowControl(format!(
                "Received {} bytes with only {} bytes of window",
                amount, self.current_size
            )));
        }
        self.current_size -= amount as i64;
        Ok(())
    }

    /// Apply a new SETTINGS_INITIAL_WINDOW_SIZE (RFC 7540 Section 6.9.2)
    ///
    /// The current size shifts by the difference between old and new.
    pub fn update_initial_size(&mut self, new_initial_size: u32) -> Result<()> {
        let diff = new_initial_size as i64 - self.initial_size as i64;
        let new_current = self.current_size + diff;

        if new_current > MAX_WINDOW_SIZE as i64 {
            return Err(Error::FlowControl(format!(
                "New window size {} exceeds maximum (2^31-1)",
                new_current
            )));
        }

        self.initial_size = new_initial_size;
        self.current_size = new_current;
        Ok(())
    }
}

impl Default for FlowControlWindow {
    fn default() -> Self {
        Self::new()
    }
}

/// Send and receive windows for one connection or one stream
#[derive(Debug, Clone, Default)]
pub struct FlowControl {
    /// Outbound data, replenished by the peer's WINDOW_UPDATE
    pub send: FlowControlWindow,
    /// Inbound data, replenished by our WINDOW_UPDATE
    pub recv: FlowControlWindow,
}

impl FlowControl {
    pub fn new(send_size: u32, recv_size: u32) -> Self {
        FlowControl {
            send: FlowControlWindow::with_initial_size(send_size),
            recv: FlowControlWindow::with_initial_size(recv_size),
        }
    }

    /// Account for inbound DATA
    pub fn receive(&mut self, amount: usize) -> Result<()> {
        self.recv.decrease(amount)
    }

    /// Increment to advertise once the receive window has dropped below half
    ///
    /// Reopens the local window by the same amount, so the returned value
    /// must actually be sent.
    pub fn take_window_update(&mut self) -> Result<Option<u32>> {
        let current = self.recv.size();
        let initial = self.recv.initial_size() as i64;

        if current >= initial / 2 {
            return Ok(None);
        }

        let increment = (initial - current) as u32;
        self.recv.increase(increment)?;
        Ok(Some(increment))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_consume_grants_at_most_available() {
        let mut window = FlowControlWindow::with_initial_size(100);

        assert_eq!(window.consume(50), 50);
        assert_eq!(window.size(), 50);
        assert_eq!(window.consume(60), 50);
        assert_eq!(window.size(), 0);
        assert_eq!(window.consume(10), 0);
    }

    #[test]
    fn test_window_increase_and_overflow() {
        let mut window = FlowControlWindow::with_initial_size(100);
        window.consume(50);
        assert_eq!(window.increase(100).unwrap(), 150);

        let mut full = FlowControlWindow::with_initial_size(MAX_WINDOW_SIZE);
        assert!(matches!(full.increase(1), Err(Error::FlowControl(_))));
        assert!(matches!(full.increase(0), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_window_update_initial_size_can_go_negative() {
        let mut window = FlowControlWindow::with_initial_size(100);
        window.consume(80);

        window.update_initial_size(200).unwrap();
        assert_eq!(window.size(), 120);

        window.update_initial_size(50).unwrap();
        assert_eq!(window.size(), -30);
        assert_eq!(window.available(), 0);
        assert_eq!(window.consume(10), 0);
    }

    #[test]
    fn test_receive_beyond_window_is_an_error() {
        let mut flow = FlowControl::new(100, 100);
        flow.receive(100).unwrap();
        assert!(matches!(flow.receive(1), Err(Error::FlowControl(_))));
    }

    #[test]
    fn test_window_update_after_half_consumed() {
        let mut flow = FlowControl::new(100, 100);
        flow.receive(40).unwrap();
        assert_eq!(flow.take_window_update().unwrap(), None);

        flow.receive(20).unwrap();
        assert_eq!(flow.take_window_update().unwrap(), Some(60));
        assert_eq!(flow.recv.size(), 100);
        assert_eq!(flow.take_window_update().unwrap(), None);
    }
}
