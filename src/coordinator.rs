//! Completion coordinator
//!
//! A countdown of outstanding requests that tears both ends of a scenario
//! down once every expected response has been observed.
//!
//! The countdown moves `Awaiting(n) -> Awaiting(n - 1) -> ... -> Done`.
//! Reaching `Done` shuts the client connection and then every registered
//! listener down, exactly once. There is one owner and no locking: the
//! probe client's event loop drives it.

use crate::http::h2::StreamId;
use crate::{Error, Result};
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Countdown state after a completion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountdownState {
    Awaiting(usize),
    Done,
}

/// Outstanding-request counter
///
/// `pending() == issued() - completed().len()` holds at all times.
#[derive(Debug, Default)]
pub struct Countdown {
    outstanding: HashSet<StreamId>,
    completed: Vec<StreamId>,
    issued: usize,
}

impl Countdown {
    pub fn new() -> Self {
        Countdown::default()
    }

    /// Register an issued request
    pub fn track(&mut self, stream_id: StreamId) -> Result<()> {
        if self.completed.contains(&stream_id) || !self.outstanding.insert(stream_id) {
            return Err(Error::Coordinator(format!(
                "stream {} is already tracked",
                stream_id
            )));
        }
        self.issued += 1;
        Ok(())
    }

    /// Record that a request's response was fully observed
    ///
    /// Completing a stream that was never tracked, or completing one twice,
    /// is an error and leaves the count unchanged.
    pub fn complete(&mut self, stream_id: StreamId) -> Result<CountdownState> {
        if !self.outstanding.remove(&stream_id) {
            let why = if self.completed.contains(&stream_id) {
                "completed twice"
            } else {
                "never issued"
            };
            return Err(Error::Coordinator(format!("stream {} {}", stream_id, why)));
        }
        self.completed.push(stream_id);
        Ok(self.state())
    }

    pub fn state(&self) -> CountdownState {
        match self.outstanding.len() {
            0 => CountdownState::Done,
            n => CountdownState::Awaiting(n),
        }
    }

    pub fn pending(&self) -> usize {
        self.outstanding.len()
    }

    pub fn issued(&self) -> usize {
        self.issued
    }

    /// Completed streams in completion order
    pub fn completed(&self) -> &[StreamId] {
        &self.completed
    }
}

/// Something the coordinator closes at teardown
pub trait Shutdown {
    fn shutdown(&mut self) -> Result<()>;
}

/// Countdown plus the teardown it gates
pub struct Coordinator<'a> {
    countdown: Countdown,
    listeners: Vec<&'a mut dyn Shutdown>,
    teardowns: usize,
}

impl<'a> Coordinator<'a> {
    pub fn new() -> Self {
        Coordinator {
            countdown: Countdown::new(),
            listeners: Vec::new(),
            teardowns: 0,
        }
    }

    /// Register a listener to stop after the client connection is closed
    pub fn on_done(mut self, listener: &'a mut dyn Shutdown) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn track(&mut self, stream_id: StreamId) -> Result<()> {
        if self.teardowns > 0 {
            return Err(Error::Coordinator(format!(
                "stream {} issued after teardown",
                stream_id
            )));
        }
        self.countdown.track(stream_id)
    }

    /// Count a completion; the last one tears `connection` and the listeners down
    pub fn complete(
        &mut self,
        stream_id: StreamId,
        connection: &mut dyn Shutdown,
    ) -> Result<CountdownState> {
        let state = self.countdown.complete(stream_id)?;
        debug!(stream_id, ?state, "response complete");

        if state == CountdownState::Done {
            self.teardown(connection)?;
        }
        Ok(state)
    }

    /// Tear down now if nothing is outstanding (e.g. no requests were issued)
    pub fn settle(&mut self, connection: &mut dyn Shutdown) -> Result<()> {
        if self.countdown.state() == CountdownState::Done && self.teardowns == 0 {
            self.teardown(connection)?;
        }
        Ok(())
    }

    /// Every end is shut down even when an earlier one fails; the first
    /// failure is returned.
    fn teardown(&mut self, connection: &mut dyn Shutdown) -> Result<()> {
        if self.teardowns > 0 {
            return Err(Error::Coordinator("teardown requested twice".to_string()));
        }
        self.teardowns += 1;
        info!(
            completed = self.countdown.completed().len(),
            listeners = self.listeners.len(),
            "all responses observed, tearing down"
        );

        let mut first_error = connection.shutdown().err();
        for listener in self.listeners.iter_mut() {
            if let Err(e) = listener.shutdown() {
                warn!(error = %e, "listener shutdown failed");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn is_done(&self) -> bool {
        self.teardowns > 0
    }

    /// Number of teardowns performed (0 or 1)
    pub fn teardowns(&self) -> usize {
        self.teardowns
    }

    pub fn countdown(&self) -> &Countdown {
        &self.countdown
    }
}

impl Default for Coordinator<'_> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Records shutdown calls into a shared log
    struct Recorder {
        name: &'static str,
        log: Rc<RefCell<Vec<&'static str>>>,
        fail: bool,
    }

    impl Recorder {
        fn new(name: &'static str, log: &Rc<RefCell<Vec<&'static str>>>) -> Self {
            Recorder {
                name,
                log: Rc::clone(log),
                fail: false,
            }
        }
    }

    impl Shutdown for Recorder {
        fn shutdown(&mut self) -> Result<()> {
            self.log.borrow_mut().push(self.name);
            if self.fail {
                return Err(Error::Coordinator(format!("{} failed", self.name)));
            }
            Ok(())
        }
    }

    #[test]
    fn test_countdown_invariant() {
        let mut countdown = Countdown::new();
        countdown.track(1).unwrap();
        countdown.track(3).unwrap();
        assert_eq!(countdown.state(), CountdownState::Awaiting(2));

        assert_eq!(countdown.complete(3).unwrap(), CountdownState::Awaiting(1));
        assert_eq!(
            countdown.pending(),
            countdown.issued() - countdown.completed().len()
        );
        assert_eq!(countdown.complete(1).unwrap(), CountdownState::Done);
        assert_eq!(countdown.completed(), &[3, 1]);
    }

    #[test]
    fn test_countdown_rejects_duplicates_and_unknown() {
        let mut countdown = Countdown::new();
        countdown.track(1).unwrap();
        assert!(matches!(countdown.track(1), Err(Error::Coordinator(_))));

        assert!(matches!(countdown.complete(7), Err(Error::Coordinator(_))));
        assert_eq!(countdown.pending(), 1);

        countdown.complete(1).unwrap();
        let err = countdown.complete(1).unwrap_err();
        assert!(err.to_string().contains("completed twice"), "{}", err);
        assert!(matches!(countdown.track(1), Err(Error::Coordinator(_))));
        assert_eq!(countdown.pending(), 0);
    }

    #[test]
    fn test_teardown_once_after_all_completions() {
        for order in [[1, 3], [3, 1]] {
            let log = Rc::new(RefCell::new(Vec::new()));
            let mut client = Recorder::new("client", &log);
            let mut server = Recorder::new("server", &log);

            let mut coordinator = Coordinator::new().on_done(&mut server);
            coordinator.track(1).unwrap();
            coordinator.track(3).unwrap();

            let state = coordinator.complete(order[0], &mut client).unwrap();
            assert_eq!(state, CountdownState::Awaiting(1));
            assert!(log.borrow().is_empty());
            assert!(!coordinator.is_done());

            let state = coordinator.complete(order[1], &mut client).unwrap();
            assert_eq!(state, CountdownState::Done);
            assert_eq!(coordinator.teardowns(), 1);

            // A stray completion after teardown is an error, not a second teardown
            assert!(coordinator.complete(order[1], &mut client).is_err());
            assert!(coordinator.track(5).is_err());
            assert_eq!(coordinator.teardowns(), 1);
            drop(coordinator);

            assert_eq!(*log.borrow(), vec!["client", "server"]);
        }
    }

    #[test]
    fn test_settle_with_nothing_issued() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut client = Recorder::new("client", &log);
        let mut server = Recorder::new("server", &log);

        let mut coordinator = Coordinator::new().on_done(&mut server);
        coordinator.settle(&mut client).unwrap();
        coordinator.settle(&mut client).unwrap();
        assert_eq!(coordinator.teardowns(), 1);
        drop(coordinator);

        assert_eq!(*log.borrow(), vec!["client", "server"]);
    }

    #[test]
    fn test_failed_shutdown_still_closes_listeners() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut client = Recorder::new("client", &log);
        client.fail = true;
        let mut server = Recorder::new("server", &log);

        let mut coordinator = Coordinator::new().on_done(&mut server);
        coordinator.track(1).unwrap();
        let err = coordinator.complete(1, &mut client).unwrap_err();
        assert!(err.to_string().contains("client failed"));
        assert_eq!(coordinator.teardowns(), 1);
        drop(coordinator);

        assert_eq!(*log.borrow(), vec!["client", "server"]);
    }
}
