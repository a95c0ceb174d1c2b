//! Kernel uevent intake: socket, framing, parsing, dispatch.

pub mod dispatch;
pub mod handlers;
pub mod parse;
pub mod socket;

use std::io;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::export::health::HealthMetrics;

pub use dispatch::{DispatchOutcome, EventDispatcher, HandlerError, UeventHandler, ValueMatch};
pub use parse::{parse_record, FrameError, KeyValueRecord, UeventMessage, UEVENT_MSG_LEN};
pub use socket::{NetlinkUeventSocket, UeventSource};

/// Failure of one receive iteration.
#[derive(Error, Debug)]
pub enum ListenError {
    #[error("receiving uevent: {0}")]
    Receive(#[from] io::Error),

    #[error(transparent)]
    Frame(#[from] FrameError),
}

impl ListenError {
    fn reason(&self) -> &'static str {
        match self {
            Self::Receive(_) => "receive",
            Self::Frame(e) => e.reason(),
        }
    }
}

/// The listener exceeded its consecutive failure budget.
#[derive(Error, Debug)]
#[error("uevent listener gave up after {failures} consecutive failures: {last}")]
pub struct ListenerExhausted {
    pub failures: u32,
    #[source]
    pub last: ListenError,
}

/// Receives, frames, parses and dispatches uevents.
pub struct UeventListener<S> {
    source: S,
    dispatcher: EventDispatcher,
    max_consecutive_errors: u32,
    health: Arc<HealthMetrics>,
    buf: Vec<u8>,
}

impl<S: UeventSource> UeventListener<S> {
    pub fn new(
        source: S,
        dispatcher: EventDispatcher,
        max_consecutive_errors: u32,
        health: Arc<HealthMetrics>,
    ) -> Self {
        Self {
            source,
            dispatcher,
            max_consecutive_errors: max_consecutive_errors.max(1),
            health,
            buf: vec![0u8; UEVENT_MSG_LEN],
        }
    }

    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.dispatcher
    }

    /// Handles a single datagram from the source.
    pub fn process_one(&mut self) -> Result<DispatchOutcome, ListenError> {
        let n = self.source.recv(&mut self.buf)?;
        self.health.uevents_received.inc();

        let message = UeventMessage::frame(&self.buf[..n.min(self.buf.len())])?;
        let record = message.parse()?;

        if record.skipped() > 0 {
            debug!(skipped = record.skipped(), "ignored uevent segments without a key");
        }

        Ok(self.dispatcher.dispatch(&record))
    }

    /// Processes uevents until the failure budget is spent.
    ///
    /// A successful iteration resets the failure count.
    pub fn listen(&mut self) -> ListenerExhausted {
        info!(
            rules = self.dispatcher.len(),
            max_consecutive_errors = self.max_consecutive_errors,
            "uevent listener started",
        );

        let mut failures = 0u32;

        loop {
            match self.process_one() {
                Ok(_) => failures = 0,
                Err(e) => {
                    failures += 1;
                    self.health
                        .uevent_errors
                        .with_label_values(&[e.reason()])
                        .inc();
                    warn!(error = %e, failures, "uevent iteration failed");

                    if failures >= self.max_consecutive_errors {
                        error!(failures, "uevent socket is not recovering");
                        return ListenerExhausted { failures, last: e };
                    }
                }
            }
        }
    }
}
