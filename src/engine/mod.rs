//! Request/response transactions over a [`Transport`].
//!
//! One transaction arms an interrupt receive, sends the request with a
//! control transfer, then dispatches transport events until the receive's
//! completion callback publishes an outcome. A reply timeout restarts the
//! whole exchange; every other outcome ends it.
//!
//! A [`TransactionEngine`] runs one transaction at a time. `execute` takes
//! `&mut self`; callers sharing an engine between threads must serialize
//! access themselves, typically with one engine per device connection.

use std::sync::Arc;
use std::time::Instant;

use crate::config::EngineConfig;
use crate::dump;
use crate::transport::{is_transient, ControlSetup, Transport};

pub mod outcome;

pub use outcome::{Completion, ReceiveBuffer, TransferOutcome};

#[derive(Debug, thiserror::Error)]
pub enum TransactionError {
    #[error("Send failed: {0}")]
    Send(rusb::Error),
    #[error("Receive submit failed: {0}")]
    Submit(rusb::Error),
    #[error("Event dispatch failed: {0}")]
    Dispatch(rusb::Error),
    #[error("No reply after {attempts} attempt(s)")]
    ReplyTimeoutExceeded { attempts: u32 },
    #[error("Receive cancelled")]
    Cancelled,
    #[error("Device disconnected")]
    NoDevice,
    #[error("Receive failed with transfer status {0}")]
    Io(i32),
    #[error("Reply length {actual}, expected {expected}")]
    LengthMismatch { actual: usize, expected: usize },
    #[error("Reply length {requested} exceeds receive buffer of {capacity}")]
    ReplyTooLong { requested: usize, capacity: usize },
}

pub struct TransactionEngine<T: Transport> {
    transport: T,
    config: EngineConfig,
    completion: Arc<Completion>,
    receive: Option<T::Transfer>,
    // Armed receive whose outcome has not been observed yet.
    in_flight: bool,
    // Cancellation already issued for the in-flight receive.
    cancel_requested: bool,
}

impl<T: Transport> TransactionEngine<T> {
    pub fn new(transport: T, config: EngineConfig) -> Self {
        let completion = Arc::new(Completion::new(config.reply_capacity));
        Self {
            transport,
            config,
            completion,
            receive: None,
            in_flight: false,
            cancel_requested: false,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Sends `request` and returns the reply, which must be exactly
    /// `expected_reply_len` bytes long.
    pub fn execute(
        &mut self,
        request: &[u8],
        expected_reply_len: usize,
    ) -> Result<Vec<u8>, TransactionError> {
        let capacity = self.completion.capacity();
        if expected_reply_len > capacity {
            return Err(TransactionError::ReplyTooLong {
                requested: expected_reply_len,
                capacity,
            });
        }

        dump::log(self.config.verbosity, "Send", request);

        let started = Instant::now();
        let mut attempts = 0u32;
        loop {
            attempts = attempts.saturating_add(1);
            tracing::trace!(attempt = attempts, len = request.len(), "Transaction attempt");

            match self.attempt(request)? {
                TransferOutcome::Completed(len) if len == expected_reply_len => {
                    let reply = self.completion.reply(len);
                    dump::log(self.config.verbosity, "Recv", &reply);
                    return Ok(reply);
                }
                TransferOutcome::Completed(len) => {
                    tracing::warn!(actual = len, expected = expected_reply_len, "Reply length mismatch");
                    return Err(TransactionError::LengthMismatch {
                        actual: len,
                        expected: expected_reply_len,
                    });
                }
                TransferOutcome::TimedOut => {
                    if self.config.verbosity > 1 {
                        tracing::debug!("No response from HID device!");
                    }
                    if self.config.retry.exhausted(attempts, started.elapsed()) {
                        tracing::warn!(attempts, "Giving up waiting for reply");
                        return Err(TransactionError::ReplyTimeoutExceeded { attempts });
                    }
                }
                TransferOutcome::Cancelled => return Err(TransactionError::Cancelled),
                TransferOutcome::NoDevice => return Err(TransactionError::NoDevice),
                TransferOutcome::IoError(code) => return Err(TransactionError::Io(code)),
            }
        }
    }

    /// One arm, send, wait cycle.
    fn attempt(&mut self, request: &[u8]) -> Result<TransferOutcome, TransactionError> {
        self.settle()?;
        self.arm()?;

        let setup = ControlSetup::set_output_report(self.config.interface);
        if let Err(e) = self.transport.send_control(setup, request, self.config.timeout) {
            tracing::error!("Error transmitting data via control transfer: {e}");
            if let Some(transfer) = self.receive.as_mut() {
                self.transport.cancel(transfer);
                self.cancel_requested = true;
            }
            return Err(TransactionError::Send(e));
        }

        self.wait()
    }

    /// Allocates the receive handle on first use, then submits it.
    fn arm(&mut self) -> Result<(), TransactionError> {
        let transfer = match self.receive.take() {
            Some(transfer) => transfer,
            None => {
                let completion = Arc::clone(&self.completion);
                self.transport
                    .alloc_receive(
                        self.config.reply_capacity,
                        Box::new(move |status, data| completion.record(status, data)),
                    )
                    .map_err(TransactionError::Submit)?
            }
        };
        let transfer = self.receive.insert(transfer);

        self.completion.reset();
        self.transport
            .submit_receive(transfer, self.config.endpoint, self.config.timeout)
            .map_err(TransactionError::Submit)?;
        self.in_flight = true;
        Ok(())
    }

    /// Dispatches events until the armed receive reports an outcome.
    fn wait(&mut self) -> Result<TransferOutcome, TransactionError> {
        loop {
            if let Some(outcome) = self.completion.take() {
                self.in_flight = false;
                self.cancel_requested = false;
                return Ok(outcome);
            }
            match self.transport.dispatch_events() {
                Ok(()) => {}
                Err(e) if is_transient(&e) => {
                    tracing::trace!("Transient dispatch code ignored: {e}");
                }
                Err(e) => {
                    tracing::error!("Error receiving data via interrupt transfer: {e}");
                    return Err(TransactionError::Dispatch(e));
                }
            }
        }
    }

    /// Drains a receive left pending by an earlier failed transaction so the
    /// handle is idle before it is submitted again.
    fn settle(&mut self) -> Result<(), TransactionError> {
        if !self.in_flight {
            return Ok(());
        }
        let outcome = self.wait()?;
        tracing::debug!(?outcome, "Discarded outcome of abandoned receive");
        Ok(())
    }
}

impl<T: Transport> Drop for TransactionEngine<T> {
    fn drop(&mut self) {
        if self.in_flight {
            if !self.cancel_requested {
                if let Some(transfer) = self.receive.as_mut() {
                    self.transport.cancel(transfer);
                }
            }
            if let Err(e) = self.settle() {
                // Still owned by the transport; it must not be freed.
                tracing::warn!("Receive still pending at teardown: {e}");
                std::mem::forget(self.receive.take());
                return;
            }
        }
        if let Some(transfer) = self.receive.take() {
            self.transport.free_receive(transfer);
        }
    }
}
