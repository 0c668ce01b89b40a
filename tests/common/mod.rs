#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

use hidxact::transport::{CompletionCallback, ControlSetup, TransferStatus, Transport};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Alloc(usize),
    Submit(u8),
    Send(Vec<u8>),
    Cancel,
    Dispatch,
    Free,
}

/// What the next `dispatch_events` call does.
pub enum Event {
    /// Completes the armed receive.
    Reply(TransferStatus, Vec<u8>),
    /// Returns an error code from dispatch.
    DispatchError(rusb::Error),
    /// Returns without processing anything.
    Idle,
}

pub fn completed(data: &[u8]) -> Event {
    Event::Reply(TransferStatus::Completed, data.to_vec())
}

pub fn status(status: TransferStatus) -> Event {
    Event::Reply(status, Vec::new())
}

pub type OpLog = Rc<RefCell<Vec<Op>>>;

pub fn count(log: &OpLog, pred: impl Fn(&Op) -> bool) -> usize {
    log.borrow().iter().filter(|op| pred(op)).count()
}

pub fn sends(log: &OpLog) -> usize {
    count(log, |op| matches!(op, Op::Send(_)))
}

pub fn submits(log: &OpLog) -> usize {
    count(log, |op| matches!(op, Op::Submit(_)))
}

pub fn cancels(log: &OpLog) -> usize {
    count(log, |op| matches!(op, Op::Cancel))
}

pub fn allocs(log: &OpLog) -> usize {
    count(log, |op| matches!(op, Op::Alloc(_)))
}

pub struct ScriptedTransfer;

/// In-memory transport that replays a script of dispatch events and records
/// every call made on it.
pub struct ScriptedTransport {
    script: VecDeque<Event>,
    send_errors: VecDeque<Option<rusb::Error>>,
    submit_errors: VecDeque<Option<rusb::Error>>,
    callback: Option<CompletionCallback>,
    armed: bool,
    cancel_requested: bool,
    log: OpLog,
}

impl ScriptedTransport {
    pub fn new(script: impl IntoIterator<Item = Event>) -> Self {
        Self {
            script: script.into_iter().collect(),
            send_errors: VecDeque::new(),
            submit_errors: VecDeque::new(),
            callback: None,
            armed: false,
            cancel_requested: false,
            log: Rc::new(RefCell::new(Vec::new())),
        }
    }

    /// Results of successive sends; `None` succeeds. Sends past the end succeed.
    pub fn with_send_errors(mut self, errors: impl IntoIterator<Item = Option<rusb::Error>>) -> Self {
        self.send_errors = errors.into_iter().collect();
        self
    }

    pub fn with_submit_errors(
        mut self,
        errors: impl IntoIterator<Item = Option<rusb::Error>>,
    ) -> Self {
        self.submit_errors = errors.into_iter().collect();
        self
    }

    pub fn log(&self) -> OpLog {
        Rc::clone(&self.log)
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    fn complete(&mut self, status: TransferStatus, data: &[u8]) {
        self.armed = false;
        self.cancel_requested = false;
        if let Some(callback) = self.callback.as_mut() {
            callback(status, data);
        }
    }
}

impl Transport for ScriptedTransport {
    type Transfer = ScriptedTransfer;

    fn send_control(
        &mut self,
        setup: ControlSetup,
        data: &[u8],
        _timeout: Duration,
    ) -> Result<usize, rusb::Error> {
        assert_eq!(setup, ControlSetup::set_output_report(0));
        self.log.borrow_mut().push(Op::Send(data.to_vec()));
        match self.send_errors.pop_front().flatten() {
            Some(e) => Err(e),
            None => Ok(data.len()),
        }
    }

    fn alloc_receive(
        &mut self,
        capacity: usize,
        on_complete: CompletionCallback,
    ) -> Result<ScriptedTransfer, rusb::Error> {
        self.log.borrow_mut().push(Op::Alloc(capacity));
        self.callback = Some(on_complete);
        Ok(ScriptedTransfer)
    }

    fn submit_receive(
        &mut self,
        _transfer: &mut ScriptedTransfer,
        endpoint: u8,
        _timeout: Duration,
    ) -> Result<(), rusb::Error> {
        self.log.borrow_mut().push(Op::Submit(endpoint));
        if let Some(e) = self.submit_errors.pop_front().flatten() {
            return Err(e);
        }
        // libusb refuses to resubmit a transfer that is still in flight
        if self.armed {
            return Err(rusb::Error::Busy);
        }
        self.armed = true;
        Ok(())
    }

    fn cancel(&mut self, _transfer: &mut ScriptedTransfer) {
        self.log.borrow_mut().push(Op::Cancel);
        if self.armed {
            self.cancel_requested = true;
        }
    }

    fn dispatch_events(&mut self) -> Result<(), rusb::Error> {
        self.log.borrow_mut().push(Op::Dispatch);
        if self.armed && self.cancel_requested {
            self.complete(TransferStatus::Cancelled, &[]);
            return Ok(());
        }
        match self.script.pop_front() {
            Some(Event::Reply(status, data)) => {
                if self.armed {
                    self.complete(status, &data);
                }
                Ok(())
            }
            Some(Event::DispatchError(e)) => Err(e),
            Some(Event::Idle) => Ok(()),
            // Script exhausted: the armed receive runs into its timeout.
            None => {
                if self.armed {
                    self.complete(TransferStatus::TimedOut, &[]);
                }
                Ok(())
            }
        }
    }

    fn free_receive(&mut self, _transfer: ScriptedTransfer) {
        self.log.borrow_mut().push(Op::Free);
    }
}
