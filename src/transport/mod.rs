//! Transport seam between the transaction engine and the USB stack.
//!
//! The engine never talks to libusb directly. It drives a [`Transport`],
//! which sends synchronously, arms a persistent asynchronous receive, and
//! delivers that receive's completion through a callback invoked from inside
//! [`Transport::dispatch_events`].

use std::time::Duration;

pub mod usb;

pub use usb::UsbTransport;

/// Callback registered with a receive handle. Runs on the thread that calls
/// `dispatch_events`, once per submitted receive.
pub type CompletionCallback = Box<dyn FnMut(TransferStatus, &[u8]) + Send + 'static>;

/// Terminal state of an asynchronous transfer, as reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    Completed,
    Error,
    TimedOut,
    Cancelled,
    Stall,
    NoDevice,
    Overflow,
    Unknown(i32),
}

impl TransferStatus {
    /// Raw libusb status code.
    pub fn code(self) -> i32 {
        match self {
            TransferStatus::Completed => 0,
            TransferStatus::Error => 1,
            TransferStatus::TimedOut => 2,
            TransferStatus::Cancelled => 3,
            TransferStatus::Stall => 4,
            TransferStatus::NoDevice => 5,
            TransferStatus::Overflow => 6,
            TransferStatus::Unknown(code) => code,
        }
    }

    pub fn from_code(code: i32) -> Self {
        match code {
            0 => TransferStatus::Completed,
            1 => TransferStatus::Error,
            2 => TransferStatus::TimedOut,
            3 => TransferStatus::Cancelled,
            4 => TransferStatus::Stall,
            5 => TransferStatus::NoDevice,
            6 => TransferStatus::Overflow,
            other => TransferStatus::Unknown(other),
        }
    }
}

/// Setup packet fields of a control transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlSetup {
    pub request_type: u8,
    pub request: u8,
    pub value: u16,
    pub index: u16,
}

impl ControlSetup {
    /// HID class `SET_REPORT` carrying output report 0 to `interface`.
    pub fn set_output_report(interface: u8) -> Self {
        Self {
            request_type: rusb::request_type(
                rusb::Direction::Out,
                rusb::RequestType::Class,
                rusb::Recipient::Interface,
            ),
            request: HID_SET_REPORT,
            value: (HID_REPORT_TYPE_OUTPUT as u16) << 8,
            index: interface as u16,
        }
    }
}

pub const HID_SET_REPORT: u8 = 0x09;
pub const HID_REPORT_TYPE_OUTPUT: u8 = 0x02;

pub trait Transport {
    /// Persistent asynchronous receive handle.
    type Transfer;

    /// Blocking control transfer, host to device.
    fn send_control(
        &mut self,
        setup: ControlSetup,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, rusb::Error>;

    /// Allocates a receive handle with a buffer of `capacity` bytes. The
    /// callback stays registered for the handle's whole life.
    fn alloc_receive(
        &mut self,
        capacity: usize,
        on_complete: CompletionCallback,
    ) -> Result<Self::Transfer, rusb::Error>;

    /// Arms an interrupt IN receive on `endpoint`.
    fn submit_receive(
        &mut self,
        transfer: &mut Self::Transfer,
        endpoint: u8,
        timeout: Duration,
    ) -> Result<(), rusb::Error>;

    /// Requests cancellation without waiting for it to take effect. The
    /// cancelled receive still completes later, with `TransferStatus::Cancelled`,
    /// from a subsequent `dispatch_events`.
    fn cancel(&mut self, transfer: &mut Self::Transfer);

    /// Processes pending events, running ready completion callbacks. Blocks
    /// until at least one event is handled or an internal timeout elapses.
    fn dispatch_events(&mut self) -> Result<(), rusb::Error>;

    /// Releases a receive handle. It must not be in flight.
    fn free_receive(&mut self, transfer: Self::Transfer);
}

/// Dispatch codes the wait loop absorbs and retries through.
pub fn is_transient(err: &rusb::Error) -> bool {
    matches!(
        err,
        rusb::Error::Busy | rusb::Error::Timeout | rusb::Error::Overflow | rusb::Error::Interrupted
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_output_report_setup() {
        let setup = ControlSetup::set_output_report(0);
        assert_eq!(setup.request_type, 0x21);
        assert_eq!(setup.request, 0x09);
        assert_eq!(setup.value, 0x0200);
        assert_eq!(setup.index, 0);

        let setup = ControlSetup::set_output_report(3);
        assert_eq!(setup.index, 3);
    }

    #[test]
    fn test_transient_codes() {
        assert!(is_transient(&rusb::Error::Busy));
        assert!(is_transient(&rusb::Error::Timeout));
        assert!(is_transient(&rusb::Error::Overflow));
        assert!(is_transient(&rusb::Error::Interrupted));
        assert!(!is_transient(&rusb::Error::NoDevice));
        assert!(!is_transient(&rusb::Error::Io));
        assert!(!is_transient(&rusb::Error::Pipe));
    }

    #[test]
    fn test_status_code_mapping() {
        for code in 0..=6 {
            assert_eq!(TransferStatus::from_code(code).code(), code);
        }
        assert_eq!(TransferStatus::from_code(42), TransferStatus::Unknown(42));
        assert_eq!(TransferStatus::from_code(2), TransferStatus::TimedOut);
    }
}
