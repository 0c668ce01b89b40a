//! libusb transport.
//!
//! Control transfers go through the safe `rusb` API. The interrupt receive is
//! asynchronous, which `rusb` does not wrap, so it is driven through the
//! libusb1-sys bindings re-exported as `rusb::ffi`.

use std::ffi::{c_int, c_uint, c_void};
use std::ptr::NonNull;
use std::time::Duration;

use rusb::{ffi, Context, DeviceHandle, UsbContext};

use super::{CompletionCallback, ControlSetup, TransferStatus, Transport};
use crate::session::SessionError;

pub struct UsbTransport {
    handle: DeviceHandle<Context>,
    context: Context,
    interface: u8,
}

impl UsbTransport {
    /// Opens the first device matching `vendor_id:product_id`, detaches any
    /// kernel driver bound to `interface` and claims it.
    pub fn open(vendor_id: u16, product_id: u16, interface: u8) -> Result<Self, SessionError> {
        let context = Context::new().map_err(SessionError::TransportInit)?;

        let handle = context
            .open_device_with_vid_pid(vendor_id, product_id)
            .ok_or(SessionError::DeviceNotFound {
                vendor_id,
                product_id,
            })?;
        tracing::info!(
            device = format!("{vendor_id:04x}:{product_id:04x}"),
            "Found USB device"
        );

        if rusb::supports_detach_kernel_driver() {
            match handle.kernel_driver_active(interface) {
                Ok(true) => {
                    if let Err(e) = handle.detach_kernel_driver(interface) {
                        tracing::warn!(interface, "Failed to detach kernel driver: {e}");
                    } else {
                        tracing::debug!(interface, "Kernel driver detached");
                    }
                }
                Ok(false) => {}
                Err(e) => tracing::debug!(interface, "Kernel driver query failed: {e}"),
            }
        }

        handle
            .claim_interface(interface)
            .map_err(SessionError::InterfaceClaim)?;
        tracing::debug!(interface, "Interface claimed");

        Ok(Self {
            handle,
            context,
            interface,
        })
    }

    pub fn interface(&self) -> u8 {
        self.interface
    }
}

impl Drop for UsbTransport {
    fn drop(&mut self) {
        // ignore any communication error
        if let Err(e) = self.handle.release_interface(self.interface) {
            tracing::debug!(interface = self.interface, "Release interface failed: {e}");
        }
    }
}

struct CallbackState {
    on_complete: CompletionCallback,
}

/// Persistent libusb interrupt transfer with its own buffer.
pub struct UsbTransfer {
    raw: NonNull<ffi::libusb_transfer>,
    buffer: Box<[u8]>,
    state: Box<CallbackState>,
}

impl Drop for UsbTransfer {
    fn drop(&mut self) {
        // SAFETY: `raw` came from libusb_alloc_transfer and is freed exactly once.
        unsafe { ffi::libusb_free_transfer(self.raw.as_ptr()) };
    }
}

extern "system" fn receive_complete(transfer: *mut ffi::libusb_transfer) {
    // SAFETY: libusb passes back the transfer filled in `submit_receive`. Its
    // user_data points at the CallbackState boxed inside the owning
    // UsbTransfer, and its buffer at that transfer's boxed buffer.
    unsafe {
        let transfer = &*transfer;
        let state = &mut *(transfer.user_data as *mut CallbackState);
        let len = transfer.actual_length.clamp(0, transfer.length) as usize;
        let data: &[u8] = if len == 0 || transfer.buffer.is_null() {
            &[]
        } else {
            std::slice::from_raw_parts(transfer.buffer, len)
        };
        (state.on_complete)(TransferStatus::from_code(transfer.status), data);
    }
}

impl Transport for UsbTransport {
    type Transfer = UsbTransfer;

    fn send_control(
        &mut self,
        setup: ControlSetup,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, rusb::Error> {
        self.handle.write_control(
            setup.request_type,
            setup.request,
            setup.value,
            setup.index,
            data,
            timeout,
        )
    }

    fn alloc_receive(
        &mut self,
        capacity: usize,
        on_complete: CompletionCallback,
    ) -> Result<UsbTransfer, rusb::Error> {
        // SAFETY: plain allocation, no isochronous packets.
        let raw = unsafe { ffi::libusb_alloc_transfer(0) };
        let raw = NonNull::new(raw).ok_or(rusb::Error::NoMem)?;
        tracing::trace!(capacity, "Receive transfer allocated");
        Ok(UsbTransfer {
            raw,
            buffer: vec![0u8; capacity].into_boxed_slice(),
            state: Box::new(CallbackState { on_complete }),
        })
    }

    fn submit_receive(
        &mut self,
        transfer: &mut UsbTransfer,
        endpoint: u8,
        timeout: Duration,
    ) -> Result<(), rusb::Error> {
        let length = c_int::try_from(transfer.buffer.len()).map_err(|_| rusb::Error::InvalidParam)?;
        let timeout_ms = c_uint::try_from(timeout.as_millis()).unwrap_or(c_uint::MAX);
        let user_data = &mut *transfer.state as *mut CallbackState as *mut c_void;

        // SAFETY: the buffer and callback state are heap allocations owned by
        // `transfer`, which outlives the submission; the engine never frees a
        // transfer that is still in flight.
        let rc = unsafe {
            ffi::libusb_fill_interrupt_transfer(
                transfer.raw.as_ptr(),
                self.handle.as_raw(),
                endpoint,
                transfer.buffer.as_mut_ptr(),
                length,
                receive_complete,
                user_data,
                timeout_ms,
            );
            ffi::libusb_submit_transfer(transfer.raw.as_ptr())
        };
        if rc < 0 {
            return Err(error_from_code(rc));
        }
        Ok(())
    }

    fn cancel(&mut self, transfer: &mut UsbTransfer) {
        // SAFETY: `raw` is a live transfer owned by `transfer`.
        let rc = unsafe { ffi::libusb_cancel_transfer(transfer.raw.as_ptr()) };
        if rc < 0 {
            tracing::debug!("Cancel returned {}", error_from_code(rc));
        }
    }

    fn dispatch_events(&mut self) -> Result<(), rusb::Error> {
        // SAFETY: the context is alive for as long as `self`.
        let rc = unsafe { ffi::libusb_handle_events(self.context.as_raw()) };
        if rc < 0 {
            return Err(error_from_code(rc));
        }
        Ok(())
    }

    fn free_receive(&mut self, transfer: UsbTransfer) {
        drop(transfer);
    }
}

/// Maps a negative libusb return code onto `rusb::Error`.
pub(crate) fn error_from_code(code: c_int) -> rusb::Error {
    use ffi::constants::*;

    match code {
        LIBUSB_ERROR_IO => rusb::Error::Io,
        LIBUSB_ERROR_INVALID_PARAM => rusb::Error::InvalidParam,
        LIBUSB_ERROR_ACCESS => rusb::Error::Access,
        LIBUSB_ERROR_NO_DEVICE => rusb::Error::NoDevice,
        LIBUSB_ERROR_NOT_FOUND => rusb::Error::NotFound,
        LIBUSB_ERROR_BUSY => rusb::Error::Busy,
        LIBUSB_ERROR_TIMEOUT => rusb::Error::Timeout,
        LIBUSB_ERROR_OVERFLOW => rusb::Error::Overflow,
        LIBUSB_ERROR_PIPE => rusb::Error::Pipe,
        LIBUSB_ERROR_INTERRUPTED => rusb::Error::Interrupted,
        LIBUSB_ERROR_NO_MEM => rusb::Error::NoMem,
        LIBUSB_ERROR_NOT_SUPPORTED => rusb::Error::NotSupported,
        _ => rusb::Error::Other,
    }
}
