use crate::config::EngineConfig;
use crate::engine::TransactionEngine;
use crate::error::Result;
use crate::transport::UsbTransport;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("libusb init failed: {0}")]
    TransportInit(rusb::Error),
    #[error("Cannot find USB device {vendor_id:04x}:{product_id:04x}")]
    DeviceNotFound { vendor_id: u16, product_id: u16 },
    #[error("Failed to claim USB interface: {0}")]
    InterfaceClaim(rusb::Error),
}

/// An opened, claimed HID device and the engine bound to it.
///
/// Dropping the session frees the receive transfer, releases the interface,
/// closes the device and tears down the libusb context, in that order.
pub struct Session {
    engine: TransactionEngine<UsbTransport>,
}

impl Session {
    pub fn open(vendor_id: u16, product_id: u16, config: EngineConfig) -> Result<Self> {
        let transport = UsbTransport::open(vendor_id, product_id, config.interface)?;
        Ok(Self {
            engine: TransactionEngine::new(transport, config),
        })
    }

    /// Sends `request` and returns a reply of exactly `reply_len` bytes.
    pub fn send_recv(&mut self, request: &[u8], reply_len: usize) -> Result<Vec<u8>> {
        Ok(self.engine.execute(request, reply_len)?)
    }

    pub fn close(self) {
        tracing::debug!(interface = self.engine.transport().interface(), "Closing session");
    }
}
