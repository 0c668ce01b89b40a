use rusb::UsbContext;

use crate::config::Config;

pub fn check(cfg: &Config) -> anyhow::Result<()> {
    let vendor_id = cfg.vendor_id()?;
    let product_id = cfg.product_id()?;
    let mut errors: Vec<String> = Vec::new();

    // Check 1: libusb usable
    let context = match rusb::Context::new() {
        Ok(ctx) => ctx,
        Err(e) => anyhow::bail!("libusb init failed: {e}"),
    };

    // Check 2: device present and openable
    match context.open_device_with_vid_pid(vendor_id, product_id) {
        Some(handle) => {
            // Check 3: interface not held by another program
            match handle.kernel_driver_active(cfg.interface) {
                Ok(true) if !rusb::supports_detach_kernel_driver() => tracing::warn!(
                    interface = cfg.interface,
                    "Kernel driver bound and this platform cannot detach it; claiming may fail"
                ),
                Ok(_) | Err(rusb::Error::NotSupported) => {}
                Err(e) => tracing::debug!("Kernel driver query failed: {e}"),
            }
        }
        None => {
            let present = context
                .devices()
                .map(|list| {
                    list.iter().any(|device| {
                        device
                            .device_descriptor()
                            .map(|desc| desc.vendor_id() == vendor_id && desc.product_id() == product_id)
                            .unwrap_or(false)
                    })
                })
                .unwrap_or(false);
            if present {
                errors.push(format!(
                    "USB device {vendor_id:04x}:{product_id:04x} present but cannot be opened\n  \
                     → check permissions: install a udev rule granting access to the device"
                ));
            } else {
                errors.push(format!(
                    "USB device {vendor_id:04x}:{product_id:04x} not found\n  \
                     → check the cable and the --vid/--pid values"
                ));
            }
        }
    }

    if errors.is_empty() {
        return Ok(());
    }

    for err in &errors {
        eprintln!("ERROR: {err}");
    }
    anyhow::bail!("{} preflight check(s) failed", errors.len());
}
