use std::time::Duration;

pub const HID_INTERFACE: u8 = 0;
pub const HID_ENDPOINT_IN: u8 = 0x81;
pub const TRANSFER_TIMEOUT_MS: u64 = 500;
/// One full-speed HID report.
pub const MAX_REPLY_LEN: usize = 64;

#[derive(clap::Parser, Debug, Clone)]
#[command(about = "Send one request to a USB HID device and print its reply")]
pub struct Config {
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
    /// Vendor id, hex (e.g. 0x15a2)
    #[arg(long)]
    pub vid: String,
    /// Product id, hex (e.g. 0x0073)
    #[arg(long)]
    pub pid: String,
    #[arg(long, default_value_t = HID_INTERFACE)]
    pub interface: u8,
    #[arg(long, default_value = "0x81")]
    pub endpoint: String,
    #[arg(long, default_value_t = TRANSFER_TIMEOUT_MS)]
    pub timeout_ms: u64,
    /// Give up after this many attempts without a reply. Unbounded if unset.
    #[arg(long)]
    pub max_attempts: Option<u32>,
    /// Give up once this much time has passed without a reply. Unbounded if unset.
    #[arg(long)]
    pub deadline_ms: Option<u64>,
    /// Expected reply length in bytes.
    #[arg(long, default_value_t = MAX_REPLY_LEN)]
    pub reply_len: usize,
    /// Request bytes, hex (e.g. 0102ff)
    #[arg(default_value = "")]
    pub request: String,
    /// Run preflight checks only, then exit.
    #[arg(long)]
    pub check: bool,
}

impl Config {
    pub fn vendor_id(&self) -> anyhow::Result<u16> {
        parse_hex_u16(&self.vid).map_err(|e| anyhow::anyhow!("invalid --vid: {e}"))
    }

    pub fn product_id(&self) -> anyhow::Result<u16> {
        parse_hex_u16(&self.pid).map_err(|e| anyhow::anyhow!("invalid --pid: {e}"))
    }

    pub fn request_bytes(&self) -> anyhow::Result<Vec<u8>> {
        let digits: String = self.request.split_whitespace().collect();
        hex::decode(strip_hex_prefix(&digits)).map_err(|e| anyhow::anyhow!("invalid request: {e}"))
    }

    pub fn engine_config(&self) -> anyhow::Result<EngineConfig> {
        let endpoint = u8::from_str_radix(strip_hex_prefix(&self.endpoint), 16)
            .map_err(|e| anyhow::anyhow!("invalid --endpoint: {e}"))?;
        Ok(EngineConfig {
            interface: self.interface,
            endpoint,
            timeout: Duration::from_millis(self.timeout_ms),
            reply_capacity: MAX_REPLY_LEN.max(self.reply_len),
            verbosity: self.verbose,
            retry: RetryPolicy {
                max_attempts: self.max_attempts,
                deadline: self.deadline_ms.map(Duration::from_millis),
            },
        })
    }
}

fn strip_hex_prefix(s: &str) -> &str {
    s.trim_start_matches("0x").trim_start_matches("0X")
}

pub fn parse_hex_u16(s: &str) -> Result<u16, std::num::ParseIntError> {
    u16::from_str_radix(strip_hex_prefix(s.trim()), 16)
}

/// When to stop retrying a transaction whose reply keeps timing out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: Option<u32>,
    pub deadline: Option<Duration>,
}

impl RetryPolicy {
    pub const UNBOUNDED: RetryPolicy = RetryPolicy {
        max_attempts: None,
        deadline: None,
    };

    pub fn attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: Some(max_attempts),
            deadline: None,
        }
    }

    pub fn deadline(deadline: Duration) -> Self {
        Self {
            max_attempts: None,
            deadline: Some(deadline),
        }
    }

    /// True once `attempts` timed-out attempts spanning `elapsed` exhaust the
    /// policy.
    pub fn exhausted(&self, attempts: u32, elapsed: Duration) -> bool {
        self.max_attempts.is_some_and(|max| attempts >= max)
            || self.deadline.is_some_and(|deadline| elapsed >= deadline)
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub interface: u8,
    pub endpoint: u8,
    /// Per-transfer timeout, for both the send and the armed receive.
    pub timeout: Duration,
    pub reply_capacity: usize,
    /// Hex dumps are logged above 1.
    pub verbosity: u8,
    pub retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            interface: HID_INTERFACE,
            endpoint: HID_ENDPOINT_IN,
            timeout: Duration::from_millis(TRANSFER_TIMEOUT_MS),
            reply_capacity: MAX_REPLY_LEN,
            verbosity: 0,
            retry: RetryPolicy::UNBOUNDED,
        }
    }
}
