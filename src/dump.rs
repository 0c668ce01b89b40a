//! Verbose hex dumps of request and reply bytes.

use std::fmt::Write;

const BYTES_PER_LINE: usize = 16;

/// Formats `bytes` behind a `---{label}` tag, sixteen bytes per line with
/// continuation lines indented under the first byte.
pub fn format(label: &str, bytes: &[u8]) -> String {
    let tag = format!("---{label}");
    let indent = " ".repeat(tag.len());
    let mut out = tag;
    for (i, chunk) in bytes.chunks(BYTES_PER_LINE).enumerate() {
        if i != 0 {
            out.push('\n');
            out.push_str(&indent);
        }
        for b in chunk {
            let _ = write!(out, " {b:02x}");
        }
    }
    out
}

/// Logs a dump when `verbosity` asks for it.
pub fn log(verbosity: u8, label: &str, bytes: &[u8]) {
    if verbosity > 1 {
        tracing::debug!("{}", format(label, bytes));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_line() {
        assert_eq!(format("Send", &[0x01, 0x02, 0xab]), "---Send 01 02 ab");
    }

    #[test]
    fn test_wraps_at_sixteen() {
        let bytes: Vec<u8> = (0..18).collect();
        let dump = format("Recv", &bytes);
        let lines: Vec<&str> = dump.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[0],
            "---Recv 00 01 02 03 04 05 06 07 08 09 0a 0b 0c 0d 0e 0f"
        );
        assert_eq!(lines[1], "        10 11");
    }

    #[test]
    fn test_empty() {
        assert_eq!(format("Send", &[]), "---Send");
    }
}
