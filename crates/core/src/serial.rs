//! Device serial validation.
//!
//! Serials come straight from agents and end up as directory names under the
//! storage root, so anything that could change the meaning of a path is
//! rejected here.

use crate::{Error, Result};

/// Longest serial accepted from an agent, in bytes.
pub const MAX_SERIAL_LEN: usize = 128;

/// Validate a device serial.
pub fn validate_serial(serial: &str) -> Result<()> {
    if serial.is_empty() {
        return Err(Error::InvalidSerial("serial must not be empty".to_string()));
    }
    if serial.len() > MAX_SERIAL_LEN {
        return Err(Error::InvalidSerial(format!(
            "serial exceeds {MAX_SERIAL_LEN} bytes"
        )));
    }
    if serial == "." || serial == ".." {
        return Err(Error::InvalidSerial(format!("reserved name: {serial}")));
    }
    if let Some(c) = serial
        .chars()
        .find(|c| *c == '/' || *c == '\\' || c.is_control())
    {
        return Err(Error::InvalidSerial(format!(
            "serial contains forbidden character {c:?}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_hardware_style_serials() {
        for serial in ["00000000a1b2c3d4", "AA:BB", "pwnagotchi-7", "XY"] {
            assert!(validate_serial(serial).is_ok(), "{serial} should be valid");
        }
    }

    #[test]
    fn test_rejects_path_like_serials() {
        for serial in ["", ".", "..", "a/b", "..\\x", "nul\0byte", "tab\there"] {
            assert!(
                matches!(validate_serial(serial), Err(Error::InvalidSerial(_))),
                "{serial:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_rejects_overlong_serial() {
        let serial = "a".repeat(MAX_SERIAL_LEN + 1);
        assert!(validate_serial(&serial).is_err());
        assert!(validate_serial(&serial[..MAX_SERIAL_LEN]).is_ok());
    }
}
