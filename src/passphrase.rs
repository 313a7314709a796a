//! Terminal passphrase entry.
//!
//! Key-file credentials never come through here; they are used verbatim,
//! embedded NUL bytes and all. Interactive entry reads a line with echo
//! disabled and uses the string length as the passphrase length.

use std::io::Write;

use rpassword::read_password;
use zeroize::Zeroizing;

use crate::error::{KeygateError, Result};

/// Longest interactive passphrase accepted, in bytes.
pub const MAX_PASSPHRASE: usize = 256;

/// Prompts for the passphrase of the named device, without echo.
pub fn prompt(
    name: &str,
    partition: Option<&str>,
    uuid: &str,
) -> Result<Zeroizing<Vec<u8>>> {
    match partition {
        Some(partition) => print!("Enter passphrase for {name},{partition} ({uuid}): "),
        None => print!("Enter passphrase for {name} ({uuid}): "),
    }
    std::io::stdout().flush()?;

    let entered = Zeroizing::new(read_password()?);
    passphrase_bytes(&entered)
}

/// Turns an entered line into passphrase bytes: empty input is refused,
/// anything past [`MAX_PASSPHRASE`] bytes is dropped.
fn passphrase_bytes(entered: &str) -> Result<Zeroizing<Vec<u8>>> {
    if entered.is_empty() {
        return Err(KeygateError::bad_argument("Passphrase not supplied"));
    }
    let bytes = entered.as_bytes();
    let len = bytes.len().min(MAX_PASSPHRASE);
    Ok(Zeroizing::new(bytes[..len].to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_passphrase_rejected() {
        let err = passphrase_bytes("").unwrap_err();
        assert!(matches!(err, KeygateError::BadArgument(_)));
        assert!(err.to_string().contains("Passphrase not supplied"));
    }

    #[test]
    fn test_short_passphrase_kept_verbatim() {
        let pass = passphrase_bytes("hunter2").unwrap();
        assert_eq!(&pass[..], b"hunter2");
    }

    #[test]
    fn test_passphrase_at_limit_not_truncated() {
        let exact = "y".repeat(MAX_PASSPHRASE);
        let pass = passphrase_bytes(&exact).unwrap();
        assert_eq!(pass.len(), MAX_PASSPHRASE);
    }

    #[test]
    fn test_overlong_passphrase_truncated() {
        let long = "x".repeat(MAX_PASSPHRASE + 40);
        let pass = passphrase_bytes(&long).unwrap();
        assert_eq!(pass.len(), MAX_PASSPHRASE);
        assert!(pass.iter().all(|&b| b == b'x'));
    }

    #[test]
    fn test_truncation_counts_bytes_not_chars() {
        // Three bytes per char, so the cap lands mid-character; the
        // limit is a byte count and must not panic on the boundary.
        let long = "€".repeat(100);
        assert_eq!(long.len(), 300);
        let pass = passphrase_bytes(&long).unwrap();
        assert_eq!(pass.len(), MAX_PASSPHRASE);
        assert_eq!(&pass[..3], "€".as_bytes());
    }
}
