//! Utility functions

use crate::error::{Error, Result};

/// Technically Linux requires sysfs to be at `/sys`, calling it a system
/// configuration error otherwise.
///
/// The simulated kernel roots its sysfs tree here too, so paths printed by the
/// modules look like the real thing.
pub const SYSFS_PATH: &str = "/sys";

/// Device file location. Same reasons as [`SYSFS_PATH`].
pub const DEV_PATH: &str = "/dev";

/// Parse `buf` as a base 10 `i32`, with the same rules as the kernel's
/// `kstrtoint(buf, 10, ..)`.
///
/// - An optional single `+` or `-` sign
/// - At least one ASCII digit
/// - At most one trailing newline, which is what `echo` writes
///
/// Everything else, including overflow, is [`Error::InvalidArgument`].
pub fn parse_int(buf: &[u8]) -> Result<i32> {
    let buf = buf.strip_suffix(b"\n").unwrap_or(buf);
    let (negative, digits) = match buf.split_first() {
        Some((b'-', rest)) => (true, rest),
        Some((b'+', rest)) => (false, rest),
        _ => (false, buf),
    };
    if digits.is_empty() {
        return Err(Error::InvalidArgument);
    }
    // Accumulate towards the sign so `i32::MIN` doesn't overflow.
    let mut value: i32 = 0;
    for &b in digits {
        if !b.is_ascii_digit() {
            return Err(Error::InvalidArgument);
        }
        let digit = i32::from(b - b'0');
        value = value
            .checked_mul(10)
            .and_then(|v| {
                if negative {
                    v.checked_sub(digit)
                } else {
                    v.checked_add(digit)
                }
            })
            .ok_or(Error::InvalidArgument)?;
    }
    Ok(value)
}
