//! Typed rendering of the artifacts the installer writes: service units, the p4prometheus
//! configuration, the push-gateway configuration, and crontab entries.
//!
//! Values are validated before they are rendered, so no parameter can break out of the
//! line (or quoted word) it is placed in.

use crate::Error;
use std::borrow::Cow;

pub mod crontab;
pub mod p4prometheus;
pub mod push;
pub mod systemd;

/// Rejects values containing control characters (newlines in particular).
pub fn check_line(field: &str, value: &str) -> Result<(), Error> {
    if let Some(c) = value.chars().find(|c| c.is_control()) {
        return Err(Error::InvalidField {
            field: field.to_string(),
            reason: format!("contains control character {c:?}"),
        });
    }
    Ok(())
}

/// Quotes `arg` for a POSIX shell (as used by cron), leaving plain words untouched.
pub fn shell_quote(arg: &str) -> Cow<'_, str> {
    let plain = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./:=@+,".contains(c));
    if plain {
        return Cow::Borrowed(arg);
    }
    Cow::Owned(format!("'{}'", arg.replace('\'', r"'\''")))
}
