//! ARL session secret.
//!
//! The ARL is the long-lived session cookie of a Deezer account. It is read
//! from a `secrets.toml` file:
//!
//! ```toml
//! arl = "..."
//! ```

use std::{fs, str::FromStr};

use veil::Redact;

use crate::error::{Error, Result};

/// The ARL cookie value. Never printed in debug output.
#[derive(Clone, PartialEq, Eq, Redact)]
#[redact(all)]
pub struct Arl(String);

impl Arl {
    /// Length of a valid ARL.
    const LENGTH: usize = 192;

    /// Largest file a secrets file may be.
    const MAX_FILE_SIZE: u64 = 1024;

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Loads the ARL from a TOML secrets file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is too large, is not
    /// valid TOML, or holds no valid `arl` key.
    pub fn load(secrets_file: &str) -> Result<Self> {
        // Prevent out-of-memory condition: secrets file should be small.
        let size = fs::metadata(secrets_file)?.len();
        if size > Self::MAX_FILE_SIZE {
            return Err(Error::out_of_range(format!("{secrets_file} is too large")));
        }

        let contents = fs::read_to_string(secrets_file)?;
        let value = contents.parse::<toml::Value>()?;

        match value.get("arl").and_then(toml::Value::as_str) {
            Some(arl) => arl.parse(),
            None => Err(Error::not_found(format!(
                "{secrets_file} does not contain an arl"
            ))),
        }
    }
}

impl FromStr for Arl {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let chars = s.chars().count();
        if chars != Self::LENGTH {
            return Err(Error::invalid_argument(format!(
                "arl should be {} characters long but is {chars}",
                Self::LENGTH
            )));
        }

        if !s.chars().all(|chr| chr.is_ascii_alphanumeric()) {
            return Err(Error::invalid_argument("arl contains invalid characters"));
        }

        Ok(Self(s.to_owned()))
    }
}
