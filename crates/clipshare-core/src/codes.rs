//! Four-digit session codes.
//!
//! A code is exactly four ASCII digits. Anything else is rejected with
//! [`SessionError::CodeFormat`] before the session store is touched.

use std::fmt;
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::errors::SessionError;

/// Number of digits in a session code.
pub const CODE_LEN: usize = 4;

/// A validated session code.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionCode(String);

impl SessionCode {
    /// Validate a raw code.
    pub fn parse(raw: &str) -> Result<Self, SessionError> {
        if is_valid_code(raw) {
            Ok(Self(raw.to_owned()))
        } else {
            Err(SessionError::CodeFormat(raw.to_owned()))
        }
    }

    /// Generate a random code in `1000..=9999`.
    #[must_use]
    pub fn generate() -> Self {
        let n: u16 = rand::rng().random_range(1000..10_000);
        Self(n.to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Whether `raw` matches `^\d{4}$` (ASCII digits only).
pub fn is_valid_code(raw: &str) -> bool {
    raw.len() == CODE_LEN && raw.bytes().all(|b| b.is_ascii_digit())
}

impl FromStr for SessionCode {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for SessionCode {
    type Error = SessionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if is_valid_code(&value) {
            Ok(Self(value))
        } else {
            Err(SessionError::CodeFormat(value))
        }
    }
}

impl From<SessionCode> for String {
    fn from(code: SessionCode) -> Self {
        code.0
    }
}

impl AsRef<str> for SessionCode {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
