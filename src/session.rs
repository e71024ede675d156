//! Short numeric session codes shared between the Primary and its Monitors.

use std::{fmt, ops::RangeInclusive};

use rand::Rng;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::ValidationError;

/// Range the generated codes are drawn from.
const CODE_RANGE: RangeInclusive<u32> = 100_000..=999_999;
/// Number of digits in a canonical session code.
pub const CODE_LEN: usize = 6;

/// Identifier of a synchronized session, doubling as the human-typeable verification code.
///
/// Codes are not checked for uniqueness when generated. Two unrelated sessions that draw the
/// same code share one document on the channel and merge their state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
#[schema(value_type = String, example = "482913")]
pub struct SessionId(String);

impl SessionId {
    /// Draw a fresh 6-digit code uniformly from `100000..=999999`.
    pub fn generate() -> Self {
        let code = rand::rng().random_range(CODE_RANGE);
        Self(code.to_string())
    }

    /// Accept any non-empty code once surrounding whitespace is trimmed.
    ///
    /// This is a format check only: whether a session exists is reported by the channel.
    pub fn validate(candidate: &str) -> Option<Self> {
        let trimmed = candidate.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    /// Whether the code is exactly six ASCII digits, as produced by [`SessionId::generate`].
    pub fn is_canonical(&self) -> bool {
        self.0.len() == CODE_LEN && self.0.bytes().all(|b| b.is_ascii_digit())
    }

    /// Borrow the code as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Validator hook rejecting codes that are not six ASCII digits.
pub fn validate_session_code(code: &str) -> Result<(), ValidationError> {
    let Some(id) = SessionId::validate(code) else {
        let mut err = ValidationError::new("session_code_empty");
        err.message = Some("Session code must not be empty".into());
        return Err(err);
    };

    if !id.is_canonical() || id.as_str() != code {
        let mut err = ValidationError::new("session_code_format");
        err.message = Some(format!("Session code must be exactly {CODE_LEN} digits").into());
        return Err(err);
    }

    Ok(())
}
