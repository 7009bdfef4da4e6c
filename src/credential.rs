//! Request-scoped bearer credential.
//!
//! A [`Credential`] is created once per incoming request from whatever the
//! caller supplied (a raw token or an already-prefixed `Bearer …` header
//! value) and passed by reference through the resolver and assembler. It is
//! never stored in process-wide state.

use std::fmt;

#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    token: String,
}

impl Credential {
    /// Normalizes a caller-supplied token or `Authorization` header value.
    ///
    /// A leading `Bearer ` scheme (any case) is stripped so that both forms
    /// produce the same credential. Returns `None` for an empty token.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        let token = match trimmed.split_once(char::is_whitespace) {
            Some((scheme, rest)) if scheme.eq_ignore_ascii_case("bearer") => rest.trim(),
            None if trimmed.eq_ignore_ascii_case("bearer") => "",
            _ => trimmed,
        };
        if token.is_empty() {
            return None;
        }
        Some(Self {
            token: token.to_string(),
        })
    }

    /// Value for the `Authorization` header of every provider request.
    pub fn header_value(&self) -> String {
        format!("Bearer {}", self.token)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential([redacted])")
    }
}
