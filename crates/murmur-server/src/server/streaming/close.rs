//! WebSocket close codes and the mapping from [`murmur::Error`] to them.

use murmur::Error;
use std::borrow::Cow;

/// Normal closure: the exchange completed.
pub const NORMAL: u16 = 1000;
/// The server is going down.
pub const GOING_AWAY: u16 = 1001;
/// The peer sent a frame type the protocol does not accept.
pub const UNSUPPORTED_DATA: u16 = 1003;
/// Invalid session token or request payload.
pub const POLICY_VIOLATION: u16 = 1008;
/// The model or tokenizer failed.
pub const INTERNAL_ERROR: u16 = 1011;
/// Capacity exhausted or the session already has a prediction running.
pub const TRY_AGAIN_LATER: u16 = 1013;
/// The origin already holds a live session.
pub const DUPLICATE_ORIGIN: u16 = 4000;

/// Shared by both admission failures so clients cannot tell capacity from a
/// duplicate origin by text alone.
pub const ADMISSION_REFUSED: &str = "admission refused";

// RFC 6455 limits the close payload to 125 bytes, two of which are the code.
const MAX_REASON_BYTES: usize = 123;

/// A close code plus a reason that fits in a close frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Close {
    pub code: u16,
    pub reason: Cow<'static, str>,
}

impl Close {
    pub fn new(code: u16, reason: impl Into<Cow<'static, str>>) -> Self {
        let mut reason = reason.into();
        if reason.len() > MAX_REASON_BYTES {
            let mut end = MAX_REASON_BYTES;
            while !reason.is_char_boundary(end) {
                end -= 1;
            }
            reason.to_mut().truncate(end);
        }
        Self { code, reason }
    }

    pub const fn normal() -> Self {
        Self {
            code: NORMAL,
            reason: Cow::Borrowed(""),
        }
    }

    pub const fn going_away() -> Self {
        Self {
            code: GOING_AWAY,
            reason: Cow::Borrowed("service shutting down"),
        }
    }
}

impl From<&Error> for Close {
    fn from(err: &Error) -> Self {
        match err {
            Error::Full => Self::new(TRY_AGAIN_LATER, ADMISSION_REFUSED),
            Error::Duplicate => Self::new(DUPLICATE_ORIGIN, ADMISSION_REFUSED),
            Error::NotFound | Error::InvalidToken => Self::new(POLICY_VIOLATION, "invalid session"),
            Error::Busy => Self::new(TRY_AGAIN_LATER, "session busy"),
            Error::InvalidRequest { reason } => Self::new(POLICY_VIOLATION, reason.clone()),
            Error::InvalidGroupSize => Self::new(POLICY_VIOLATION, err.to_string()),
            Error::ServiceShutdown => Self::going_away(),
            // Detail is logged by the caller, never sent.
            _ => Self::new(INTERNAL_ERROR, "generation failed"),
        }
    }
}

impl From<Error> for Close {
    fn from(err: Error) -> Self {
        Self::from(&err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admission_failures_share_a_reason() {
        let full = Close::from(Error::Full);
        let dup = Close::from(Error::Duplicate);
        assert_eq!(full.code, TRY_AGAIN_LATER);
        assert_eq!(dup.code, DUPLICATE_ORIGIN);
        assert_eq!(full.reason, dup.reason);
    }

    #[test]
    fn session_errors_map_to_policy_and_busy() {
        assert_eq!(Close::from(Error::NotFound).code, POLICY_VIOLATION);
        assert_eq!(Close::from(Error::InvalidToken).reason, "invalid session");
        assert_eq!(Close::from(Error::Busy).code, TRY_AGAIN_LATER);
    }

    #[test]
    fn model_detail_is_not_leaked() {
        let close = Close::from(Error::Model {
            context: "cuda device 0 out of memory".into(),
        });
        assert_eq!(close.code, INTERNAL_ERROR);
        assert_eq!(close.reason, "generation failed");
    }

    #[test]
    fn long_reasons_are_cut_on_a_char_boundary() {
        let reason = "é".repeat(100);
        let close = Close::new(POLICY_VIOLATION, reason);
        assert!(close.reason.len() <= MAX_REASON_BYTES);
        assert!(close.reason.chars().all(|c| c == 'é'));
    }
}
