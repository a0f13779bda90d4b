use crate::{Error, RandSource};
use core::{fmt, str::FromStr};

/// Number of hex characters in a rendered [`SessionToken`].
pub const SESSION_TOKEN_LEN: usize = 32;

/// An opaque 128-bit session credential.
///
/// Tokens are drawn from a [`RandSource`] and rendered as 32 lowercase hex
/// characters. The rendering is the only accepted wire form: [`FromStr`]
/// rejects anything of a different length or alphabet, so a lookup with a
/// malformed token never reaches the registry.
///
/// # Example
/// ```
/// use murmur::SessionToken;
///
/// let token: SessionToken = "0000000000000000000000000000002a".parse().unwrap();
/// assert_eq!(token.to_raw(), 42);
/// assert_eq!(token.to_string(), "0000000000000000000000000000002a");
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionToken(u128);

impl SessionToken {
    /// Draws a new token from the given random source.
    pub fn generate<R: RandSource<u128>>(rng: &R) -> Self {
        Self(rng.rand())
    }

    /// Creates a token from its raw 128-bit value.
    pub const fn from_raw(raw: u128) -> Self {
        Self(raw)
    }

    /// Returns the raw 128-bit value.
    pub const fn to_raw(self) -> u128 {
        self.0
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

// Tokens are credentials; keep them out of debug output and logs.
impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered = self.to_string();
        write!(f, "SessionToken({}…)", &rendered[..6])
    }
}

impl FromStr for SessionToken {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != SESSION_TOKEN_LEN
            || !s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        {
            return Err(Error::InvalidToken);
        }
        u128::from_str_radix(s, 16)
            .map(Self)
            .map_err(|_| Error::InvalidToken)
    }
}
