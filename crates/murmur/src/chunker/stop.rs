use crate::{Error, Result, TokenId, Tokenizer};
use std::sync::Arc;

/// The end-of-text marker, both as literal text and as token ids.
///
/// Computed once at startup from the configured marker string and then
/// passed by value (cheaply, it is reference counted) to every chunker.
///
/// Alongside the ids it keeps the prefix-function of the sequence, so a
/// matcher that fails part way through a marker can fall back to the longest
/// prefix that is still matched instead of forgetting the partial match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopSequence {
    marker: Arc<str>,
    tokens: Arc<[TokenId]>,
    fallback: Arc<[usize]>,
}

impl StopSequence {
    /// Builds a stop sequence from an already encoded marker.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Tokenizer`] if `marker` or `tokens` is empty.
    pub fn new(marker: &str, tokens: Vec<TokenId>) -> Result<Self> {
        if marker.is_empty() || tokens.is_empty() {
            return Err(Error::Tokenizer {
                context: "stop marker must encode to at least one token".to_string(),
            });
        }
        let fallback = prefix_function(&tokens);
        Ok(Self {
            marker: Arc::from(marker),
            tokens: Arc::from(tokens),
            fallback: Arc::from(fallback),
        })
    }

    /// Encodes `marker` with `tokenizer`.
    ///
    /// # Errors
    ///
    /// Propagates tokenizer failures and rejects empty encodings.
    pub fn encode<T>(marker: &str, tokenizer: &T) -> Result<Self>
    where
        T: Tokenizer + ?Sized,
    {
        Self::new(marker, tokenizer.encode(marker)?)
    }

    /// The literal marker text.
    pub fn marker(&self) -> &str {
        &self.marker
    }

    /// The marker's token ids.
    pub fn tokens(&self) -> &[TokenId] {
        &self.tokens
    }

    /// Number of tokens in the marker.
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Always `false`; construction rejects empty markers.
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Advances a match cursor over `token`.
    ///
    /// Returns the new cursor and whether `token` extended a match. A cursor
    /// of 0 with `true` means the marker was just completed.
    pub(crate) fn step(&self, mut cursor: usize, token: TokenId) -> (usize, bool) {
        while cursor > 0 && self.tokens[cursor] != token {
            cursor = self.fallback[cursor - 1];
        }
        if self.tokens[cursor] == token {
            ((cursor + 1) % self.tokens.len(), true)
        } else {
            (0, false)
        }
    }
}

/// `out[i]` is the length of the longest proper prefix of `seq[..=i]` that
/// is also a suffix of it.
fn prefix_function(seq: &[TokenId]) -> Vec<usize> {
    let mut out = vec![0; seq.len()];
    let mut k = 0;
    for i in 1..seq.len() {
        while k > 0 && seq[i] != seq[k] {
            k = out[k - 1];
        }
        if seq[i] == seq[k] {
            k += 1;
        }
        out[i] = k;
    }
    out
}
