use crate::{Error, Result, StopSequence, TokenId, Tokenizer};
use core::iter::FusedIterator;
#[cfg(feature = "tracing")]
use tracing::instrument;

/// A run of tokens flushed together.
pub type TokenGroup = Vec<TokenId>;

/// Groups a token stream into flushable runs.
///
/// A pull-based iterator: each call to [`Iterator::next`] reads tokens from
/// the source until a group may be flushed, then hands the buffered tokens
/// over by value. A group is flushed once it holds at least `group_size`
/// tokens, but never
///
/// - while a stop-sequence match is in progress, so the marker always ends
///   up whole inside one group where a substring search can find it, and
/// - on a token whose text is not pure ASCII, so a multi-token character is
///   never cut in half at a group boundary.
///
/// When the source ends, whatever is still buffered is discarded rather
/// than flushed; see [`Self::discarded`].
///
/// # Example
/// ```
/// use murmur::{StopSequence, TokenChunker, Tokenizer, WordTokenizer};
///
/// let tok = WordTokenizer::for_text("a b c d e", "<|end|>");
/// let stop = StopSequence::encode("<|end|>", &tok).unwrap();
/// let tokens = tok.encode("a b c d e ").unwrap();
///
/// let groups: Vec<_> = TokenChunker::new(tokens.into_iter(), 2, stop, &tok)
///     .unwrap()
///     .collect();
/// // Two full pairs; the fifth token is left over and dropped.
/// assert_eq!(groups.len(), 2);
/// ```
pub struct TokenChunker<'t, I, T>
where
    I: Iterator<Item = TokenId>,
    T: Tokenizer + ?Sized,
{
    source: I,
    group_size: usize,
    stop: StopSequence,
    tokenizer: &'t T,
    buffer: TokenGroup,
    cursor: usize,
    discarded: usize,
    finished: bool,
}

impl<'t, I, T> TokenChunker<'t, I, T>
where
    I: Iterator<Item = TokenId>,
    T: Tokenizer + ?Sized,
{
    /// Wraps `source`, flushing groups of at least `group_size` tokens.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidGroupSize`] if `group_size` is 0.
    pub fn new(source: I, group_size: usize, stop: StopSequence, tokenizer: &'t T) -> Result<Self> {
        if group_size == 0 {
            return Err(Error::InvalidGroupSize);
        }
        Ok(Self {
            source,
            group_size,
            stop,
            tokenizer,
            buffer: Vec::with_capacity(group_size),
            cursor: 0,
            discarded: 0,
            finished: false,
        })
    }

    /// Number of trailing tokens dropped when the source ended.
    ///
    /// Always 0 until iteration has finished.
    pub const fn discarded(&self) -> usize {
        self.discarded
    }

    /// Returns `true` while a stop-sequence match is in progress.
    pub const fn matching_stop(&self) -> bool {
        self.cursor > 0
    }

    fn take_group(&mut self) -> TokenGroup {
        core::mem::replace(&mut self.buffer, Vec::with_capacity(self.group_size))
    }
}

impl<I, T> Iterator for TokenChunker<'_, I, T>
where
    I: Iterator<Item = TokenId>,
    T: Tokenizer + ?Sized,
{
    type Item = TokenGroup;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        while let Some(token) = self.source.next() {
            self.buffer.push(token);

            let (cursor, extended) = self.stop.step(self.cursor, token);
            self.cursor = cursor;
            if extended {
                continue;
            }

            if !self.tokenizer.surface_is_ascii(token) {
                continue;
            }

            if self.buffer.len() >= self.group_size {
                return Some(self.take_group());
            }
        }

        self.finished = true;
        self.discarded = self.buffer.len();
        self.buffer.clear();
        None
    }
}

impl<I, T> FusedIterator for TokenChunker<'_, I, T>
where
    I: Iterator<Item = TokenId>,
    T: Tokenizer + ?Sized,
{
}

/// One decoded group, ready to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    /// Decoded text, cut before the stop marker if one was found.
    pub text: String,
    /// Tokens merged into this fragment.
    pub tokens: usize,
    /// UTF-8 length of `text`.
    pub bytes: usize,
    /// The stop marker was found; nothing follows this fragment.
    pub stopped: bool,
}

impl Fragment {
    /// Decodes `group` and truncates it at the first occurrence of the stop
    /// marker.
    ///
    /// Decoding can merge tokens into a marker the token-level matcher never
    /// saw (for example when the model spells it with different pieces), so
    /// the text is searched again here.
    ///
    /// # Errors
    ///
    /// Propagates tokenizer decode failures.
    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip_all, fields(tokens = group.len())))]
    pub fn decode<T>(group: &[TokenId], tokenizer: &T, stop: &StopSequence) -> Result<Self>
    where
        T: Tokenizer + ?Sized,
    {
        let mut text = tokenizer.decode(group)?;
        let stopped = match text.find(stop.marker()) {
            Some(idx) => {
                text.truncate(idx);
                true
            }
            None => false,
        };
        Ok(Self {
            bytes: text.len(),
            tokens: group.len(),
            text,
            stopped,
        })
    }
}
