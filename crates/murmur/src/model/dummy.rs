use crate::{Error, LanguageModel, Result, SamplingParams, TokenId, TokenSource, Tokenizer};
use std::collections::HashMap;
#[cfg(feature = "tracing")]
use tracing::instrument;

/// Ids `0..256` are reserved for raw bytes.
const BYTE_TOKENS: TokenId = 256;

/// Reply produced by [`DummyModel`] regardless of the prompt.
pub const DUMMY_REPLY: &str = "this is a placeholder reply from the development model, café \
    included, so that loading a full model during development is not necessary. ";

/// A small greedy longest-match tokenizer with byte fallback.
///
/// The vocabulary holds whole pieces (ids from 256 upward) plus one token per
/// raw byte (ids `0..256`). Text that no piece covers is encoded byte by
/// byte, so a non-ASCII character becomes several tokens, each of which is
/// not ASCII on its own. This mirrors how byte-level BPE vocabularies behave
/// at the edges that matter to chunking.
#[derive(Debug, Clone)]
pub struct WordTokenizer {
    pieces: Vec<String>,
    by_piece: HashMap<String, TokenId>,
    // Piece ids sorted by descending byte length, for greedy matching.
    longest_first: Vec<TokenId>,
}

impl WordTokenizer {
    /// Builds a tokenizer whose vocabulary is `pieces` plus the byte tokens.
    ///
    /// Empty and repeated pieces are ignored.
    pub fn new<I, S>(pieces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut tokenizer = Self {
            pieces: Vec::new(),
            by_piece: HashMap::new(),
            longest_first: Vec::new(),
        };
        for piece in pieces {
            let piece = piece.into();
            if piece.is_empty() || tokenizer.by_piece.contains_key(&piece) {
                continue;
            }
            let id = BYTE_TOKENS + tokenizer.pieces.len() as TokenId;
            tokenizer.by_piece.insert(piece.clone(), id);
            tokenizer.pieces.push(piece);
        }
        let mut order: Vec<TokenId> = (0..tokenizer.pieces.len() as TokenId)
            .map(|i| BYTE_TOKENS + i)
            .collect();
        order.sort_by_key(|id| core::cmp::Reverse(tokenizer.piece(*id).map_or(0, str::len)));
        tokenizer.longest_first = order;
        tokenizer
    }

    /// Vocabulary for `text`: every whitespace-separated word with a trailing
    /// space, plus the alphanumeric and punctuation runs of `marker`.
    pub fn for_text(text: &str, marker: &str) -> Self {
        let words = text.split_whitespace().map(|w| format!("{w} "));
        Self::new(words.chain(split_runs(marker)))
    }

    /// Id of a whole vocabulary piece, if present.
    pub fn piece_id(&self, piece: &str) -> Option<TokenId> {
        self.by_piece.get(piece).copied()
    }

    fn piece(&self, id: TokenId) -> Option<&str> {
        let index = id.checked_sub(BYTE_TOKENS)? as usize;
        self.pieces.get(index).map(String::as_str)
    }

    fn bytes_of(&self, id: TokenId) -> Option<Vec<u8>> {
        if id < BYTE_TOKENS {
            return Some(vec![id as u8]);
        }
        self.piece(id).map(|p| p.as_bytes().to_vec())
    }
}

impl Tokenizer for WordTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<TokenId>> {
        let mut out = Vec::with_capacity(text.len() / 4 + 1);
        let mut rest = text;
        'outer: while !rest.is_empty() {
            for id in &self.longest_first {
                if let Some(piece) = self.piece(*id) {
                    if rest.starts_with(piece) {
                        out.push(*id);
                        rest = &rest[piece.len()..];
                        continue 'outer;
                    }
                }
            }
            // No piece matches: fall back to the bytes of one character.
            let ch = rest.chars().next().map_or(1, char::len_utf8);
            out.extend(rest.as_bytes()[..ch].iter().map(|b| TokenId::from(*b)));
            rest = &rest[ch..];
        }
        Ok(out)
    }

    fn decode(&self, tokens: &[TokenId]) -> Result<String> {
        let mut bytes = Vec::with_capacity(tokens.len() * 4);
        for id in tokens {
            let chunk = self.bytes_of(*id).ok_or_else(|| Error::Tokenizer {
                context: format!("token {id} is outside the vocabulary"),
            })?;
            bytes.extend_from_slice(&chunk);
        }
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn surface_is_ascii(&self, token: TokenId) -> bool {
        if token < BYTE_TOKENS {
            return token < 0x80;
        }
        self.piece(token).is_some_and(str::is_ascii)
    }
}

/// Splits `s` into maximal runs of alphanumeric and non-alphanumeric chars.
fn split_runs(s: &str) -> Vec<String> {
    let mut runs: Vec<String> = Vec::new();
    let mut last_kind = None;
    for ch in s.chars() {
        let kind = ch.is_alphanumeric();
        match runs.last_mut() {
            Some(run) if last_kind == Some(kind) => run.push(ch),
            _ => runs.push(ch.to_string()),
        }
        last_kind = Some(kind);
    }
    runs
}

/// A deterministic stand-in for a real model.
///
/// Ignores the prompt and replays [`DUMMY_REPLY`] until `max_new_tokens`
/// leaves just enough room for the end-of-text marker, which it then emits.
/// Lets the server run end to end without loading weights.
pub struct DummyModel {
    tokenizer: WordTokenizer,
    reply: Vec<TokenId>,
    marker: Vec<TokenId>,
}

impl DummyModel {
    /// Creates a dummy model that terminates replies with `marker`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Tokenizer`] if the reply or the marker cannot be
    /// encoded.
    pub fn new(marker: &str) -> Result<Self> {
        let tokenizer = WordTokenizer::for_text(DUMMY_REPLY, marker);
        let reply = tokenizer.encode(DUMMY_REPLY)?;
        let marker = tokenizer.encode(marker)?;
        Ok(Self {
            tokenizer,
            reply,
            marker,
        })
    }
}

impl LanguageModel for DummyModel {
    fn tokenizer(&self) -> &dyn Tokenizer {
        &self.tokenizer
    }

    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip(self, prompt), fields(prompt_len = prompt.len())))]
    fn generate(&self, prompt: &[TokenId], params: &SamplingParams) -> Result<TokenSource> {
        let _ = prompt;
        let budget = params.max_new_tokens();
        let body = budget.saturating_sub(self.marker.len());
        let tail = budget.min(self.marker.len());

        let tokens: Vec<TokenId> = self
            .reply
            .iter()
            .copied()
            .cycle()
            .take(body)
            .chain(self.marker.iter().copied().take(tail))
            .collect();

        Ok(Box::new(tokens.into_iter()))
    }
}
