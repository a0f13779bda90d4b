use crate::{Result, SamplingParams};

/// Identifier of a single vocabulary entry.
pub type TokenId = u32;

/// A finite, single-pass sequence of generated tokens.
///
/// Pulling the next token may block for as long as the model needs to
/// produce it.
pub type TokenSource = Box<dyn Iterator<Item = TokenId> + Send>;

/// Text ↔ token conversion supplied by the model.
pub trait Tokenizer: Send + Sync {
    /// Encodes `text` into token ids.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Tokenizer`] when the text cannot be encoded.
    fn encode(&self, text: &str) -> Result<Vec<TokenId>>;

    /// Decodes `tokens` into text, merging multi-token characters.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Tokenizer`] when an id is outside the
    /// vocabulary.
    fn decode(&self, tokens: &[TokenId]) -> Result<String>;

    /// Returns `true` if `token` decodes on its own to pure 7-bit ASCII.
    ///
    /// Tokens holding only part of a multi-byte character return `false`.
    fn surface_is_ascii(&self, token: TokenId) -> bool;
}

/// A black-box text generator.
///
/// Implementations own their weights and sampling; callers only see token
/// ids going in and out.
pub trait LanguageModel: Send + Sync {
    /// The tokenizer matching this model's vocabulary.
    fn tokenizer(&self) -> &dyn Tokenizer;

    /// Starts generation for `prompt` and returns the produced tokens.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Model`] when generation cannot start.
    fn generate(&self, prompt: &[TokenId], params: &SamplingParams) -> Result<TokenSource>;
}
