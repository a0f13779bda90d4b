/// Sampling strategy handed to the model.
///
/// Which variant a request resolves to depends on whether it carries a
/// penalty alpha: contrastive search if so, nucleus sampling otherwise.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SamplingParams {
    /// Contrastive search (`top_k >= 2`, `0 < penalty_alpha < 1`).
    Contrastive {
        top_k: usize,
        max_new_tokens: usize,
        penalty_alpha: f64,
    },
    /// Ancestral sampling restricted to the nucleus; always samples.
    Nucleus {
        top_k: usize,
        max_new_tokens: usize,
        top_p: f64,
        temperature: f64,
    },
}

impl SamplingParams {
    /// Upper bound on generated tokens.
    pub const fn max_new_tokens(&self) -> usize {
        match self {
            Self::Contrastive { max_new_tokens, .. } | Self::Nucleus { max_new_tokens, .. } => {
                *max_new_tokens
            }
        }
    }

    /// Number of highest-probability candidates considered per step.
    pub const fn top_k(&self) -> usize {
        match self {
            Self::Contrastive { top_k, .. } | Self::Nucleus { top_k, .. } => *top_k,
        }
    }

    /// Whether the model samples (`true`) or searches deterministically.
    pub const fn do_sample(&self) -> bool {
        matches!(self, Self::Nucleus { .. })
    }
}
