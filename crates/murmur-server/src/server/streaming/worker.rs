use murmur::{CompletionRequest, Fragment, LanguageModel, Result, StopSequence, TokenChunker};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Runs one generation to completion on the current (blocking) thread.
///
/// Encodes the prompt, pulls tokens from the model, groups them with a
/// [`TokenChunker`] and sends each decoded [`Fragment`] through `fragment_tx`.
/// Must run on a blocking thread: the model may block on every token.
///
/// # Behavior
///
/// - Stops pulling tokens as soon as `cancel` fires; the chunker then sees
///   the source end and drops its partial buffer.
/// - Exits early if the receiving session has gone away.
/// - Stops after the fragment in which the stop marker was found.
/// - On a model or tokenizer failure, sends a single `Err` and exits.
pub fn generate_fragments(
    model: Arc<dyn LanguageModel>,
    stop: StopSequence,
    request: CompletionRequest,
    fragment_tx: mpsc::Sender<Result<Fragment>>,
    cancel: CancellationToken,
) {
    if let Err(e) = run(&*model, &stop, &request, &fragment_tx, &cancel) {
        if fragment_tx.is_closed() {
            tracing::debug!("Worker exiting after generation error: {e}");
            return;
        }
        if let Err(e) = fragment_tx.blocking_send(Err(e)) {
            tracing::debug!("Worker failed to send error: {e}");
        }
    }
}

fn run(
    model: &dyn LanguageModel,
    stop: &StopSequence,
    request: &CompletionRequest,
    fragment_tx: &mpsc::Sender<Result<Fragment>>,
    cancel: &CancellationToken,
) -> Result<()> {
    let tokenizer = model.tokenizer();
    let prompt = tokenizer.encode(request.prompt())?;
    let source = model.generate(&prompt, request.sampling())?;

    let cancel_source = cancel.clone();
    let source = source.take_while(move |_| !cancel_source.is_cancelled());
    let mut chunker = TokenChunker::new(source, request.chunks(), stop.clone(), tokenizer)?;

    for group in chunker.by_ref() {
        if fragment_tx.is_closed() {
            tracing::debug!("Worker exiting before fragment send");
            return Ok(());
        }

        let fragment = Fragment::decode(&group, tokenizer, stop)?;
        let stopped = fragment.stopped;

        if let Err(e) = fragment_tx.blocking_send(Ok(fragment)) {
            tracing::debug!("Worker failed to send fragment: {e}");
            return Ok(());
        }

        if stopped {
            tracing::debug!("Stop marker reached");
            return Ok(());
        }
    }

    if cancel.is_cancelled() {
        tracing::debug!("Generation cancelled");
    } else if chunker.discarded() > 0 {
        tracing::debug!(
            discarded = chunker.discarded(),
            "Token source exhausted with a partial group"
        );
    }

    Ok(())
}
