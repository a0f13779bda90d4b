use crate::{
    DUMMY_REPLY, DummyModel, Error, LanguageModel, SamplingParams, TokenId, Tokenizer,
    WordTokenizer,
};

fn nucleus(max_new_tokens: usize) -> SamplingParams {
    SamplingParams::Nucleus {
        top_k: 50,
        max_new_tokens,
        top_p: 0.9,
        temperature: 0.7,
    }
}

#[test]
fn word_tokenizer_prefers_whole_pieces() {
    let tok = WordTokenizer::new(["hello ", "world ", "hell"]);
    let ids = tok.encode("hello world ").unwrap();
    assert_eq!(
        ids,
        vec![tok.piece_id("hello ").unwrap(), tok.piece_id("world ").unwrap()]
    );
    assert_eq!(tok.decode(&ids).unwrap(), "hello world ");
}

#[test]
fn word_tokenizer_falls_back_to_bytes() {
    let tok = WordTokenizer::new(["caf"]);
    let ids = tok.encode("café").unwrap();

    // "caf" piece, then the two UTF-8 bytes of 'é'.
    assert_eq!(ids.len(), 3);
    assert_eq!(ids[1..], [0xc3, 0xa9]);
    assert!(tok.surface_is_ascii(ids[0]));
    assert!(!tok.surface_is_ascii(ids[1]));
    assert!(!tok.surface_is_ascii(ids[2]));
    assert_eq!(tok.decode(&ids).unwrap(), "café");
}

#[test]
fn word_tokenizer_marks_ascii_surfaces() {
    let tok = WordTokenizer::new(["plain ", "naïve "]);
    assert!(tok.surface_is_ascii(tok.piece_id("plain ").unwrap()));
    assert!(!tok.surface_is_ascii(tok.piece_id("naïve ").unwrap()));
    assert!(tok.surface_is_ascii(u32::from(b'a')));
    assert!(!tok.surface_is_ascii(10_000));
}

#[test]
fn word_tokenizer_rejects_unknown_ids() {
    let tok = WordTokenizer::new(["a"]);
    assert!(matches!(tok.decode(&[9_999]), Err(Error::Tokenizer { .. })));
}

#[test]
fn marker_splits_into_multiple_tokens() {
    let tok = WordTokenizer::for_text("x", "<|endoftext|>");
    let ids = tok.encode("<|endoftext|>").unwrap();
    assert_eq!(ids.len(), 3);
    assert_eq!(tok.decode(&ids).unwrap(), "<|endoftext|>");
}

#[test]
fn dummy_model_ends_with_marker_within_budget() {
    let model = DummyModel::new("<|endoftext|>").unwrap();
    let marker = model.tokenizer().encode("<|endoftext|>").unwrap();

    let tokens: Vec<TokenId> = model.generate(&[], &nucleus(40)).unwrap().collect();
    assert_eq!(tokens.len(), 40);
    assert_eq!(tokens[40 - marker.len()..], marker[..]);

    let text = model.tokenizer().decode(&tokens).unwrap();
    assert!(text.starts_with("this is a placeholder"));
    assert!(text.ends_with("<|endoftext|>"));
}

#[test]
fn dummy_model_cycles_the_reply() {
    let model = DummyModel::new("<|endoftext|>").unwrap();
    let reply_len = model.tokenizer().encode(DUMMY_REPLY).unwrap().len();

    let tokens: Vec<TokenId> = model
        .generate(&[], &nucleus(reply_len * 2 + 3))
        .unwrap()
        .collect();
    assert_eq!(tokens[..reply_len], tokens[reply_len..reply_len * 2]);
}

#[test]
fn dummy_model_truncates_marker_on_tiny_budget() {
    let model = DummyModel::new("<|endoftext|>").unwrap();
    let tokens: Vec<TokenId> = model.generate(&[], &nucleus(2)).unwrap().collect();
    assert_eq!(tokens.len(), 2);
}
