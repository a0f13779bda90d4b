use crate::{CompletionRequest, Error, RawCompletionRequest, SamplingParams};

fn raw() -> RawCompletionRequest {
    RawCompletionRequest {
        prompt: "Once upon a time".to_string(),
        length: 32,
        chunks: 8,
        top_k: 40,
        penalty_alpha: None,
        top_p: Some(0.9),
        temperature: Some(0.8),
    }
}

fn reason(result: Result<CompletionRequest, Error>) -> String {
    match result {
        Err(Error::InvalidRequest { reason }) => reason,
        other => panic!("expected InvalidRequest, got {other:?}"),
    }
}

#[test]
fn nucleus_request_resolves_sampling() {
    let req = CompletionRequest::try_from(raw()).unwrap();
    assert_eq!(req.prompt(), "Once upon a time");
    assert_eq!(req.length(), 32);
    assert_eq!(req.chunks(), 8);
    assert_eq!(
        *req.sampling(),
        SamplingParams::Nucleus {
            top_k: 40,
            max_new_tokens: 32,
            top_p: 0.9,
            temperature: 0.8,
        }
    );
    assert!(req.sampling().do_sample());
}

#[test]
fn penalty_alpha_selects_contrastive_search() {
    let req = CompletionRequest::try_from(RawCompletionRequest {
        penalty_alpha: Some(0.6),
        top_k: 4,
        ..raw()
    })
    .unwrap();

    assert_eq!(
        *req.sampling(),
        SamplingParams::Contrastive {
            top_k: 4,
            max_new_tokens: 32,
            penalty_alpha: 0.6,
        }
    );
    assert!(!req.sampling().do_sample());
}

#[test]
fn missing_nucleus_fields_default_to_neutral() {
    let req = CompletionRequest::try_from(RawCompletionRequest {
        top_p: None,
        temperature: None,
        ..raw()
    })
    .unwrap();
    assert!(matches!(
        req.sampling(),
        SamplingParams::Nucleus { top_p, temperature, .. } if *top_p == 1.0 && *temperature == 1.0
    ));
}

#[test]
fn chunks_longer_than_length_fails() {
    let msg = reason(CompletionRequest::try_from(RawCompletionRequest {
        length: 4,
        chunks: 5,
        ..raw()
    }));
    assert!(msg.contains("chunks"), "{msg}");
}

#[test]
fn zero_chunks_fails() {
    let msg = reason(CompletionRequest::try_from(RawCompletionRequest {
        chunks: 0,
        ..raw()
    }));
    assert!(msg.contains("chunks"), "{msg}");
}

#[test]
fn small_top_k_with_penalty_alpha_fails() {
    for top_k in [0, 1] {
        let msg = reason(CompletionRequest::try_from(RawCompletionRequest {
            penalty_alpha: Some(0.5),
            top_k,
            ..raw()
        }));
        assert!(msg.contains("top_k"), "{msg}");
    }

    // Without penalty_alpha a top_k of 1 is fine.
    assert!(
        CompletionRequest::try_from(RawCompletionRequest {
            top_k: 1,
            ..raw()
        })
        .is_ok()
    );
}

#[test]
fn top_p_outside_unit_interval_fails() {
    for top_p in [-0.01, 1.01, f64::NAN] {
        let msg = reason(CompletionRequest::try_from(RawCompletionRequest {
            top_p: Some(top_p),
            ..raw()
        }));
        assert!(msg.contains("top_p"), "{msg}");
    }
    for top_p in [0.0, 1.0] {
        assert!(
            CompletionRequest::try_from(RawCompletionRequest {
                top_p: Some(top_p),
                ..raw()
            })
            .is_ok()
        );
    }
}

#[test]
fn out_of_range_scalars_fail() {
    let cases = [
        (RawCompletionRequest { length: 0, chunks: 0, ..raw() }, "length"),
        (RawCompletionRequest { length: 201, ..raw() }, "length"),
        (RawCompletionRequest { temperature: Some(1.6), ..raw() }, "temperature"),
        (RawCompletionRequest { penalty_alpha: Some(1.0), ..raw() }, "penalty_alpha"),
        (RawCompletionRequest { penalty_alpha: Some(0.0), ..raw() }, "penalty_alpha"),
        (RawCompletionRequest { top_k: -3, ..raw() }, "top_k"),
    ];
    for (raw, field) in cases {
        let msg = reason(CompletionRequest::try_from(raw));
        assert!(msg.contains(field), "{field}: {msg}");
    }
}

#[test]
fn json_accepts_legacy_field_names_and_defaults_chunks() {
    let req: CompletionRequest = serde_json::from_str(
        r#"{"prompt":"hi","length":20,"top_k":5,"temp":0.5,"top_p":0.95,"csearch":false}"#,
    )
    .unwrap();
    assert_eq!(req.chunks(), 8);
    assert!(matches!(
        req.sampling(),
        SamplingParams::Nucleus { temperature, .. } if *temperature == 0.5
    ));
}

#[test]
fn json_reports_validation_detail() {
    let err = serde_json::from_str::<CompletionRequest>(
        r#"{"prompt":"hi","length":4,"chunks":9,"top_k":5}"#,
    )
    .unwrap_err();
    assert!(err.to_string().contains("chunks must not exceed length"));

    let err = serde_json::from_str::<CompletionRequest>(r#"{"prompt":"hi"}"#).unwrap_err();
    assert!(err.to_string().contains("length"));
}

#[test]
fn empty_prompt_is_a_valid_noop() {
    let req = CompletionRequest::try_from(RawCompletionRequest {
        prompt: String::new(),
        ..raw()
    })
    .unwrap();
    assert!(req.is_noop());
}
