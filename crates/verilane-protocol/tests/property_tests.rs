//! Property-based tests for verilane-protocol
//!
//! Uses proptest to verify:
//! - Decoded events do not depend on how the output is chunked
//! - Arbitrary text never panics the decoder
//! - Progress fractions stay within [0, 1]

use proptest::prelude::*;
use verilane_protocol::{
    decode_all, EntityKind, OutputDecoder, Position, Progress, StructuredContext,
};

// ============================================================================
// Fixtures
// ============================================================================

const LINE_OUTPUT: &str = concat!(
    "Silicon started\n",
    "{\"type\":\"VerificationStart\",\"nofPredicates\":0,\"nofMethods\":2,\"nofFunctions\":1}\n",
    "{\"type\":\"MethodVerified\",\"name\":\"main\"}\n",
    "{\"type\":\"FunctionVerified\",\"name\":\"fib\"}\n",
    "Silicon finished in 1.25 seconds.\n",
    "The following errors were found (1):\n",
    "  Assert might fail. [assert.failed] 7:3: Assertion n > 0 might not hold.\n",
);

const STRUCTURED_OUTPUT: &str = concat!(
    r#"{"msg_type":"statistics","msg_body":{"methods":1,"functions":0,"predicates":1}}"#,
    "\n",
    r#"{"msg_type":"verification_result","msg_body":{"status":"success","kind":"for_entity","details":{"entity":{"type":"predicate","name":"valid"}}}}"#,
    r#"{"msg_type":"verification_result","msg_body":{"status":"failure","kind":"for_entity","verifier":"silicon","details":{"entity":{"type":"method","name":"m"},"result":{"errors":[{"tag":"assert.failed","text":"x \"}\" y","position":{"start":"3:1","end":"3:9"}}]}}}}"#,
    "\n",
    r#"{"msg_type":"verification_result","msg_body":{"status":"failure","kind":"overall","verifier":"silicon","details":{"time":900,"result":{"errors":[]}}}}"#,
);

/// Decode `output` after splitting it at the given character offsets
fn decode_chunked(output: &str, cuts: &[usize]) -> Vec<String> {
    let chars: Vec<char> = output.chars().collect();
    let mut cuts: Vec<usize> = cuts.iter().map(|c| c % (chars.len() + 1)).collect();
    cuts.sort_unstable();
    cuts.dedup();

    let mut decoder = OutputDecoder::new(StructuredContext::new("silicon"));
    let mut events = Vec::new();
    let mut from = 0;
    for cut in cuts.into_iter().chain(std::iter::once(chars.len())) {
        let chunk: String = chars[from..cut].iter().collect();
        events.extend(decoder.feed(&chunk));
        from = cut;
    }
    events.extend(decoder.finish());
    events.into_iter().map(|e| format!("{e:?}")).collect()
}

fn decode_whole(output: &str) -> Vec<String> {
    decode_all(output, StructuredContext::new("silicon"))
        .into_iter()
        .map(|e| format!("{e:?}"))
        .collect()
}

// ============================================================================
// Chunking independence
// ============================================================================

proptest! {
    #[test]
    fn line_output_is_chunking_independent(cuts in prop::collection::vec(any::<usize>(), 0..12)) {
        prop_assert_eq!(decode_chunked(LINE_OUTPUT, &cuts), decode_whole(LINE_OUTPUT));
    }

    #[test]
    fn structured_output_is_chunking_independent(cuts in prop::collection::vec(any::<usize>(), 0..12)) {
        prop_assert_eq!(decode_chunked(STRUCTURED_OUTPUT, &cuts), decode_whole(STRUCTURED_OUTPUT));
    }

    #[test]
    fn arbitrary_text_never_panics(text in "\\PC{0,200}") {
        let _ = decode_whole(&text);
    }

    #[test]
    fn position_parse_is_one_based(line in 1u32..100_000, col in 1u32..10_000) {
        let parsed = Position::parse(&format!("{line}:{col}")).unwrap();
        prop_assert_eq!(parsed, Some(Position::new(line - 1, col - 1)));
    }
}

// ============================================================================
// Progress
// ============================================================================

fn kind_strategy() -> impl Strategy<Value = EntityKind> {
    prop_oneof![
        Just(EntityKind::Method),
        Just(EntityKind::Function),
        Just(EntityKind::Predicate),
    ]
}

proptest! {
    #[test]
    fn progress_fraction_is_bounded(
        totals in (0u32..20, 0u32..20, 0u32..20),
        verified in prop::collection::vec(kind_strategy(), 0..80),
    ) {
        let mut progress = Progress::new(totals.0, totals.1, totals.2);
        let mut last = progress.fraction();
        for kind in verified {
            progress.record(kind);
            let fraction = progress.fraction();
            prop_assert!((0.0..=1.0).contains(&fraction));
            prop_assert!(fraction >= last);
            last = fraction;
        }
    }
}

#[test]
fn fixtures_decode_without_errors() {
    let lines = decode_all(LINE_OUTPUT, StructuredContext::new("silicon"));
    assert_eq!(lines.len(), 6);
    assert!(lines.iter().all(Result::is_ok));

    let structured = decode_all(STRUCTURED_OUTPUT, StructuredContext::new("silicon"));
    assert_eq!(structured.len(), 4);
    assert!(structured.iter().all(Result::is_ok));
}
