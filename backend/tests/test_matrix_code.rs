//! Tests for matrix position codes

use matrix_placement_core::placement::code::MAX_ENCODED_LEVEL;
use matrix_placement_core::{
    CodeError, MatrixCode, MemoryEngine, PlacementConfig, PlacementError, PlacementRequest,
    Position,
};

#[test]
fn test_level_letters_are_bijective_base26() {
    assert_eq!(MatrixCode::level_letters(1), "A");
    assert_eq!(MatrixCode::level_letters(26), "Z");
    assert_eq!(MatrixCode::level_letters(27), "AA");
    assert_eq!(MatrixCode::level_letters(52), "AZ");
    assert_eq!(MatrixCode::level_letters(53), "BA");
    assert_eq!(MatrixCode::level_letters(128), "DX");
}

#[test]
fn test_parse_and_display_agree() {
    for raw in ["A1", "B2", "C3", "Z1", "AA1", "DX1"] {
        let code: MatrixCode = raw.parse().unwrap();
        assert_eq!(code.to_string(), raw);
    }

    let deep: MatrixCode = "AA5".parse().unwrap();
    assert_eq!(deep.level(), 27);
    assert_eq!(deep.index(), 5);
}

#[test]
fn test_parse_rejects_malformed() {
    for raw in ["", "A", "1", "a1", "A0", "A2", "B3", "A-1", "A1x"] {
        assert!(raw.parse::<MatrixCode>().is_err(), "accepted {:?}", raw);
    }
    assert_eq!(
        MatrixCode::new(MAX_ENCODED_LEVEL + 1, 1),
        Err(CodeError::DepthExceeded(MAX_ENCODED_LEVEL + 1))
    );
}

#[test]
fn test_deepest_level_holds_full_index_range() {
    let last = 1u128 << (MAX_ENCODED_LEVEL - 1);
    let code = MatrixCode::new(MAX_ENCODED_LEVEL, last).unwrap();
    assert_eq!(code.to_string().parse::<MatrixCode>().unwrap(), code);
}

#[test]
fn test_serializes_as_string() {
    let code: MatrixCode = "C3".parse().unwrap();
    assert_eq!(serde_json::to_string(&code).unwrap(), "\"C3\"");
    let back: MatrixCode = serde_json::from_str("\"C3\"").unwrap();
    assert_eq!(back, code);
    assert!(serde_json::from_str::<MatrixCode>("\"C9\"").is_err());
}

#[test]
fn test_codes_are_stable_as_tree_grows() {
    let engine = MemoryEngine::in_memory(PlacementConfig::default()).unwrap();
    let first = engine.place(&PlacementRequest::new("A", 6000)).unwrap();
    let before: Vec<_> = first.slots.iter().map(|s| s.code).collect();

    engine.place(&PlacementRequest::new("B", 20_000)).unwrap();

    let after: Vec<_> = first
        .slots
        .iter()
        .map(|s| engine.code_of(s.id).ok())
        .collect();
    assert_eq!(before, after);
}

#[test]
fn test_codes_beyond_max_depth_are_omitted() {
    let engine = MemoryEngine::in_memory(PlacementConfig::default()).unwrap();
    engine.place(&PlacementRequest::new("ROOT", 200_000)).unwrap();

    // Always-left purchases by a fresh chain build a single left spine
    let mut last = None;
    for _ in 0..MAX_ENCODED_LEVEL {
        let result = engine
            .place(&PlacementRequest::new("A", 200_000).with_positions(vec![Position::Left]))
            .unwrap();
        last = Some(result.slots[0].clone());
    }

    let deepest = last.unwrap();
    assert_eq!(deepest.level, MAX_ENCODED_LEVEL + 1);
    assert_eq!(deepest.code, None);
    assert_eq!(
        engine.code_of(deepest.id),
        Err(PlacementError::Code(CodeError::DepthExceeded(
            MAX_ENCODED_LEVEL + 1
        )))
    );
}
