// SPDX-License-Identifier: MIT OR Apache-2.0
//! Conformance checks pinning the wire error catalog: every stable code,
//! its kind tag, and its HTTP mapping.

use skillport::error::{ErrorCategory, ErrorCode};

#[test]
fn the_catalog_is_exactly_twelve_codes() {
    assert_eq!(ErrorCode::all().len(), 12);
}

#[test]
fn wire_codes_kinds_and_http_statuses_are_pinned() {
    let table = [
        ("SKILL_REG_001", "duplicate_skill", 409),
        ("SKILL_REG_002", "validation_failed", 422),
        ("SKILL_REG_003", "invalid_code", 400),
        ("SKILL_REG_999", "internal_error", 500),
        ("SKILL_INV_001", "skill_not_found", 404),
        ("SKILL_INV_002", "invalid_inputs", 422),
        ("SKILL_INV_003", "execution_timeout", 504),
        ("SKILL_INV_004", "execution_failed", 500),
        ("SKILL_INV_999", "internal_error", 500),
        ("SKILL_ORC_001", "invalid_workflow", 422),
        ("SKILL_ORC_002", "cyclic_workflow", 400),
        ("SKILL_ORC_999", "internal_error", 500),
    ];

    for (code, (wire, kind, status)) in ErrorCode::all().iter().zip(table) {
        assert_eq!(code.wire_code(), wire);
        assert_eq!(code.kind(), kind, "{wire}");
        assert_eq!(code.http_status(), status, "{wire}");
    }
}

#[test]
fn codes_serialize_as_their_wire_form() {
    for code in ErrorCode::all() {
        let json = serde_json::to_value(code).unwrap();
        assert_eq!(json, serde_json::json!(code.wire_code()));
        let back: ErrorCode = serde_json::from_value(json).unwrap();
        assert_eq!(back, *code);
    }
}

#[test]
fn categories_partition_the_catalog() {
    let registry = ErrorCode::all()
        .iter()
        .filter(|c| c.category() == ErrorCategory::Registry)
        .count();
    let invocation = ErrorCode::all()
        .iter()
        .filter(|c| c.category() == ErrorCategory::Invocation)
        .count();
    let orchestration = ErrorCode::all()
        .iter()
        .filter(|c| c.category() == ErrorCategory::Orchestration)
        .count();
    assert_eq!((registry, invocation, orchestration), (4, 5, 3));
}

#[test]
fn wire_codes_follow_their_category_prefix() {
    for code in ErrorCode::all() {
        let expected = match code.category() {
            ErrorCategory::Registry => "SKILL_REG_",
            ErrorCategory::Invocation => "SKILL_INV_",
            ErrorCategory::Orchestration => "SKILL_ORC_",
        };
        assert!(
            code.wire_code().starts_with(expected),
            "{} should start with {expected}",
            code.wire_code()
        );
    }
}
