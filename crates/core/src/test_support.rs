// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test builders and proptest strategies shared with other crates' tests.

/// Proptest strategies for core types.
pub mod strategies {
    use proptest::prelude::*;

    /// Task-id-safe strings: the characters the queue encodes into
    /// entry filenames.
    pub fn arb_task_id() -> impl Strategy<Value = String> {
        "[a-zA-Z0-9][a-zA-Z0-9._-]{0,40}"
    }

    /// Arbitrary raw error text, including shapes the classifier knows.
    pub fn arb_error_text() -> impl Strategy<Value = String> {
        prop_oneof![
            ".*",
            Just("You have hit your usage limit.".to_string()),
            Just("model_not_found: claude-x".to_string()),
            Just("429 Too Many Requests".to_string()),
        ]
    }
}
