// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent failure classification.
//!
//! Single pure classifier for the raw error text an agent run leaves
//! behind. Every call site that surfaces a failure to a user goes through
//! this instead of re-implementing the heuristics.

use serde::{Deserialize, Serialize};

/// Categorized failure of an agent run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentFailure {
    /// Exceeded usage quota or billing issue
    OutOfCredits,
    /// Requested model missing or over capacity
    ModelUnavailable,
    /// Invalid API key or authentication failure
    Unauthorized,
    /// Network connectivity issue
    NoInternet,
    /// Rate limited by the provider
    RateLimited,
    /// Other error with message
    Other(String),
}

impl AgentFailure {
    /// User-facing message. The raw diagnostic stays in logs; this is what
    /// dashboards show.
    pub fn user_message(&self) -> String {
        match self {
            AgentFailure::OutOfCredits => {
                "AI usage limit reached — add credits or wait for the limit to reset".to_string()
            }
            AgentFailure::ModelUnavailable => {
                "AI model temporarily unavailable — retry the task later".to_string()
            }
            AgentFailure::Unauthorized => {
                "AI provider rejected the credentials — check the API key".to_string()
            }
            AgentFailure::NoInternet => "No network connection to the AI provider".to_string(),
            AgentFailure::RateLimited => {
                "AI provider rate limit hit — the task can be re-queued".to_string()
            }
            AgentFailure::Other(msg) => format!("Agent run failed: {}", msg),
        }
    }
}

crate::simple_display! {
    AgentFailure {
        OutOfCredits => "out of credits",
        ModelUnavailable => "model unavailable",
        Unauthorized => "unauthorized",
        NoInternet => "no internet connection",
        RateLimited => "rate limited",
        Other(..) => "agent error",
    }
}

/// Classify raw error text into an [`AgentFailure`].
///
/// Matches the error shapes the supported launchers emit. Checks are
/// ordered: quota errors often also mention the model name, so credit
/// detection runs first.
pub fn classify_agent_error(raw: &str) -> AgentFailure {
    let lower = raw.to_lowercase();

    const CREDIT: &[&str] =
        &["usage limit", "out of credits", "credit balance", "quota", "billing", "insufficient funds"];
    const MODEL: &[&str] =
        &["model_not_found", "model unavailable", "overloaded", "capacity", "no model"];
    const AUTH: &[&str] = &["unauthorized", "invalid api key", "authentication", "401", "forbidden"];
    const NETWORK: &[&str] =
        &["enotfound", "econnrefused", "etimedout", "getaddrinfo", "socket hang up", "network error"];
    const RATE: &[&str] = &["rate limit", "too many requests", "429"];

    let any = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

    if any(CREDIT) {
        AgentFailure::OutOfCredits
    } else if any(RATE) {
        AgentFailure::RateLimited
    } else if any(MODEL) {
        AgentFailure::ModelUnavailable
    } else if any(AUTH) {
        AgentFailure::Unauthorized
    } else if any(NETWORK) {
        AgentFailure::NoInternet
    } else {
        AgentFailure::Other(raw.to_string())
    }
}

#[cfg(test)]
#[path = "failure_tests.rs"]
mod tests;
