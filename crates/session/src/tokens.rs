// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Token counting with a bounded-latency fallback.
//!
//! Exact counts come from an out-of-band tokenizer; event emission cannot
//! wait on it, so anything past the budget falls back to the approximation
//! `ceil(trimmed_length / 4)`.

use async_trait::async_trait;
use std::time::Duration;

/// Budget for an exact count before falling back.
pub const TOKENIZE_BUDGET: Duration = Duration::from_millis(150);

/// `ceil(len(trim(text)) / 4)`.
pub fn approx_token_count(text: &str) -> u64 {
    (text.trim().len() as u64).div_ceil(4)
}

/// Out-of-band exact tokenizer.
#[async_trait]
pub trait Tokenizer: Send + Sync {
    async fn count(&self, text: &str) -> Option<u64>;
}

/// Exact count within the budget, approximate otherwise.
pub async fn count_with_budget(tokenizer: Option<&dyn Tokenizer>, text: &str) -> u64 {
    if let Some(tokenizer) = tokenizer {
        if let Ok(Some(exact)) =
            tokio::time::timeout(TOKENIZE_BUDGET, tokenizer.count(text)).await
        {
            return exact;
        }
    }
    approx_token_count(text)
}

#[cfg(test)]
#[path = "tokens_tests.rs"]
mod tests;
