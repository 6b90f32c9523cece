//! Error taxonomy (spec.md §7), one `thiserror` enum per concern the way the teacher's
//! `domain/errors.rs` splits `TradingError`/`RiskViolation`/`MarketDataError` — except
//! here every surfaced failure carries the same three fields spec.md §7 requires
//! ("operation name, symbol (if applicable), error kind, and a message"), so a single
//! enum with uniform variants is the better fit than one enum per subsystem.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("[{operation}]{} transport error: {message}", symbol_suffix(.symbol))]
    Transport {
        operation: &'static str,
        symbol: Option<String>,
        message: String,
    },

    #[error("[{operation}]{} rate limited: {message}", symbol_suffix(.symbol))]
    RateLimited {
        operation: &'static str,
        symbol: Option<String>,
        message: String,
    },

    #[error("[{operation}]{} rejected (code {code:?}): {message}", symbol_suffix(.symbol))]
    Rejected {
        operation: &'static str,
        symbol: Option<String>,
        code: Option<i32>,
        message: String,
    },

    #[error("[{operation}]{} invalid request: {message}", symbol_suffix(.symbol))]
    InvalidRequest {
        operation: &'static str,
        symbol: Option<String>,
        message: String,
    },

    #[error("[{operation}]{} configuration error: {message}", symbol_suffix(.symbol))]
    Config {
        operation: &'static str,
        symbol: Option<String>,
        message: String,
    },

    #[error("[{operation}]{} invariant violated: {message}", symbol_suffix(.symbol))]
    Invariant {
        operation: &'static str,
        symbol: Option<String>,
        message: String,
    },
}

fn symbol_suffix(symbol: &Option<String>) -> String {
    match symbol {
        Some(s) => format!(" ({s})"),
        None => String::new(),
    }
}

impl EngineError {
    pub fn transport(operation: &'static str, symbol: Option<String>, message: String) -> Self {
        EngineError::Transport { operation, symbol, message }
    }

    pub fn rate_limited(operation: &'static str, symbol: Option<String>, message: String) -> Self {
        EngineError::RateLimited { operation, symbol, message }
    }

    pub fn rejected(
        operation: &'static str,
        symbol: Option<String>,
        code: Option<i32>,
        message: String,
    ) -> Self {
        EngineError::Rejected { operation, symbol, code, message }
    }

    pub fn invalid_request(operation: &'static str, symbol: Option<String>, message: String) -> Self {
        EngineError::InvalidRequest { operation, symbol, message }
    }

    pub fn config(operation: &'static str, symbol: Option<String>, message: String) -> Self {
        EngineError::Config { operation, symbol, message }
    }

    pub fn invariant(operation: &'static str, symbol: Option<String>, message: String) -> Self {
        EngineError::Invariant { operation, symbol, message }
    }

    /// Non-retriable REJECTED, INVALID_REQUEST, CONFIG and INVARIANT propagate; TRANSPORT,
    /// RATE_LIMITED and retriable REJECTED codes are recovered locally by the adapter's
    /// retry policy (spec.md §7). This flags whether the *caller* (beyond the adapter's own
    /// retry loop) should treat the failure as retriable.
    pub fn is_retriable(&self) -> bool {
        match self {
            EngineError::Transport { .. } | EngineError::RateLimited { .. } => true,
            EngineError::Rejected { code, .. } => {
                matches!(code, Some(408 | 429 | 500 | 502 | 503 | 504))
            }
            EngineError::InvalidRequest { .. }
            | EngineError::Config { .. }
            | EngineError::Invariant { .. } => false,
        }
    }

    pub fn is_invariant(&self) -> bool {
        matches!(self, EngineError::Invariant { .. })
    }
}
