//! Ordered fallback over interchangeable strategies.
//!
//! Identity lookup and embedding persistence both try a list of ways of
//! doing the same thing until one works. The chain records why each earlier
//! strategy failed so callers can report it.

use crate::backend::BackendError;
use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StrategyError {
    /// The strategy does not apply here, e.g. it needs credentials that
    /// were never configured.
    #[error("skipped: {0}")]
    Skipped(String),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("not found: {0}")]
    NotFound(String),
}

/// One way of turning a request into a value.
#[async_trait]
pub trait Strategy<Req: ?Sized + Sync, T: Send>: Send + Sync {
    fn name(&self) -> &str;
    async fn attempt(&self, request: &Req) -> Result<T, StrategyError>;
}

#[derive(Debug)]
pub struct StrategyFailure {
    pub strategy: String,
    pub error: StrategyError,
}

/// Every strategy failed.
#[derive(Debug)]
pub struct ChainError {
    pub failures: Vec<StrategyFailure>,
}

impl fmt::Display for ChainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.failures.is_empty() {
            return write!(f, "no strategies configured");
        }
        write!(f, "all strategies failed")?;
        for (i, failure) in self.failures.iter().enumerate() {
            let sep = if i == 0 { ": " } else { "; " };
            write!(f, "{sep}{} ({})", failure.strategy, failure.error)?;
        }
        Ok(())
    }
}

impl std::error::Error for ChainError {}

/// A successful chain run.
#[derive(Debug)]
pub struct Resolved<T> {
    pub value: T,
    /// Name of the strategy that produced `value`.
    pub strategy: String,
    /// Failures of the strategies tried before it.
    pub failures: Vec<StrategyFailure>,
}

pub struct FallbackChain<Req: ?Sized, T> {
    strategies: Vec<Box<dyn Strategy<Req, T>>>,
}

impl<Req: ?Sized + Sync, T: Send> FallbackChain<Req, T> {
    pub fn new() -> Self {
        Self {
            strategies: Vec::new(),
        }
    }

    pub fn with(mut self, strategy: impl Strategy<Req, T> + 'static) -> Self {
        self.strategies.push(Box::new(strategy));
        self
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Try each strategy in order; the first success wins.
    pub async fn run(&self, request: &Req) -> Result<Resolved<T>, ChainError> {
        let mut failures = Vec::new();

        for strategy in &self.strategies {
            match strategy.attempt(request).await {
                Ok(value) => {
                    return Ok(Resolved {
                        value,
                        strategy: strategy.name().to_string(),
                        failures,
                    })
                }
                Err(StrategyError::Skipped(reason)) => {
                    tracing::debug!(strategy = strategy.name(), reason = %reason, "strategy skipped");
                    failures.push(StrategyFailure {
                        strategy: strategy.name().to_string(),
                        error: StrategyError::Skipped(reason),
                    });
                }
                Err(error) => {
                    tracing::warn!(strategy = strategy.name(), %error, "strategy failed; trying next");
                    failures.push(StrategyFailure {
                        strategy: strategy.name().to_string(),
                        error,
                    });
                }
            }
        }

        Err(ChainError { failures })
    }
}

impl<Req: ?Sized + Sync, T: Send> Default for FallbackChain<Req, T> {
    fn default() -> Self {
        Self::new()
    }
}
