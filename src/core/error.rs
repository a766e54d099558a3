use thiserror::Error;

/// Failure classes surfaced at the pipeline boundary.
///
/// Per-model and per-outcome failures never appear here; they are
/// recovered into the response map and the fused outcome respectively.
#[derive(Error, Debug)]
pub enum PredictError {
    /// The event reference could not be parsed into a query at all.
    #[error("unparseable event reference: {0}")]
    Reference(String),

    /// Every market source failed; nothing to forecast against.
    #[error("market resolution failed: {0}")]
    Resolution(String),

    /// All probability candidates sit below the configured threshold.
    #[error("low-probability event: max candidate {max_probability:.2}% below threshold {threshold:.2}%")]
    LowProbability { max_probability: f64, threshold: f64 },

    /// The overall deadline expired before a usable partial result existed.
    #[error("prediction deadline exceeded")]
    Timeout,

    /// Invalid configuration at startup. Fatal; no partial service.
    #[error("configuration error: {0}")]
    Config(String),

    /// A numeric invariant was broken (probability outside [0,100] or a
    /// non-positive weight). Indicates a bug, not bad input.
    #[error("invariant violation: {0}")]
    Invariant(String),
}
