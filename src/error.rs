use thiserror::Error;

/// The four error kinds the engine surfaces to callers.
///
/// Fold kernels never produce these on normal data (a missing price
/// means an emission is skipped, a zero denominator yields a zero
/// average); they are raised only at the boundaries: derivation,
/// storage I/O, and invariant checks on cache rows.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid cashflow: {0}")]
    InvalidCashflow(#[from] CashflowDerivationError),

    #[error("store unavailable: {0}")]
    StoreUnavailable(#[source] anyhow::Error),

    #[error("cache corruption: {0}")]
    Corruption(String),

    #[error("schema mismatch: required derived view is absent: {0}")]
    SchemaMismatch(String),
}

/// Why `derive_cashflow` could not produce a fully specified cashflow.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CashflowDerivationError {
    /// A fixed-point pass left fields missing and changed nothing on
    /// the most recent pass: the supplied subset is not sufficient.
    #[error(
        "insufficient data to derive a complete cashflow (missing: {missing:?})"
    )]
    InsufficientData { missing: Vec<&'static str> },

    /// All five fields were present (or became present) but violate
    /// one of the two consistency invariants within epsilon.
    #[error("inconsistent cashflow: {0}")]
    Inconsistent(String),
}

impl From<diesel::result::Error> for EngineError {
    fn from(err: diesel::result::Error) -> Self {
        EngineError::StoreUnavailable(anyhow::Error::new(err))
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
