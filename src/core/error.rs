use thiserror::Error;

/// Errors produced by the span-to-metrics pipeline.
///
/// Construction-time variants abort startup and never surface mid-stream;
/// per-cycle variants abort a single flush and leave state intact.
#[derive(Error, Debug)]
pub enum Error {
    /// The dimensions cache was configured with zero capacity.
    #[error("invalid dimensions cache size {size}, the maximum number of items in the cache must be positive")]
    InvalidCacheSize {
        /// The rejected capacity.
        size: usize,
    },

    /// An exclude pattern failed to compile.
    #[error("invalid exclude pattern for {name}: {source}")]
    InvalidExcludePattern {
        /// The field name the pattern was attached to.
        name: String,
        /// The underlying regex compilation failure.
        #[source]
        source: regex::Error,
    },

    /// A configured dimension collides with a reserved or earlier name.
    #[error("duplicate dimension name {name}")]
    DuplicateDimension {
        /// The colliding name.
        name: String,
    },

    /// Two configured dimensions collide once their names are sanitized.
    #[error("duplicate dimension name {name} after sanitization")]
    DuplicateSanitizedDimension {
        /// The colliding sanitized name.
        name: String,
    },

    /// Any other configuration failure.
    #[error("configuration error: {0}")]
    InvalidConfig(String),

    /// A metric key had no cached dimension snapshot at flush time. The
    /// whole batch build is aborted and retried next cycle.
    #[error("value for key {key:?} not found in {metric} dimensions cache")]
    DimensionsNotCached {
        /// The metric whose cache missed.
        metric: &'static str,
        /// The raw key that missed.
        key: String,
    },

    /// The downstream metrics consumer rejected a batch.
    #[error("metrics export failed: {0}")]
    Export(String),

    /// The downstream trace consumer rejected a batch.
    #[error("trace forwarding failed: {0}")]
    Forward(String),
}

/// Result type alias for spanbridge operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Creates a new configuration error.
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Creates a new export error.
    pub fn export<S: Into<String>>(msg: S) -> Self {
        Self::Export(msg.into())
    }

    /// Creates a new trace forwarding error.
    pub fn forward<S: Into<String>>(msg: S) -> Self {
        Self::Forward(msg.into())
    }

    /// Returns true if the next flush cycle can proceed normally after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::DimensionsNotCached { .. } | Self::Export(_) | Self::Forward(_)
        )
    }

    /// Returns the error category for logging.
    pub fn category(&self) -> &'static str {
        match self {
            Self::InvalidCacheSize { .. }
            | Self::InvalidExcludePattern { .. }
            | Self::DuplicateDimension { .. }
            | Self::DuplicateSanitizedDimension { .. }
            | Self::InvalidConfig(_) => "config",
            Self::DimensionsNotCached { .. } => "flush",
            Self::Export(_) | Self::Forward(_) => "consumer",
        }
    }
}
