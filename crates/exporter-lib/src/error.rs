//! Error types for the power exporter

/// Result type alias using ExporterError
pub type Result<T> = std::result::Result<T, ExporterError>;

/// Main error type for the exporter
///
/// Startup failures (`Connection`, `DataLoad`) terminate the process.
/// Everything else is scoped to a single node or query within one cycle.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExporterError {
    /// Metrics backend could not be reached during startup
    #[error("Could not connect to metrics backend at {endpoint} after {attempts} attempts")]
    Connection { endpoint: String, attempts: u32 },

    /// Calibration dataset missing or malformed
    #[error("Failed to load calibration data: {0}")]
    DataLoad(String),

    /// A single metrics query failed or returned nothing usable
    #[error("Metrics query failed: {0}")]
    Query(String),

    /// An inventory node could not be matched to a reported instance
    #[error("Could not reconcile node {node}: {reason}")]
    Reconciliation { node: String, reason: String },

    /// Hardware model absent from the calibration table
    #[error("Unknown instance type: {0}")]
    UnknownModel(String),

    /// Calibration points for a model could not be fitted
    #[error("Degenerate calibration data for {model}: {reason}")]
    Fit { model: String, reason: String },

    /// Orchestration API unavailable or returned an error
    #[error("Node inventory error: {0}")]
    Inventory(String),
}

impl ExporterError {
    /// Short stable code, used as a log field and metrics label
    pub fn code(&self) -> &'static str {
        match self {
            ExporterError::Connection { .. } => "connection",
            ExporterError::DataLoad(_) => "data_load",
            ExporterError::Query(_) => "query",
            ExporterError::Reconciliation { .. } => "reconciliation",
            ExporterError::UnknownModel(_) => "unknown_model",
            ExporterError::Fit { .. } => "fit",
            ExporterError::Inventory(_) => "inventory",
        }
    }

    /// Whether this error must stop the process
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ExporterError::Connection { .. } | ExporterError::DataLoad(_)
        )
    }
}

impl From<csv::Error> for ExporterError {
    fn from(err: csv::Error) -> Self {
        ExporterError::DataLoad(err.to_string())
    }
}

impl From<reqwest::Error> for ExporterError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ExporterError::Query(format!("request timed out: {}", err))
        } else {
            ExporterError::Query(err.to_string())
        }
    }
}

impl From<kube::Error> for ExporterError {
    fn from(err: kube::Error) -> Self {
        ExporterError::Inventory(err.to_string())
    }
}
