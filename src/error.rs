//! Error types for drawcast.

/// Top-level error type for the forecasting service.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Cycle error: {0}")]
    Cycle(#[from] CycleError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Store-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Snapshot {path} could not be loaded: {reason}")]
    Snapshot { path: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A draw that cannot become an outcome record.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RecordError {
    #[error("Issue id must not be empty")]
    EmptyIssueId,

    #[error("Draw {issue_id} has no winning value")]
    MissingValue { issue_id: String },

    #[error("Draw {issue_id} has value {value} outside 0-9")]
    ValueOutOfRange { issue_id: String, value: String },
}

/// Failures reaching or parsing the draw source.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Draw source {source_name} returned status {status}: {body}")]
    Status {
        source_name: String,
        status: u16,
        body: String,
    },

    #[error("Invalid draw payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by a trainable sequence model.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ModelError {
    #[error("Training set is empty")]
    EmptyTrainingSet,

    #[error("Malformed sample {index}: {reason}")]
    MalformedSample { index: usize, reason: String },

    #[error("Input has length {got}, expected {expected}")]
    InputLength { expected: usize, got: usize },

    #[error("Input value {value} is outside 0-9")]
    InputValue { value: u8 },

    #[error("Training diverged at epoch {epoch} with loss {loss}")]
    Diverged { epoch: usize, loss: f64 },
}

/// A tier failed to fit. Isolated to that tier.
#[derive(Debug, thiserror::Error)]
pub enum TrainingError {
    #[error("Tier {tier} failed to fit: {source}")]
    Fit { tier: String, source: ModelError },
}

/// A selected model failed to produce a usable distribution.
#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("Tier {tier} inference failed: {source}")]
    Model { tier: String, source: ModelError },

    #[error("Tier {tier} produced malformed output: {reason}")]
    MalformedOutput { tier: String, reason: String },
}

/// Notification delivery errors.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Notification endpoint rejected message with status {status}")]
    Rejected { status: u16 },
}

/// Orchestration failures that are not attributable to a collaborator.
#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    #[error("Training worker failed: {0}")]
    Worker(String),
}

/// Result type alias for drawcast.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    // --- ConfigError ---

    #[test]
    fn test_config_error_missing_required_display() {
        let err = ConfigError::MissingRequired {
            key: "DRAWCAST_SOURCE_URL".to_string(),
            hint: "Point it at the draw history endpoint".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("DRAWCAST_SOURCE_URL"));
        assert!(msg.contains("draw history endpoint"));
    }

    #[test]
    fn test_config_error_invalid_value_display() {
        let err = ConfigError::InvalidValue {
            key: "DRAWCAST_EPOCHS".to_string(),
            message: "must be a number".to_string(),
        };
        assert!(err.to_string().contains("DRAWCAST_EPOCHS"));
        assert!(err.to_string().contains("must be a number"));
    }

    // --- RecordError ---

    #[test]
    fn test_record_error_out_of_range_display() {
        let err = RecordError::ValueOutOfRange {
            issue_id: "20240101001".to_string(),
            value: "12".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("20240101001"));
        assert!(msg.contains("12"));
    }

    // --- FetchError ---

    #[test]
    fn test_fetch_error_status_display() {
        let err = FetchError::Status {
            source_name: "http".to_string(),
            status: 503,
            body: "maintenance".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("503"));
        assert!(msg.contains("maintenance"));
    }

    #[test]
    fn test_fetch_error_from_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err = FetchError::from(json_err);
        assert!(err.to_string().contains("Invalid draw payload"));
    }

    // --- ModelError / TrainingError / InferenceError ---

    #[test]
    fn test_training_error_names_tier() {
        let err = TrainingError::Fit {
            tier: "recurrent".to_string(),
            source: ModelError::Diverged {
                epoch: 3,
                loss: f64::NAN,
            },
        };
        let msg = err.to_string();
        assert!(msg.contains("recurrent"));
        assert!(msg.contains("epoch 3"));
    }

    #[test]
    fn test_inference_error_malformed_output_display() {
        let err = InferenceError::MalformedOutput {
            tier: "compact".to_string(),
            reason: "distribution has 9 classes".to_string(),
        };
        assert!(err.to_string().contains("9 classes"));
    }

    #[test]
    fn test_model_error_input_length_display() {
        let err = ModelError::InputLength {
            expected: 20,
            got: 7,
        };
        let msg = err.to_string();
        assert!(msg.contains("20"));
        assert!(msg.contains("7"));
    }

    // --- From conversions into top-level Error ---

    #[test]
    fn test_error_from_config_error() {
        let inner = ConfigError::InvalidValue {
            key: "K".to_string(),
            message: "bad".to_string(),
        };
        let err = Error::from(inner);
        assert!(err.to_string().contains("Configuration error"));
    }

    #[test]
    fn test_error_from_database_error() {
        let inner = DatabaseError::Serialization("trailing comma".to_string());
        let err = Error::from(inner);
        assert!(err.to_string().contains("Database error"));
    }

    #[test]
    fn test_error_from_cycle_error() {
        let err = Error::from(CycleError::Worker("panicked".to_string()));
        assert!(err.to_string().contains("Cycle error"));
        assert!(err.to_string().contains("panicked"));
    }

    #[test]
    fn test_top_level_variants_match_their_conversions() {
        let errors = [
            Error::from(ConfigError::MissingRequired {
                key: "K".to_string(),
                hint: "set it".to_string(),
            }),
            Error::from(DatabaseError::Io(std::io::Error::other("disk full"))),
            Error::from(FetchError::Status {
                source_name: "http".to_string(),
                status: 502,
                body: String::new(),
            }),
            Error::from(CycleError::Worker("panicked".to_string())),
        ];
        for err in &errors {
            // A new variant must be added here along with its conversion.
            let prefix = match err {
                Error::Config(_) => "Configuration error",
                Error::Database(_) => "Database error",
                Error::Fetch(_) => "Fetch error",
                Error::Cycle(_) => "Cycle error",
            };
            assert!(err.to_string().starts_with(prefix));
        }
    }

    // --- Debug trait ---

    #[test]
    fn test_error_debug_is_implemented() {
        let err = Error::Fetch(FetchError::Status {
            source_name: "http".to_string(),
            status: 400,
            body: String::new(),
        });
        let debug = format!("{:?}", err);
        assert!(!debug.is_empty());
    }
}
