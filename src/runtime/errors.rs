//! Error types for the runtime system

/// Configuration errors are fatal for the decoder instance that raised them,
/// and for nothing else.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Sample rate is required but was not supplied")]
    MissingSamplerate,

    #[error("Required channel '{0}' is not connected")]
    MissingChannel(&'static str),

    #[error("Channel index {0} is out of range (max 63)")]
    InvalidChannel(usize),

    #[error("Invalid value for option '{option}': {reason}")]
    InvalidOption {
        option: &'static str,
        reason: String,
    },
}

/// Error type for stack construction
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error(
        "Type mismatch: {from_stage} ({from_tag}, {from_type}) -> {to_stage} ({to_tag}, {to_type})"
    )]
    TypeMismatch {
        from_stage: String,
        from_tag: &'static str,
        from_type: &'static str,
        to_stage: String,
        to_tag: &'static str,
        to_type: &'static str,
    },

    #[error("Stage '{0}' already exists in this stack")]
    DuplicateStage(String),

    #[error("Stack expects {expected} input, got {got}")]
    WrongInput {
        expected: &'static str,
        got: &'static str,
    },
}

/// Error type for decoder run operations
#[derive(Debug, thiserror::Error)]
pub enum WorkError {
    #[error("End of sample stream")]
    EndOfStream,

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("[{stage}] annotation class {class} is not declared")]
    UndeclaredClass { stage: String, class: usize },

    #[error("[{stage}] annotation has no text")]
    EmptyAnnotation { stage: String },

    #[error("[{stage}] annotation texts must be ordered longest first: {texts:?}")]
    TextOrder { stage: String, texts: Vec<String> },

    #[error("[{stage}] received a packet that is not {expected}")]
    InputType {
        stage: String,
        expected: &'static str,
    },
}

/// Error type for static lookup tables
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TableError {
    #[error("Table '{table}' has duplicate key {key:#X}")]
    DuplicateKey { table: &'static str, key: u32 },
}

/// Result type for decoder work
pub type WorkResult<T = ()> = Result<T, WorkError>;
