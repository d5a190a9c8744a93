use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("the following registers are not declared: {}", .0.join(", "))]
    UndeclaredRegisters(Vec<String>),

    #[error("error parsing program on line {line}: {msg}")]
    Parse { line: usize, msg: String },

    #[error("error reading scenario on line {line}: {msg}")]
    Scenario { line: usize, msg: String },

    #[error("invalid register list: {0}")]
    Registers(String),

    #[error("invalid operands for '{instruction}': {msg}")]
    InvalidOperands { instruction: String, msg: String },

    /// The scheduler reached a state its transitions do not model.
    #[error("internal consistency failure: {0}")]
    Internal(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("opcode '{opcode}' is registered under both '{first}' and '{second}'")]
    DuplicateOpcode {
        opcode: String,
        first: String,
        second: String,
    },
    #[error("opcode '{0}' is not registered under any reservation station category")]
    UnroutedOpcode(String),
    #[error("opcode '{0}' has no execution duration")]
    MissingDuration(String),
    #[error("execution duration of '{0}' must be at least 1")]
    ZeroDuration(String),
    #[error("a 'Load' reservation station category is required")]
    MissingLoadCategory,
    #[error("reservation station category '{0}' must have at least one station")]
    EmptyCategory(String),
    #[error("reservation station category '{0}' is declared more than once")]
    DuplicateCategory(String),
    #[error("reservation station category '{0}' is not declared")]
    UnknownCategory(String),
    #[error("functional unit '{0}' is not declared")]
    UnknownFunctionalUnit(String),
    #[error("functional unit '{0}' is declared more than once")]
    DuplicateFunctionalUnit(String),
    #[error("functional unit '{0}' must have a non-zero count")]
    ZeroCapacity(String),
    #[error("{0} must be at least 1")]
    ZeroKnob(&'static str),
    #[error("no program has been loaded")]
    NotLoaded,
}
