use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Numeric error codes shared by every Skywalker surface.
///
/// Codes are part of the public contract: callers in other languages branch
/// on them, so existing values are never renumbered and new ones are only
/// appended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(i32)]
pub enum ErrorCode {
    Success = 0,
    InvalidEnsembleType = 1,
    InvalidAxis = 2,
    InconsistentMembers = 3,
    ParamNotFound = 4,
    InvalidValue = 5,
    AlreadyExhausted = 6,
    IoError = 7,
    FileNotFound = 8,
    InvalidYaml = 9,
    SettingsNotFound = 10,
    InvalidSettingsBlock = 11,
    InvalidParamName = 12,
    EmptyEnsemble = 13,
    EnsembleTooLarge = 14,
}

impl ErrorCode {
    /// Every code, in numeric order.
    pub const ALL: [ErrorCode; 15] = [
        Self::Success,
        Self::InvalidEnsembleType,
        Self::InvalidAxis,
        Self::InconsistentMembers,
        Self::ParamNotFound,
        Self::InvalidValue,
        Self::AlreadyExhausted,
        Self::IoError,
        Self::FileNotFound,
        Self::InvalidYaml,
        Self::SettingsNotFound,
        Self::InvalidSettingsBlock,
        Self::InvalidParamName,
        Self::EmptyEnsemble,
        Self::EnsembleTooLarge,
    ];

    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn from_i32(code: i32) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| c.as_i32() == code)
    }

    pub fn is_success(self) -> bool {
        self == Self::Success
    }

    /// The `SW_`-less constant name used in bindings and logs.
    pub fn name(self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::InvalidEnsembleType => "INVALID_ENSEMBLE_TYPE",
            Self::InvalidAxis => "INVALID_AXIS",
            Self::InconsistentMembers => "INCONSISTENT_MEMBERS",
            Self::ParamNotFound => "PARAM_NOT_FOUND",
            Self::InvalidValue => "INVALID_VALUE",
            Self::AlreadyExhausted => "ALREADY_EXHAUSTED",
            Self::IoError => "IO_ERROR",
            Self::FileNotFound => "FILE_NOT_FOUND",
            Self::InvalidYaml => "INVALID_YAML",
            Self::SettingsNotFound => "SETTINGS_NOT_FOUND",
            Self::InvalidSettingsBlock => "INVALID_SETTINGS_BLOCK",
            Self::InvalidParamName => "INVALID_PARAM_NAME",
            Self::EmptyEnsemble => "EMPTY_ENSEMBLE",
            Self::EnsembleTooLarge => "ENSEMBLE_TOO_LARGE",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name(), self.as_i32())
    }
}

/// What kind of named quantity a failed lookup was looking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LookupKind {
    Setting,
    InputParameter,
    InputArrayParameter,
    Metric,
}

impl std::fmt::Display for LookupKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Setting => "setting",
            Self::InputParameter => "input parameter",
            Self::InputArrayParameter => "input array parameter",
            Self::Metric => "metric",
        };
        f.write_str(label)
    }
}

/// Main error type for Skywalker
#[derive(Error, Debug)]
pub enum SwError {
    #[error("Invalid ensemble type: {message}")]
    InvalidEnsembleType { message: String },

    #[error("Invalid axis '{axis}': {reason}")]
    InvalidAxis { axis: String, reason: String },

    #[error("Inconsistent ensemble members: {message}")]
    InconsistentMembers { message: String },

    #[error("The {kind} '{name}' was not found.")]
    ParamNotFound { kind: LookupKind, name: String },

    #[error("Invalid value: {message}")]
    InvalidValue { message: String },

    #[error("The ensemble has already been traversed ({size} members); reset it before iterating again.")]
    AlreadyExhausted { size: usize },

    #[error("Could not {action} '{path}': {source}")]
    Io {
        action: &'static str,
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("The file '{path}' could not be opened.")]
    FileNotFound { path: String },

    #[error("Invalid YAML: {message}")]
    InvalidYaml { message: String },

    #[error("The settings block '{block}' was not found.")]
    SettingsNotFound { block: String },

    #[error("Invalid settings block: {message}")]
    InvalidSettingsBlock { message: String },

    #[error("Invalid parameter name '{name}': {reason}")]
    InvalidParamName { name: String, reason: String },

    #[error("Empty ensemble: {message}")]
    EmptyEnsemble { message: String },

    #[error("The ensemble ({description}) is too large to fit into memory.")]
    EnsembleTooLarge { description: String },
}

impl SwError {
    /// The stable numeric code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidEnsembleType { .. } => ErrorCode::InvalidEnsembleType,
            Self::InvalidAxis { .. } => ErrorCode::InvalidAxis,
            Self::InconsistentMembers { .. } => ErrorCode::InconsistentMembers,
            Self::ParamNotFound { .. } => ErrorCode::ParamNotFound,
            Self::InvalidValue { .. } => ErrorCode::InvalidValue,
            Self::AlreadyExhausted { .. } => ErrorCode::AlreadyExhausted,
            Self::Io { .. } => ErrorCode::IoError,
            Self::FileNotFound { .. } => ErrorCode::FileNotFound,
            Self::InvalidYaml { .. } => ErrorCode::InvalidYaml,
            Self::SettingsNotFound { .. } => ErrorCode::SettingsNotFound,
            Self::InvalidSettingsBlock { .. } => ErrorCode::InvalidSettingsBlock,
            Self::InvalidParamName { .. } => ErrorCode::InvalidParamName,
            Self::EmptyEnsemble { .. } => ErrorCode::EmptyEnsemble,
            Self::EnsembleTooLarge { .. } => ErrorCode::EnsembleTooLarge,
        }
    }

    pub fn not_found(kind: LookupKind, name: impl Into<String>) -> Self {
        Self::ParamNotFound {
            kind,
            name: name.into(),
        }
    }

    pub fn io(action: &'static str, path: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            action,
            path: path.into(),
            source,
        }
    }
}

/// Result type alias for Skywalker operations
pub type SwResult<T> = Result<T, SwError>;

/// The four-field outcome handed across language boundaries.
///
/// `payload` is present only when `success` is true and `error_message` only
/// when it is false. Rust callers should prefer [`SwResult`]; this shape exists
/// so bindings never need to understand Rust enums.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome<T> {
    pub success: bool,
    pub payload: Option<T>,
    pub error_code: ErrorCode,
    pub error_message: Option<String>,
}

impl<T> Outcome<T> {
    pub fn ok(payload: T) -> Self {
        Self {
            success: true,
            payload: Some(payload),
            error_code: ErrorCode::Success,
            error_message: None,
        }
    }

    pub fn failed(error: &SwError) -> Self {
        Self {
            success: false,
            payload: None,
            error_code: error.code(),
            error_message: Some(error.to_string()),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        Outcome {
            success: self.success,
            payload: self.payload.map(f),
            error_code: self.error_code,
            error_message: self.error_message,
        }
    }
}

impl<T> From<SwResult<T>> for Outcome<T> {
    fn from(result: SwResult<T>) -> Self {
        match result {
            Ok(payload) => Self::ok(payload),
            Err(error) => Self::failed(&error),
        }
    }
}

/// Macro for creating invalid-value errors
#[macro_export]
macro_rules! invalid_value {
    ($($arg:tt)*) => {
        $crate::SwError::InvalidValue { message: format!($($arg)*) }
    };
}

/// Macro for creating axis errors that name the offending axis
#[macro_export]
macro_rules! invalid_axis {
    ($axis:expr, $($arg:tt)*) => {
        $crate::SwError::InvalidAxis {
            axis: ($axis).to_string(),
            reason: format!($($arg)*),
        }
    };
}

/// Macro for creating inconsistent-member errors
#[macro_export]
macro_rules! inconsistent_members {
    ($($arg:tt)*) => {
        $crate::SwError::InconsistentMembers { message: format!($($arg)*) }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(ErrorCode::Success.as_i32(), 0);
        assert_eq!(ErrorCode::InvalidEnsembleType.as_i32(), 1);
        assert_eq!(ErrorCode::InvalidAxis.as_i32(), 2);
        assert_eq!(ErrorCode::InconsistentMembers.as_i32(), 3);
        assert_eq!(ErrorCode::ParamNotFound.as_i32(), 4);
        assert_eq!(ErrorCode::InvalidValue.as_i32(), 5);
        assert_eq!(ErrorCode::AlreadyExhausted.as_i32(), 6);
        assert_eq!(ErrorCode::IoError.as_i32(), 7);
        assert_eq!(ErrorCode::EnsembleTooLarge.as_i32(), 14);
        for (i, code) in ErrorCode::ALL.iter().enumerate() {
            assert_eq!(code.as_i32(), i as i32);
            assert_eq!(ErrorCode::from_i32(i as i32), Some(*code));
        }
        assert_eq!(ErrorCode::from_i32(15), None);
    }

    #[test]
    fn test_error_display() {
        let error = SwError::not_found(LookupKind::InputParameter, "tick");
        assert_eq!(error.to_string(), "The input parameter 'tick' was not found.");
        assert_eq!(error.code(), ErrorCode::ParamNotFound);

        let error = invalid_axis!("tock", "count must be at least 1 (got {})", 0);
        assert!(error.to_string().contains("tock"));
        assert!(error.to_string().contains("count"));
        assert_eq!(error.code(), ErrorCode::InvalidAxis);
    }

    #[test]
    fn test_io_error_code() {
        let source = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let error = SwError::io("write ensemble data to", "/nope/out.py", source);
        assert_eq!(error.code(), ErrorCode::IoError);
        assert!(error.to_string().contains("/nope/out.py"));
    }

    #[test]
    fn test_outcome_from_result() {
        let ok: Outcome<f64> = Outcome::from(Ok(2.5));
        assert!(ok.success);
        assert_eq!(ok.payload, Some(2.5));
        assert_eq!(ok.error_code, ErrorCode::Success);
        assert!(ok.error_message.is_none());

        let failed: Outcome<f64> = Outcome::from(Err(invalid_value!("not a number: {}", "abc")));
        assert!(!failed.success);
        assert!(failed.payload.is_none());
        assert_eq!(failed.error_code, ErrorCode::InvalidValue);
        assert!(failed.error_message.unwrap().contains("abc"));
    }

    #[test]
    fn test_macros() {
        let _value_err = invalid_value!("Invalid value: {}", 42);
        let err = inconsistent_members!("member {} differs", 3);
        assert_eq!(err.code(), ErrorCode::InconsistentMembers);
    }
}
