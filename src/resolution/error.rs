use crate::governance::CheckerError;

/// Failure of a resolution run or of compiling its logic
#[derive(Debug, Clone, PartialEq)]
pub enum ResolveError {
    /// The logic description is not a valid callable
    Compilation { message: String, line: usize, column: usize },
    /// The logic threw. `name` is the error kind for Error objects
    /// (`Error`, `TypeError`, ...), `None` for a thrown plain value.
    Logic { name: Option<String>, message: String },
    /// A checker rejected its inputs while the logic awaited it
    Checker(CheckerError),
    /// `run_to_pick` got something other than a string back
    NonStringOutcome(String),
}

impl ResolveError {
    pub fn compilation(message: impl Into<String>, line: usize, column: usize) -> Self {
        ResolveError::Compilation { message: message.into(), line, column }
    }

    /// Message carried by the failure, verbatim for logic failures
    pub fn message(&self) -> String {
        match self {
            ResolveError::Logic { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

impl std::fmt::Display for ResolveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolveError::Compilation { message, line, column } => {
                write!(f, "Compilation failed at {}:{}: {}", line, column, message)
            }
            ResolveError::Logic { message, .. } => write!(f, "{}", message),
            ResolveError::Checker(e) => write!(f, "{}", e),
            ResolveError::NonStringOutcome(found) => {
                write!(f, "Resolution logic returned {} instead of a pick label", found)
            }
        }
    }
}

impl std::error::Error for ResolveError {}

impl From<CheckerError> for ResolveError {
    fn from(e: CheckerError) -> Self {
        ResolveError::Checker(e)
    }
}
