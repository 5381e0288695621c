use thiserror::Error;

/// Every failure the engine can report.
///
/// The first five variants are the public taxonomy: they always carry the
/// expression text that was being evaluated. The remaining variants are raised
/// deep inside evaluation, where the path is not known yet; the façade attaches
/// the path with [`EvalError::at_path`] before the error leaves the crate.
#[derive(Debug, Error)]
pub enum EvalError {
    // Strict-mode read of an absent value or pointer
    #[error("no value for xpath: {path}")]
    NotFound { path: String },

    // A resolved value cannot be represented as the requested type
    #[error("cannot convert value of {path}: {message}")]
    TypeConversion { path: String, message: String },

    // No library in the context chain supplies the function
    #[error("undefined function: {name} (in {path})")]
    FunctionNotFound { path: String, name: String },

    // Syntax errors and non-simple paths passed to create operations
    #[error("invalid xpath {path}: {message}")]
    InvalidSyntax { path: String, message: String },

    // Any other failure, with the original cause
    #[error("exception evaluating xpath {path}: {source}")]
    Wrapped {
        path: String,
        #[source]
        source: Box<EvalError>,
    },

    #[error("evaluation error: {0}")]
    Evaluation(String),

    #[error("simultaneous operations: node set requested while iterating over an evaluation context")]
    ConcurrentIteration,

    #[error("unsupported operation: {0}")]
    Unsupported(String),

    #[error("undefined variable: {0}")]
    UndefinedVariable(String),

    #[error("undefined function: {0}")]
    UndefinedFunction(String),

    // Wrong argument count or shape for a built-in function
    #[error("{0}")]
    InvalidArguments(String),

    #[error("parse error at {position}: {message}")]
    Parse { position: usize, message: String },

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl EvalError {
    /// Attach the expression text to an engine-internal error.
    ///
    /// Errors that already carry a path pass through unchanged, parse errors
    /// become `InvalidSyntax`, everything else is `Wrapped`.
    pub fn at_path(self, path: &str) -> EvalError {
        match self {
            e @ (EvalError::NotFound { .. }
            | EvalError::TypeConversion { .. }
            | EvalError::FunctionNotFound { .. }
            | EvalError::InvalidSyntax { .. }
            | EvalError::Wrapped { .. }) => e,
            EvalError::Parse { position, message } => EvalError::InvalidSyntax {
                path: path.to_string(),
                message: format!("{message} at position {position}"),
            },
            EvalError::UndefinedFunction(name) => EvalError::FunctionNotFound {
                path: path.to_string(),
                name,
            },
            EvalError::InvalidArguments(message) => EvalError::InvalidSyntax {
                path: path.to_string(),
                message,
            },
            other => EvalError::Wrapped {
                path: path.to_string(),
                source: Box::new(other),
            },
        }
    }

    pub fn evaluation(message: impl Into<String>) -> EvalError {
        EvalError::Evaluation(message.into())
    }
}

// Type alias for results that use `EvalError` as the error type
pub type Result<T> = std::result::Result<T, EvalError>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn at_path_wraps_internal_errors() {
        let err = EvalError::evaluation("boom").at_path("/a/b");
        match err {
            EvalError::Wrapped { path, source } => {
                assert_eq!(path, "/a/b");
                assert_eq!(source.to_string(), "evaluation error: boom");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn at_path_keeps_public_errors() {
        let err = EvalError::NotFound { path: "x".into() }.at_path("y");
        assert_eq!(err.to_string(), "no value for xpath: x");
    }

    #[test]
    fn undefined_functions_name_the_function() {
        let err = EvalError::UndefinedFunction("ext:go".into()).at_path("ext:go(1)");
        assert_eq!(err.to_string(), "undefined function: ext:go (in ext:go(1))");
    }

    #[test]
    fn parse_errors_become_invalid_syntax() {
        let err = EvalError::Parse {
            position: 3,
            message: "expected ']'".into(),
        }
        .at_path("a[1");
        assert!(matches!(err, EvalError::InvalidSyntax { ref path, .. } if path == "a[1"));
    }
}
