//! Error type shared by the stack builder, the CLI, and the executor.

use thiserror::Error;

/// Everything that can go wrong before the orchestration engine takes over.
#[derive(Error, Debug)]
pub enum InfraError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("cannot read {path}: {message}")]
    Read { path: String, message: String },

    #[error("{0}")]
    Validation(String),

    #[error("resource '{0}' is already declared")]
    DuplicateResource(String),

    #[error("invalid logical id '{0}' (alphanumeric, 1-255 chars)")]
    InvalidLogicalId(String),

    #[error("resource '{resource}' references '{target}' before it is declared")]
    ForwardReference { resource: String, target: String },

    #[error("resource '{resource}' references unknown '{target}'")]
    UnknownReference { resource: String, target: String },

    #[error("dependency cycle detected involving: {0}")]
    Cycle(String),

    #[error("unclosed template at position {0}")]
    UnclosedTemplate(usize),

    #[error("unknown template variable: {0}")]
    UnknownTemplateVariable(String),

    #[error("engine command failed (exit {code}): {stderr}")]
    Command { code: i32, stderr: String },

    #[error("failed to run engine command: {0}")]
    Spawn(String),

    #[error("state error: {0}")]
    State(String),

    #[error("{0} contract check(s) failed")]
    Checks(usize),
}

pub type Result<T> = std::result::Result<T, InfraError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_reference_message() {
        let e = InfraError::ForwardReference {
            resource: "Cluster".to_string(),
            target: "Secret".to_string(),
        };
        assert_eq!(
            e.to_string(),
            "resource 'Cluster' references 'Secret' before it is declared"
        );
    }

    #[test]
    fn test_io_from() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let e: InfraError = io.into();
        assert!(e.to_string().contains("gone"));
    }
}
