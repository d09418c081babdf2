use std::fmt;

/// Coarse classification of a [`GraphError`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// The declared passes cannot be ordered.
    GraphConstruction,
    /// The backend refused a heap, texture or view.
    BackendAllocation,
    /// The caller used the builder incorrectly.
    Misuse,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::GraphConstruction => "graph construction",
            ErrorKind::BackendAllocation => "backend allocation",
            ErrorKind::Misuse => "misuse",
        };

        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("pass '{pass}' depends on itself through the graph")]
    Cycle { pass: String },

    #[error("texture '{resource}' used at version {version} but its latest version is {latest}")]
    StaleHandle {
        resource: String,
        version: u32,
        latest: u32,
    },

    #[error("{what} handle belongs to another graph builder")]
    ForeignHandle { what: &'static str },

    #[error("{what} handle does not name anything in this graph builder")]
    UnknownHandle { what: &'static str },

    #[error("texture '{resource}' requested {sample_count} samples; multisampling is unsupported")]
    Multisample { resource: String, sample_count: u32 },

    #[error("texture '{resource}' has an empty extent ({width}x{height})")]
    EmptyExtent {
        resource: String,
        width: u32,
        height: u32,
    },

    #[error("pass '{pass}' writes more than one depth target")]
    MultipleDepthTargets { pass: String },

    #[error("imported texture provides {actual} textures for {expected} frame slots")]
    ImportSlotMismatch { expected: usize, actual: usize },

    #[error("invalid graph configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("backend failed to {operation} for '{resource}' ({bytes} bytes)")]
    Backend {
        operation: &'static str,
        resource: String,
        bytes: u64,
        #[source]
        source: anyhow::Error,
    },
}

impl GraphError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GraphError::Cycle { .. } => ErrorKind::GraphConstruction,
            GraphError::Backend { .. } => ErrorKind::BackendAllocation,
            GraphError::StaleHandle { .. }
            | GraphError::ForeignHandle { .. }
            | GraphError::UnknownHandle { .. }
            | GraphError::Multisample { .. }
            | GraphError::EmptyExtent { .. }
            | GraphError::MultipleDepthTargets { .. }
            | GraphError::ImportSlotMismatch { .. }
            | GraphError::InvalidConfig { .. } => ErrorKind::Misuse,
        }
    }
}

pub type GraphResult<T> = Result<T, GraphError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_errors_keep_context_and_source() {
        let err = GraphError::Backend {
            operation: "allocate heap",
            resource: "frame heap".to_owned(),
            bytes: 4096,
            source: anyhow::anyhow!("out of device memory"),
        };

        assert_eq!(err.kind(), ErrorKind::BackendAllocation);
        assert_eq!(
            err.to_string(),
            "backend failed to allocate heap for 'frame heap' (4096 bytes)"
        );
        let source = std::error::Error::source(&err).map(|e| e.to_string());
        assert_eq!(source.as_deref(), Some("out of device memory"));
    }

    #[test]
    fn handle_misuse_is_classified_as_misuse() {
        let stale = GraphError::StaleHandle {
            resource: "gbuffer".to_owned(),
            version: 0,
            latest: 1,
        };
        let cycle = GraphError::Cycle {
            pass: "lighting".to_owned(),
        };

        assert_eq!(stale.kind(), ErrorKind::Misuse);
        assert_eq!(cycle.kind(), ErrorKind::GraphConstruction);
        assert_eq!(ErrorKind::Misuse.to_string(), "misuse");
    }
}
