use thiserror::Error;

/// Enum with all errors in this crate.
#[derive(Error, Debug)]
pub enum PKdTreeError {
    #[error("General error: {0}")]
    General(String),

    /// The global bounding box of all points has zero extent on every axis.
    #[error("Degenerate volume: all points coincide.")]
    DegenerateVolume,

    /// A local allocation failed before it could be shared with peers.
    #[error("Memory allocation failed in {location}.")]
    Allocation { location: &'static str },

    /// One or more processes voted that an operation failed.
    #[error("{reason} on {} node ({location}).", which_node(.local))]
    CollectiveFailure {
        location: &'static str,
        reason: &'static str,
        local: bool,
    },

    #[error("Invalid process id {process}, expected a value below {processes}.")]
    InvalidProcessId { process: usize, processes: usize },

    #[error("Cannot assign {regions} regions to no processes.")]
    NoProcesses { regions: usize },

    #[error("Region assignment map has {got} entries, tree has {expected} regions.")]
    AssignmentLength { expected: usize, got: usize },

    #[error("Communication error: {0}")]
    Communication(String),

    /// Collective operations need a symmetric transport where every rank can reach every other.
    #[error("Parallel k-d tree communication will fail with a client/server transport.")]
    UnsupportedTransport,

    #[error("No k-d tree has been built.")]
    NoTree,

    #[error("Corrupt region data: cell {cell} is not inside any region.")]
    CorruptRegionData { cell: usize },
}

pub type Result<T> = std::result::Result<T, PKdTreeError>;

fn which_node(local: &bool) -> &'static str {
    if *local {
        "my"
    } else {
        "a remote"
    }
}
