use nalgebra::Point3;

use crate::grid::Axis;

/// Invalid or inconsistent grid, topology or solver parameters.
///
/// These are always detected before any field buffers are allocated.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum ConfigurationError {
    #[error("World size must be at least 1")]
    EmptyWorld,

    #[error("Rank {rank} is outside of a world with {world_size} processes")]
    InvalidRank { rank: usize, world_size: usize },

    #[error("Resolution along {axis} must be at least 1")]
    ZeroResolution { axis: Axis },

    #[error("Physical size along {axis} must be positive and finite, but is {size}")]
    InvalidSize { axis: Axis, size: f64 },

    #[error("Lower corner along {axis} must be finite, but is {lower}")]
    InvalidLower { axis: Axis, lower: f64 },

    #[error(
        "Guard width along {axis} is {guard}, but the derivative stencil needs at least {required}"
    )]
    GuardTooNarrow {
        axis: Axis,
        guard: usize,
        required: usize,
    },

    #[error("Axis {axis} has a single cell and can't be split into {processes} processes")]
    ReducedAxisSplit { axis: Axis, processes: usize },

    #[error("Can't factorize {world_size} processes with fixed process counts {fixed:?}")]
    Factorization {
        world_size: usize,
        fixed: [usize; 3],
    },

    #[error("Resolution {resolution} along {axis} is not divisible by {processes} processes")]
    IndivisibleResolution {
        axis: Axis,
        resolution: usize,
        processes: usize,
    },

    #[error("Local resolution {local} along {axis} is smaller than the guard width {guard}")]
    SubdomainTooThin {
        axis: Axis,
        local: usize,
        guard: usize,
    },

    #[error("Time step must be positive and finite, but is {dt}")]
    InvalidTimeStep { dt: f64 },

    #[error("Invalid solver parameter `{name}`: {reason}")]
    InvalidParameter {
        name: &'static str,
        reason: String,
    },
}

/// No usable accelerator device for this process.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("No usable device found")]
    NoDevice,

    #[error("Failed to bind device {index}")]
    Bind {
        index: usize,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },
}

/// A message exchange with another rank could not complete.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum CommunicationError {
    #[error("Rank {peer} is unreachable")]
    PeerUnreachable { peer: usize },

    #[error("Rank {peer} is outside of a world with {world_size} processes")]
    InvalidPeer { peer: usize, world_size: usize },

    #[error("Timed out waiting for a message from rank {peer} (tag {tag})")]
    Timeout { peer: usize, tag: u32 },

    #[error("Message from rank {peer} has {received} values, expected {expected}")]
    SizeMismatch {
        peer: usize,
        expected: usize,
        received: usize,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
pub enum DivergenceKind {
    #[strum(to_string = "non-finite field value")]
    NonFinite,

    #[strum(to_string = "electric field exceeds magnetic field")]
    Degeneracy,
}

/// The field state left the physically valid region and can't be recovered.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
#[error("Simulation diverged on rank {rank} at step {step}: {kind} at cell {cell:?}")]
pub struct NumericalDivergence {
    pub rank: usize,
    pub step: usize,
    pub cell: Point3<usize>,
    pub kind: DivergenceKind,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error")]
    Configuration(#[from] ConfigurationError),

    #[error("Resource unavailable")]
    Device(#[from] DeviceError),

    #[error("Communication failure")]
    Communication(#[from] CommunicationError),

    #[error(transparent)]
    Divergence(#[from] NumericalDivergence),

    #[error("Field state has dimensions {actual:?}, but the local grid has {expected:?}")]
    StateShape {
        expected: [usize; 3],
        actual: [usize; 3],
    },

    #[error("Solver halted after a previous fatal error")]
    Halted,
}
