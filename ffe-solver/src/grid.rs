use std::ops::Range;

use nalgebra::{
    Point3,
    Scalar,
    UnitVector3,
    Vector3,
};
use num::{
    One,
    Zero,
};

use crate::{
    derivative::STENCIL_RADIUS,
    error::ConfigurationError,
    lattice::Strider,
    topology::Topology,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, strum::Display)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "lowercase")
)]
pub enum Axis {
    #[strum(to_string = "x")]
    X,
    #[strum(to_string = "y")]
    Y,
    #[strum(to_string = "z")]
    Z,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    pub fn index(&self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }

    pub fn basis<T>(&self) -> UnitVector3<T>
    where
        T: Scalar + Zero + One,
    {
        let mut e = Vector3::<T>::zeros();
        e[self.index()] = T::one();
        // note: one component is 1, all others are 0, therefore this vector is
        // normalized
        UnitVector3::new_unchecked(e)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, strum::Display)]
pub enum Side {
    #[strum(to_string = "low")]
    Low,
    #[strum(to_string = "high")]
    High,
}

impl Side {
    pub const ALL: [Side; 2] = [Side::Low, Side::High];

    pub fn displacement(&self) -> isize {
        match self {
            Side::Low => -1,
            Side::High => 1,
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            Side::Low => Side::High,
            Side::High => Side::Low,
        }
    }
}

/// One of the six faces of a (sub-)domain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Face {
    pub axis: Axis,
    pub side: Side,
}

impl Face {
    pub const fn new(axis: Axis, side: Side) -> Self {
        Self { axis, side }
    }

    /// All faces ordered as x-low, x-high, y-low, y-high, z-low, z-high.
    pub fn all() -> impl Iterator<Item = Face> {
        Axis::ALL
            .into_iter()
            .flat_map(|axis| Side::ALL.into_iter().map(move |side| Face::new(axis, side)))
    }

    pub fn index(&self) -> usize {
        2 * self.axis.index()
            + match self.side {
                Side::Low => 0,
                Side::High => 1,
            }
    }

    pub fn opposite(&self) -> Self {
        Self::new(self.axis, self.side.opposite())
    }
}

impl std::fmt::Display for Face {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.axis, self.side)
    }
}

/// Grid parameters as they appear in the configuration.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GridParameters {
    /// Number of interior cells per axis
    #[cfg_attr(feature = "serde", serde(rename = "N"))]
    pub resolution: [usize; 3],

    /// Guard (halo) width per axis
    pub guard: [usize; 3],

    /// Physical extent per axis
    pub size: [f64; 3],

    /// Physical coordinate of the lower corner
    pub lower: [f64; 3],

    #[cfg_attr(feature = "serde", serde(default))]
    pub periodic_boundary: [bool; 3],

    /// Fixed process counts per axis. 0 lets the decomposition choose.
    #[cfg_attr(feature = "serde", serde(default))]
    pub decomposition: [usize; 3],
}

impl Default for GridParameters {
    fn default() -> Self {
        Self {
            resolution: [64, 64, 64],
            guard: [STENCIL_RADIUS; 3],
            size: [1.0; 3],
            lower: [0.0; 3],
            periodic_boundary: [false; 3],
            decomposition: [0; 3],
        }
    }
}

/// The global simulation grid.
#[derive(Clone, Debug, PartialEq)]
pub struct Grid {
    pub resolution: Vector3<usize>,
    pub guard: Vector3<usize>,
    pub size: Vector3<f64>,
    pub lower: Vector3<f64>,
    pub delta: Vector3<f64>,
    pub inv_delta: Vector3<f64>,
    pub periodic: [bool; 3],
    pub decomposition: [usize; 3],
}

impl Grid {
    pub fn new(parameters: &GridParameters) -> Result<Self, ConfigurationError> {
        for axis in Axis::ALL {
            let i = axis.index();

            if parameters.resolution[i] == 0 {
                return Err(ConfigurationError::ZeroResolution { axis });
            }

            let size = parameters.size[i];
            if !(size.is_finite() && size > 0.0) {
                return Err(ConfigurationError::InvalidSize { axis, size });
            }

            let lower = parameters.lower[i];
            if !lower.is_finite() {
                return Err(ConfigurationError::InvalidLower { axis, lower });
            }

            if parameters.resolution[i] > 1 && parameters.guard[i] < STENCIL_RADIUS {
                return Err(ConfigurationError::GuardTooNarrow {
                    axis,
                    guard: parameters.guard[i],
                    required: STENCIL_RADIUS,
                });
            }
        }

        let resolution = Vector3::from(parameters.resolution);
        let size = Vector3::from(parameters.size);
        let delta = size.component_div(&resolution.cast::<f64>());

        Ok(Self {
            resolution,
            guard: Vector3::from(parameters.guard),
            size,
            lower: Vector3::from(parameters.lower),
            delta,
            inv_delta: delta.map(|dx| 1.0 / dx),
            periodic: parameters.periodic_boundary,
            decomposition: parameters.decomposition,
        })
    }

    /// Total number of cells per axis, guards included.
    pub fn dims(&self) -> Vector3<usize> {
        self.resolution + 2 * self.guard
    }

    /// An axis is active if it has more than one cell. Inactive axes are
    /// never split and have no derivatives.
    pub fn is_active(&self, axis: Axis) -> bool {
        self.resolution[axis.index()] > 1
    }

    pub fn dimensionality(&self) -> usize {
        Axis::ALL.iter().filter(|axis| self.is_active(**axis)).count()
    }

    pub fn num_cells(&self) -> usize {
        self.resolution.product()
    }
}

/// The part of the global grid owned by one rank.
#[derive(Clone, Debug, PartialEq)]
pub struct LocalGrid {
    /// Interior cells per axis
    pub resolution: Vector3<usize>,
    pub guard: Vector3<usize>,
    pub size: Vector3<f64>,
    pub lower: Vector3<f64>,
    pub delta: Vector3<f64>,
    pub inv_delta: Vector3<f64>,

    /// Global index of the first interior cell
    pub offset: Vector3<usize>,

    active: [bool; 3],
    strider: Strider,
}

impl LocalGrid {
    pub fn new(grid: &Grid, topology: &Topology) -> Result<Self, ConfigurationError> {
        let dims = topology.dims();
        let coords = topology.coords();

        let mut resolution = Vector3::zeros();
        let mut size = grid.size;
        let mut lower = grid.lower;
        let mut offset = Vector3::zeros();

        for axis in Axis::ALL {
            let i = axis.index();
            let processes = dims[i];

            if grid.resolution[i] % processes != 0 {
                return Err(ConfigurationError::IndivisibleResolution {
                    axis,
                    resolution: grid.resolution[i],
                    processes,
                });
            }

            resolution[i] = grid.resolution[i] / processes;

            if grid.is_active(axis) && resolution[i] < grid.guard[i] {
                return Err(ConfigurationError::SubdomainTooThin {
                    axis,
                    local: resolution[i],
                    guard: grid.guard[i],
                });
            }

            size[i] /= processes as f64;
            lower[i] += coords[i] as f64 * size[i];
            offset[i] = resolution[i] * coords[i];
        }

        let active = [
            grid.is_active(Axis::X),
            grid.is_active(Axis::Y),
            grid.is_active(Axis::Z),
        ];

        Ok(Self {
            resolution,
            guard: grid.guard,
            size,
            lower,
            delta: grid.delta,
            inv_delta: grid.inv_delta,
            offset,
            active,
            strider: Strider::new(&(resolution + 2 * grid.guard)),
        })
    }

    /// Total number of cells per axis, guards included.
    pub fn dims(&self) -> Vector3<usize> {
        *self.strider.size()
    }

    pub fn strider(&self) -> &Strider {
        &self.strider
    }

    pub fn is_active(&self, axis: Axis) -> bool {
        self.active[axis.index()]
    }

    pub fn active_axes(&self) -> [bool; 3] {
        self.active
    }

    /// Number of cells including guards
    pub fn num_cells(&self) -> usize {
        self.strider.len()
    }

    pub fn interior(&self) -> Range<Point3<usize>> {
        Range {
            start: Point3::from(self.guard),
            end: Point3::from(self.guard + self.resolution),
        }
    }

    pub fn is_interior(&self, point: &Point3<usize>) -> bool {
        let interior = self.interior();
        (0..3).all(|i| point[i] >= interior.start[i] && point[i] < interior.end[i])
    }

    /// Physical position of the center of a cell.
    ///
    /// Guard cells get positions outside of the local domain.
    pub fn position(&self, point: &Point3<usize>) -> Point3<f64> {
        Point3::from(Vector3::from_fn(|i, _| {
            self.lower[i] + (point[i] as f64 - self.guard[i] as f64 + 0.5) * self.delta[i]
        }))
    }

    /// Global index of a local interior cell.
    pub fn global_index(&self, point: &Point3<usize>) -> Option<Point3<usize>> {
        self.is_interior(point)
            .then(|| Point3::from(point.coords - self.guard + self.offset))
    }

    /// Smallest cell spacing over all active axes.
    ///
    /// Falls back to the smallest spacing overall if no axis is active.
    pub fn min_active_delta(&self) -> f64 {
        Axis::ALL
            .into_iter()
            .filter(|axis| self.is_active(*axis))
            .map(|axis| self.delta[axis.index()])
            .reduce(f64::min)
            .unwrap_or_else(|| self.delta.min())
    }
}
