use nalgebra::{
    Matrix3,
    Vector3,
};

use crate::{
    grid::{
        Axis,
        LocalGrid,
    },
    lattice::Lattice,
};

/// Number of cells the derivative stencil reaches out from the center.
///
/// Every active axis needs at least this many guard cells.
pub const STENCIL_RADIUS: usize = 2;

/// Spatial derivatives of a vector field at one cell.
///
/// Column `j` holds the partial derivative along axis `j`, i.e.
/// `matrix[(i, j)] = ∂_j f_i`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Jacobian {
    pub matrix: Matrix3<f64>,
}

impl Jacobian {
    pub fn curl(&self) -> Vector3<f64> {
        Vector3::new(
            self.matrix.m32 - self.matrix.m23,
            self.matrix.m13 - self.matrix.m31,
            self.matrix.m21 - self.matrix.m12,
        )
    }

    pub fn divergence(&self) -> f64 {
        self.matrix.trace()
    }
}

/// Calculates the jacobian of `lattice` at the cell with linear `index`.
///
/// The cell must be at least [`STENCIL_RADIUS`] cells away from the lattice
/// edge along every active axis. Inactive axes contribute a zero column.
pub fn jacobian(local_grid: &LocalGrid, lattice: &Lattice<Vector3<f64>>, index: usize) -> Jacobian {
    Jacobian {
        matrix: Matrix3::from_columns(&Axis::ALL.map(|axis| {
            if local_grid.is_active(axis) {
                partial_derivative(local_grid, lattice, index, axis)
            }
            else {
                Vector3::zeros()
            }
        })),
    }
}

/// Fourth-order central difference along `axis`:
///
/// ```plain
/// (f[-2] - 8 f[-1] + 8 f[+1] - f[+2]) / (12 dx)
/// ```
pub fn partial_derivative(
    local_grid: &LocalGrid,
    lattice: &Lattice<Vector3<f64>>,
    index: usize,
    axis: Axis,
) -> Vector3<f64> {
    let stride = local_grid.strider().stride(axis);
    debug_assert!(index >= STENCIL_RADIUS * stride);

    let f_m2 = lattice[index - 2 * stride];
    let f_m1 = lattice[index - stride];
    let f_p1 = lattice[index + stride];
    let f_p2 = lattice[index + 2 * stride];

    (f_m2 - 8.0 * f_m1 + 8.0 * f_p1 - f_p2) * (local_grid.inv_delta[axis.index()] / 12.0)
}
