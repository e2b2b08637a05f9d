use nalgebra::{
    Point3,
    Vector3,
};

use crate::{
    grid::LocalGrid,
    lattice::{
        Lattice,
        Strider,
    },
};

/// Electric-like (D) and magnetic-like (B) field vectors at one cell.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FieldValues {
    pub d: Vector3<f64>,
    pub b: Vector3<f64>,
}

impl FieldValues {
    pub fn new(d: Vector3<f64>, b: Vector3<f64>) -> Self {
        Self { d, b }
    }

    pub fn is_finite(&self) -> bool {
        self.d.iter().chain(self.b.iter()).all(|x| x.is_finite())
    }
}

/// The evolved field state of one rank: D and B over the local grid, guard
/// cells included.
#[derive(Clone, Debug, PartialEq)]
pub struct SimData {
    pub d: Lattice<Vector3<f64>>,
    pub b: Lattice<Vector3<f64>>,
    strider: Strider,
}

impl SimData {
    /// All fields zero
    pub fn new(local_grid: &LocalGrid) -> Self {
        let strider = *local_grid.strider();
        Self {
            d: Lattice::from_default(&strider),
            b: Lattice::from_default(&strider),
            strider,
        }
    }

    /// Initializes every cell from the physical position of its center.
    ///
    /// Guard cells are initialized too, although the solver overwrites them
    /// before they are read.
    pub fn from_fn(
        local_grid: &LocalGrid,
        mut init: impl FnMut(&Point3<f64>) -> FieldValues,
    ) -> Self {
        let mut data = Self::new(local_grid);
        for index in 0..data.strider.len() {
            let point = data.strider.point_unchecked(index);
            let values = init(&local_grid.position(&point));
            data.d[index] = values.d;
            data.b[index] = values.b;
        }
        data
    }

    pub fn strider(&self) -> &Strider {
        &self.strider
    }

    /// Number of cells per axis, guards included
    pub fn dims(&self) -> Vector3<usize> {
        *self.strider.size()
    }

    pub fn at(&self, point: &Point3<usize>) -> Option<FieldValues> {
        let index = self.strider.index(point)?;
        Some(FieldValues::new(self.d[index], self.b[index]))
    }

    /// Returns `false` if `point` is outside of the lattice.
    pub fn set(&mut self, point: &Point3<usize>, values: FieldValues) -> bool {
        let Some(index) = self.strider.index(point) else {
            return false;
        };
        self.d[index] = values.d;
        self.b[index] = values.b;
        true
    }

    /// Electromagnetic energy `½ Σ (|D|² + |B|²) ΔV` over the interior, with
    /// flat norms.
    pub fn energy(&self, local_grid: &LocalGrid) -> f64 {
        let volume = local_grid.delta.product();
        0.5 * volume
            * self
                .strider
                .iter(local_grid.interior())
                .map(|(index, _)| self.d[index].norm_squared() + self.b[index].norm_squared())
                .sum::<f64>()
    }

    /// Largest `|D|² / |B|²` over the interior, with flat norms. Cells without
    /// magnetic field are skipped.
    pub fn max_degeneracy(&self, local_grid: &LocalGrid) -> f64 {
        self.strider
            .iter(local_grid.interior())
            .filter_map(|(index, _)| {
                let b2 = self.b[index].norm_squared();
                (b2 > 0.0).then(|| self.d[index].norm_squared() / b2)
            })
            .fold(0.0, f64::max)
    }
}
