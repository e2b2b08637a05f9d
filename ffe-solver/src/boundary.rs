use nalgebra::Vector3;

use crate::{
    field::FieldValues,
    grid::Face,
};

/// Fills guard cells on physical (non-periodic, non-neighbor) faces.
///
/// For a guard cell at `depth` cells outside of `face` (starting at 1),
/// `nearest` is the interior cell adjacent to the face and `mirror` is the
/// interior cell at the same distance on the other side of the face.
pub trait BoundaryCondition: Send + Sync + std::fmt::Debug {
    fn guard_cell(
        &self,
        face: Face,
        depth: usize,
        nearest: &FieldValues,
        mirror: &FieldValues,
    ) -> FieldValues;
}

/// Outflow: guard cells copy the nearest interior cell.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ZeroGradient;

impl BoundaryCondition for ZeroGradient {
    fn guard_cell(
        &self,
        _face: Face,
        _depth: usize,
        nearest: &FieldValues,
        _mirror: &FieldValues,
    ) -> FieldValues {
        *nearest
    }
}

/// Dirichlet: guard cells hold fixed values.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Fixed {
    #[cfg_attr(feature = "serde", serde(default))]
    pub d: Vector3<f64>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub b: Vector3<f64>,
}

impl BoundaryCondition for Fixed {
    fn guard_cell(
        &self,
        _face: Face,
        _depth: usize,
        _nearest: &FieldValues,
        _mirror: &FieldValues,
    ) -> FieldValues {
        FieldValues::new(self.d, self.b)
    }
}

/// Mirrors the interior across a perfectly conducting wall.
///
/// Tangential D and normal B are odd, so they vanish on the wall. Normal D and
/// tangential B are even.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PerfectConductor;

impl BoundaryCondition for PerfectConductor {
    fn guard_cell(
        &self,
        face: Face,
        _depth: usize,
        _nearest: &FieldValues,
        mirror: &FieldValues,
    ) -> FieldValues {
        let normal = face.axis.basis::<f64>();

        let d = normal.into_inner() * (2.0 * normal.dot(&mirror.d)) - mirror.d;
        let b = mirror.b - normal.into_inner() * (2.0 * normal.dot(&mirror.b));

        FieldValues::new(d, b)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(tag = "type", rename_all = "snake_case")
)]
pub enum AnyBoundaryCondition {
    ZeroGradient,
    Fixed(Fixed),
    PerfectConductor,
}

impl Default for AnyBoundaryCondition {
    fn default() -> Self {
        Self::ZeroGradient
    }
}

impl BoundaryCondition for AnyBoundaryCondition {
    fn guard_cell(
        &self,
        face: Face,
        depth: usize,
        nearest: &FieldValues,
        mirror: &FieldValues,
    ) -> FieldValues {
        match self {
            AnyBoundaryCondition::ZeroGradient => {
                ZeroGradient.guard_cell(face, depth, nearest, mirror)
            }
            AnyBoundaryCondition::Fixed(fixed) => fixed.guard_cell(face, depth, nearest, mirror),
            AnyBoundaryCondition::PerfectConductor => {
                PerfectConductor.guard_cell(face, depth, nearest, mirror)
            }
        }
    }
}

impl From<ZeroGradient> for AnyBoundaryCondition {
    fn from(_value: ZeroGradient) -> Self {
        Self::ZeroGradient
    }
}

impl From<Fixed> for AnyBoundaryCondition {
    fn from(value: Fixed) -> Self {
        Self::Fixed(value)
    }
}

impl From<PerfectConductor> for AnyBoundaryCondition {
    fn from(_value: PerfectConductor) -> Self {
        Self::PerfectConductor
    }
}
