//! Force-free constraints
//!
//! After an unconstrained update the electric field is pulled back onto
//! `D·B = 0` and `|D| ≤ |B|`, measured with the spatial metric.

use nalgebra::Vector3;

use crate::{
    grid::LocalGrid,
    lattice::Lattice,
    metric::MetricCell,
    threading::LatticeForEach,
};

/// When the full projection runs during a step.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "snake_case")
)]
pub enum ProjectionSchedule {
    /// Once after the last stage
    #[default]
    EndOfStep,

    /// After every stage
    EveryStage,
}

/// Rescales `d` to the magnitude of `b` if it's larger.
///
/// Without magnetic field there is no force-free state and `d` is set to zero.
pub fn clamp(d: &mut Vector3<f64>, b: &Vector3<f64>, metric: &MetricCell) {
    let b2 = metric.norm_squared(b);
    if b2 == 0.0 {
        *d = Vector3::zeros();
        return;
    }

    let d2 = metric.norm_squared(d);
    if d2 > b2 {
        *d *= (b2 / d2).sqrt();
    }
}

/// Clamps `d` and removes its component parallel to `b`.
pub fn project(d: &mut Vector3<f64>, b: &Vector3<f64>, metric: &MetricCell) {
    clamp(d, b, metric);

    let b2 = metric.norm_squared(b);
    if b2 > 0.0 {
        *d -= (metric.dot(d, b) / b2) * b;
    }
}

/// Runs [`project`] on every interior cell.
pub fn project_interior<E>(
    executor: &E,
    local_grid: &LocalGrid,
    d: &mut Lattice<Vector3<f64>>,
    b: &Lattice<Vector3<f64>>,
    metric: &Lattice<MetricCell>,
) where
    E: LatticeForEach,
{
    executor.for_each(local_grid.strider(), d, |index, point, d| {
        if local_grid.is_interior(&point) {
            project(d, &b[index], &metric[index]);
        }
    });
}

/// Runs [`clamp`] on every interior cell.
pub fn clamp_interior<E>(
    executor: &E,
    local_grid: &LocalGrid,
    d: &mut Lattice<Vector3<f64>>,
    b: &Lattice<Vector3<f64>>,
    metric: &Lattice<MetricCell>,
) where
    E: LatticeForEach,
{
    executor.for_each(local_grid.strider(), d, |index, point, d| {
        if local_grid.is_interior(&point) {
            clamp(d, &b[index], &metric[index]);
        }
    });
}
