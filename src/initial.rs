use std::f64::consts::TAU;

use ffe_solver::{
    FieldValues,
    Grid,
    grid::Axis,
};
use nalgebra::{
    Point3,
    Vector3,
};
use serde::{
    Deserialize,
    Serialize,
};

/// Field the simulation starts from.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InitialField {
    #[default]
    Zero,

    Uniform {
        #[serde(default = "Vector3::zeros")]
        d: Vector3<f64>,
        #[serde(default = "Vector3::zeros")]
        b: Vector3<f64>,
    },

    /// Point magnetic dipole in vacuum. The singularity at the center is
    /// smoothed over `softening`.
    Dipole {
        #[serde(default = "default_dipole_moment")]
        moment: Vector3<f64>,
        #[serde(default = "Vector3::zeros")]
        center: Vector3<f64>,
        #[serde(default = "default_softening")]
        softening: f64,
    },

    /// Transverse plane wave on a unit guide field. One wavelength spans the
    /// domain along `wavelength_axis`.
    Wave {
        #[serde(default = "default_amplitude")]
        amplitude: f64,
        #[serde(default = "default_wavelength_axis")]
        wavelength_axis: Axis,
    },
}

fn default_dipole_moment() -> Vector3<f64> {
    Vector3::z()
}

fn default_softening() -> f64 {
    0.05
}

fn default_amplitude() -> f64 {
    0.1
}

fn default_wavelength_axis() -> Axis {
    Axis::X
}

impl InitialField {
    pub fn evaluate(&self, grid: &Grid, x: &Point3<f64>) -> FieldValues {
        match self {
            Self::Zero => FieldValues::default(),
            Self::Uniform { d, b } => FieldValues::new(*d, *b),
            Self::Dipole {
                moment,
                center,
                softening,
            } => {
                let r = x.coords - center;
                let r2 = r.norm_squared();
                let r_eff = (r2 + softening * softening).sqrt();
                let b = (3.0 * r * r.dot(moment) - moment * r2) / r_eff.powi(5);
                FieldValues::new(Vector3::zeros(), b)
            }
            Self::Wave {
                amplitude,
                wavelength_axis,
            } => {
                let i = wavelength_axis.index();
                let k = TAU / grid.size[i];
                let phase = amplitude * (k * (x[i] - grid.lower[i])).sin();

                let mut d = Vector3::zeros();
                let mut b = Vector3::zeros();
                d[(i + 1) % 3] = phase;
                b[(i + 2) % 3] = 1.0 + phase;
                FieldValues::new(d, b)
            }
        }
    }
}
