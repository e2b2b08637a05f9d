//! Background spacetime in 3+1 form
//!
//! The solver never evolves the metric. It is evaluated once per cell when the
//! solver is constructed and cached as a [`MetricCell`].

use nalgebra::{
    Matrix3,
    Point3,
    Vector3,
};

use crate::error::ConfigurationError;

/// Lapse, shift and spatial metric at one point.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MetricCell {
    /// Lapse function
    pub alpha: f64,

    /// Shift vector (contravariant)
    pub beta: Vector3<f64>,

    /// Spatial metric
    pub gamma: Matrix3<f64>,

    /// Inverse spatial metric
    pub gamma_inv: Matrix3<f64>,

    /// Square root of the determinant of the spatial metric
    pub sqrt_gamma: f64,
}

impl MetricCell {
    pub fn flat() -> Self {
        Self {
            alpha: 1.0,
            beta: Vector3::zeros(),
            gamma: Matrix3::identity(),
            gamma_inv: Matrix3::identity(),
            sqrt_gamma: 1.0,
        }
    }

    /// Returns `None` if `gamma` is not positive definite.
    pub fn new(alpha: f64, beta: Vector3<f64>, gamma: Matrix3<f64>) -> Option<Self> {
        let determinant = gamma.determinant();
        if !(determinant > 0.0) {
            return None;
        }
        let gamma_inv = gamma.try_inverse()?;
        Some(Self {
            alpha,
            beta,
            gamma,
            gamma_inv,
            sqrt_gamma: determinant.sqrt(),
        })
    }

    /// Lowers the index of a contravariant vector.
    pub fn lower(&self, v: &Vector3<f64>) -> Vector3<f64> {
        self.gamma * v
    }

    /// Raises the index of a covariant vector.
    pub fn raise(&self, v: &Vector3<f64>) -> Vector3<f64> {
        self.gamma_inv * v
    }

    /// `γ_ij a^i b^j`
    pub fn dot(&self, a: &Vector3<f64>, b: &Vector3<f64>) -> f64 {
        a.dot(&self.lower(b))
    }

    pub fn norm_squared(&self, v: &Vector3<f64>) -> f64 {
        self.dot(v, v)
    }

    /// Electric field `E_i = α γ_ij D^j + √γ ε_ijk β^j B^k`
    pub fn electric_field(&self, d: &Vector3<f64>, b: &Vector3<f64>) -> Vector3<f64> {
        self.alpha * self.lower(d) + self.sqrt_gamma * self.beta.cross(b)
    }

    /// Magnetic field `H_i = α γ_ij B^j - √γ ε_ijk β^j D^k`
    pub fn magnetic_field(&self, d: &Vector3<f64>, b: &Vector3<f64>) -> Vector3<f64> {
        self.alpha * self.lower(b) - self.sqrt_gamma * self.beta.cross(d)
    }
}

impl Default for MetricCell {
    fn default() -> Self {
        Self::flat()
    }
}

pub trait Metric: Send + Sync {
    fn evaluate(&self, position: &Point3<f64>) -> MetricCell;
}

/// Flat spacetime
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Minkowski;

impl Metric for Minkowski {
    fn evaluate(&self, _position: &Point3<f64>) -> MetricCell {
        MetricCell::flat()
    }
}

/// Kerr black hole in Cartesian Kerr-Schild coordinates, centered at the
/// origin and spinning around z.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct KerrSchild {
    pub mass: f64,

    /// Spin parameter `a = J / M`
    #[cfg_attr(feature = "serde", serde(default))]
    pub spin: f64,

    /// Radius below which `r` is clamped. Keeps cells close to the ring
    /// singularity finite.
    #[cfg_attr(feature = "serde", serde(default = "default_min_radius"))]
    pub min_radius: f64,
}

fn default_min_radius() -> f64 {
    0.1
}

impl KerrSchild {
    pub fn new(mass: f64, spin: f64) -> Self {
        Self {
            mass,
            spin,
            min_radius: default_min_radius(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let invalid = |name, reason: &str| {
            Err(ConfigurationError::InvalidParameter {
                name,
                reason: reason.to_owned(),
            })
        };

        if !(self.mass.is_finite() && self.mass >= 0.0) {
            return invalid("metric.mass", "must be finite and non-negative");
        }
        if !self.spin.is_finite() {
            return invalid("metric.spin", "must be finite");
        }
        if !(self.min_radius.is_finite() && self.min_radius > 0.0) {
            return invalid("metric.min_radius", "must be finite and positive");
        }
        Ok(())
    }

    /// Boyer-Lindquist-like radius for a Cartesian position
    pub fn radius(&self, position: &Point3<f64>) -> f64 {
        let a2 = self.spin * self.spin;
        let w = 0.5 * (position.coords.norm_squared() - a2);
        let r2 = w + (w * w + a2 * position.z * position.z).sqrt();
        r2.max(0.0).sqrt().max(self.min_radius)
    }
}

impl Metric for KerrSchild {
    fn evaluate(&self, position: &Point3<f64>) -> MetricCell {
        let a = self.spin;
        let r = self.radius(position);
        let r2 = r * r;
        let (x, y, z) = (position.x, position.y, position.z);

        let h = self.mass * r2 * r / (r2 * r2 + a * a * z * z);
        let l = Vector3::new(
            (r * x + a * y) / (r2 + a * a),
            (r * y - a * x) / (r2 + a * a),
            z / r,
        );

        // γ = 1 + 2H l⊗l has a closed form inverse and determinant
        let l2 = l.norm_squared();
        let determinant = 1.0 + 2.0 * h * l2;
        let ll = l * l.transpose();

        MetricCell {
            alpha: 1.0 / determinant.sqrt(),
            beta: (2.0 * h / determinant) * l,
            gamma: Matrix3::identity() + 2.0 * h * ll,
            gamma_inv: Matrix3::identity() - (2.0 * h / determinant) * ll,
            sqrt_gamma: determinant.sqrt(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(tag = "type", rename_all = "snake_case")
)]
pub enum AnyMetric {
    Minkowski,
    KerrSchild(KerrSchild),
}

impl AnyMetric {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        match self {
            AnyMetric::Minkowski => Ok(()),
            AnyMetric::KerrSchild(kerr_schild) => kerr_schild.validate(),
        }
    }
}

impl Default for AnyMetric {
    fn default() -> Self {
        Self::Minkowski
    }
}

impl Metric for AnyMetric {
    fn evaluate(&self, position: &Point3<f64>) -> MetricCell {
        match self {
            AnyMetric::Minkowski => Minkowski.evaluate(position),
            AnyMetric::KerrSchild(kerr_schild) => kerr_schild.evaluate(position),
        }
    }
}

impl From<Minkowski> for AnyMetric {
    fn from(_value: Minkowski) -> Self {
        Self::Minkowski
    }
}

impl From<KerrSchild> for AnyMetric {
    fn from(value: KerrSchild) -> Self {
        Self::KerrSchild(value)
    }
}
