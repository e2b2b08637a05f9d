//! Force-free field solver
//!
//! Each step integrates the 3+1 force-free equations with a low-storage
//! Runge-Kutta scheme. Every stage exchanges halos, computes the rates of D
//! and B on the interior, and combines them with the start-of-step snapshot:
//!
//! ```plain
//! field = c1 * snapshot + c2 * field + c3 * dt * rate
//! ```
//!
//! The electric field is then projected back onto the force-free manifold
//! (see [`crate::projection`]).

use nalgebra::Vector3;

use crate::{
    boundary::{
        AnyBoundaryCondition,
        BoundaryCondition,
    },
    comm::Communicator,
    derivative::jacobian,
    env::SimEnvironment,
    error::{
        ConfigurationError,
        DivergenceKind,
        Error,
        NumericalDivergence,
    },
    field::SimData,
    grid::LocalGrid,
    halo::exchange_halos,
    lattice::Lattice,
    metric::{
        AnyMetric,
        Metric,
        MetricCell,
    },
    projection::{
        ProjectionSchedule,
        clamp_interior,
        project_interior,
    },
    threading::{
        LatticeForEach,
        SingleThreaded,
    },
};

/// Weights of one stage: `field = c1 * snapshot + c2 * field + c3 * dt * rate`
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RkCoefficients {
    pub c1: f64,
    pub c2: f64,
    pub c3: f64,
}

impl RkCoefficients {
    pub const fn new(c1: f64, c2: f64, c3: f64) -> Self {
        Self { c1, c2, c3 }
    }
}

const SSP_RK3: [RkCoefficients; 3] = [
    RkCoefficients::new(1.0, 0.0, 1.0),
    RkCoefficients::new(0.75, 0.25, 0.25),
    RkCoefficients::new(1.0 / 3.0, 2.0 / 3.0, 2.0 / 3.0),
];

const SSP_RK2: [RkCoefficients; 2] = [
    RkCoefficients::new(1.0, 0.0, 1.0),
    RkCoefficients::new(0.5, 0.5, 0.5),
];

const FORWARD_EULER: [RkCoefficients; 1] = [RkCoefficients::new(1.0, 0.0, 1.0)];

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "snake_case")
)]
pub enum RkScheme {
    /// Strong stability preserving, 3 stages (Shu-Osher)
    #[default]
    SspRk3,
    SspRk2,
    ForwardEuler,
}

impl RkScheme {
    pub fn stages(&self) -> &'static [RkCoefficients] {
        match self {
            RkScheme::SspRk3 => &SSP_RK3,
            RkScheme::SspRk2 => &SSP_RK2,
            RkScheme::ForwardEuler => &FORWARD_EULER,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SolverConfig {
    /// Courant number. Ignored if `dt` is set.
    #[cfg_attr(feature = "serde", serde(default = "default_cfl"))]
    pub cfl: f64,

    /// Explicit time step
    #[cfg_attr(feature = "serde", serde(default))]
    pub dt: Option<f64>,

    #[cfg_attr(feature = "serde", serde(default))]
    pub scheme: RkScheme,

    #[cfg_attr(feature = "serde", serde(default))]
    pub projection: ProjectionSchedule,

    /// Rescale D to |B| after every stage
    #[cfg_attr(feature = "serde", serde(default = "default_to_true"))]
    pub clamp_every_stage: bool,

    /// Check for diverged fields every n steps. 0 disables the check.
    #[cfg_attr(
        feature = "serde",
        serde(default = "default_divergence_check_interval")
    )]
    pub divergence_check_interval: usize,

    /// Relative amount by which |D|² may exceed |B|² after projection.
    #[cfg_attr(feature = "serde", serde(default = "default_divergence_tolerance"))]
    pub divergence_tolerance: f64,

    #[cfg_attr(feature = "serde", serde(default))]
    pub boundary: AnyBoundaryCondition,

    #[cfg_attr(feature = "serde", serde(default))]
    pub metric: AnyMetric,
}

fn default_cfl() -> f64 {
    0.3
}

fn default_to_true() -> bool {
    true
}

fn default_divergence_check_interval() -> usize {
    10
}

fn default_divergence_tolerance() -> f64 {
    1e-6
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            cfl: default_cfl(),
            dt: None,
            scheme: Default::default(),
            projection: Default::default(),
            clamp_every_stage: default_to_true(),
            divergence_check_interval: default_divergence_check_interval(),
            divergence_tolerance: default_divergence_tolerance(),
            boundary: Default::default(),
            metric: Default::default(),
        }
    }
}

impl SolverConfig {
    /// Checks the scalar parameters. The metric is checked separately by
    /// [`FieldSolver::new`].
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.dt.is_none() && !(self.cfl.is_finite() && self.cfl > 0.0) {
            return Err(ConfigurationError::InvalidParameter {
                name: "cfl",
                reason: format!("must be positive and finite, but is {}", self.cfl),
            });
        }

        if !(self.divergence_tolerance.is_finite() && self.divergence_tolerance >= 0.0) {
            return Err(ConfigurationError::InvalidParameter {
                name: "divergence_tolerance",
                reason: format!(
                    "must be non-negative and finite, but is {}",
                    self.divergence_tolerance
                ),
            });
        }

        Ok(())
    }

    /// The explicit `dt`, or `cfl` times the smallest active cell spacing.
    pub fn time_step(&self, local_grid: &LocalGrid) -> Result<f64, ConfigurationError> {
        let dt = self
            .dt
            .unwrap_or_else(|| self.cfl * local_grid.min_active_delta());

        if dt.is_finite() && dt > 0.0 {
            Ok(dt)
        }
        else {
            Err(ConfigurationError::InvalidTimeStep { dt })
        }
    }
}

/// Bytes allocated by a [`FieldSolver`] on `local_grid`.
pub fn memory_required(local_grid: &LocalGrid) -> usize {
    // snapshot (2), rates (2), E, H, flux
    let per_cell = 7 * size_of::<Vector3<f64>>() + size_of::<f64>() + size_of::<MetricCell>();
    per_cell * local_grid.num_cells()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Ready,

    /// A step failed. The field state may be half updated.
    Failed,
}

#[derive(derive_more::Debug)]
pub struct FieldSolver<'env, C, E = SingleThreaded> {
    #[debug(skip)]
    env: &'env SimEnvironment<C, E>,

    scheme: RkScheme,
    dt: f64,
    projection: ProjectionSchedule,
    clamp_every_stage: bool,
    divergence_check_interval: usize,
    divergence_tolerance: f64,
    boundary: Box<dyn BoundaryCondition>,

    #[debug(skip)]
    metric: Lattice<MetricCell>,

    #[debug(skip)]
    snapshot_d: Lattice<Vector3<f64>>,
    #[debug(skip)]
    snapshot_b: Lattice<Vector3<f64>>,

    #[debug(skip)]
    dd: Lattice<Vector3<f64>>,
    #[debug(skip)]
    db: Lattice<Vector3<f64>>,

    /// Covariant electric field
    #[debug(skip)]
    e: Lattice<Vector3<f64>>,

    /// Covariant magnetic field
    #[debug(skip)]
    h: Lattice<Vector3<f64>>,

    /// Densitized D, `√γ D`
    #[debug(skip)]
    flux: Lattice<Vector3<f64>>,

    #[debug(skip)]
    rho: Lattice<f64>,

    step: usize,
    time: f64,
    phase: Phase,
}

impl<'env, C, E> FieldSolver<'env, C, E>
where
    C: Communicator,
    E: LatticeForEach,
{
    pub fn new(env: &'env SimEnvironment<C, E>, config: &SolverConfig) -> Result<Self, Error> {
        config.metric.validate()?;
        Self::with_policies(env, config, Box::new(config.boundary), &config.metric)
    }

    /// Like [`new`](Self::new), but with a custom boundary condition and
    /// metric. `config.boundary` and `config.metric` are ignored.
    pub fn with_policies(
        env: &'env SimEnvironment<C, E>,
        config: &SolverConfig,
        boundary: Box<dyn BoundaryCondition>,
        metric: &dyn Metric,
    ) -> Result<Self, Error> {
        config.validate()?;

        let local_grid = env.local_grid();
        let dt = config.time_step(local_grid)?;
        let strider = local_grid.strider();

        let metric = Lattice::from_fn(strider, |_, point| {
            metric.evaluate(&local_grid.position(&point))
        });
        if let Some((_, point, _)) = metric.iter(strider, ..).find(|(_, _, cell)| {
            !(cell.alpha.is_finite()
                && cell.alpha > 0.0
                && cell.sqrt_gamma.is_finite()
                && cell.sqrt_gamma > 0.0)
        }) {
            return Err(ConfigurationError::InvalidParameter {
                name: "metric",
                reason: format!("degenerate metric at local cell {point:?}"),
            }
            .into());
        }

        tracing::info!(
            rank = env.rank(),
            dt,
            scheme = ?config.scheme,
            projection = ?config.projection,
            ?boundary,
            memory_required = memory_required(local_grid),
            "created field solver"
        );

        Ok(Self {
            env,
            scheme: config.scheme,
            dt,
            projection: config.projection,
            clamp_every_stage: config.clamp_every_stage,
            divergence_check_interval: config.divergence_check_interval,
            divergence_tolerance: config.divergence_tolerance,
            boundary,
            metric,
            snapshot_d: Lattice::from_default(strider),
            snapshot_b: Lattice::from_default(strider),
            dd: Lattice::from_default(strider),
            db: Lattice::from_default(strider),
            e: Lattice::from_default(strider),
            h: Lattice::from_default(strider),
            flux: Lattice::from_default(strider),
            rho: Lattice::from_default(strider),
            step: 0,
            time: 0.0,
            phase: Phase::Ready,
        })
    }

    /// Advances `data` by one time step.
    ///
    /// Any error except a shape mismatch leaves the solver failed, and all
    /// further calls return [`Error::Halted`].
    pub fn advance_step(&mut self, data: &mut SimData) -> Result<(), Error> {
        if self.phase == Phase::Failed {
            return Err(Error::Halted);
        }

        let expected = self.env.local_grid().dims();
        if data.dims() != expected {
            return Err(Error::StateShape {
                expected: expected.into(),
                actual: data.dims().into(),
            });
        }

        let rank = self.env.rank();
        let _span = tracing::debug_span!("advance_step", rank, step = self.step).entered();

        let result = self.run_stages(data).and_then(|()| {
            self.step += 1;
            self.time += self.dt;

            if self.divergence_check_interval > 0
                && self.step % self.divergence_check_interval == 0
            {
                self.check_divergence(data)?;
            }
            Ok(())
        });

        match result {
            Ok(()) => {
                tracing::trace!(time = self.time, "step complete");
                Ok(())
            }
            Err(error) => {
                tracing::error!(rank, step = self.step, %error, "field solver failed");
                self.phase = Phase::Failed;
                Err(error)
            }
        }
    }

    fn run_stages(&mut self, data: &mut SimData) -> Result<(), Error> {
        let env = self.env;
        let local_grid = env.local_grid();
        let executor = env.executor();

        self.snapshot_d.copy_from(&data.d);
        self.snapshot_b.copy_from(&data.b);

        for (stage, coefficients) in self.scheme.stages().iter().enumerate() {
            exchange_halos(
                env.communicator(),
                env.topology(),
                local_grid,
                &*self.boundary,
                &mut data.d,
                &mut data.b,
            )?;

            self.push(data);
            self.update(data, coefficients);

            match self.projection {
                ProjectionSchedule::EveryStage => {
                    project_interior(executor, local_grid, &mut data.d, &data.b, &self.metric);
                }
                ProjectionSchedule::EndOfStep if self.clamp_every_stage => {
                    clamp_interior(executor, local_grid, &mut data.d, &data.b, &self.metric);
                }
                ProjectionSchedule::EndOfStep => {}
            }

            tracing::trace!(stage, "stage complete");
        }

        if self.projection == ProjectionSchedule::EndOfStep {
            project_interior(executor, local_grid, &mut data.d, &data.b, &self.metric);
        }

        Ok(())
    }

    /// Computes the rates `dD` and `dB` on the interior. Guards of D and B
    /// must be filled.
    fn push(&mut self, data: &SimData) {
        let env = self.env;
        let local_grid = env.local_grid();
        let executor = env.executor();
        let strider = local_grid.strider();
        let metric = &self.metric;

        executor.for_each(strider, &mut self.e, |index, _, e| {
            *e = metric[index].electric_field(&data.d[index], &data.b[index]);
        });
        executor.for_each(strider, &mut self.h, |index, _, h| {
            *h = metric[index].magnetic_field(&data.d[index], &data.b[index]);
        });
        executor.for_each(strider, &mut self.flux, |index, _, flux| {
            *flux = metric[index].sqrt_gamma * data.d[index];
        });

        let flux = &self.flux;
        executor.for_each(strider, &mut self.rho, |index, point, rho| {
            *rho = if local_grid.is_interior(&point) {
                jacobian(local_grid, flux, index).divergence() / metric[index].sqrt_gamma
            }
            else {
                0.0
            };
        });

        let e = &self.e;
        executor.for_each(strider, &mut self.db, |index, point, db| {
            *db = if local_grid.is_interior(&point) {
                -jacobian(local_grid, e, index).curl() / metric[index].sqrt_gamma
            }
            else {
                Vector3::zeros()
            };
        });

        let h = &self.h;
        let rho = &self.rho;
        executor.for_each(strider, &mut self.dd, |index, point, dd| {
            if !local_grid.is_interior(&point) {
                *dd = Vector3::zeros();
                return;
            }

            let cell = &metric[index];
            let b_lower = cell.lower(&data.b[index]);
            let b2 = data.b[index].dot(&b_lower);

            // drift current
            let current = if b2 > 0.0 {
                (rho[index] / (cell.sqrt_gamma * b2)) * e[index].cross(&b_lower)
            }
            else {
                Vector3::zeros()
            };

            *dd = jacobian(local_grid, h, index).curl() / cell.sqrt_gamma - current;
        });
    }

    fn update(&mut self, data: &mut SimData, coefficients: &RkCoefficients) {
        let local_grid = self.env.local_grid();
        let executor = self.env.executor();
        let strider = local_grid.strider();

        let RkCoefficients { c1, c2, c3 } = *coefficients;
        let c3 = c3 * self.dt;

        for (field, snapshot, rate) in [
            (&mut data.d, &self.snapshot_d, &self.dd),
            (&mut data.b, &self.snapshot_b, &self.db),
        ] {
            executor.for_each(strider, field, |index, point, value| {
                if local_grid.is_interior(&point) {
                    *value = c1 * snapshot[index] + c2 * *value + c3 * rate[index];
                }
            });
        }
    }

    fn check_divergence(&self, data: &SimData) -> Result<(), NumericalDivergence> {
        let local_grid = self.env.local_grid();

        for (index, point) in local_grid.strider().iter(local_grid.interior()) {
            let d = &data.d[index];
            let b = &data.b[index];

            let kind = if !d.iter().chain(b.iter()).all(|x| x.is_finite()) {
                Some(DivergenceKind::NonFinite)
            }
            else {
                let cell = &self.metric[index];
                (cell.norm_squared(d) > cell.norm_squared(b) * (1.0 + self.divergence_tolerance))
                    .then_some(DivergenceKind::Degeneracy)
            };

            if let Some(kind) = kind {
                return Err(NumericalDivergence {
                    rank: self.env.rank(),
                    step: self.step,
                    cell: local_grid.global_index(&point).unwrap_or(point),
                    kind,
                });
            }
        }

        Ok(())
    }
}

impl<'env, C, E> FieldSolver<'env, C, E> {
    pub fn environment(&self) -> &'env SimEnvironment<C, E> {
        self.env
    }

    /// Number of completed steps
    pub fn step(&self) -> usize {
        self.step
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    pub fn is_failed(&self) -> bool {
        self.phase == Phase::Failed
    }

    /// Charge density `∇·D` of the last stage. Guard cells are zero.
    pub fn charge_density(&self) -> &Lattice<f64> {
        &self.rho
    }

    pub fn memory_required(&self) -> usize {
        memory_required(self.env.local_grid())
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::BTreeSet,
        sync::atomic::{
            AtomicUsize,
            Ordering,
        },
    };

    use approx::assert_abs_diff_eq;
    use nalgebra::{
        Matrix3,
        Point3,
        Vector3,
    };
    use parking_lot::Mutex;

    use crate::{
        boundary::{
            BoundaryCondition,
            ZeroGradient,
        },
        comm::{
            Communicator,
            LocalCluster,
            LocalCommunicator,
            MessageTag,
        },
        device::CpuAccelerator,
        env::SimEnvironment,
        error::{
            CommunicationError,
            ConfigurationError,
            DivergenceKind,
            Error,
        },
        field::{
            FieldValues,
            SimData,
        },
        grid::{
            Face,
            GridParameters,
        },
        metric::{
            Metric,
            MetricCell,
            Minkowski,
        },
        solver::{
            FieldSolver,
            RkScheme,
            SolverConfig,
            memory_required,
        },
    };

    #[derive(Debug)]
    struct CountingCommunicator {
        inner: LocalCommunicator,
        messages: AtomicUsize,
    }

    impl Communicator for CountingCommunicator {
        fn rank(&self) -> usize {
            self.inner.rank()
        }

        fn size(&self) -> usize {
            self.inner.size()
        }

        fn send(
            &self,
            destination: usize,
            tag: MessageTag,
            payload: Box<[f64]>,
        ) -> Result<(), CommunicationError> {
            self.messages.fetch_add(1, Ordering::Relaxed);
            self.inner.send(destination, tag, payload)
        }

        fn receive(
            &self,
            source: usize,
            tag: MessageTag,
        ) -> Result<Box<[f64]>, CommunicationError> {
            self.messages.fetch_add(1, Ordering::Relaxed);
            self.inner.receive(source, tag)
        }
    }

    #[derive(Debug, Default)]
    struct RecordingBoundary {
        faces: std::sync::Arc<Mutex<BTreeSet<Face>>>,
    }

    impl BoundaryCondition for RecordingBoundary {
        fn guard_cell(
            &self,
            face: Face,
            depth: usize,
            nearest: &FieldValues,
            mirror: &FieldValues,
        ) -> FieldValues {
            self.faces.lock().insert(face);
            ZeroGradient.guard_cell(face, depth, nearest, mirror)
        }
    }

    /// Same lapse, shift and spatial metric everywhere
    struct UniformMetric(MetricCell);

    impl Metric for UniformMetric {
        fn evaluate(&self, _position: &Point3<f64>) -> MetricCell {
            self.0
        }
    }

    fn environment(parameters: &GridParameters) -> SimEnvironment<CountingCommunicator> {
        let communicator = CountingCommunicator {
            inner: LocalCluster::new(1).build().remove(0),
            messages: AtomicUsize::new(0),
        };
        SimEnvironment::new(parameters, communicator, &CpuAccelerator::default()).unwrap()
    }

    fn small_grid() -> GridParameters {
        GridParameters {
            resolution: [4, 4, 4],
            guard: [2; 3],
            ..Default::default()
        }
    }

    #[test]
    fn zero_fields_stay_zero_without_exchange() {
        let env = environment(&small_grid());
        let boundary = RecordingBoundary::default();
        let faces = boundary.faces.clone();

        let mut solver = FieldSolver::with_policies(
            &env,
            &SolverConfig::default(),
            Box::new(boundary),
            &Minkowski,
        )
        .unwrap();

        let mut data = SimData::new(env.local_grid());
        solver.advance_step(&mut data).unwrap();

        assert_eq!(data, SimData::new(env.local_grid()));
        assert_eq!(solver.step(), 1);
        assert_abs_diff_eq!(solver.time(), solver.dt());
        assert_eq!(env.communicator().messages.load(Ordering::Relaxed), 0);
        assert_eq!(faces.lock().len(), 6);
        assert!(solver.charge_density().as_slice().iter().all(|rho| *rho == 0.0));
    }

    #[test]
    fn uniform_fields_have_zero_rates() {
        let env = environment(&small_grid());
        let initial = SimData::from_fn(env.local_grid(), |_| {
            FieldValues::new(Vector3::new(0.3, 0.0, 0.0), Vector3::new(0.0, 0.0, 1.0))
        });

        for scheme in [RkScheme::SspRk3, RkScheme::SspRk2, RkScheme::ForwardEuler] {
            let config = SolverConfig {
                scheme,
                ..Default::default()
            };
            let mut solver = FieldSolver::new(&env, &config).unwrap();
            let mut data = initial.clone();
            for _ in 0..3 {
                solver.advance_step(&mut data).unwrap();
            }

            for (index, _) in env.local_grid().strider().iter(env.local_grid().interior()) {
                assert_abs_diff_eq!(data.d[index], initial.d[index], epsilon = 1e-14);
                assert_abs_diff_eq!(data.b[index], initial.b[index], epsilon = 1e-14);
            }
        }
    }

    #[test]
    fn schemes_integrate_constant_rates_exactly() {
        let (u0, rate, dt) = (2.0, -0.5, 0.1);
        for scheme in [RkScheme::SspRk3, RkScheme::SspRk2, RkScheme::ForwardEuler] {
            let mut u = u0;
            for stage in scheme.stages() {
                u = stage.c1 * u0 + stage.c2 * u + stage.c3 * dt * rate;
            }
            assert_abs_diff_eq!(u, u0 + dt * rate, epsilon = 1e-15);
        }
        assert_eq!(RkScheme::default().stages().len(), 3);
    }

    #[test]
    fn time_step_from_cfl() {
        let env = environment(&GridParameters {
            resolution: [8, 16, 1],
            guard: [2; 3],
            size: [1.0, 1.0, 0.01],
            ..Default::default()
        });

        // z is inactive, so its tiny spacing doesn't count
        let solver = FieldSolver::new(&env, &SolverConfig::default()).unwrap();
        assert_abs_diff_eq!(solver.dt(), 0.3 / 16.0);

        let solver = FieldSolver::new(
            &env,
            &SolverConfig {
                dt: Some(1e-3),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(solver.dt(), 1e-3);
        assert_eq!(solver.memory_required(), memory_required(env.local_grid()));
    }

    #[test]
    fn invalid_parameters() {
        let env = environment(&small_grid());

        let result = FieldSolver::new(
            &env,
            &SolverConfig {
                cfl: -1.0,
                ..Default::default()
            },
        );
        assert!(matches!(
            result,
            Err(Error::Configuration(ConfigurationError::InvalidParameter {
                name: "cfl",
                ..
            }))
        ));

        let result = FieldSolver::new(
            &env,
            &SolverConfig {
                dt: Some(f64::INFINITY),
                ..Default::default()
            },
        );
        assert!(matches!(
            result,
            Err(Error::Configuration(ConfigurationError::InvalidTimeStep { .. }))
        ));
    }

    #[test]
    fn state_shape_is_checked() {
        let env = environment(&small_grid());
        let other = environment(&GridParameters {
            resolution: [8, 4, 4],
            guard: [2; 3],
            ..Default::default()
        });
        let mut solver = FieldSolver::new(&env, &SolverConfig::default()).unwrap();

        let mut data = SimData::new(other.local_grid());
        assert!(matches!(
            solver.advance_step(&mut data),
            Err(Error::StateShape {
                expected: [8, 8, 8],
                actual: [12, 8, 8]
            })
        ));
        assert!(!solver.is_failed());
    }

    #[test]
    fn non_finite_values_halt_the_solver() {
        let env = environment(&small_grid());
        let config = SolverConfig {
            divergence_check_interval: 1,
            ..Default::default()
        };
        let mut solver = FieldSolver::new(&env, &config).unwrap();

        let mut data = SimData::from_fn(env.local_grid(), |_| {
            FieldValues::new(Vector3::zeros(), Vector3::new(0.0, 0.0, 1.0))
        });
        data.set(
            &Point3::new(3, 3, 3),
            FieldValues::new(Vector3::new(f64::NAN, 0.0, 0.0), Vector3::new(0.0, 0.0, 1.0)),
        );

        match solver.advance_step(&mut data) {
            Err(Error::Divergence(divergence)) => {
                assert_eq!(divergence.kind, DivergenceKind::NonFinite);
                assert_eq!(divergence.rank, 0);
                assert_eq!(divergence.step, 1);
            }
            result => panic!("expected divergence, got {result:?}"),
        }
        assert!(solver.is_failed());

        // NaN != NaN, so compare bit patterns
        let bits = |data: &SimData| {
            data.d
                .as_slice()
                .iter()
                .chain(data.b.as_slice())
                .flat_map(|v| v.iter().map(|x| x.to_bits()).collect::<Vec<_>>())
                .collect::<Vec<_>>()
        };
        let before = bits(&data);
        assert!(matches!(solver.advance_step(&mut data), Err(Error::Halted)));
        assert_eq!(solver.step(), 1);
        assert_eq!(bits(&data), before);
    }

    #[test]
    fn charge_drives_drift_current() {
        let env = environment(&GridParameters {
            resolution: [8, 4, 4],
            guard: [2; 3],
            ..Default::default()
        });
        let local_grid = env.local_grid();
        let mut solver = FieldSolver::new(&env, &SolverConfig::default()).unwrap();

        // ∇·D = 1 and E × B points along -y
        let data = SimData::from_fn(local_grid, |x| {
            FieldValues::new(Vector3::new(x.x, 0.0, 0.0), Vector3::new(0.0, 0.0, 2.0))
        });
        solver.push(&data);

        for (index, point) in local_grid.strider().iter(local_grid.interior()) {
            let x = local_grid.position(&point).x;
            assert_abs_diff_eq!(solver.charge_density()[index], 1.0, epsilon = 1e-12);

            // J = ρ E × B / B² = (0, -x/2, 0), and H is uniform
            assert_abs_diff_eq!(solver.dd[index], Vector3::new(0.0, 0.5 * x, 0.0), epsilon = 1e-12);
            assert_abs_diff_eq!(solver.db[index], Vector3::zeros(), epsilon = 1e-12);
        }
    }

    #[test]
    fn lapse_and_shift_enter_the_rates() {
        let env = environment(&GridParameters {
            resolution: [8, 4, 4],
            guard: [2; 3],
            ..Default::default()
        });
        let local_grid = env.local_grid();
        let cell = MetricCell::new(2.0, Vector3::new(0.5, 0.0, 0.0), Matrix3::identity()).unwrap();
        let mut solver = FieldSolver::with_policies(
            &env,
            &SolverConfig::default(),
            Box::new(ZeroGradient),
            &UniformMetric(cell),
        )
        .unwrap();

        let data = SimData::from_fn(local_grid, |x| {
            FieldValues::new(Vector3::new(0.0, 0.0, x.x), Vector3::new(0.0, 0.0, 1.0 + x.x))
        });
        solver.push(&data);

        // E = α D + β × B = (0, -(1 + x)/2, 2x)
        // H = α B - β × D = (0, x/2, 2 (1 + x))
        for (index, _) in local_grid.strider().iter(local_grid.interior()) {
            assert_abs_diff_eq!(solver.charge_density()[index], 0.0, epsilon = 1e-12);
            assert_abs_diff_eq!(solver.db[index], Vector3::new(0.0, 2.0, 0.5), epsilon = 1e-12);
            assert_abs_diff_eq!(solver.dd[index], Vector3::new(0.0, -2.0, 0.5), epsilon = 1e-12);
        }
    }
}
