use std::{
    f64::consts::TAU,
    time::Duration,
};

use approx::assert_abs_diff_eq;
use ffe_solver::{
    FieldSolver,
    FieldValues,
    GridParameters,
    SimData,
    SimEnvironment,
    SolverConfig,
    comm::LocalCluster,
    device::CpuAccelerator,
    metric::{
        AnyMetric,
        KerrSchild,
    },
};
use nalgebra::{
    Point3,
    Vector3,
};

fn initial_field(x: &Point3<f64>) -> FieldValues {
    FieldValues::new(
        Vector3::new(0.0, 0.1 * (TAU * x.x).sin(), 0.05 * (TAU * x.y).cos()),
        Vector3::new(
            0.2 * (TAU * x.z).cos(),
            0.0,
            1.0 + 0.1 * (TAU * x.x).sin(),
        ),
    )
}

/// Runs all ranks and collects their interiors into one global array, x
/// fastest.
fn run(
    parameters: &GridParameters,
    config: &SolverConfig,
    world_size: usize,
    steps: usize,
    init: fn(&Point3<f64>) -> FieldValues,
) -> Vec<FieldValues> {
    let communicators = LocalCluster::new(world_size)
        .with_receive_timeout(Some(Duration::from_secs(10)))
        .build();

    let ranks = std::thread::scope(|scope| {
        let handles = communicators
            .into_iter()
            .map(|communicator| {
                scope.spawn(move || {
                    let env =
                        SimEnvironment::new(parameters, communicator, &CpuAccelerator::default())
                            .unwrap();
                    let mut solver = FieldSolver::new(&env, config).unwrap();
                    let mut data = SimData::from_fn(env.local_grid(), init);
                    for _ in 0..steps {
                        solver.advance_step(&mut data).unwrap();
                    }

                    let local_grid = env.local_grid();
                    local_grid
                        .strider()
                        .iter(local_grid.interior())
                        .map(|(_, point)| {
                            (
                                local_grid.global_index(&point).unwrap(),
                                data.at(&point).unwrap(),
                            )
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect::<Vec<_>>();

        handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect::<Vec<_>>()
    });

    let [nx, ny, nz] = parameters.resolution;
    let mut global = vec![None; nx * ny * nz];
    for (point, values) in ranks.into_iter().flatten() {
        let cell = &mut global[point.x + nx * (point.y + ny * point.z)];
        assert!(cell.is_none(), "cell {point:?} owned twice");
        *cell = Some(values);
    }
    global
        .into_iter()
        .map(|values| values.expect("cell not owned by any rank"))
        .collect()
}

fn assert_decomposition_independent(
    parameters: &GridParameters,
    config: &SolverConfig,
    decompositions: &[(usize, [usize; 3])],
) {
    let reference = run(parameters, config, 1, 4, initial_field);

    for &(world_size, decomposition) in decompositions {
        let parameters = GridParameters {
            decomposition,
            ..parameters.clone()
        };
        let result = run(&parameters, config, world_size, 4, initial_field);

        for (a, b) in reference.iter().zip(&result) {
            assert_abs_diff_eq!(a.d, b.d, epsilon = 1e-12);
            assert_abs_diff_eq!(a.b, b.b, epsilon = 1e-12);
        }
    }
}

#[test]
fn result_does_not_depend_on_decomposition() {
    let parameters = GridParameters {
        resolution: [16, 8, 8],
        guard: [2; 3],
        periodic_boundary: [true, false, true],
        ..Default::default()
    };
    let config = SolverConfig {
        divergence_check_interval: 1,
        ..Default::default()
    };

    assert_decomposition_independent(
        &parameters,
        &config,
        &[(2, [2, 1, 1]), (2, [1, 1, 2]), (4, [2, 2, 1])],
    );
}

#[test]
fn curved_result_does_not_depend_on_decomposition() {
    // the hole sits in the middle of the box, between cell centers
    let parameters = GridParameters {
        resolution: [16, 8, 8],
        guard: [2; 3],
        lower: [-0.5; 3],
        periodic_boundary: [true, false, true],
        ..Default::default()
    };
    let config = SolverConfig {
        divergence_check_interval: 1,
        metric: AnyMetric::KerrSchild(KerrSchild::new(0.05, 0.5)),
        ..Default::default()
    };

    assert_decomposition_independent(&parameters, &config, &[(2, [2, 1, 1]), (2, [1, 1, 2])]);
}

#[test]
fn vacuum_wave_travels_at_light_speed() {
    const AMPLITUDE: f64 = 0.1;

    fn wave(x: &Point3<f64>, t: f64) -> FieldValues {
        let phase = (TAU * (x.x - t)).sin();
        FieldValues::new(
            Vector3::new(0.0, AMPLITUDE * phase, 0.0),
            Vector3::new(0.0, 0.0, 1.0 + AMPLITUDE * phase),
        )
    }

    let parameters = GridParameters {
        resolution: [64, 1, 1],
        guard: [2; 3],
        periodic_boundary: [true, false, false],
        ..Default::default()
    };
    let config = SolverConfig::default();
    let steps = 20;
    let dt = config.cfl / 64.0;

    let result = run(&parameters, &config, 2, steps, |x| wave(x, 0.0));

    let t = steps as f64 * dt;
    for (i, values) in result.iter().enumerate() {
        let x = Point3::new((i as f64 + 0.5) / 64.0, 0.5, 0.5);
        let expected = wave(&x, t);
        assert_abs_diff_eq!(values.d, expected.d, epsilon = 1e-4);
        assert_abs_diff_eq!(values.b, expected.b, epsilon = 1e-4);
    }
}
