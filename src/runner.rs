use std::time::Instant;

use color_eyre::eyre::{
    Context,
    Error,
    bail,
    eyre,
};
use ffe_solver::{
    FieldSolver,
    Grid,
    SimData,
    SimEnvironment,
    comm::{
        Communicator,
        LocalCluster,
        LocalCommunicator,
    },
    device::{
        Accelerator,
        CpuAccelerator,
    },
    solver::memory_required,
    topology::setup_domain,
};

use crate::config::SimulationConfig;

pub fn format_size<T>(value: T) -> humansize::SizeFormatter<T, humansize::FormatSizeOptions>
where
    T: humansize::ToF64 + humansize::Unsigned,
{
    humansize::SizeFormatter::new(value, humansize::BINARY)
}

/// State of one rank after its last step.
#[derive(Clone, Copy, Debug)]
pub struct RankSummary {
    pub rank: usize,
    pub steps: usize,
    pub time: f64,
    pub energy: f64,
    pub max_degeneracy: f64,
}

/// Runs all ranks of the simulation in this process, one thread per rank.
pub fn run(config: &SimulationConfig) -> Result<Vec<RankSummary>, Error> {
    let run_config = &config.run;

    match run_config.threads_per_device {
        None => run_with_accelerator(config, &CpuAccelerator::new(run_config.devices)),
        Some(num_threads) if num_threads <= 1 => {
            tracing::debug!(
                num_threads,
                "switching to single-threaded devices, because threads_per_device <= 1"
            );
            run_with_accelerator(config, &CpuAccelerator::new(run_config.devices))
        }
        Some(num_threads) => {
            #[cfg(not(feature = "multi-threading"))]
            {
                let _ = num_threads;
                tracing::warn!("Compiled without rayon feature. Falling back to single-threaded");
                run_with_accelerator(config, &CpuAccelerator::new(run_config.devices))
            }

            #[cfg(feature = "multi-threading")]
            {
                tracing::debug!(num_threads, "using thread pool devices");
                run_with_accelerator(
                    config,
                    &ffe_solver::device::ThreadPoolAccelerator::new(
                        run_config.devices,
                        Some(num_threads),
                    ),
                )
            }
        }
    }
}

fn run_with_accelerator<A>(
    config: &SimulationConfig,
    accelerator: &A,
) -> Result<Vec<RankSummary>, Error>
where
    A: Accelerator + Sync,
{
    let run_config = &config.run;
    let time_start = Instant::now();

    let grid = Grid::new(&config.grid)?;
    let (topology, local_grid) = setup_domain(0, run_config.ranks, &grid)?;

    let memory_required = memory_required(&local_grid) * run_config.ranks;
    let memory_required_str = format_size(memory_required).to_string();
    tracing::info!(
        ranks = run_config.ranks,
        dims = ?topology.dims(),
        local_resolution = ?local_grid.resolution,
        devices = accelerator.device_count(),
        memory_required = memory_required_str,
        "starting simulation"
    );

    if let Some(memory_limit) = run_config.memory_limit
        && memory_required > memory_limit
    {
        bail!(
            "too much memory required: {memory_required_str} > {}",
            format_size(memory_limit)
        );
    }

    let communicators = LocalCluster::new(run_config.ranks)
        .with_receive_timeout(run_config.receive_timeout())
        .build();

    let results = std::thread::scope(|scope| {
        let mut handles = Vec::with_capacity(communicators.len());
        for (rank, communicator) in communicators.into_iter().enumerate() {
            let handle = std::thread::Builder::new()
                .name(format!("rank-{rank}"))
                .spawn_scoped(scope, move || run_rank(config, communicator, accelerator))
                .with_context(|| format!("Could not spawn thread for rank {rank}"))?;
            handles.push((rank, handle));
        }

        let results = handles
            .into_iter()
            .map(|(rank, handle)| {
                handle
                    .join()
                    .unwrap_or_else(|_| Err(eyre!("Thread of rank {rank} panicked")))
            })
            .collect::<Vec<_>>();

        Ok::<_, Error>(results)
    })?;

    let mut summaries = Vec::with_capacity(results.len());
    let mut first_error: Option<Error> = None;
    for (rank, result) in results.into_iter().enumerate() {
        match result {
            Ok(summary) => summaries.push(summary),
            Err(error) => {
                tracing::error!(rank, "{error:#}");
                // a failing rank makes its neighbors fail to communicate, so report the
                // root cause rather than the first communication error
                if first_error.as_ref().is_none_or(|first| {
                    is_communication_error(first) && !is_communication_error(&error)
                }) {
                    first_error = Some(error);
                }
            }
        }
    }

    if let Some(error) = first_error {
        return Err(error);
    }

    tracing::info!(
        time_elapsed = ?time_start.elapsed(),
        "simulation finished"
    );

    Ok(summaries)
}

fn run_rank<A>(
    config: &SimulationConfig,
    communicator: LocalCommunicator,
    accelerator: &A,
) -> Result<RankSummary, Error>
where
    A: Accelerator,
{
    let rank = communicator.rank();
    let run_config = &config.run;

    let env = SimEnvironment::new(&config.grid, communicator, accelerator)
        .with_context(|| format!("Could not set up rank {rank}"))?;
    let mut solver = FieldSolver::new(&env, &config.solver)
        .with_context(|| format!("Could not create solver for rank {rank}"))?;

    let local_grid = env.local_grid();
    let mut data = SimData::from_fn(local_grid, |x| config.initial.evaluate(env.grid(), x));

    for _ in 0..run_config.steps {
        solver
            .advance_step(&mut data)
            .with_context(|| format!("Rank {rank} failed at step {}", solver.step()))?;

        if run_config.log_interval > 0 && solver.step() % run_config.log_interval == 0 {
            tracing::info!(
                rank,
                step = solver.step(),
                time = solver.time(),
                energy = data.energy(local_grid),
                max_degeneracy = data.max_degeneracy(local_grid),
                "progress"
            );
        }
    }

    Ok(RankSummary {
        rank,
        steps: solver.step(),
        time: solver.time(),
        energy: data.energy(local_grid),
        max_degeneracy: data.max_degeneracy(local_grid),
    })
}

fn is_communication_error(error: &Error) -> bool {
    matches!(
        error.downcast_ref::<ffe_solver::Error>(),
        Some(ffe_solver::Error::Communication(_))
    )
}

#[cfg(test)]
mod tests {
    use ffe_solver::{
        GridParameters,
        grid::Axis,
    };

    use crate::{
        config::{
            RunConfig,
            SimulationConfig,
        },
        initial::InitialField,
        runner::run,
    };

    fn wave_config(ranks: usize) -> SimulationConfig {
        SimulationConfig {
            grid: GridParameters {
                resolution: [16, 4, 1],
                guard: [2; 3],
                periodic_boundary: [true, true, false],
                ..Default::default()
            },
            initial: InitialField::Wave {
                amplitude: 0.1,
                wavelength_axis: Axis::X,
            },
            run: RunConfig {
                ranks,
                steps: 3,
                log_interval: 1,
                receive_timeout: Some(10.0),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn it_runs_two_ranks() {
        let summaries = run(&wave_config(2)).unwrap();

        assert_eq!(summaries.len(), 2);
        for (rank, summary) in summaries.iter().enumerate() {
            assert_eq!(summary.rank, rank);
            assert_eq!(summary.steps, 3);
            assert!(summary.time > 0.0);
            assert!(summary.energy > 0.0);
            assert!(summary.max_degeneracy < 1.0);
        }
    }

    #[test]
    fn memory_limit_is_enforced() {
        let mut config = wave_config(1);
        config.run.memory_limit = Some(1024);
        let error = run(&config).unwrap_err();
        assert!(error.to_string().contains("too much memory required"));
    }
}
