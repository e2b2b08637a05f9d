use std::{
    path::Path,
    time::Duration,
};

use color_eyre::eyre::{
    Context,
    Error,
};
use ffe_solver::{
    Grid,
    GridParameters,
    SolverConfig,
    topology::setup_domain,
};
use serde::{
    Deserialize,
    Serialize,
};

use crate::initial::InitialField;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub grid: GridParameters,

    #[serde(default)]
    pub solver: SolverConfig,

    #[serde(default)]
    pub initial: InitialField,

    #[serde(default)]
    pub run: RunConfig,
}

impl SimulationConfig {
    pub fn read(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        tracing::info!(path = %path.display(), "Reading config file");

        let toml = std::fs::read_to_string(path)
            .with_context(|| format!("Could not read config file: {}", path.display()))?;
        let config = toml::from_str(&toml)
            .with_context(|| format!("Invalid config file: {}", path.display()))?;

        Ok(config)
    }

    /// Checks everything that can be checked without spawning ranks.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.run.validate()?;

        let grid = Grid::new(&self.grid)?;
        // all ranks get the same local resolution, so rank 0 is enough
        setup_domain(0, self.run.ranks, &grid)?;

        self.solver.validate()?;
        self.solver.metric.validate()?;

        Ok(())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunConfig {
    /// Number of in-process ranks
    #[serde(default = "default_ranks")]
    pub ranks: usize,

    #[serde(default = "default_steps")]
    pub steps: usize,

    /// Number of devices the ranks are distributed over
    #[serde(default = "default_devices")]
    pub devices: usize,

    /// Threads per device. Unset or 1 runs every rank single-threaded.
    #[serde(default)]
    pub threads_per_device: Option<usize>,

    /// Log diagnostics every n steps. 0 only logs the final state.
    #[serde(default = "default_log_interval")]
    pub log_interval: usize,

    /// Seconds to wait for a halo from a neighbor before giving up.
    #[serde(default = "default_receive_timeout")]
    pub receive_timeout: Option<f64>,

    /// Refuse to run if the solvers would allocate more than this many bytes.
    #[serde(default)]
    pub memory_limit: Option<usize>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            ranks: default_ranks(),
            steps: default_steps(),
            devices: default_devices(),
            threads_per_device: None,
            log_interval: default_log_interval(),
            receive_timeout: default_receive_timeout(),
            memory_limit: None,
        }
    }
}

fn default_ranks() -> usize {
    1
}

fn default_steps() -> usize {
    100
}

fn default_devices() -> usize {
    1
}

fn default_log_interval() -> usize {
    10
}

fn default_receive_timeout() -> Option<f64> {
    Some(60.0)
}

impl RunConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ranks == 0 {
            return Err(ConfigError::Run {
                name: "ranks",
                reason: "at least one rank is required",
            });
        }
        if self.devices == 0 {
            return Err(ConfigError::Run {
                name: "devices",
                reason: "at least one device is required",
            });
        }
        if self.threads_per_device == Some(0) {
            return Err(ConfigError::Run {
                name: "threads_per_device",
                reason: "must be at least 1",
            });
        }
        if let Some(timeout) = self.receive_timeout
            && !(timeout.is_finite() && timeout > 0.0)
        {
            return Err(ConfigError::Run {
                name: "receive_timeout",
                reason: "must be a positive number of seconds",
            });
        }
        Ok(())
    }

    pub fn receive_timeout(&self) -> Option<Duration> {
        self.receive_timeout.map(Duration::from_secs_f64)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid run parameter `{name}`: {reason}")]
    Run {
        name: &'static str,
        reason: &'static str,
    },

    #[error(transparent)]
    Solver(#[from] ffe_solver::error::ConfigurationError),
}
