use crate::{
    comm::Communicator,
    device::{
        Accelerator,
        BoundDevice,
        bind_device,
    },
    error::Error,
    grid::{
        Grid,
        GridParameters,
        LocalGrid,
    },
    threading::{
        LatticeForEach,
        SingleThreaded,
    },
    topology::{
        Topology,
        setup_domain,
    },
};

/// Everything a rank needs to know about its place in the simulation.
///
/// Constructed once per rank. Solvers borrow it, so it can't be dropped while
/// a solver is alive.
#[derive(Debug)]
pub struct SimEnvironment<C, E = SingleThreaded> {
    grid: Grid,
    local_grid: LocalGrid,
    topology: Topology,
    communicator: C,
    device: BoundDevice<E>,
}

impl<C, E> SimEnvironment<C, E>
where
    C: Communicator,
    E: LatticeForEach,
{
    /// Decomposes the domain and binds a device.
    ///
    /// Fails before binding a device if the grid can't be decomposed over the
    /// communicator's ranks.
    pub fn new<A>(
        parameters: &GridParameters,
        communicator: C,
        accelerator: &A,
    ) -> Result<Self, Error>
    where
        A: Accelerator<Executor = E>,
    {
        let rank = communicator.rank();
        let world_size = communicator.size();

        let grid = Grid::new(parameters)?;
        let (topology, local_grid) = setup_domain(rank, world_size, &grid)?;
        let device = bind_device(accelerator, rank)?;

        tracing::info!(
            rank,
            world_size,
            dims = ?topology.dims(),
            coords = ?topology.coords(),
            local_resolution = ?local_grid.resolution,
            device = %device.name,
            "environment ready"
        );

        Ok(Self {
            grid,
            local_grid,
            topology,
            communicator,
            device,
        })
    }
}

impl<C, E> SimEnvironment<C, E> {
    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    pub fn local_grid(&self) -> &LocalGrid {
        &self.local_grid
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn communicator(&self) -> &C {
        &self.communicator
    }

    pub fn device(&self) -> &BoundDevice<E> {
        &self.device
    }

    pub fn executor(&self) -> &E {
        &self.device.executor
    }

    pub fn rank(&self) -> usize {
        self.topology.rank()
    }
}

impl<C, E> Drop for SimEnvironment<C, E> {
    fn drop(&mut self) {
        tracing::debug!(
            rank = self.topology.rank(),
            device = %self.device.name,
            "releasing environment"
        );
    }
}
