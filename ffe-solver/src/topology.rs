//! Cartesian process topology
//!
//! The ranks of a communicator are arranged on a 3D process grid. Every rank
//! owns one block of the global grid and talks to at most six neighbors, one
//! across each face of its block. Faces on the edge of a non-periodic axis are
//! physical boundaries and have no neighbor.

use arrayvec::ArrayVec;

use crate::{
    error::ConfigurationError,
    grid::{
        Axis,
        Face,
        Grid,
        LocalGrid,
    },
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Topology {
    rank: usize,
    world_size: usize,
    dims: [usize; 3],
    coords: [usize; 3],
    periodic: [bool; 3],
    /// Indexed by [`Face::index`]. `None` marks a physical boundary.
    neighbors: [Option<usize>; 6],
}

impl Topology {
    pub fn new(
        rank: usize,
        world_size: usize,
        dims: [usize; 3],
        periodic: [bool; 3],
    ) -> Result<Self, ConfigurationError> {
        if world_size == 0 {
            return Err(ConfigurationError::EmptyWorld);
        }
        if rank >= world_size {
            return Err(ConfigurationError::InvalidRank { rank, world_size });
        }
        if dims.iter().product::<usize>() != world_size {
            return Err(ConfigurationError::Factorization {
                world_size,
                fixed: dims,
            });
        }

        let coords = coords_of(&dims, rank);

        let mut topology = Self {
            rank,
            world_size,
            dims,
            coords,
            periodic,
            neighbors: [None; 6],
        };

        for face in Face::all() {
            topology.neighbors[face.index()] = topology.shift(face.axis, face.side.displacement());
        }

        Ok(topology)
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn world_size(&self) -> usize {
        self.world_size
    }

    /// Number of processes along each axis
    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    /// Position of this rank on the process grid
    pub fn coords(&self) -> [usize; 3] {
        self.coords
    }

    pub fn is_periodic(&self, axis: Axis) -> bool {
        self.periodic[axis.index()]
    }

    pub fn neighbor(&self, face: Face) -> Option<usize> {
        self.neighbors[face.index()]
    }

    pub fn is_boundary(&self, face: Face) -> bool {
        self.neighbors[face.index()].is_none()
    }

    /// Boundary flags in [`Face::index`] order.
    pub fn boundary_flags(&self) -> [bool; 6] {
        self.neighbors.map(|neighbor| neighbor.is_none())
    }

    pub fn physical_boundaries(&self) -> ArrayVec<Face, 6> {
        Face::all().filter(|face| self.is_boundary(*face)).collect()
    }

    /// Rank sitting at `coords` on the process grid.
    pub fn rank_of(&self, coords: [usize; 3]) -> Option<usize> {
        (0..3)
            .all(|i| coords[i] < self.dims[i])
            .then(|| rank_of(&self.dims, &coords))
    }

    /// Rank displaced by `displacement` processes along `axis`, wrapping around
    /// on periodic axes. Returns `None` if the displacement leaves a
    /// non-periodic process grid.
    pub fn shift(&self, axis: Axis, displacement: isize) -> Option<usize> {
        let i = axis.index();
        let n = self.dims[i] as isize;
        let mut c = self.coords[i] as isize + displacement;

        if self.periodic[i] {
            c = c.rem_euclid(n);
        }
        else if c < 0 || c >= n {
            return None;
        }

        let mut coords = self.coords;
        coords[i] = c as usize;
        Some(rank_of(&self.dims, &coords))
    }
}

/// Row-major embedding, z varies fastest.
fn rank_of(dims: &[usize; 3], coords: &[usize; 3]) -> usize {
    (coords[0] * dims[1] + coords[1]) * dims[2] + coords[2]
}

fn coords_of(dims: &[usize; 3], rank: usize) -> [usize; 3] {
    let z = rank % dims[2];
    let y = (rank / dims[2]) % dims[1];
    let x = rank / (dims[1] * dims[2]);
    [x, y, z]
}

/// Splits `world_size` processes over 3 axes as evenly as possible.
///
/// Non-zero entries in `fixed` are kept as they are. The remaining process
/// count is distributed over the free axes, which end up in non-increasing
/// order (same as `MPI_Dims_create`).
pub fn dims_create(world_size: usize, fixed: [usize; 3]) -> Result<[usize; 3], ConfigurationError> {
    if world_size == 0 {
        return Err(ConfigurationError::EmptyWorld);
    }

    let error = || ConfigurationError::Factorization { world_size, fixed };

    let fixed_product: usize = fixed.iter().filter(|n| **n > 0).product();
    if world_size % fixed_product != 0 {
        return Err(error());
    }
    let mut remaining = world_size / fixed_product;

    let free = (0..3).filter(|i| fixed[*i] == 0).collect::<ArrayVec<usize, 3>>();
    if free.is_empty() {
        return if remaining == 1 { Ok(fixed) } else { Err(error()) };
    }

    // give the biggest prime factors to the axes with the fewest processes so far
    let mut factors = vec![];
    let mut p = 2;
    while remaining > 1 {
        if p * p > remaining {
            factors.push(remaining);
            break;
        }
        while remaining % p == 0 {
            factors.push(p);
            remaining /= p;
        }
        p += 1;
    }

    let mut counts = vec![1; free.len()];
    for factor in factors.into_iter().rev() {
        let smallest = counts
            .iter()
            .enumerate()
            .min_by_key(|(_, n)| **n)
            .map(|(i, _)| i)
            .unwrap_or_default();
        counts[smallest] *= factor;
    }
    counts.sort_unstable_by(|a, b| b.cmp(a));

    let mut dims = fixed;
    for (i, n) in free.into_iter().zip(counts) {
        dims[i] = n;
    }
    Ok(dims)
}

/// Decomposes the global grid and returns this rank's place in it.
///
/// Inactive axes (a single global cell) are never split.
pub fn setup_domain(
    rank: usize,
    world_size: usize,
    grid: &Grid,
) -> Result<(Topology, LocalGrid), ConfigurationError> {
    let mut fixed = grid.decomposition;
    for axis in Axis::ALL {
        let i = axis.index();
        if !grid.is_active(axis) {
            if fixed[i] > 1 {
                return Err(ConfigurationError::ReducedAxisSplit {
                    axis,
                    processes: fixed[i],
                });
            }
            fixed[i] = 1;
        }
    }

    let dims = dims_create(world_size, fixed)?;
    let topology = Topology::new(rank, world_size, dims, grid.periodic)?;
    let local_grid = LocalGrid::new(grid, &topology)?;

    tracing::debug!(
        rank,
        ?dims,
        coords = ?topology.coords(),
        boundaries = ?topology.physical_boundaries(),
        offset = ?local_grid.offset,
        resolution = ?local_grid.resolution,
        "domain decomposed"
    );

    Ok((topology, local_grid))
}

#[cfg(test)]
mod tests {
    use crate::{
        error::ConfigurationError,
        grid::{
            Axis,
            Face,
            Grid,
            GridParameters,
            Side,
        },
        topology::{
            Topology,
            dims_create,
            setup_domain,
        },
    };

    fn grid(resolution: [usize; 3], periodic: [bool; 3]) -> Grid {
        Grid::new(&GridParameters {
            resolution,
            guard: [2; 3],
            periodic_boundary: periodic,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn it_creates_balanced_dims() {
        assert_eq!(dims_create(1, [0; 3]).unwrap(), [1, 1, 1]);
        assert_eq!(dims_create(8, [0; 3]).unwrap(), [2, 2, 2]);
        assert_eq!(dims_create(12, [0; 3]).unwrap(), [3, 2, 2]);
        assert_eq!(dims_create(7, [0; 3]).unwrap(), [7, 1, 1]);
        assert_eq!(dims_create(36, [0; 3]).unwrap(), [4, 3, 3]);
        assert_eq!(dims_create(6, [0, 0, 1]).unwrap(), [3, 2, 1]);
        assert_eq!(dims_create(4, [1, 0, 0]).unwrap(), [1, 2, 2]);
        assert_eq!(dims_create(8, [2, 0, 1]).unwrap(), [2, 4, 1]);
    }

    #[test]
    fn it_honors_fixed_axes() {
        assert!(matches!(
            dims_create(6, [4, 0, 0]),
            Err(ConfigurationError::Factorization { .. })
        ));
        assert!(matches!(
            dims_create(2, [1, 1, 1]),
            Err(ConfigurationError::Factorization { .. })
        ));
        assert_eq!(dims_create(2, [2, 1, 1]).unwrap(), [2, 1, 1]);
        assert_eq!(dims_create(0, [0; 3]), Err(ConfigurationError::EmptyWorld));
    }

    #[test]
    fn local_interiors_tile_the_global_grid() {
        for (world_size, resolution) in [
            (1, [4, 4, 4]),
            (2, [8, 4, 4]),
            (4, [8, 8, 4]),
            (6, [12, 8, 4]),
            (8, [8, 8, 8]),
            (12, [12, 12, 12]),
            (3, [12, 6, 1]),
        ] {
            let grid = grid(resolution, [false; 3]);
            let mut covered = vec![0usize; grid.num_cells()];

            for rank in 0..world_size {
                let (_, local) = setup_domain(rank, world_size, &grid).unwrap();
                assert_eq!(local.dims(), local.resolution + 2 * local.guard);

                for (_, point) in local.strider().iter(local.interior()) {
                    let global = local.global_index(&point).unwrap();
                    let index = global.x
                        + resolution[0] * (global.y + resolution[1] * global.z);
                    covered[index] += 1;
                }
            }

            assert!(
                covered.iter().all(|n| *n == 1),
                "gap or overlap for {world_size} processes on {resolution:?}"
            );
        }
    }

    #[test]
    fn local_grid_geometry() {
        let grid = Grid::new(&GridParameters {
            resolution: [8, 4, 4],
            guard: [2; 3],
            size: [2.0, 1.0, 1.0],
            lower: [-1.0, 0.0, 0.0],
            decomposition: [2, 1, 1],
            ..Default::default()
        })
        .unwrap();

        let (topology, local) = setup_domain(1, 2, &grid).unwrap();
        assert_eq!(topology.coords(), [1, 0, 0]);
        assert_eq!(local.resolution.x, 4);
        assert_eq!(local.dims().x, 8);
        assert_eq!(local.size.x, 1.0);
        assert_eq!(local.lower.x, 0.0);
        assert_eq!(local.offset.x, 4);
        assert_eq!(local.delta.x, 0.25);
    }

    #[test]
    fn neighbors_are_symmetric() {
        for periodic in [[false; 3], [true; 3], [true, false, true]] {
            let world_size = 12;
            let topologies = (0..world_size)
                .map(|rank| Topology::new(rank, world_size, [3, 2, 2], periodic).unwrap())
                .collect::<Vec<_>>();

            for topology in &topologies {
                for face in Face::all() {
                    if let Some(neighbor) = topology.neighbor(face) {
                        assert_eq!(
                            topologies[neighbor].neighbor(face.opposite()),
                            Some(topology.rank()),
                            "rank {} face {face}",
                            topology.rank()
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn boundary_flags_on_non_periodic_edges() {
        let world_size = 8;
        for rank in 0..world_size {
            let topology = Topology::new(rank, world_size, [2, 2, 2], [false; 3]).unwrap();
            let coords = topology.coords();
            for face in Face::all() {
                let c = coords[face.axis.index()];
                let at_edge = match face.side {
                    Side::Low => c == 0,
                    Side::High => c == 1,
                };
                assert_eq!(topology.is_boundary(face), at_edge);
                assert_eq!(topology.neighbor(face).is_some(), !at_edge);
            }
        }
    }

    #[test]
    fn single_process_is_its_own_periodic_neighbor() {
        let topology = Topology::new(0, 1, [1, 1, 1], [true, false, false]).unwrap();
        assert_eq!(topology.neighbor(Face::new(Axis::X, Side::Low)), Some(0));
        assert_eq!(topology.neighbor(Face::new(Axis::X, Side::High)), Some(0));
        assert!(topology.is_boundary(Face::new(Axis::Y, Side::Low)));
        assert_eq!(topology.physical_boundaries().len(), 4);
    }

    #[test]
    fn two_processes_wrap_around_on_periodic_axis() {
        let grid = Grid::new(&GridParameters {
            resolution: [8, 4, 4],
            guard: [2; 3],
            periodic_boundary: [true, false, false],
            decomposition: [2, 1, 1],
            ..Default::default()
        })
        .unwrap();

        for rank in 0..2 {
            let (topology, _) = setup_domain(rank, 2, &grid).unwrap();
            assert_eq!(topology.dims(), [2, 1, 1]);
            let other = 1 - rank;
            assert_eq!(topology.neighbor(Face::new(Axis::X, Side::Low)), Some(other));
            assert_eq!(topology.neighbor(Face::new(Axis::X, Side::High)), Some(other));
            let flags = topology.boundary_flags();
            assert!(!flags[0] && !flags[1]);
            assert!(flags[2..].iter().all(|flag| *flag));
        }
    }

    #[test]
    fn it_rejects_indivisible_resolution() {
        let grid = grid([9, 4, 4], [false; 3]);
        assert_eq!(
            setup_domain(0, 2, &grid).unwrap_err(),
            ConfigurationError::IndivisibleResolution {
                axis: Axis::X,
                resolution: 9,
                processes: 2
            }
        );
    }

    #[test]
    fn it_rejects_thin_subdomains() {
        let grid = Grid::new(&GridParameters {
            resolution: [4, 4, 4],
            guard: [2; 3],
            decomposition: [4, 1, 1],
            ..Default::default()
        })
        .unwrap();
        assert!(matches!(
            setup_domain(0, 4, &grid),
            Err(ConfigurationError::SubdomainTooThin { .. })
        ));
    }

    #[test]
    fn reduced_axes_are_not_split() {
        let grid = grid([16, 1, 1], [false; 3]);
        let (topology, local) = setup_domain(0, 4, &grid).unwrap();
        assert_eq!(topology.dims(), [4, 1, 1]);
        assert_eq!(local.resolution.y, 1);

        let grid = Grid::new(&GridParameters {
            resolution: [16, 1, 1],
            guard: [2; 3],
            decomposition: [0, 2, 0],
            ..Default::default()
        })
        .unwrap();
        assert!(matches!(
            setup_domain(0, 4, &grid),
            Err(ConfigurationError::ReducedAxisSplit { axis: Axis::Y, .. })
        ));
    }
}
