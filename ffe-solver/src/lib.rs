//! Distributed force-free electrodynamics on a Cartesian process grid.
//!
//! The crate is split along the two halves of the problem:
//!
//! - [`topology`] decomposes a global [`grid::Grid`] over the ranks of a
//!   [`comm::Communicator`] and figures out which faces of the local
//!   sub-domain are physical boundaries and which face a neighbor rank.
//! - [`solver::FieldSolver`] advances the local D and B fields with a
//!   low-storage Runge-Kutta scheme, exchanging guard cells with its neighbors
//!   before every stage and projecting the fields back onto the force-free
//!   manifold.
//!
//! Everything a rank needs for its lifetime is bundled in a
//! [`env::SimEnvironment`], which is created once and then lent to the solver.

#![warn(clippy::todo, unused_qualifications)]

pub mod boundary;
pub mod comm;
pub mod derivative;
pub mod device;
pub mod env;
pub mod error;
pub mod field;
pub mod grid;
mod halo;
pub mod lattice;
pub mod metric;
pub mod projection;
pub mod solver;
pub mod threading;
pub mod topology;

pub use crate::{
    env::SimEnvironment,
    error::Error,
    field::{
        FieldValues,
        SimData,
    },
    grid::{
        Grid,
        GridParameters,
        LocalGrid,
    },
    solver::{
        FieldSolver,
        SolverConfig,
    },
    topology::Topology,
};
