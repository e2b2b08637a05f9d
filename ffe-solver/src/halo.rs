//! Guard cell exchange
//!
//! Axes are processed one after another (x, y, z), each over the full extent
//! of the other two axes including their guards. By the time z is exchanged,
//! the x and y guards already hold neighbor data, so edge and corner guards
//! are filled without diagonal messages.

use std::ops::Range;

use nalgebra::{
    Point3,
    Vector3,
};

use crate::{
    boundary::BoundaryCondition,
    comm::{
        Communicator,
        MessageTag,
    },
    error::CommunicationError,
    field::FieldValues,
    grid::{
        Axis,
        Face,
        LocalGrid,
        Side,
    },
    lattice::Lattice,
    topology::Topology,
};

/// Values per cell in a halo message: D and B.
const VALUES_PER_CELL: usize = 6;

/// Fills all guard cells of `d` and `b`.
///
/// Faces with a neighbor receive the neighbor's outermost interior slab.
/// Physical faces are filled by `boundary`. Inactive axes copy their single
/// interior plane into the guards.
pub(crate) fn exchange_halos<C>(
    communicator: &C,
    topology: &Topology,
    local_grid: &LocalGrid,
    boundary: &dyn BoundaryCondition,
    d: &mut Lattice<Vector3<f64>>,
    b: &mut Lattice<Vector3<f64>>,
) -> Result<(), CommunicationError>
where
    C: Communicator + ?Sized,
{
    for axis in Axis::ALL {
        if !local_grid.is_active(axis) {
            fill_inactive(local_grid, axis, d, b);
            continue;
        }

        // post all sends of this axis first
        for side in Side::ALL {
            let face = Face::new(axis, side);
            if let Some(neighbor) = topology.neighbor(face) {
                let payload = pack(local_grid, send_slab(local_grid, face), d, b);
                communicator.send(neighbor, MessageTag::halo(face.opposite()), payload)?;
            }
        }

        for side in Side::ALL {
            let face = Face::new(axis, side);
            if let Some(neighbor) = topology.neighbor(face) {
                let payload = communicator.receive(neighbor, MessageTag::halo(face))?;
                unpack(local_grid, guard_slab(local_grid, face), &payload, neighbor, d, b)?;
            }
            else {
                fill_boundary(local_grid, face, boundary, d, b);
            }
        }

        tracing::trace!(rank = topology.rank(), %axis, "exchanged halos");
    }

    Ok(())
}

/// Cell range along `axis` spanning the full extent of the other axes.
fn slab(local_grid: &LocalGrid, axis: Axis, along: Range<usize>) -> Range<Point3<usize>> {
    let i = axis.index();
    let mut start = Point3::origin();
    let mut end = Point3::from(local_grid.dims());
    start[i] = along.start;
    end[i] = along.end;
    start..end
}

/// Outermost interior cells next to `face`
fn send_slab(local_grid: &LocalGrid, face: Face) -> Range<Point3<usize>> {
    let i = face.axis.index();
    let g = local_grid.guard[i];
    let n = local_grid.dims()[i];
    match face.side {
        Side::Low => slab(local_grid, face.axis, g..2 * g),
        Side::High => slab(local_grid, face.axis, n - 2 * g..n - g),
    }
}

/// Guard cells behind `face`
fn guard_slab(local_grid: &LocalGrid, face: Face) -> Range<Point3<usize>> {
    let i = face.axis.index();
    let g = local_grid.guard[i];
    let n = local_grid.dims()[i];
    match face.side {
        Side::Low => slab(local_grid, face.axis, 0..g),
        Side::High => slab(local_grid, face.axis, n - g..n),
    }
}

fn pack(
    local_grid: &LocalGrid,
    range: Range<Point3<usize>>,
    d: &Lattice<Vector3<f64>>,
    b: &Lattice<Vector3<f64>>,
) -> Box<[f64]> {
    let cells = local_grid.strider().iter(range);
    let mut payload = Vec::with_capacity(cells.len() * VALUES_PER_CELL);
    for (index, _) in cells {
        payload.extend_from_slice(d[index].as_slice());
        payload.extend_from_slice(b[index].as_slice());
    }
    payload.into_boxed_slice()
}

fn unpack(
    local_grid: &LocalGrid,
    range: Range<Point3<usize>>,
    payload: &[f64],
    peer: usize,
    d: &mut Lattice<Vector3<f64>>,
    b: &mut Lattice<Vector3<f64>>,
) -> Result<(), CommunicationError> {
    let cells = local_grid.strider().iter(range);

    let expected = cells.len() * VALUES_PER_CELL;
    if payload.len() != expected {
        return Err(CommunicationError::SizeMismatch {
            peer,
            expected,
            received: payload.len(),
        });
    }

    for ((index, _), values) in cells.zip(payload.chunks_exact(VALUES_PER_CELL)) {
        d[index] = Vector3::new(values[0], values[1], values[2]);
        b[index] = Vector3::new(values[3], values[4], values[5]);
    }

    Ok(())
}

fn fill_boundary(
    local_grid: &LocalGrid,
    face: Face,
    boundary: &dyn BoundaryCondition,
    d: &mut Lattice<Vector3<f64>>,
    b: &mut Lattice<Vector3<f64>>,
) {
    let strider = local_grid.strider();
    let i = face.axis.index();
    let g = local_grid.guard[i];
    let n = local_grid.dims()[i];

    for (index, point) in strider.iter(guard_slab(local_grid, face)) {
        let k = point[i];
        let (depth, nearest, mirror) = match face.side {
            Side::Low => (g - k, g, 2 * g - k - 1),
            Side::High => (k + g + 1 - n, n - g - 1, 2 * (n - g) - k - 1),
        };

        let at = |coordinate: usize| {
            let mut point = point;
            point[i] = coordinate;
            let index = strider.index_unchecked(&point);
            FieldValues::new(d[index], b[index])
        };

        let values = boundary.guard_cell(face, depth, &at(nearest), &at(mirror));
        d[index] = values.d;
        b[index] = values.b;
    }
}

fn fill_inactive(
    local_grid: &LocalGrid,
    axis: Axis,
    d: &mut Lattice<Vector3<f64>>,
    b: &mut Lattice<Vector3<f64>>,
) {
    let strider = local_grid.strider();
    let i = axis.index();
    let g = local_grid.guard[i];
    let n = local_grid.dims()[i];
    if g == 0 {
        return;
    }

    for range in [slab(local_grid, axis, 0..g), slab(local_grid, axis, n - g..n)] {
        for (index, point) in strider.iter(range) {
            let mut source = point;
            source[i] = g;
            let source = strider.index_unchecked(&source);
            d[index] = d[source];
            b[index] = b[source];
        }
    }
}
