use std::ops::{
    Bound,
    Index,
    IndexMut,
    Range,
    RangeBounds,
};

use nalgebra::{
    Point3,
    Vector3,
    Vector4,
};

use crate::grid::Axis;

/// Per-cell storage for a local sub-grid, guards included.
///
/// The lattice doesn't know its own shape. All point-based access goes through
/// a [`Strider`], so that many lattices of the same grid can share one.
#[derive(Clone, Debug, PartialEq)]
pub struct Lattice<T> {
    data: Box<[T]>,
}

impl<T> Lattice<T>
where
    T: Default,
{
    pub fn from_default(strider: &Strider) -> Self {
        Self::from_fn(strider, |_, _| Default::default())
    }
}

impl<T> Lattice<T>
where
    T: Clone,
{
    /// Copies all values from `other`. Both lattices must have the same
    /// length.
    pub fn copy_from(&mut self, other: &Lattice<T>) {
        self.data.clone_from_slice(&other.data);
    }
}

impl<T> Lattice<T> {
    pub fn from_fn(strider: &Strider, mut init: impl FnMut(usize, Point3<usize>) -> T) -> Self {
        // instead of asking the strider to iterate for us, we go over the whole
        // buffer, so no cell is left out.
        let data = (0..strider.len())
            .map(|index| init(index, strider.point_unchecked(index)))
            .collect();
        Self { data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn get_point(&self, strider: &Strider, point: &Point3<usize>) -> Option<&T> {
        let index = strider.index(point)?;
        Some(&self.data[index])
    }

    pub fn iter<'a>(
        &'a self,
        strider: &Strider,
        range: impl RangeBounds<Point3<usize>>,
    ) -> impl Iterator<Item = (usize, Point3<usize>, &'a T)> + 'a {
        strider
            .iter(range)
            .map(|(index, point)| (index, point, &self.data[index]))
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }
}

impl<T> Index<usize> for Lattice<T> {
    type Output = T;

    fn index(&self, index: usize) -> &Self::Output {
        &self.data[index]
    }
}

impl<T> IndexMut<usize> for Lattice<T> {
    fn index_mut(&mut self, index: usize) -> &mut Self::Output {
        &mut self.data[index]
    }
}

/// Maps between lattice points and linear buffer indices.
///
/// x varies fastest, then y, then z.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Strider {
    strides: Vector4<usize>,
    size: Vector3<usize>,
}

impl Strider {
    pub fn new(size: &Vector3<usize>) -> Self {
        Self {
            strides: strides_for_size(size),
            size: *size,
        }
    }

    pub fn point_unchecked(&self, mut index: usize) -> Point3<usize> {
        let z = index / self.strides.z;
        index %= self.strides.z;
        let y = index / self.strides.y;
        index %= self.strides.y;
        let x = index / self.strides.x;
        Point3::new(x, y, z)
    }

    pub fn point(&self, index: usize) -> Option<Point3<usize>> {
        (index < self.strides.w).then(|| self.point_unchecked(index))
    }

    pub fn index_unchecked(&self, point: &Point3<usize>) -> usize {
        point.coords.dot(&self.strides.xyz())
    }

    pub fn index(&self, point: &Point3<usize>) -> Option<usize> {
        self.is_inside(point).then(|| self.index_unchecked(point))
    }

    /// Distance in the linear buffer between two cells that are neighbors
    /// along `axis`.
    pub fn stride(&self, axis: Axis) -> usize {
        self.strides[axis.index()]
    }

    pub fn size(&self) -> &Vector3<usize> {
        &self.size
    }

    pub fn len(&self) -> usize {
        self.strides.w
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self, range: impl RangeBounds<Point3<usize>>) -> StriderIter {
        StriderIter {
            points: iter_points(range, self.size),
            strider: *self,
        }
    }

    fn is_inside(&self, point: &Point3<usize>) -> bool {
        point.x < self.size.x && point.y < self.size.y && point.z < self.size.z
    }
}

#[derive(Clone, Copy, Debug)]
pub struct StriderIter {
    points: PointIter,
    strider: Strider,
}

impl Iterator for StriderIter {
    type Item = (usize, Point3<usize>);

    fn next(&mut self) -> Option<Self::Item> {
        let point = self.points.next()?;
        let index = self.strider.index_unchecked(&point);
        Some((index, point))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.points.size_hint()
    }
}

// the where bound is just so we get a compiler error if PointIter happens to be
// not an ExactSizeIterator anymore.
impl ExactSizeIterator for StriderIter where PointIter: ExactSizeIterator {}

pub fn strides_for_size(size: &Vector3<usize>) -> Vector4<usize> {
    let mut strides = Vector4::zeros();
    strides.x = 1;
    strides.y = strides.x * size.x;
    strides.z = strides.y * size.y;
    strides.w = strides.z * size.z;
    strides
}

pub fn iter_points(range: impl RangeBounds<Point3<usize>>, size: Vector3<usize>) -> PointIter {
    let Range { start, end } = normalize_point_bounds(range, size);

    // an empty box along any axis yields nothing
    let is_empty = (0..3).any(|i| start[i] >= end[i]);

    PointIter {
        x0: start.coords,
        x1: end.coords,
        x: (!is_empty).then_some(start.coords),
    }
}

pub fn normalize_point_bounds(
    range: impl RangeBounds<Point3<usize>>,
    size: Vector3<usize>,
) -> Range<Point3<usize>> {
    let start = match range.start_bound() {
        Bound::Included(start) => *start,
        Bound::Excluded(start) => start + Vector3::repeat(1),
        Bound::Unbounded => Point3::origin(),
    };

    let end = match range.end_bound() {
        Bound::Included(end) => end + Vector3::repeat(1),
        Bound::Excluded(end) => *end,
        Bound::Unbounded => size.into(),
    };

    let end = start
        .coords
        .zip_map(&end.coords, |x0, x1| x0.max(x1))
        .into();

    Range { start, end }
}

#[derive(Clone, Copy, Debug)]
pub struct PointIter {
    x0: Vector3<usize>,
    x1: Vector3<usize>,
    x: Option<Vector3<usize>>,
}

impl PointIter {
    fn remaining(&self) -> usize {
        let Some(x) = self.x else {
            return 0;
        };
        let dx = self.x1 - self.x0;
        (self.x1.z - x.z - 1) * dx.y * dx.x + (self.x1.y - x.y - 1) * dx.x + (self.x1.x - x.x)
    }
}

impl Iterator for PointIter {
    type Item = Point3<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        let next = |mut x_n: Vector3<usize>| {
            x_n.x += 1;
            if x_n.x >= self.x1.x {
                x_n.x = self.x0.x;
                x_n.y += 1;
                if x_n.y >= self.x1.y {
                    x_n.y = self.x0.y;
                    x_n.z += 1;
                    if x_n.z >= self.x1.z {
                        return None;
                    }
                }
            }
            Some(x_n)
        };

        let x = self.x?;
        self.x = next(x);
        Some(Point3::from(x))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.remaining();
        (n, Some(n))
    }
}

impl ExactSizeIterator for PointIter {}

#[cfg(test)]
mod tests {
    use nalgebra::{
        Point3,
        Vector3,
    };

    use crate::lattice::{
        Lattice,
        Strider,
        iter_points,
    };

    #[test]
    fn it_iters_inclusive() {
        let x0 = Point3::new(1, 2, 3);
        let x1 = Point3::new(2, 3, 4);
        let points = iter_points(x0..=x1, x1.coords).collect::<Vec<_>>();
        assert_eq!(
            points,
            vec![
                Point3::new(1, 2, 3),
                Point3::new(2, 2, 3),
                Point3::new(1, 3, 3),
                Point3::new(2, 3, 3),
                Point3::new(1, 2, 4),
                Point3::new(2, 2, 4),
                Point3::new(1, 3, 4),
                Point3::new(2, 3, 4),
            ]
        );
    }

    #[test]
    fn it_iters_exclusive() {
        let x0 = Point3::new(1, 2, 3);
        let x1 = Point3::new(3, 4, 5);

        let points = iter_points(x0..x1, x1.coords).collect::<Vec<_>>();
        assert_eq!(points.len(), 8);
        assert_eq!(points[0], Point3::new(1, 2, 3));
        assert_eq!(points[7], Point3::new(2, 3, 4));
    }

    #[test]
    fn it_yields_nothing_for_flat_ranges() {
        let x0 = Point3::new(0, 2, 0);
        let x1 = Point3::new(4, 2, 4);
        assert_eq!(iter_points(x0..x1, Vector3::repeat(4)).count(), 0);
    }

    #[test]
    fn size_hint_matches_count() {
        let size = Vector3::new(5, 4, 3);
        let mut points = iter_points(Point3::new(1, 1, 0)..Point3::new(4, 3, 3), size);
        assert_eq!(points.len(), 18);
        points.next();
        points.next();
        points.next();
        assert_eq!(points.len(), 15);
        assert_eq!(points.count(), 15);
    }

    #[test]
    fn strider_round_trips() {
        let strider = Strider::new(&Vector3::new(3, 4, 5));
        assert_eq!(strider.len(), 60);
        for index in 0..strider.len() {
            let point = strider.point(index).unwrap();
            assert_eq!(strider.index(&point), Some(index));
        }
        assert_eq!(strider.point(60), None);
        assert_eq!(strider.index(&Point3::new(3, 0, 0)), None);
    }

    #[test]
    fn lattice_is_addressed_by_strider() {
        let strider = Strider::new(&Vector3::new(2, 3, 4));
        let lattice = Lattice::from_fn(&strider, |_, point| point.x + 10 * point.y + 100 * point.z);
        assert_eq!(
            lattice.get_point(&strider, &Point3::new(1, 2, 3)),
            Some(&321)
        );

        let sum: usize = lattice
            .iter(&strider, Point3::new(0, 0, 3)..)
            .map(|(_, _, value)| *value)
            .sum();
        // plane z=3: 6 cells at 300, x sums to 3, y sums to 60
        assert_eq!(sum, 1863);
    }
}
