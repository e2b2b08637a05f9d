use nalgebra::Point3;

use crate::lattice::{
    Lattice,
    Strider,
};

/// Defines how the data-parallel kernels (push, update, projection) iterate
/// over a lattice.
///
/// There is no dependency between cells inside one kernel, so an
/// implementation is free to visit them in any order and on any thread.
pub trait LatticeForEach: Send + Sync + 'static {
    fn for_each<T, F>(&self, strider: &Strider, lattice: &mut Lattice<T>, f: F)
    where
        T: Send + Sync,
        F: Fn(usize, Point3<usize>, &mut T) + Send + Sync;
}

/// Use single-threading
#[derive(Clone, Copy, Debug, Default)]
pub struct SingleThreaded;

impl LatticeForEach for SingleThreaded {
    fn for_each<T, F>(&self, strider: &Strider, lattice: &mut Lattice<T>, f: F)
    where
        T: Send + Sync,
        F: Fn(usize, Point3<usize>, &mut T) + Send + Sync,
    {
        lattice
            .as_mut_slice()
            .iter_mut()
            .enumerate()
            .for_each(|(index, value)| f(index, strider.point_unchecked(index), value))
    }
}

/// Use multi-threading
#[cfg(feature = "rayon")]
#[derive(Clone, Debug)]
pub struct MultiThreaded {
    thread_pool: Option<std::sync::Arc<rayon::ThreadPool>>,
}

#[cfg(feature = "rayon")]
impl LatticeForEach for MultiThreaded {
    fn for_each<T, F>(&self, strider: &Strider, lattice: &mut Lattice<T>, f: F)
    where
        T: Send + Sync,
        F: Fn(usize, Point3<usize>, &mut T) + Send + Sync,
    {
        use rayon::iter::{
            IndexedParallelIterator as _,
            IntoParallelRefMutIterator as _,
            ParallelIterator as _,
        };

        let mut f = || {
            lattice
                .as_mut_slice()
                .par_iter_mut()
                .enumerate()
                .for_each(|(index, value)| f(index, strider.point_unchecked(index), value))
        };

        if let Some(thread_pool) = &self.thread_pool {
            thread_pool.install(f);
        }
        else {
            f();
        }
    }
}

#[cfg(feature = "rayon")]
impl MultiThreaded {
    /// Use default number of threads (see [`rayon::current_num_threads`])
    pub fn from_default_thread_pool() -> Self {
        Self { thread_pool: None }
    }

    pub fn from_num_threads(num_threads: usize) -> Result<Self, rayon::ThreadPoolBuildError> {
        Ok(Self::from_thread_pool(
            rayon::ThreadPoolBuilder::new()
                .num_threads(num_threads)
                .build()?,
        ))
    }

    pub fn from_thread_pool(thread_pool: rayon::ThreadPool) -> Self {
        Self {
            thread_pool: Some(std::sync::Arc::new(thread_pool)),
        }
    }

    pub fn num_threads(&self) -> usize {
        self.thread_pool
            .as_ref()
            .map_or_else(rayon::current_num_threads, |thread_pool| {
                thread_pool.current_num_threads()
            })
    }
}

#[cfg(feature = "rayon")]
impl Default for MultiThreaded {
    fn default() -> Self {
        Self::from_default_thread_pool()
    }
}
