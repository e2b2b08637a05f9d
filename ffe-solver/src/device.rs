//! Compute devices a rank can bind to
//!
//! A device hands out the executor the kernels are dispatched through. Ranks
//! are bound round-robin: rank `r` gets device `r mod device_count`.

use crate::{
    error::DeviceError,
    threading::{
        LatticeForEach,
        SingleThreaded,
    },
};

pub trait Accelerator {
    type Executor: LatticeForEach;

    fn device_count(&self) -> usize;

    fn device_name(&self, index: usize) -> String;

    fn bind(&self, index: usize) -> Result<Self::Executor, DeviceError>;
}

/// Single-threaded CPU "devices".
#[derive(Clone, Copy, Debug)]
pub struct CpuAccelerator {
    devices: usize,
}

impl CpuAccelerator {
    pub fn new(devices: usize) -> Self {
        Self { devices }
    }
}

impl Default for CpuAccelerator {
    fn default() -> Self {
        Self::new(1)
    }
}

impl Accelerator for CpuAccelerator {
    type Executor = SingleThreaded;

    fn device_count(&self) -> usize {
        self.devices
    }

    fn device_name(&self, index: usize) -> String {
        format!("cpu:{index}")
    }

    fn bind(&self, index: usize) -> Result<Self::Executor, DeviceError> {
        if index >= self.devices {
            return Err(DeviceError::NoDevice);
        }
        Ok(SingleThreaded)
    }
}

/// Each device is its own rayon thread pool.
#[cfg(feature = "rayon")]
#[derive(Clone, Copy, Debug)]
pub struct ThreadPoolAccelerator {
    devices: usize,

    /// Threads per pool. `None` uses rayon's default.
    threads_per_device: Option<usize>,
}

#[cfg(feature = "rayon")]
impl ThreadPoolAccelerator {
    pub fn new(devices: usize, threads_per_device: Option<usize>) -> Self {
        Self {
            devices,
            threads_per_device,
        }
    }
}

#[cfg(feature = "rayon")]
impl Accelerator for ThreadPoolAccelerator {
    type Executor = crate::threading::MultiThreaded;

    fn device_count(&self) -> usize {
        self.devices
    }

    fn device_name(&self, index: usize) -> String {
        match self.threads_per_device {
            Some(num_threads) => format!("thread-pool:{index} ({num_threads} threads)"),
            None => format!("thread-pool:{index}"),
        }
    }

    fn bind(&self, index: usize) -> Result<Self::Executor, DeviceError> {
        if index >= self.devices {
            return Err(DeviceError::NoDevice);
        }

        if let Some(num_threads) = self.threads_per_device {
            crate::threading::MultiThreaded::from_num_threads(num_threads).map_err(|error| {
                DeviceError::Bind {
                    index,
                    source: Box::new(error),
                }
            })
        }
        else {
            Ok(crate::threading::MultiThreaded::from_default_thread_pool())
        }
    }
}

/// A device bound to one rank.
#[derive(Clone, Debug)]
pub struct BoundDevice<E> {
    pub index: usize,
    pub name: String,
    pub executor: E,
}

pub fn bind_device<A>(accelerator: &A, rank: usize) -> Result<BoundDevice<A::Executor>, DeviceError>
where
    A: Accelerator,
{
    let device_count = accelerator.device_count();
    if device_count == 0 {
        return Err(DeviceError::NoDevice);
    }

    let index = rank % device_count;
    let executor = accelerator.bind(index)?;
    let name = accelerator.device_name(index);

    tracing::debug!(rank, index, %name, "bound device");

    Ok(BoundDevice {
        index,
        name,
        executor,
    })
}
