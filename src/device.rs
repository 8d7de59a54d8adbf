use anyhow::Result;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

/// Where an operator runs its integer matmul.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Device {
    /// Single threaded, on the caller's thread.
    Cpu,
    /// Rows fanned out over a rayon pool of `threads` workers.
    CpuParallel { threads: usize },
}

impl Device {
    pub fn is_parallel(&self) -> bool { matches!(self, Device::CpuParallel { threads } if *threads > 1) }

    pub fn threads(&self) -> usize {
        match self {
            Device::Cpu => 1,
            Device::CpuParallel { threads } => (*threads).max(1),
        }
    }

    /// Rayon pool with exactly [`Device::threads`] workers, shared by every
    /// operator asking for the same count. `None` for sequential devices, or
    /// when the pool cannot be built (callers then use the global pool).
    pub fn pool(&self) -> Option<Arc<rayon::ThreadPool>> {
        static POOLS: OnceLock<Mutex<HashMap<usize, Arc<rayon::ThreadPool>>>> = OnceLock::new();
        if !self.is_parallel() {
            return None;
        }
        let threads = self.threads();
        let mut pools = POOLS.get_or_init(Default::default).lock().ok()?;
        if let Some(pool) = pools.get(&threads) {
            return Some(pool.clone());
        }
        match rayon::ThreadPoolBuilder::new().num_threads(threads).build() {
            Ok(pool) => {
                info!("Built rayon pool with {} threads", threads);
                let pool = Arc::new(pool);
                pools.insert(threads, pool.clone());
                Some(pool)
            }
            Err(e) => {
                warn!("Failed to build {}-thread pool, falling back to the global pool: {}", threads, e);
                None
            }
        }
    }
}

/// Automatically detect and return the best available device
pub fn get_optimal_device() -> (Device, String) {
    let threads = rayon::current_num_threads();
    if threads > 1 {
        let device = Device::CpuParallel { threads };
        let name = format!("CPU (rayon threads: {})", threads);
        info!("Using parallel CPU device: {}", name);
        (device, name)
    } else {
        info!("Using CPU device");
        (Device::Cpu, "CPU".to_string())
    }
}

/// Get device by thread count; 0 means "whatever the global pool has".
pub fn get_device_by_threads(threads: usize) -> Result<Device> {
    match threads {
        0 => Ok(get_optimal_device().0),
        1 => Ok(Device::Cpu),
        n => {
            info!("Using parallel CPU device with {} threads", n);
            Ok(Device::CpuParallel { threads: n })
        }
    }
}
