//! Thread-pool strategies

use pixclass_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// How many threads compute tiles
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessingMode {
    /// One worker thread
    Sequential,
    /// One worker per available core
    #[default]
    Parallel,
    /// A fixed number of workers
    ParallelWith(usize),
}

impl ProcessingMode {
    /// Number of worker threads this mode uses
    pub fn n_threads(&self) -> usize {
        match self {
            ProcessingMode::Sequential => 1,
            ProcessingMode::Parallel => num_cpus(),
            ProcessingMode::ParallelWith(n) => *n,
        }
    }

    /// Build a dedicated pool whose threads are named `<prefix>-<index>`.
    pub fn build_pool(&self, prefix: &str) -> Result<rayon::ThreadPool> {
        let threads = self.n_threads();
        if threads == 0 {
            return Err(Error::invalid_parameter("threads", threads, "must be > 0"));
        }
        let prefix = prefix.to_string();
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(move |i| format!("{prefix}-{i}"))
            .build()
            .map_err(|e| Error::Other(format!("failed to build thread pool: {e}")))
    }
}

/// Get the number of available CPU cores
pub fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or_else(|_| rayon::current_num_threads())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thread_counts() {
        assert_eq!(ProcessingMode::Sequential.n_threads(), 1);
        assert_eq!(ProcessingMode::ParallelWith(3).n_threads(), 3);
        assert!(ProcessingMode::Parallel.n_threads() >= 1);
    }

    #[test]
    fn test_build_pool() {
        let pool = ProcessingMode::ParallelWith(2).build_pool("tiles").unwrap();
        assert_eq!(pool.current_num_threads(), 2);
        assert!(ProcessingMode::ParallelWith(0).build_pool("tiles").is_err());
    }

    #[test]
    fn test_serde_round_trip() {
        let json = serde_json::to_string(&ProcessingMode::ParallelWith(4)).unwrap();
        assert_eq!(serde_json::from_str::<ProcessingMode>(&json).unwrap(), ProcessingMode::ParallelWith(4));
    }
}
