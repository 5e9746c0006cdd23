pub mod arbiter;
pub mod capacity;
pub mod config;
pub mod maintenance;
pub mod reservation;
pub mod sampler;
pub mod stats;

pub use arbiter::MemoryArbiter;
pub use capacity::{min_weight, CacheCapacityWeights};
pub use config::MemoryLimits;
pub use maintenance::{MaintenanceSignal, MaintenanceTask};
pub use reservation::{OperatorReservation, ReservationHolder};
pub use sampler::{
    MemorySampler, MemorySnapshot, SnapshotSource, SysinfoSource, DEFAULT_SAMPLE_INTERVAL,
};
pub use stats::{format_bytes, ArbiterStats, ArbiterStatsSnapshot};
