pub mod health;
pub mod registry;
pub mod statistics;

pub use health::WorkerHealthTracker;
pub use registry::WorkerRegistry;
pub use statistics::LbStatisticsRepository;
