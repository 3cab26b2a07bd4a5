pub mod lock;

pub use lock::DistributedLock;
