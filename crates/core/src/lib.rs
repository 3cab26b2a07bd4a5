pub mod clock;
pub mod config;
pub mod errors;
pub mod logging;
pub mod traits;

pub use clock::{system_clock, ManualClock, SharedClock, SystemClock, TimeSource};
pub use config::AppConfig;
pub use errors::{BrokerError, BrokerResult};
pub use logging::init_logging;
pub use traits::DistributedLock;
