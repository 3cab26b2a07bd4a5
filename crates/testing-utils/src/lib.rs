//! Broker测试工具
//!
//! 各crate测试共用的替身实现、数据构建器和等待辅助函数。
//!
//! ```toml
//! [dev-dependencies]
//! broker-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod helpers;
pub mod mocks;

pub use builders::*;
pub use helpers::*;
pub use mocks::*;
