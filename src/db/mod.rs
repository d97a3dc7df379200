pub mod bulk;
pub mod pool;
pub mod queries;
pub mod schema;
pub mod sync_status;

pub use pool::{connect, health_check};
