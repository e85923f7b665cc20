pub mod handler;
pub mod pool;

pub use handler::{TaskHandler, TaskMessage};
pub use pool::{WorkerPool, WorkerPoolConfig};
