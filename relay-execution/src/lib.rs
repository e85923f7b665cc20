pub mod model;
pub mod repository;

pub use model::{ExecutionRecord, ExecutionStats};
pub use repository::ExecutionService;
