pub mod schedule;
pub mod scheduler;
pub mod store;

pub use schedule::{config_id_from_schedule_id, new_schedule_id, ScheduleInstance, Trigger};
pub use scheduler::{Scheduler, SchedulerConfig};
pub use store::ScheduleRepository;
