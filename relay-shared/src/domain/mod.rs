pub mod conversation;
pub mod evidence;
pub mod invocation;
pub mod sse_event;
pub mod task_config;
pub mod task_kind;

pub use conversation::{Conversation, Message, Role};
pub use evidence::{EvidenceSource, RetrievedEvidence};
pub use invocation::{InvocationStatus, TaskInvocation};
pub use sse_event::{SseEnvelope, SseEvent, TokenUsage};
pub use task_config::{normalize_cron_expr, ExecutionPolicy, LifecycleStatus, Schedule, TaskConfiguration};
pub use task_kind::TaskKind;
