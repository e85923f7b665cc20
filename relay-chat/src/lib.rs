pub mod generator;
pub mod handler;
pub mod metadata_refresh;
pub mod prompt;
pub mod repository;
pub mod retrieval;
pub mod router;

pub use generator::{Generator, GenError, PromptMessage, TokenChunk, TokenStream};
pub use handler::ChatMessageHandler;
pub use metadata_refresh::ConversationMetadataRefreshHandler;
pub use repository::ConversationRepository;
pub use retrieval::{RetrievalParams, Retriever};
pub use router::{classify_with_retry, IntentClassifier, RouterDecision};
