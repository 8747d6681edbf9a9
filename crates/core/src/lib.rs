pub mod error;
pub mod knowledge;
pub mod models;
pub mod random;
pub mod template;

pub use error::EnquiryError;
pub use knowledge::{
    CategoryFallback, CollegeFacts, ContextTables, IntentSpec, IntentTable, KnowledgeBase,
    Vocabulary,
};
pub use models::*;
pub use random::SharedRng;
pub use template::render;
