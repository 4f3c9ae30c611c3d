pub mod rag;

pub use rag::RagRetrievalActor;
