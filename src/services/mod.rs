pub mod chunker;
pub mod compose;
pub mod download;
pub mod factory;
pub mod orchestrator;
pub mod url_resolver;
