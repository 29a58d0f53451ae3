pub mod cluster;
pub mod config;
pub mod errors;
pub mod logging;
pub mod node;
pub mod orchestrator;
pub mod retry;
pub mod storage;
pub mod template;
