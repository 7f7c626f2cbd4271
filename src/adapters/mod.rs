// Adapters layer: concrete implementations for external systems (GitHub, storage, processes, mail).

pub mod github;
pub mod http;
pub mod notify;
pub mod runner;
pub mod storage;
