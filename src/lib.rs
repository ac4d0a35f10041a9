pub mod cache;
pub mod cluster;
pub mod config;
pub mod dashboard;
pub mod election;
pub mod error;
pub mod lock;
pub mod node;
pub mod ownership;
pub mod scheduler;
pub mod shutdown;
pub mod store;
pub mod tasks;
pub mod transport;
