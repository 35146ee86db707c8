pub mod api;
pub mod attribute;
pub mod config;
pub mod error;
pub mod node;
pub mod refresh;
pub mod scheduler;
pub mod select;
pub mod wire;
