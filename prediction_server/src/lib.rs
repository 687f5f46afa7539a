pub mod engine;
pub mod error;
pub mod misc;
pub mod monitoring;
pub mod registry;
pub mod routes;
pub mod server;
pub mod state;
