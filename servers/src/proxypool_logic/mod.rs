pub mod admin;
pub mod config;
pub mod enhanced;
pub mod error;
pub mod model;
pub mod router;
pub mod routes;
pub mod state;
