// HTTP surface for the registration builder

pub mod auth;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod server;

pub use server::{engine_from_env, ApiServer};
