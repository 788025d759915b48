pub mod api;
pub mod auth;
pub mod collab;
pub mod config;
pub mod db;
pub mod docs;
pub mod error;
pub mod model;
pub mod routes;
pub mod store;
pub mod workflow;

#[cfg(test)]
mod testing;
