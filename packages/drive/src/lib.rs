pub mod config;
pub mod database;
pub mod entity;
pub mod error;
pub mod index;
pub mod lock;
pub mod models;
pub mod reconcile;
pub mod repo;
pub mod service;
pub mod tree;
pub mod utils;

#[cfg(test)]
mod testing;

pub use error::DriveError;
pub use service::FileSystemService;
