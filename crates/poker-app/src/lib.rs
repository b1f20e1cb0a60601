// Library root: re-exports all modules so integration tests and the
// `planning-poker` binary can access the crate's public API.

pub mod config;
pub mod db;
pub mod export;
pub mod facilitator;
