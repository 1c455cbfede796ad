#![allow(clippy::uninlined_format_args)]

pub mod api;
pub mod app;
pub mod collections;
pub mod config;
pub mod data;
pub mod search;
pub mod session;
pub mod stats;
pub mod storage;
pub mod viewtrack;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use app::App;
