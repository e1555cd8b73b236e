//! HTTP surface of the dairy AI prediction service

pub mod api;
pub mod config;
