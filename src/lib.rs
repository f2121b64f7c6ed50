// Aggregate Manager - library root, shared by the binary and the tests

pub mod auth;
pub mod cli;
pub mod config;
pub mod converters;
pub mod error;
pub mod health;
pub mod http_client;
pub mod models;
pub mod report;
pub mod retry;
pub mod service;
