// src/lib.rs
// Library interface for scope-scout
pub mod cli;
pub mod config;
pub mod database;
pub mod discovery;
pub mod filter;
pub mod health;
pub mod http;
pub mod platforms;
pub mod probe;
pub mod ratelimit;
pub mod scanner;
pub mod scheduler;
pub mod scope;
pub mod stats;
pub mod types;
pub mod urlutil;
