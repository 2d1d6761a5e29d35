//! Sync Service - incremental account and transaction sync from an aggregation provider.

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod provider;
pub mod services;
pub mod startup;
pub mod store;
pub mod sync;
