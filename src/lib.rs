//! Historical-Figure Face Fusion Service
//!
//! This library provides the core functionality for facefuse: quota-limited
//! admission of face fusion jobs, bounded-concurrency calls against a remote
//! FaceFusion endpoint with structured retries, and scheduled expiry and
//! cleanup of generated artifacts in R2 storage.

pub mod app_state;
pub mod config;
pub mod db;
pub mod models;
pub mod routes;
pub mod services;
