//! Scrape dispatch service.
//!
//! Accepts URL-scrape jobs over HTTP, queues them on a Redis broker and runs
//! them on a pool of workers using either a static fetch or a headless
//! browser, with retries, cancellation and a result store for status lookups.

pub mod app_state;
pub mod config;
pub mod db;
pub mod models;
pub mod routes;
pub mod runtime;
pub mod services;
