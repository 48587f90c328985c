pub mod auth;
pub mod gateway;
pub mod memory;
pub mod queue;
pub mod result_store;
pub mod retry;
pub mod scraper;
pub mod validation;
pub mod worker;
