pub mod cache_store;
pub mod freshness;
pub mod history;
pub mod ports;
pub mod proxy_handler;
