pub mod clock;
pub mod http_client;
pub mod memory_cache;
pub mod sqlite_store;
