pub mod api;
pub mod cache;
pub mod clock;
pub mod db;
pub mod entity;
pub mod environment;
pub mod error;
pub mod fetcher;
pub mod logging;
pub mod scheduler;
pub mod store;

pub const TARGET_WEB_REQUEST: &str = "web_request";
pub const TARGET_DB: &str = "db_query";
pub const TARGET_CACHE: &str = "cache";
pub const TARGET_SCHEDULER: &str = "scheduler";
pub const TARGET_MATCH: &str = "matching";
