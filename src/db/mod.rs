mod alias;
pub mod core;
mod entity;
mod news;
mod schema;

pub use self::core::Database;
