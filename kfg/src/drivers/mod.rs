pub mod env;
pub mod json;
pub mod sqlite;

pub use env::EnvDriver;
pub use json::JsonDriver;
pub use sqlite::SqliteDriver;
