pub mod pool;
pub mod schema;
pub mod users;
