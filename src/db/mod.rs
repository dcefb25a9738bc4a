pub mod destination;
pub mod loader;
pub mod null_marker;
pub mod registry;
pub mod scanner;
pub mod schema;
pub mod table_config;
