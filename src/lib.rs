pub mod api;
pub mod cli;
pub mod db;
pub mod progress;
pub mod quarter;
pub mod utils;
