pub mod downloader;
pub mod lib_duckdb;
