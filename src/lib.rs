pub mod config;
pub mod db;
pub mod error;
pub mod export;
pub mod fetch;
pub mod pages;
pub mod parser;
pub mod pipeline;
pub mod sink;
