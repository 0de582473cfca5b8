pub mod calories;
pub mod db;
pub mod error;
pub mod models;
pub mod queue;
pub mod resolver;
pub mod service;
pub mod storage;
