pub mod app;
pub mod auth;
pub mod config;
pub mod dates;
pub mod db;
pub mod db_ops;
pub mod error;
pub mod generator;
pub mod handlers;
pub mod policy;
pub mod query;
pub mod storage;

pub use taskflow_models as models;
