pub mod auth;
pub mod config;
pub mod db;
pub mod http;
pub mod model;
pub mod ops;
pub mod output;
pub mod paths;
pub mod service;
