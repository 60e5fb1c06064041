pub mod achievements;
pub mod auth;
pub mod db;
pub mod goals;
pub mod models;
pub mod pace;
pub mod records;
pub mod review;
pub mod service;
pub mod steps;
pub mod streak;
pub mod summary;
pub mod weight;
