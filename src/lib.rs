//! Tomato flower detection service
//!
//! Detects tomato flowers in images and videos, classifies each by growth
//! stage (bud, anthesis, post-anthesis), stores annotated results, and runs
//! long video jobs asynchronously in a bounded pool of worker processes.

pub mod app_state;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;
