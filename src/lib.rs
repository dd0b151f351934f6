//! Turns recipe links into scheduled Pinterest pins.
//!
//! A batch runs in two passes. The generation pass asks the AI service for
//! pin metadata and two photos per link and composes them into one image.
//! The publish pass uploads the finished images and produces the scheduling
//! spreadsheet.

pub mod ai;
pub mod compose;
pub mod config;
pub mod db;
pub mod export;
pub mod model;
pub mod pipeline;
pub mod publisher;
