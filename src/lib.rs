//! Streamer Ratings — chat-driven registration and title ratings.

pub mod api;
pub mod catalog;
pub mod channels;
pub mod config;
pub mod dialogue;
pub mod error;
pub mod store;
pub mod verify;
