//! Route handler modules for the letter-vault HTTP API.

pub mod auth;
pub mod health;
pub mod letters;
pub mod stickers;
pub mod storage;
