pub mod backend;
pub mod composer;
pub mod error;
pub mod gate;
pub mod images;
pub mod letters;
pub mod logging;
pub mod memory;
pub mod provider;
pub mod stickers;
pub mod storage;
pub mod web;
