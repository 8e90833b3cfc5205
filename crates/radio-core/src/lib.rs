pub mod artwork;
pub mod catalog;
pub mod config;
pub mod error;
pub mod metadata;
pub mod platform;
pub mod playback;
pub mod protocol;
pub mod session;
pub mod state;
