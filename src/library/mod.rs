//! Local media index and its on-disk cache

pub mod cache;
pub mod index;

pub use index::{is_media_path, normalize_track_key, LocalMediaIndex};
