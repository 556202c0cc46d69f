pub mod slide;

pub use slide::{ExtractedSlide, RemovalItem, RemovalReason};
