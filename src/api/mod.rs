pub mod extractor;
pub mod fingerprint;
pub mod models;
