pub mod deduplicator;
pub mod detector;
pub mod diff_filter;
pub mod exclusion;
pub mod frame;
pub mod phash;
pub mod preprocess;
pub mod similarity;
pub mod state_machine;

pub use deduplicator::{DedupReport, SlideDeduplicator};
pub use detector::{AcceptedSlide, ChangeDetector, Decision, ExtractionStats, NoChangeReason};
pub use exclusion::{ExclusionEntry, ExclusionMatch, ExclusionRegistry};
pub use frame::{Frame, FrameInfo, SessionId, SlideFormat};
pub use phash::{hamming_distance_hex, phash, Fingerprint};
pub use similarity::{ssim, GlobalSsim, StructuralSimilarity};
