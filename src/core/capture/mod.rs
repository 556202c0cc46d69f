pub mod collaborators;
pub mod scheduler;
pub mod session;
pub mod task;
pub mod worker;

pub use collaborators::{
    FrameSource, NoopMonitor, PlaybackMonitor, PlaybackSignals, SlideMetadata, SlideSink,
};
pub use scheduler::CaptureScheduler;
pub use session::{CaptureSession, Evaluation};
pub use task::{
    TaskCounters, TaskCounts, TaskEvent, TaskEventKind, TaskId, TaskSnapshot, TaskSpec, TaskState,
};
pub use worker::{PendingJob, WorkerPool};
