//! State module for tracking crawler runs and queued tasks
//!
//! # Components
//!
//! - `TaskState`: Lifecycle of a task in the durable queue
//! - `RunState`: Per-crawler last run, current run marker and counters
//! - `DueState`: Due report used by `list` (yes / no / off)

mod run_state;
mod task_state;

// Re-export main types
pub use run_state::{DueState, RunState};
pub use task_state::TaskState;
