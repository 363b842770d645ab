//! Terminal front end: prompts, progress rendering, and the sink that
//! downloads and archive rebuilds report into.

pub mod console;
pub mod progress;
pub mod prompt;

pub use console::ConsoleProgress;
pub use progress::{NullSink, Progress, ProgressSink};
