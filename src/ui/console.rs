//! In-place terminal renderer for progress snapshots.
//!
//! A background thread repaints the current line about once a second with
//! the latest snapshot. Work loops never block on the terminal; they only
//! swap the snapshot under a mutex.

use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crossterm::cursor::MoveToColumn;
use crossterm::terminal::{Clear, ClearType};
use crossterm::QueueableCommand;

use super::progress::{format_line, Progress, ProgressSink};

const PAINT_EVERY: Duration = Duration::from_secs(1);
const POLL: Duration = Duration::from_millis(100);

/// Progress sink that renders to stdout.
pub struct ConsoleProgress {
    shared: Arc<Shared>,
    ticker: Option<thread::JoinHandle<()>>,
}

#[derive(Default)]
struct Shared {
    latest: Mutex<Option<Progress>>,
    stop: AtomicBool,
}

impl ConsoleProgress {
    /// Spawn the render thread.
    pub fn start() -> Self {
        let shared = Arc::new(Shared::default());
        let ticker = {
            let shared = Arc::clone(&shared);
            thread::spawn(move || run_ticker(&shared))
        };
        Self {
            shared,
            ticker: Some(ticker),
        }
    }

    /// Stop the render thread after one final repaint.
    pub fn finish(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.shared.stop.store(true, Ordering::Relaxed);
        if let Some(ticker) = self.ticker.take() {
            let _ = ticker.join();
        }
    }
}

impl Drop for ConsoleProgress {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for ConsoleProgress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsoleProgress").finish_non_exhaustive()
    }
}

impl ProgressSink for ConsoleProgress {
    fn update(&self, progress: Progress) {
        if let Ok(mut latest) = self.shared.latest.lock() {
            *latest = Some(progress);
        }
    }
}

fn run_ticker(shared: &Shared) {
    let mut out = io::stdout();
    let mut drew = false;
    let mut last_paint: Option<Instant> = None;

    loop {
        let stopping = shared.stop.load(Ordering::Relaxed);
        let due = last_paint.map_or(true, |at| at.elapsed() >= PAINT_EVERY);
        if stopping || due {
            let snapshot = match shared.latest.lock() {
                Ok(guard) => (*guard).clone(),
                Err(_) => None,
            };
            if let Some(progress) = snapshot {
                paint(&mut out, &progress);
                drew = true;
                last_paint = Some(Instant::now());
            }
        }
        if stopping {
            break;
        }
        thread::sleep(POLL);
    }

    // Leave the last state on its own line instead of overwriting it.
    if drew {
        let _ = writeln!(out);
    }
}

fn paint(out: &mut io::Stdout, progress: &Progress) {
    let _ = out.queue(MoveToColumn(0));
    let _ = out.queue(Clear(ClearType::CurrentLine));
    let _ = write!(out, "{}", format_line(progress));
    let _ = out.flush();
}
