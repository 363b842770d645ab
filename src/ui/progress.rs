//! Progress snapshots and the sink they are delivered to.
//!
//! Work loops push a fresh [`Progress`] value after every unit of work;
//! whoever renders them polls at its own pace and only ever sees the
//! latest state. Snapshots are display-only.

/// Width of the terminal progress bar in cells.
pub const BAR_WIDTH: usize = 24;

/// Latest state of the one in-flight unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    /// A file transfer
    Download {
        /// Install-relative path being written
        path: String,
        received: u64,
        /// Length reported by the server, when it sent one
        total: Option<u64>,
    },
    /// An archive being consolidated or extracted
    Rebuild {
        archive: String,
        done: usize,
        total: usize,
    },
}

impl Progress {
    /// Completion percentage, clamped to 0-100. Unknown totals read as 0.
    pub fn percent(&self) -> u8 {
        match self {
            Self::Download {
                received,
                total: Some(total),
                ..
            } if *total > 0 => ((received * 100) / total).min(100) as u8,
            Self::Download { .. } => 0,
            Self::Rebuild { done, total, .. } if *total > 0 => {
                ((done * 100) / total).min(100) as u8
            }
            Self::Rebuild { .. } => 0,
        }
    }
}

/// Receives snapshots from work loops. Implementations must be cheap and
/// non-blocking; they are called once per chunk or archive entry.
pub trait ProgressSink: Send + Sync {
    fn update(&self, progress: Progress);
}

/// Sink that drops everything. Used by tests and quiet paths.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ProgressSink for NullSink {
    fn update(&self, _progress: Progress) {}
}

/// Render one snapshot as a single terminal line.
pub fn format_line(progress: &Progress) -> String {
    match progress {
        Progress::Download {
            path,
            received,
            total,
        } => {
            let bar = format_progress_bar(*received, total.unwrap_or(0), BAR_WIDTH);
            let total_text = match total {
                Some(total) => format_size(*total),
                None => "?".to_string(),
            };
            format!(
                "{bar}  {:>3}%  {} / {total_text}  {path}",
                progress.percent(),
                format_size(*received)
            )
        }
        Progress::Rebuild {
            archive,
            done,
            total,
        } => {
            let bar = format_progress_bar(*done as u64, *total as u64, BAR_WIDTH);
            format!(
                "{bar}  {:>3}%  {done}/{total} entries  {archive}",
                progress.percent()
            )
        }
    }
}

/// Format a progress bar using ▓ (filled) and ░ (empty).
pub fn format_progress_bar(current: u64, total: u64, width: usize) -> String {
    let filled = if total > 0 {
        ((current as f64 / total as f64) * width as f64).round() as usize
    } else {
        0
    };
    let filled = filled.min(width);
    let empty = width.saturating_sub(filled);
    format!("{}{}", "▓".repeat(filled), "░".repeat(empty))
}

/// Human-readable byte count with one decimal place.
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_bar_format() {
        // 50% should be half filled
        let bar = format_progress_bar(50, 100, 10);
        assert_eq!(bar.chars().filter(|c| *c == '▓').count(), 5);
        assert_eq!(bar.chars().filter(|c| *c == '░').count(), 5);

        // 100% should be all filled
        let bar = format_progress_bar(100, 100, 10);
        assert_eq!(bar.chars().filter(|c| *c == '▓').count(), 10);
        assert_eq!(bar.chars().filter(|c| *c == '░').count(), 0);

        // 0% should be all empty
        let bar = format_progress_bar(0, 100, 10);
        assert_eq!(bar.chars().filter(|c| *c == '▓').count(), 0);
        assert_eq!(bar.chars().filter(|c| *c == '░').count(), 10);

        // An unknown total renders empty rather than overflowing
        let bar = format_progress_bar(50, 0, 10);
        assert_eq!(bar.chars().filter(|c| *c == '░').count(), 10);
    }

    #[test]
    fn test_percent_clamps() {
        let p = Progress::Download {
            path: "Data/base.MPQ.0".into(),
            received: 512,
            total: Some(1024),
        };
        assert_eq!(p.percent(), 50);

        let over = Progress::Download {
            path: "Data/base.MPQ.0".into(),
            received: 2048,
            total: Some(1024),
        };
        assert_eq!(over.percent(), 100);

        let unknown = Progress::Download {
            path: "Data/base.MPQ.0".into(),
            received: 2048,
            total: None,
        };
        assert_eq!(unknown.percent(), 0);
    }

    #[test]
    fn test_download_line_format() {
        let line = format_line(&Progress::Download {
            path: "Data/base.MPQ.0".into(),
            received: 512,
            total: Some(1024),
        });
        assert!(line.contains("▓"));
        assert!(line.contains("50%"));
        assert!(line.contains("512 B / 1.0 KB"));
        assert!(line.contains("Data/base.MPQ.0"));
    }

    #[test]
    fn test_rebuild_line_format() {
        let line = format_line(&Progress::Rebuild {
            archive: "locale-enUS.MPQ".into(),
            done: 250,
            total: 1000,
        });
        assert!(line.contains("25%"));
        assert!(line.contains("250/1000 entries"));
        assert!(line.contains("locale-enUS.MPQ"));
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(1024), "1.0 KB");
        assert_eq!(format_size(1024 * 1024), "1.0 MB");
        assert_eq!(format_size(3 * 1024 * 1024 * 1024), "3.0 GB");
    }
}
