//! Transfer progress display with progress bars.

use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use lanferry_core::TransferEvent;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

const BAR_TEMPLATE: &str = "{msg}\n{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})";

/// Progress bar for one file
pub struct TransferProgress {
    bar: ProgressBar,
    name: String,
}

impl TransferProgress {
    /// Create a new progress tracker
    #[must_use]
    pub fn new(total_bytes: u64, filename: &str) -> Self {
        let bar = ProgressBar::new(total_bytes);

        if let Ok(style) = ProgressStyle::default_bar().template(BAR_TEMPLATE) {
            bar.set_style(style.progress_chars("#>-"));
        }
        bar.set_message(format!("Transferring: {filename}"));

        Self {
            bar,
            name: filename.to_string(),
        }
    }

    /// Update progress
    pub fn update(&self, transferred_bytes: u64) {
        self.bar.set_position(transferred_bytes);
    }

    /// Set custom message
    pub fn set_message(&self, msg: String) {
        self.bar.set_message(msg);
    }

    /// Finish with custom message
    pub fn finish_with_message(&self, msg: String) {
        self.bar.finish_with_message(msg);
    }

    /// Abandon the progress bar (for errors)
    pub fn abandon_with_message(&self, msg: String) {
        self.bar.abandon_with_message(msg);
    }

    fn is_for(&self, name: &str) -> bool {
        self.name == name
    }
}

/// Render engine events until the channel closes
pub async fn render_events(mut rx: UnboundedReceiver<TransferEvent>) {
    let mut current: Option<TransferProgress> = None;

    while let Some(event) = rx.recv().await {
        match event {
            TransferEvent::SessionStarted { files } => {
                println!("Sending {files} file(s)");
            }
            TransferEvent::FileStarted {
                name,
                attempt,
                bytes_total,
            } => {
                let bar = TransferProgress::new(bytes_total, &name);
                if attempt > 1 {
                    bar.set_message(format!("Retrying: {name} (attempt {attempt})"));
                }
                current = Some(bar);
            }
            TransferEvent::Progress {
                name,
                bytes_done,
                bytes_total,
                ..
            } => {
                let bar = match current.take() {
                    Some(bar) if bar.is_for(&name) => bar,
                    _ => TransferProgress::new(bytes_total, &name),
                };
                bar.update(bytes_done);
                current = Some(bar);
            }
            TransferEvent::FileAcknowledged { name, .. } => {
                if let Some(bar) = current.take() {
                    bar.finish_with_message(format!("{} {name}", style("Sent").green()));
                }
            }
            TransferEvent::FileRejected { name, attempt } => {
                let msg = format!("{} {name} (attempt {attempt})", style("Rejected").yellow());
                finish_failed(current.take(), msg);
            }
            TransferEvent::AttemptFailed {
                name,
                attempt,
                reason,
            } => {
                let msg = format!(
                    "{} {name} (attempt {attempt}): {reason}",
                    style("Failed").red()
                );
                finish_failed(current.take(), msg);
            }
            TransferEvent::BatchComplete { files } => {
                println!("{} {files} file(s) delivered", style("Done:").green().bold());
            }
            TransferEvent::ConnectionAccepted { peer } => {
                println!("{} {peer}", style("Connection from").cyan());
            }
            TransferEvent::FileReceived { name, path, size } => {
                let msg = format!(
                    "{} {name} ({}) -> {}",
                    style("Received").green(),
                    format_bytes(size),
                    path.display()
                );
                match current.take() {
                    Some(bar) => bar.finish_with_message(msg),
                    None => println!("{msg}"),
                }
            }
            TransferEvent::IntegrityFailure { name } => {
                let msg = format!("{} {name} failed verification", style("Rejected").red());
                finish_failed(current.take(), msg);
            }
            TransferEvent::ConnectionClosed { received } => {
                println!("Connection closed, {received} file(s) received");
            }
            TransferEvent::ConnectionAborted { reason } => {
                finish_failed(
                    current.take(),
                    format!("{} {reason}", style("Connection aborted:").red()),
                );
            }
        }
    }
}

fn finish_failed(bar: Option<TransferProgress>, msg: String) {
    match bar {
        Some(bar) => bar.abandon_with_message(msg),
        None => eprintln!("{msg}"),
    }
}

/// Format bytes in human-readable format
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    format!("{size:.2} {}", UNITS[unit_idx])
}

/// Format duration in human-readable format
#[must_use]
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();

    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else if secs < 86_400 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else {
        format!("{}d {}h", secs / 86_400, (secs % 86_400) / 3600)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0.00 B");
        assert_eq!(format_bytes(512), "512.00 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(1024 * 1024), "1.00 MB");
        assert_eq!(format_bytes(1024 * 1024 * 1024), "1.00 GB");
        assert_eq!(format_bytes(1024_u64.pow(4)), "1.00 TB");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(0)), "0s");
        assert_eq!(format_duration(Duration::from_secs(30)), "30s");
        assert_eq!(format_duration(Duration::from_secs(90)), "1m 30s");
        assert_eq!(format_duration(Duration::from_secs(3661)), "1h 1m");
        assert_eq!(format_duration(Duration::from_secs(90_000)), "1d 1h");
    }

    #[tokio::test]
    async fn test_render_events_ends_with_channel() {
        let (sink, rx) = lanferry_core::EventSink::channel();
        sink.emit(TransferEvent::FileStarted {
            name: "a.txt".into(),
            attempt: 1,
            bytes_total: 37,
        });
        sink.emit(TransferEvent::Progress {
            name: "a.txt".into(),
            percent: 100,
            bytes_done: 37,
            bytes_total: 37,
        });
        sink.emit(TransferEvent::FileAcknowledged {
            name: "a.txt".into(),
            attempt: 1,
        });
        drop(sink);

        render_events(rx).await;
    }
}
