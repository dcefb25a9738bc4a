use std::io::IsTerminal;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::info;

/// Receives progress updates from a load.  Implementations only observe,
/// they cannot fail or influence the load.
pub trait ProgressObserver {
    /// Human readable description of the current step.
    fn set_message(&mut self, message: &str);
    /// Expected number of bytes for the whole load.
    fn set_total(&mut self, total: u64);
    /// Called with the number of bytes processed since the last call.
    fn advance(&mut self, bytes: u64);
    /// Final summary, e.g. `[table] 10 rows imported`.
    fn finish(&mut self, message: &str);
}

pub fn summary_line(table: &str, rows: u64) -> String {
    format!("[{}] {} rows imported", table, rows)
}

/// Terminal progress bar, in bytes.
pub struct BarProgress {
    bar: ProgressBar,
}

impl BarProgress {
    pub fn new() -> Self {
        Self::with_target(ProgressDrawTarget::stderr())
    }

    pub fn hidden() -> Self {
        Self::with_target(ProgressDrawTarget::hidden())
    }

    fn with_target(target: ProgressDrawTarget) -> Self {
        let bar = ProgressBar::with_draw_target(None, target);
        bar.set_style(
            ProgressStyle::with_template(
                "{msg} [{elapsed_precise}] {bar:40.cyan/blue} {bytes}/{total_bytes} ({bytes_per_sec}, {eta})",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("##-"),
        );
        BarProgress { bar }
    }

    pub fn position(&self) -> u64 {
        self.bar.position()
    }

    pub fn length(&self) -> Option<u64> {
        self.bar.length()
    }

    pub fn message(&self) -> String {
        self.bar.message()
    }
}

impl Default for BarProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressObserver for BarProgress {
    fn set_message(&mut self, message: &str) {
        self.bar.set_message(message.to_string());
    }

    fn set_total(&mut self, total: u64) {
        self.bar.set_length(total);
        self.bar.set_position(0);
    }

    fn advance(&mut self, bytes: u64) {
        self.bar.inc(bytes);
    }

    fn finish(&mut self, message: &str) {
        self.bar.finish_with_message(message.to_string());
    }
}

/// Progress as log lines, for when stderr is not a terminal.  Logs every
/// time another `step_percent` of the total has been processed.
pub struct LogProgress {
    message: String,
    total: u64,
    done: u64,
    next_report: u64,
    step_percent: u64,
}

impl LogProgress {
    pub fn new(step_percent: u64) -> Self {
        LogProgress {
            message: String::new(),
            total: 0,
            done: 0,
            next_report: 0,
            step_percent: step_percent.clamp(1, 100),
        }
    }

    fn step(&self) -> u64 {
        (self.total * self.step_percent / 100).max(1)
    }

    pub fn done(&self) -> u64 {
        self.done
    }
}

impl ProgressObserver for LogProgress {
    fn set_message(&mut self, message: &str) {
        if message != self.message {
            info!("{}", message);
            self.message = message.to_string();
        }
    }

    fn set_total(&mut self, total: u64) {
        self.total = total;
        self.done = 0;
        self.next_report = self.step();
    }

    fn advance(&mut self, bytes: u64) {
        self.done += bytes;
        if self.total > 0 && self.done >= self.next_report {
            info!(
                "{}: {:.1}% ({} of {} bytes)",
                self.message,
                (self.done as f64 / self.total as f64 * 100.0).min(100.0),
                self.done,
                self.total
            );
            while self.next_report <= self.done {
                self.next_report += self.step();
            }
        }
    }

    fn finish(&mut self, message: &str) {
        info!("{}", message);
    }
}

/// A progress bar when stderr is a terminal, log lines otherwise.
pub fn progress_for_terminal() -> Box<dyn ProgressObserver> {
    if std::io::stderr().is_terminal() {
        Box::new(BarProgress::new())
    } else {
        Box::new(LogProgress::new(10))
    }
}
