//! Terminal progress bars driven by tracker subscriptions.
//!
//! Each followed operation gets its own bar inside a shared
//! [`MultiProgress`]. A background thread reads the subscription and moves
//! the bar until the operation finishes.

use std::thread::{self, JoinHandle};

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};

use super::model::OperationStatus;
use super::stream::{ProgressUpdate, Subscription};

/// Renders tracked operations as indicatif bars.
#[derive(Debug, Clone)]
pub struct TerminalProgress {
    multi: MultiProgress,
    quiet: bool,
}

impl TerminalProgress {
    /// Create a renderer. With `quiet` set, bars are never drawn.
    #[must_use]
    pub fn new(quiet: bool) -> Self {
        let multi = if quiet {
            MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
        } else {
            MultiProgress::new()
        };
        Self { multi, quiet }
    }

    #[must_use]
    pub fn is_quiet(&self) -> bool {
        self.quiet
    }

    fn style() -> ProgressStyle {
        ProgressStyle::with_template(
            "[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg} (ETA: {eta})",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█>-")
    }

    /// Follow an operation until it finishes.
    ///
    /// The returned handle yields the last update seen, which carries the
    /// final status of the operation.
    #[must_use]
    pub fn follow(&self, subscription: Subscription, label: &str) -> JoinHandle<Option<ProgressUpdate>> {
        let bar = self.multi.add(ProgressBar::new(0));
        bar.set_style(Self::style());
        bar.set_message(label.to_string());
        let label = label.to_string();

        thread::spawn(move || {
            let mut last = None;
            for update in subscription.iter() {
                bar.set_length(update.total_items);
                bar.set_position(update.processed_items);
                if !update.current_step.is_empty() {
                    bar.set_message(format!("{label}: {}", update.current_step));
                }
                if update.is_terminal() {
                    bar.finish_with_message(finish_message(&label, update.status));
                }
                last = Some(update);
            }
            if !bar.is_finished() {
                bar.abandon();
            }
            last
        })
    }
}

fn finish_message(label: &str, status: OperationStatus) -> String {
    match status {
        OperationStatus::Completed => format!("{label} complete"),
        OperationStatus::Cancelled => format!("{label} cancelled"),
        OperationStatus::Failed => format!("{label} failed"),
        other => format!("{label} {other}"),
    }
}
