//! Terminal rendering: batch progress, confirmation prompts and log tails.

use std::collections::VecDeque;
use std::io::{self, BufRead, Write};
use std::path::Path;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

use crate::batch::{BatchObserver, ItemEvent, ItemStatus};

/// Progress bar fed by batch status transitions.
///
/// The bar length grows as items are first seen, so it needs no size up
/// front.
pub struct ProgressObserver {
    bar: ProgressBar,
}

impl ProgressObserver {
    /// Creates a visible bar labelled `label`, or a hidden one.
    pub fn new(label: &str, enabled: bool) -> Self {
        if !enabled {
            return Self {
                bar: ProgressBar::with_draw_target(Some(0), ProgressDrawTarget::hidden()),
            };
        }

        let bar = ProgressBar::new(0);
        let style = ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {prefix:>8} {bar:40.cyan/blue} {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▓▒░  ");
        bar.set_style(style);
        bar.set_prefix(label.to_string());
        Self { bar }
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl BatchObserver for ProgressObserver {
    fn on_event(&self, event: &ItemEvent<'_>) {
        let first_seen = (event.to == ItemStatus::Running && event.attempt == 1)
            || (event.from == ItemStatus::Pending && event.attempt == 0);
        if first_seen {
            self.bar.inc_length(1);
        }

        match event.to {
            ItemStatus::Running => {
                self.bar.set_message(format!("{} (attempt {})", event.id, event.attempt));
            }
            ItemStatus::Pending => {
                self.bar.set_message(format!("{} retrying", event.id));
            }
            ItemStatus::Succeeded => {
                self.bar.inc(1);
            }
            ItemStatus::Failed => {
                self.bar.inc(1);
                if let Some(error) = event.error {
                    self.bar.println(format!("✗ {}: {}", event.id, error));
                }
            }
        }
    }
}

/// Asks a yes/no question on stdin; anything but `y`/`yes` is no.
pub fn confirm(question: &str) -> io::Result<bool> {
    print!("{} [y/N] ", question);
    io::stdout().flush()?;

    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

/// Returns the last `count` lines of `path`, or `None` if it does not exist.
pub fn tail_lines(path: &Path, count: usize) -> io::Result<Option<Vec<String>>> {
    if !path.exists() {
        return Ok(None);
    }

    let file = std::fs::File::open(path)?;
    let mut lines = VecDeque::with_capacity(count);
    for line in io::BufReader::new(file).lines() {
        if count == 0 {
            break;
        }
        if lines.len() == count {
            lines.pop_front();
        }
        lines.push_back(line?);
    }
    Ok(Some(lines.into_iter().collect()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::ActionError;
    use tempfile::TempDir;

    #[test]
    fn test_tail_lines() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("rag_corpus.log");
        std::fs::write(&path, "one\ntwo\nthree\nfour\n").expect("write");

        assert_eq!(
            tail_lines(&path, 2).expect("reads"),
            Some(vec!["three".to_string(), "four".to_string()])
        );
        assert_eq!(tail_lines(&path, 10).expect("reads").map(|l| l.len()), Some(4));
        assert_eq!(tail_lines(&path, 0).expect("reads"), Some(Vec::new()));
        assert_eq!(tail_lines(&dir.path().join("absent.log"), 5).expect("reads"), None);
    }

    #[test]
    fn test_hidden_observer_tracks_counts() {
        let observer = ProgressObserver::new("generate", false);
        let error = ActionError::cancelled();
        let events = [
            ItemEvent {
                index: 0,
                id: "Spa",
                from: ItemStatus::Pending,
                to: ItemStatus::Running,
                attempt: 1,
                error: None,
                running: 1,
            },
            ItemEvent {
                index: 0,
                id: "Spa",
                from: ItemStatus::Running,
                to: ItemStatus::Succeeded,
                attempt: 1,
                error: None,
                running: 0,
            },
            ItemEvent {
                index: 1,
                id: "Rooms",
                from: ItemStatus::Pending,
                to: ItemStatus::Failed,
                attempt: 0,
                error: Some(&error),
                running: 0,
            },
        ];
        for event in &events {
            observer.on_event(event);
        }

        assert_eq!(observer.bar.length(), Some(2));
        assert_eq!(observer.bar.position(), 2);
    }
}
