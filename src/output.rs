//! User-facing progress output.
//!
//! Engine progress lines and status banners are written to an
//! [`OutputSink`] so callers can stream them to the terminal or capture them
//! in tests. Diagnostics go through `tracing` instead.

use std::io::{self, Write};
use std::sync::Arc;

/// Width of the `#` rule framing a banner.
const BANNER_WIDTH: usize = 80;

/// Destination for progress lines emitted while a run is in flight.
pub trait OutputSink: Send + Sync {
    /// Receives one line of output without its trailing newline.
    fn line(&self, line: &str);
}

impl<F> OutputSink for F
where
    F: Fn(&str) + Send + Sync,
{
    fn line(&self, line: &str) {
        self(line);
    }
}

/// Sink shared between the coordinator and its collaborators.
pub type SharedSink = Arc<dyn OutputSink>;

/// Sink that forwards every line to standard output.
#[derive(Clone, Copy, Debug, Default)]
pub struct StdoutSink;

impl OutputSink for StdoutSink {
    fn line(&self, line: &str) {
        writeln!(io::stdout(), "{line}").ok();
    }
}

/// Returns a shared sink writing to standard output.
#[must_use]
pub fn stdout_sink() -> SharedSink {
    Arc::new(StdoutSink)
}

/// Writes `messages` to `sink` inside a `#` framed banner.
pub fn banner(sink: &dyn OutputSink, messages: &[&str]) {
    let rule = "#".repeat(BANNER_WIDTH);
    sink.line(&rule);
    sink.line("#");
    for message in messages {
        sink.line(&format!("# {message}"));
    }
    sink.line("#");
    sink.line(&rule);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::RecordingSink;
    use rstest::rstest;

    #[rstest]
    fn banner_frames_each_message() {
        let sink = RecordingSink::new();
        banner(&sink, &["first", "second"]);

        let lines = sink.lines();
        assert_eq!(lines.len(), 6);
        assert_eq!(lines.first().map(String::len), Some(BANNER_WIDTH));
        assert_eq!(lines.get(2).map(String::as_str), Some("# first"));
        assert_eq!(lines.get(3).map(String::as_str), Some("# second"));
        assert_eq!(lines.last(), lines.first());
    }

    #[rstest]
    fn closures_act_as_sinks() {
        let seen = std::sync::Mutex::new(Vec::new());
        let sink = |line: &str| {
            seen.lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .push(line.to_owned());
        };
        sink.line("hello");
        assert_eq!(
            *seen.lock().unwrap_or_else(std::sync::PoisonError::into_inner),
            vec![String::from("hello")]
        );
    }
}
