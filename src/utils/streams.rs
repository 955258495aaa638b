// src/utils/streams.rs
use log::Level;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::UnboundedReceiverStream;


/// One log line produced by a batch task.
#[derive(Debug, Clone)]
pub struct LogEvent {
    pub level: Level,
    pub split_id: Option<usize>,
    pub message: String,
}

/// Sending half of the run's log channel. Worker tasks log through clones of this; a single
/// drain task owns the receiver and is the only writer, so lines never interleave.
#[derive(Debug, Clone)]
pub struct LogSink {
    tx: mpsc::UnboundedSender<LogEvent>,
}

impl LogSink {
    /// Creates the channel and spawns its drain task.
    ///
    /// # Returns
    /// (LogSink, JoinHandle of the drain). The drain finishes once every sink clone is dropped.
    pub fn spawn() -> (LogSink, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel::<LogEvent>();
        let handle = tokio::spawn(async move {
            let mut stream = UnboundedReceiverStream::new(rx);
            while let Some(event) = stream.next().await {
                match event.split_id {
                    Some(id) => log::log!(event.level, "[split {}] {}", id, event.message),
                    None => log::log!(event.level, "{}", event.message),
                }
            }
        });
        (LogSink { tx }, handle)
    }

    /// Sink with a caller-owned receiver, for tests that inspect events.
    pub fn channel() -> (LogSink, mpsc::UnboundedReceiver<LogEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (LogSink { tx }, rx)
    }

    pub fn send(&self, level: Level, split_id: Option<usize>, message: String) {
        // The drain only goes away at shutdown; nothing useful to do with a closed channel.
        let _ = self.tx.send(LogEvent { level, split_id, message });
    }

    pub fn debug(&self, split_id: usize, message: String) {
        self.send(Level::Debug, Some(split_id), message);
    }

    pub fn info(&self, split_id: usize, message: String) {
        self.send(Level::Info, Some(split_id), message);
    }

    pub fn warn(&self, split_id: usize, message: String) {
        self.send(Level::Warn, Some(split_id), message);
    }

    pub fn error(&self, split_id: usize, message: String) {
        self.send(Level::Error, Some(split_id), message);
    }
}


/// Last `max_lines` lines of a captured output stream.
///
/// # Arguments
///
/// * `bytes` - Raw stdout or stderr.
/// * `max_lines` - Lines to keep from the end.
///
/// # Returns
/// String, lossily decoded.
pub fn output_tail(bytes: &[u8], max_lines: usize) -> String {
    let text = String::from_utf8_lossy(bytes);
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(max_lines);
    lines[start..].join("\n")
}


/// Combines the tails of stderr and stdout into one diagnostic block.
pub fn diagnostic_text(stdout: &[u8], stderr: &[u8], max_lines: usize) -> String {
    let mut parts = Vec::new();
    let err = output_tail(stderr, max_lines);
    if !err.trim().is_empty() {
        parts.push(format!("STDERR:\n{}", err));
    }
    let out = output_tail(stdout, max_lines);
    if !out.trim().is_empty() {
        parts.push(format!("STDOUT:\n{}", out));
    }
    parts.join("\n")
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_tail() {
        let text = b"a\nb\nc\nd\n";
        assert_eq!(output_tail(text, 2), "c\nd");
        assert_eq!(output_tail(text, 10), "a\nb\nc\nd");
        assert_eq!(output_tail(b"", 3), "");
    }

    #[test]
    fn test_diagnostic_text_skips_empty_streams() {
        assert_eq!(diagnostic_text(b"", b"boom\n", 5), "STDERR:\nboom");
        assert_eq!(diagnostic_text(b"ok", b"", 5), "STDOUT:\nok");
        assert_eq!(diagnostic_text(b"", b"  \n", 5), "");
    }

    #[tokio::test]
    async fn test_log_sink_preserves_order() {
        let (sink, mut rx) = LogSink::channel();
        let other = sink.clone();
        sink.info(0, "start".to_string());
        other.warn(1, "slow".to_string());
        drop(sink);
        drop(other);
        let mut seen = Vec::new();
        while let Some(event) = rx.recv().await {
            seen.push((event.split_id, event.message));
        }
        assert_eq!(seen, vec![(Some(0), "start".to_string()), (Some(1), "slow".to_string())]);
    }
}
