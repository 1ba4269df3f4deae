//! Output sinks for streamed agent output.

use std::io::Write;

use roller_core::OutputSink;

/// Prints each line prefixed with the node it came from.
pub struct ConsoleSink;

impl OutputSink for ConsoleSink {
    fn write_line(&mut self, node: &str, line: &str) {
        println!("[{node}] {line}");
    }
}

/// Prints lines as they are so the dispatcher on the other end of the exec
/// channel sees bare markers.
pub struct AgentSink;

impl OutputSink for AgentSink {
    fn write_line(&mut self, _node: &str, line: &str) {
        let mut stdout = std::io::stdout().lock();
        // A closed pipe only loses progress output; statuses are already stored.
        let _ = writeln!(stdout, "{line}");
        let _ = stdout.flush();
    }
}
