//! Progress markers streamed by node agents, and sinks for output lines.

use std::fmt;

use crate::models::Status;

const POD_START: &str = "POD-START";
const POD_SUCCESS: &str = "POD-SUCCESS";
const POD_FAIL: &str = "POD-FAIL";
const BATCH_SUCCESS: &str = "BATCH-SUCCESS";
const BATCH_FAIL: &str = "BATCH-FAIL";

/// A structured progress line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Marker {
    TargetStarted(String),
    TargetSucceeded(String),
    TargetFailed(String),
    BatchSucceeded,
    BatchFailed,
}

impl Marker {
    /// Recognises a marker anywhere in `line`. Lines without one yield `None`.
    ///
    /// ```rust
    /// use roller_core::dispatch::output::Marker;
    ///
    /// assert_eq!(
    ///     Marker::parse("2024/01/01 POD-SUCCESS [mount-a]"),
    ///     Some(Marker::TargetSucceeded("mount-a".to_string()))
    /// );
    /// assert_eq!(Marker::parse("BATCH-FAIL on node n1"), Some(Marker::BatchFailed));
    /// assert_eq!(Marker::parse("plain output"), None);
    /// ```
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        if let Some(name) = target_after(line, POD_START) {
            Some(Marker::TargetStarted(name))
        } else if let Some(name) = target_after(line, POD_SUCCESS) {
            Some(Marker::TargetSucceeded(name))
        } else if let Some(name) = target_after(line, POD_FAIL) {
            Some(Marker::TargetFailed(name))
        } else if line.contains(BATCH_SUCCESS) {
            Some(Marker::BatchSucceeded)
        } else if line.contains(BATCH_FAIL) {
            Some(Marker::BatchFailed)
        } else {
            None
        }
    }

    /// Target name and the status the marker reports for it.
    pub fn target_status(&self) -> Option<(&str, Status)> {
        match self {
            Marker::TargetStarted(name) => Some((name, Status::Running)),
            Marker::TargetSucceeded(name) => Some((name, Status::Success)),
            Marker::TargetFailed(name) => Some((name, Status::Fail)),
            Marker::BatchSucceeded | Marker::BatchFailed => None,
        }
    }
}

impl fmt::Display for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Marker::TargetStarted(name) => write!(f, "{POD_START} [{name}]"),
            Marker::TargetSucceeded(name) => write!(f, "{POD_SUCCESS} [{name}]"),
            Marker::TargetFailed(name) => write!(f, "{POD_FAIL} [{name}]"),
            Marker::BatchSucceeded => f.write_str(BATCH_SUCCESS),
            Marker::BatchFailed => f.write_str(BATCH_FAIL),
        }
    }
}

/// Extracts `name` from `... PREFIX [name] ...`.
fn target_after(line: &str, prefix: &str) -> Option<String> {
    let start = line.find(prefix)? + prefix.len();
    let rest = line[start..].trim_start().strip_prefix('[')?;
    let end = rest.find(']')?;
    let name = rest[..end].trim();
    (!name.is_empty()).then(|| name.to_string())
}

/// Destination for lines streamed from a node.
pub trait OutputSink: Send {
    fn write_line(&mut self, node: &str, line: &str);
}

impl OutputSink for Vec<String> {
    fn write_line(&mut self, node: &str, line: &str) {
        self.push(format!("[{node}] {line}"));
    }
}

/// Discards every line.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl OutputSink for NullSink {
    fn write_line(&mut self, _node: &str, _line: &str) {}
}

/// Forwards lines to an inner sink and keeps the markers seen in them.
pub struct MarkerSink<'a> {
    inner: &'a mut (dyn OutputSink + 'a),
    markers: Vec<Marker>,
}

impl<'a> MarkerSink<'a> {
    pub fn new(inner: &'a mut (dyn OutputSink + 'a)) -> Self {
        Self {
            inner,
            markers: Vec::new(),
        }
    }

    /// Markers seen so far, in stream order.
    pub fn into_markers(self) -> Vec<Marker> {
        self.markers
    }
}

impl OutputSink for MarkerSink<'_> {
    fn write_line(&mut self, node: &str, line: &str) {
        if let Some(marker) = Marker::parse(line) {
            self.markers.push(marker);
        }
        self.inner.write_line(node, line);
    }
}
