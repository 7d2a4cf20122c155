use std::fmt;
use std::time::Duration;

/// One configured logical file exercised every cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTarget {
    /// Local artifact name and remote object key
    pub name: String,
    /// Declared size in bytes
    pub size: u64,
    pub upload_timeout: Duration,
    pub download_timeout: Duration,
    pub delete_timeout: Duration,
}

impl ProbeTarget {
    pub fn timeout(&self, operation: Operation) -> Duration {
        match operation {
            Operation::Upload => self.upload_timeout,
            Operation::Download => self.download_timeout,
            Operation::Delete => self.delete_timeout,
        }
    }
}

/// The three network operations of a lifecycle run. Used as the
/// `operation` metric label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Upload,
    Download,
    Delete,
}

impl Operation {
    pub const ALL: [Operation; 3] = [Operation::Upload, Operation::Download, Operation::Delete];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Upload => "upload",
            Operation::Download => "download",
            Operation::Delete => "delete",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
