//! Addressed channels a kernel handles requests on.

use std::fmt;

/// Channel a request arrived on, and therefore the path its broadcasts take.
///
/// Shell and control can run on separate threads; each owns its own relay to
/// the publisher so that publishing never crosses thread ownership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Shell,
    Control,
}

impl Channel {
    pub fn name(self) -> &'static str {
        match self {
            Channel::Shell => "shell",
            Channel::Control => "control",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
