//! Result of running a plugin at an extension point.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Code {
    Success,
    /// Internal plugin error or broken contract between stages. Not a scheduling verdict.
    Error,
    /// Pod does not fit now but may after cluster changes or preemption.
    Unschedulable,
    /// Pod does not fit and nothing on other nodes would help.
    UnschedulableAndUnresolvable,
    /// Permit stage asked to hold the pod.
    Wait,
    /// Plugin has nothing to do for this pod.
    Skip,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Status {
    code: Code,
    reasons: Vec<String>,
    /// Plugin which produced a non-success status, filled by the framework.
    plugin: String,
}

impl Status {
    pub fn new(code: Code, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            code,
            reasons: if reason.is_empty() { vec![] } else { vec![reason] },
            plugin: String::new(),
        }
    }

    pub fn success() -> Self {
        Self::new(Code::Success, "")
    }

    pub fn error(reason: impl Into<String>) -> Self {
        Self::new(Code::Error, reason)
    }

    pub fn unschedulable(reason: impl Into<String>) -> Self {
        Self::new(Code::Unschedulable, reason)
    }

    pub fn with_plugin(mut self, plugin: &str) -> Self {
        self.plugin = plugin.to_string();
        self
    }

    pub fn code(&self) -> Code {
        self.code
    }

    pub fn reasons(&self) -> &[String] {
        &self.reasons
    }

    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    pub fn message(&self) -> String {
        self.reasons.join(", ")
    }

    /// Success and Skip both let the pod continue.
    pub fn is_success(&self) -> bool {
        matches!(self.code, Code::Success | Code::Skip)
    }

    pub fn is_wait(&self) -> bool {
        self.code == Code::Wait
    }

    pub fn is_rejected(&self) -> bool {
        matches!(
            self.code,
            Code::Unschedulable | Code::UnschedulableAndUnresolvable
        )
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.plugin.is_empty() {
            write!(f, "{:?}: {}", self.code, self.message())
        } else {
            write!(f, "{:?} ({}): {}", self.code, self.plugin, self.message())
        }
    }
}
