//! Environment gate.
//!
//! Decides whether the host can offer serial access at all and turns the
//! answer into an operator-facing reason.

use log::warn;

use crate::port::{Capability, PortProvider};
use crate::session::{Status, StatusVariant};

/// Reason shown when the host is not a secure context.
pub const INSECURE_CONTEXT: &str =
    "The page must run in a secure context (https:// or http://localhost).";

/// Reason shown when there is no serial capability.
pub const CAPABILITY_MISSING: &str =
    "This environment does not support serial access (use a recent Chrome/Edge or the native host).";

/// Reason shown when the capability cannot request ports.
pub const REQUEST_MISSING: &str = "The serial capability does not expose requestPort.";

/// Result of an environment check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Readiness {
    /// Whether serial operations may be offered.
    pub ready: bool,
    /// Space-joined blocking reasons; empty when ready.
    pub reason: String,
}

/// Check the host without side effects.
pub fn check(provider: &dyn PortProvider) -> Readiness {
    let mut issues = Vec::new();
    if !provider.is_secure_context() {
        issues.push(INSECURE_CONTEXT);
    }
    match provider.capability() {
        Capability::Missing => issues.push(CAPABILITY_MISSING),
        Capability::NoRequest => issues.push(REQUEST_MISSING),
        Capability::Usable => {},
    }

    Readiness {
        ready: issues.is_empty(),
        reason: issues.join(" "),
    }
}

/// Remembers the last reported reason so each one reaches the banner once.
#[derive(Debug, Default)]
pub struct EnvironmentGate {
    reported: Option<String>,
}

impl EnvironmentGate {
    /// Check the host and update the status banner.
    ///
    /// A new blocking reason replaces the banner (danger). Becoming ready
    /// after being blocked clears it. Unchanged reasons leave it alone.
    pub fn evaluate(&mut self, provider: &dyn PortProvider, status: &mut Option<Status>) -> Readiness {
        let readiness = check(provider);

        if readiness.ready {
            if self.reported.take().is_some() {
                *status = None;
            }
        } else if self.reported.as_deref() != Some(readiness.reason.as_str()) {
            warn!("{}", readiness.reason);
            self.reported = Some(readiness.reason.clone());
            *status = Some(Status {
                message: readiness.reason.clone(),
                variant: StatusVariant::Danger,
            });
        }

        readiness
    }

    /// Currently reported blocking reason.
    pub fn reported(&self) -> Option<&str> {
        self.reported.as_deref()
    }
}
