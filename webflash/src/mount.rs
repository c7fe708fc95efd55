//! Bootstrap: wait for the host surface, bind it once, auto-initialise.

use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::config::MountConfig;
use crate::controller::Controller;

/// A surface the controller can be mounted on.
pub trait MountHost {
    /// Whether the connect, disconnect, flash and firmware-input anchors exist.
    fn anchors_present(&self) -> bool;

    /// Whether the surface carries the one-time bound marker.
    fn is_bound(&self) -> bool;

    /// Set the one-time bound marker.
    fn mark_bound(&mut self);

    /// Register input handlers. Called at most once per surface.
    fn bind_handlers(&mut self);

    /// Block until the anchors appear or `deadline` passes, if the host can
    /// observe its own rendering. `None` means unsupported and selects
    /// polling.
    fn observe_mount(&mut self, _deadline: Duration) -> Option<bool> {
        None
    }
}

/// Result of [`MountWatcher::mount`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountOutcome {
    /// Handlers were bound and auto-init scheduled.
    Bound,
    /// The surface was bound earlier; nothing was done.
    AlreadyBound,
    /// The anchors never appeared. `attempts` is 0 when an observer waited.
    GaveUp {
        /// Number of anchor checks made.
        attempts: u32,
    },
}

/// Waits for a host surface and binds the controller to it.
#[derive(Debug, Clone)]
pub struct MountWatcher {
    interval: Duration,
    max_attempts: u32,
}

impl MountWatcher {
    /// Create a watcher from mount settings.
    pub fn new(config: &MountConfig) -> Self {
        Self {
            interval: config.poll_interval(),
            max_attempts: config.max_attempts.max(1),
        }
    }

    /// Mount, sleeping between polls.
    pub fn mount(&self, host: &mut dyn MountHost, controller: &mut Controller) -> MountOutcome {
        self.mount_with(host, controller, thread::sleep)
    }

    /// Same as [`MountWatcher::mount`] with an injectable wait.
    pub fn mount_with(
        &self,
        host: &mut dyn MountHost,
        controller: &mut Controller,
        wait: impl FnMut(Duration),
    ) -> MountOutcome {
        if host.is_bound() {
            return MountOutcome::AlreadyBound;
        }

        if let Err(attempts) = self.wait_for_anchors(host, wait) {
            warn!("Flasher surface did not appear after {attempts} checks; giving up");
            return MountOutcome::GaveUp { attempts };
        }
        if host.is_bound() {
            return MountOutcome::AlreadyBound;
        }

        controller.clear_log();
        host.bind_handlers();
        host.mark_bound();
        controller.refresh_environment();
        controller.schedule_auto_init(Instant::now());
        info!("Flasher bound");
        MountOutcome::Bound
    }

    fn wait_for_anchors(
        &self,
        host: &mut dyn MountHost,
        mut wait: impl FnMut(Duration),
    ) -> std::result::Result<(), u32> {
        let deadline = self.interval * self.max_attempts;
        if let Some(found) = host.observe_mount(deadline) {
            debug!("mount observer answered {found}");
            return if found { Ok(()) } else { Err(0) };
        }

        for attempt in 1..=self.max_attempts {
            if crate::is_interrupted_requested() {
                return Err(attempt - 1);
            }
            if host.anchors_present() {
                debug!("anchors found on check {attempt}");
                return Ok(());
            }
            if attempt < self.max_attempts {
                wait(self.interval);
            }
        }
        Err(self.max_attempts)
    }
}
