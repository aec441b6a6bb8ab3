//! udev hot-plug monitors
//!
//! Each capability owns a [`Monitors`] set: one udev netlink socket per
//! (backend, subsystem) pair, registered on the event loop. Raw udev events
//! are converted into [`Uevent`] values so backends can classify them
//! without holding udev handles.
use crate::error::Error;
use crate::mainloop::{EventLoop, Source, Token};
use crate::plugin::Capability;
use log::{debug, warn};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Add,
    Remove,
    Change,
    Other,
}

/// Owned snapshot of a udev event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Uevent {
    pub action: Action,
    pub subsystem: String,
    pub sysname: String,
    pub syspath: PathBuf,
    pub devnode: Option<PathBuf>,
}

impl Uevent {
    pub fn new(action: Action, subsystem: &str, syspath: impl Into<PathBuf>) -> Self {
        let syspath = syspath.into();
        let sysname = syspath
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            action,
            subsystem: subsystem.to_string(),
            sysname,
            syspath,
            devnode: None,
        }
    }

    pub fn with_devnode(mut self, devnode: impl Into<PathBuf>) -> Self {
        self.devnode = Some(devnode.into());
        self
    }

    fn from_udev(event: &udev::Event) -> Self {
        let action = match event.event_type() {
            udev::EventType::Add => Action::Add,
            udev::EventType::Remove => Action::Remove,
            udev::EventType::Change => Action::Change,
            _ => Action::Other,
        };
        Self {
            action,
            subsystem: event
                .subsystem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default(),
            sysname: event.sysname().to_string_lossy().into_owned(),
            syspath: event.syspath().to_path_buf(),
            devnode: event.devnode().map(Path::to_path_buf),
        }
    }
}

/// One udev netlink socket filtered on a subsystem
pub struct Monitor {
    subsystem: &'static str,
    socket: udev::MonitorSocket,
}

impl Monitor {
    pub fn open(subsystem: &'static str) -> Result<Self, Error> {
        let socket = udev::MonitorBuilder::new()?
            .match_subsystem(subsystem)?
            .listen()?;
        Ok(Self { subsystem, socket })
    }

    pub fn subsystem(&self) -> &'static str {
        self.subsystem
    }

    /// Collect every queued event
    pub fn drain(&mut self) -> Vec<Uevent> {
        self.socket.iter().map(|e| Uevent::from_udev(&e)).collect()
    }
}

impl AsFd for Monitor {
    fn as_fd(&self) -> BorrowedFd<'_> {
        // SAFETY: the descriptor is owned by `socket`, which outlives the borrow
        unsafe { BorrowedFd::borrow_raw(self.socket.as_raw_fd()) }
    }
}

struct Attached {
    token: Token,
    slot: usize,
    monitor: Monitor,
}

/// Hot-plug sockets of one capability
pub struct Monitors {
    capability: Capability,
    attached: Vec<Attached>,
}

impl Monitors {
    pub fn new(capability: Capability) -> Self {
        Self {
            capability,
            attached: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.attached.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attached.is_empty()
    }

    /// Open a monitor for `subsystem` on behalf of the backend in `slot`
    ///
    /// Failure is logged and leaves the capability without live hot-plug.
    pub fn attach(&mut self, events: &mut EventLoop, subsystem: &'static str, slot: usize) {
        if self
            .attached
            .iter()
            .any(|a| a.slot == slot && a.monitor.subsystem() == subsystem)
        {
            return;
        }
        let monitor = match Monitor::open(subsystem) {
            Ok(monitor) => monitor,
            Err(e) => {
                warn!(
                    "No {} hot-plug for subsystem '{}': {}",
                    self.capability.name(),
                    subsystem,
                    e
                );
                return;
            }
        };
        let source = Source::Hotplug {
            capability: self.capability,
            index: self.attached.len(),
        };
        match events.register(&monitor, source) {
            Ok(token) => {
                debug!(
                    "Watching '{}' for {} hot-plug",
                    subsystem,
                    self.capability.name()
                );
                self.attached.push(Attached {
                    token,
                    slot,
                    monitor,
                });
            }
            Err(e) => warn!("Failed to watch '{}': {}", subsystem, e),
        }
    }

    /// Pending events of the monitor at `index`, with its backend slot
    pub fn drain(&mut self, index: usize) -> Option<(usize, Vec<Uevent>)> {
        let attached = self.attached.get_mut(index)?;
        Some((attached.slot, attached.monitor.drain()))
    }

    /// Deregister and close every monitor
    pub fn detach_all(&mut self, events: &mut EventLoop) {
        for attached in self.attached.drain(..) {
            if let Err(e) = events.deregister(attached.token, &attached.monitor) {
                warn!("Failed to stop watching '{}': {}", attached.monitor.subsystem(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uevent_derives_sysname_from_syspath() {
        let event = Uevent::new(
            Action::Add,
            "backlight",
            "/sys/devices/pci0000:00/0000:00:02.0/drm/card0/card0-eDP-1/intel_backlight",
        );
        assert_eq!(event.sysname, "intel_backlight");
        assert_eq!(event.subsystem, "backlight");
        assert!(event.devnode.is_none());
    }

    #[test]
    fn devnode_is_optional() {
        let event = Uevent::new(Action::Remove, "video4linux", "/sys/class/video4linux/video0")
            .with_devnode("/dev/video0");
        assert_eq!(event.devnode.as_deref(), Some(Path::new("/dev/video0")));
    }

    #[test]
    fn empty_set_has_nothing_to_drain() {
        let mut monitors = Monitors::new(Capability::Sensor);
        assert!(monitors.is_empty());
        assert!(monitors.drain(0).is_none());
    }
}
