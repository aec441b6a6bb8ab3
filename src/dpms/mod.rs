//! Display power management
pub mod drm;
pub mod wayland;
pub mod xorg;

use crate::bus::{DPMS_INTERFACE, DPMS_PATH, Reply, Request, Signal};
use crate::daemon::Runtime;
use crate::display::DisplayTarget;
use crate::error::Error;
use crate::plugin::{Capability, Plugin, PluginTable, TargetCache};
use log::{debug, info};

pub const KNOWN: &[&str] = &["xorg", "wl", "drm"];

/// DPMS power level, numbered as on the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    On = 0,
    Standby = 1,
    Suspend = 2,
    Off = 3,
}

impl TryFrom<i32> for Level {
    type Error = Error;

    fn try_from(value: i32) -> Result<Self, Error> {
        match value {
            0 => Ok(Level::On),
            1 => Ok(Level::Standby),
            2 => Ok(Level::Suspend),
            3 => Ok(Level::Off),
            other => Err(Error::InvalidArgument(format!("DPMS level {}", other))),
        }
    }
}

impl From<Level> for i32 {
    fn from(level: Level) -> i32 {
        level as i32
    }
}

/// Idle timeouts in seconds, 0 disabling a stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Timeouts {
    pub standby: i32,
    pub suspend: i32,
    pub off: i32,
}

impl Timeouts {
    pub fn new((standby, suspend, off): (i32, i32, i32)) -> Result<Self, Error> {
        for value in [standby, suspend, off] {
            if !(0..=i32::from(u16::MAX)).contains(&value) {
                return Err(Error::InvalidArgument(format!("DPMS timeout {}", value)));
            }
        }
        Ok(Self {
            standby,
            suspend,
            off,
        })
    }
}

/// Power control of one display target
pub trait DpmsOutput {
    fn level(&mut self) -> Result<Level, Error>;
    fn set_level(&mut self, level: Level) -> Result<(), Error>;

    fn timeouts(&mut self) -> Result<Timeouts, Error> {
        Err(Error::Unsupported("DPMS timeouts".to_string()))
    }

    fn set_timeouts(&mut self, _timeouts: Timeouts) -> Result<(), Error> {
        Err(Error::Unsupported("DPMS timeouts".to_string()))
    }
}

pub trait DpmsPlugin: Plugin {
    fn open(&mut self, target: &DisplayTarget) -> Result<Box<dyn DpmsOutput>, Error>;
}

pub fn table() -> PluginTable<dyn DpmsPlugin> {
    PluginTable::new(Capability::Dpms, KNOWN)
}

pub struct DpmsService {
    plugins: PluginTable<dyn DpmsPlugin>,
    targets: TargetCache<Box<dyn DpmsOutput>>,
    explicit: Option<String>,
}

impl DpmsService {
    pub fn new(plugins: PluginTable<dyn DpmsPlugin>, explicit: Option<String>) -> Self {
        Self {
            plugins,
            targets: TargetCache::new(),
            explicit,
        }
    }

    pub fn plugins(&self) -> &PluginTable<dyn DpmsPlugin> {
        &self.plugins
    }

    pub fn cached(&self) -> usize {
        self.targets.len()
    }

    /// Run `op` on the target's output, resolving it on first use
    ///
    /// A backend failure drops the cached output so the next call probes
    /// again.
    fn with_output<T>(
        &mut self,
        target: &DisplayTarget,
        op: impl FnOnce(&mut dyn DpmsOutput) -> Result<T, Error>,
    ) -> Result<T, Error> {
        let key = target.key();
        let resolved = self.targets.get_or_resolve(
            &key,
            &mut self.plugins,
            self.explicit.as_deref(),
            |plugin| plugin.open(target),
        )?;
        let result = op(&mut *resolved.handle);
        if let Err(e) = &result
            && e.invalidates_handle()
            && self.targets.invalidate(&key)
        {
            debug!("Dropped DPMS handle for '{}'", key);
        }
        result
    }

    pub fn handle(&mut self, rt: &mut Runtime<'_>, request: &Request) -> Result<Reply, Error> {
        match request {
            Request::DpmsGet { display, env } => {
                let target = DisplayTarget::new(display.as_str(), env.as_str());
                let level = self.with_output(&target, |output| output.level())?;
                Ok(Reply::Int(level.into()))
            }
            Request::DpmsSet {
                display,
                env,
                level,
            } => {
                let level = Level::try_from(*level)?;
                let target = DisplayTarget::new(display.as_str(), env.as_str());
                self.with_output(&target, |output| output.set_level(level))?;
                info!("DPMS on '{}' set to {:?}", target.key(), level);
                rt.emit(
                    DPMS_PATH,
                    DPMS_INTERFACE,
                    Signal::Display {
                        display: target.key(),
                        value: level.into(),
                    },
                );
                Ok(Reply::Int(level.into()))
            }
            Request::DpmsGetTimeouts { display, env } => {
                let target = DisplayTarget::new(display.as_str(), env.as_str());
                let t = self.with_output(&target, |output| output.timeouts())?;
                Ok(Reply::Timeouts(t.standby, t.suspend, t.off))
            }
            Request::DpmsSetTimeouts {
                display,
                env,
                timeouts,
            } => {
                let timeouts = Timeouts::new(*timeouts)?;
                let target = DisplayTarget::new(display.as_str(), env.as_str());
                self.with_output(&target, |output| output.set_timeouts(timeouts))?;
                Ok(Reply::Timeouts(
                    timeouts.standby,
                    timeouts.suspend,
                    timeouts.off,
                ))
            }
            other => Err(Error::Unsupported(format!("{:?} on {}", other, DPMS_PATH))),
        }
    }

    pub fn shutdown(&mut self) {
        self.targets.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_follow_bus_numbering() {
        assert_eq!(Level::try_from(0).unwrap(), Level::On);
        assert_eq!(Level::try_from(3).unwrap(), Level::Off);
        assert_eq!(i32::from(Level::Suspend), 2);
        assert!(matches!(
            Level::try_from(4),
            Err(Error::InvalidArgument(_))
        ));
        assert!(Level::try_from(-1).is_err());
    }

    #[test]
    fn timeouts_must_fit_the_protocol() {
        assert_eq!(
            Timeouts::new((600, 900, 1200)).unwrap(),
            Timeouts {
                standby: 600,
                suspend: 900,
                off: 1200
            }
        );
        assert!(Timeouts::new((0, 0, 0)).is_ok());
        assert!(Timeouts::new((-1, 0, 0)).is_err());
        assert!(Timeouts::new((0, 70000, 0)).is_err());
    }
}
