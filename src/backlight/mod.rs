//! Screen backlight
//!
//! Internal panels come from the backlight class, external monitors from
//! DDC/CI. Both feed one device table; the collection object fans calls out
//! to every device, each per-device object acts on its own device.
pub mod ddc;
pub mod sysfs;

use crate::bus::{
    BACKLIGHT_INTERFACE, BACKLIGHT_PATH, BACKLIGHT_SERVER_INTERFACE, PropValue, Reply, Request,
};
use crate::daemon::Runtime;
use crate::error::Error;
use crate::lifecycle::{DeviceManager, DevicePlugin, Layout};
use crate::plugin::{Capability, PluginTable};
use crate::smooth::Smooth;

/// Backend tokens in priority order
pub const KNOWN: &[&str] = &["sysfs", "ddc"];

pub const LAYOUT: Layout = Layout {
    capability: Capability::Backlight,
    collection: BACKLIGHT_PATH,
    interface: BACKLIGHT_INTERFACE,
    device_interface: Some(BACKLIGHT_SERVER_INTERFACE),
    named_signal: true,
};

pub fn table() -> PluginTable<dyn DevicePlugin> {
    PluginTable::new(Capability::Backlight, KNOWN)
}

fn check_finite(what: &str, value: f64) -> Result<(), Error> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(Error::InvalidArgument(format!("{} must be finite", what)))
    }
}

pub struct BacklightService {
    devices: DeviceManager,
}

impl BacklightService {
    pub fn new(plugins: PluginTable<dyn DevicePlugin>) -> Self {
        Self {
            devices: DeviceManager::new(LAYOUT, plugins),
        }
    }

    pub fn devices(&self) -> &DeviceManager {
        &self.devices
    }

    pub fn devices_mut(&mut self) -> &mut DeviceManager {
        &mut self.devices
    }

    /// Handle a backlight call addressed to `path`
    pub fn handle(
        &mut self,
        rt: &mut Runtime<'_>,
        path: &str,
        request: &Request,
    ) -> Result<Reply, Error> {
        let target = self.target(path)?;
        match request {
            Request::BacklightSet {
                adjust,
                value,
                smooth,
            } => {
                check_finite("value", *value)?;
                check_finite("step", smooth.step)?;
                let smooth = Smooth::new(smooth.step.min(1.0), smooth.wait);
                match target {
                    None => self.devices.adjust_all(rt, *adjust, *value, smooth)?,
                    Some(id) => self.devices.adjust(rt, &id, *adjust, *value, smooth)?,
                }
                Ok(Reply::Empty)
            }
            Request::BacklightGet => match target {
                None => Ok(Reply::Levels(self.devices.levels())),
                Some(id) => Ok(Reply::Double(self.devices.get(&id)?)),
            },
            other => Err(Error::Unsupported(format!("{:?} on {}", other, path))),
        }
    }

    /// Constant properties of the object at `path`
    pub fn properties(&self, path: &str) -> Result<Vec<(String, PropValue)>, Error> {
        let Some(id) = self.target(path)? else {
            return Ok(Vec::new());
        };
        let device = self
            .devices
            .device(&id)
            .ok_or(Error::DeviceNotFound(id))?;
        let max = i32::try_from(device.max()).unwrap_or(i32::MAX);
        Ok(vec![
            ("Max".to_string(), PropValue::Int(max)),
            ("Internal".to_string(), PropValue::Bool(device.internal())),
        ])
    }

    /// `None` for the collection object, the device id for a device object
    fn target(&self, path: &str) -> Result<Option<String>, Error> {
        if path == BACKLIGHT_PATH {
            return Ok(None);
        }
        self.devices
            .id_at(path)
            .map(Some)
            .ok_or_else(|| Error::DeviceNotFound(path.to_string()))
    }
}
