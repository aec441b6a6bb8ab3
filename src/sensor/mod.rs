//! Brightness sensing
//!
//! `Capture` on `/Sensor` lets every backend have a go in priority order;
//! `Capture` on `/Sensor/<Backend>` only asks that backend. Sensors come
//! and go with udev, which is reported through `Changed(node, action)`.
pub mod als;
pub mod webcam;

use crate::bus::{Reply, Request, SENSOR_INTERFACE, SENSOR_PATH, Signal};
use crate::daemon::Runtime;
use crate::error::Error;
use crate::hotplug::{Action, Monitors, Uevent};
use crate::plugin::{Capability, Plugin, PluginTable};
use log::{debug, warn};

pub const KNOWN: &[&str] = &["als", "webcam"];

/// Upper bound on captures per call
pub const MAX_CAPTURES: i32 = 20;

/// `key=value` pairs from a comma-separated settings string
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Settings {
    pairs: Vec<(String, String)>,
}

impl Settings {
    pub fn parse(raw: &str) -> Result<Self, Error> {
        let mut pairs = Vec::new();
        for item in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let (key, value) = item
                .split_once('=')
                .map(|(k, v)| (k.trim(), v.trim()))
                .filter(|(k, v)| !k.is_empty() && !v.is_empty())
                .ok_or_else(|| Error::InvalidArgument(format!("bad setting {:?}", item)))?;
            pairs.push((key.to_string(), value.to_string()));
        }
        Ok(Self { pairs })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Numeric setting, `default` when absent
    pub fn number(&self, key: &str, default: f64) -> Result<f64, Error> {
        match self.get(key) {
            None => Ok(default),
            Some(v) => v
                .parse::<f64>()
                .ok()
                .filter(|n| n.is_finite())
                .ok_or_else(|| Error::InvalidArgument(format!("{}={:?}", key, v))),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

pub trait SensorPlugin: Plugin {
    /// udev subsystem announcing this backend's devices
    fn subsystem(&self) -> &'static str;

    /// Node serving `interface`, or the first usable node for an empty one
    ///
    /// A node this backend does not know is a [`Error::BackendMismatch`].
    fn locate(&mut self, interface: &str) -> Result<String, Error>;

    /// `count` brightness readings in `0.0..=1.0`
    fn capture(&mut self, node: &str, count: usize, settings: &Settings)
    -> Result<Vec<f64>, Error>;

    /// Node named by a hot-plug event, if it is one of this backend's
    fn node_of(&self, event: &Uevent) -> Option<String>;
}

pub fn table() -> PluginTable<dyn SensorPlugin> {
    PluginTable::new(Capability::Sensor, KNOWN)
}

/// Object path of a backend's sub-object
pub fn backend_path(name: &str) -> String {
    format!("{}/{}", SENSOR_PATH, name)
}

pub struct SensorService {
    plugins: PluginTable<dyn SensorPlugin>,
    monitors: Monitors,
}

impl SensorService {
    pub fn new(plugins: PluginTable<dyn SensorPlugin>) -> Self {
        Self {
            plugins,
            monitors: Monitors::new(Capability::Sensor),
        }
    }

    /// Object paths this service serves, collection first
    pub fn paths(&self) -> Vec<String> {
        std::iter::once(SENSOR_PATH.to_string())
            .chain(self.plugins.iter().map(|(_, p)| backend_path(p.name())))
            .collect()
    }

    pub fn start(&mut self, rt: &mut Runtime<'_>) -> Result<(), Error> {
        for path in self.paths() {
            rt.bus.register_object(&path, SENSOR_INTERFACE)?;
        }
        Ok(())
    }

    pub fn attach_monitors(&mut self, rt: &mut Runtime<'_>) {
        for (slot, plugin) in self.plugins.iter() {
            self.monitors.attach(rt.events, plugin.subsystem(), slot);
        }
    }

    /// Backend named by a `/Sensor/<Backend>` path, `None` for `/Sensor`
    ///
    /// Only the sub-objects of registered backends answer.
    fn explicit<'p>(&self, path: &'p str) -> Result<Option<&'p str>, Error> {
        if path == SENSOR_PATH {
            return Ok(None);
        }
        path.strip_prefix(SENSOR_PATH)
            .and_then(|rest| rest.strip_prefix('/'))
            .filter(|name| self.plugins.iter().any(|(_, p)| p.name() == *name))
            .map(Some)
            .ok_or_else(|| Error::DeviceNotFound(path.to_string()))
    }

    pub fn handle(&mut self, path: &str, request: &Request) -> Result<Reply, Error> {
        let explicit = self.explicit(path)?;
        match request {
            Request::SensorCapture {
                interface,
                count,
                settings,
            } => {
                if !(1..=MAX_CAPTURES).contains(count) {
                    return Err(Error::InvalidArgument(format!(
                        "capture count {} outside 1..={}",
                        count, MAX_CAPTURES
                    )));
                }
                let settings = Settings::parse(settings)?;
                let resolved = self
                    .plugins
                    .resolve(explicit, |plugin| plugin.locate(interface))?;
                let node = resolved.handle;
                let plugin = self
                    .plugins
                    .get_mut(resolved.slot)
                    .ok_or(Error::NoBackend(Capability::Sensor.name()))?;
                let values = plugin.capture(&node, *count as usize, &settings)?;
                debug!("{} captured {:?} from {}", plugin.name(), values, node);
                Ok(Reply::Capture { node, values })
            }
            Request::SensorIsAvailable { interface } => {
                match self
                    .plugins
                    .resolve(explicit, |plugin| plugin.locate(interface))
                {
                    Ok(resolved) => Ok(Reply::Availability {
                        node: resolved.handle,
                        available: true,
                    }),
                    Err(
                        Error::NoBackend(_)
                        | Error::TargetInvalid(_)
                        | Error::DeviceNotFound(_)
                        | Error::BackendMismatch(_)
                        | Error::ProtocolNotSupported(_),
                    ) => Ok(Reply::Availability {
                        node: interface.clone(),
                        available: false,
                    }),
                    Err(e) => Err(e),
                }
            }
            other => Err(Error::Unsupported(format!("{:?} on {}", other, path))),
        }
    }

    /// A sensor hot-plug monitor became readable
    pub fn on_hotplug(&mut self, rt: &mut Runtime<'_>, index: usize) {
        let Some((slot, events)) = self.monitors.drain(index) else {
            return;
        };
        for event in events {
            self.handle_event(rt, slot, &event);
        }
    }

    /// Announce a sensor appearing or disappearing
    pub fn handle_event(&mut self, rt: &mut Runtime<'_>, slot: usize, event: &Uevent) {
        let action = match event.action {
            Action::Add => "added",
            Action::Remove => "removed",
            _ => return,
        };
        let Some(plugin) = self.plugins.get(slot) else {
            return;
        };
        let Some(node) = plugin.node_of(event) else {
            return;
        };
        debug!("{} sensor {} {}", plugin.name(), node, action);
        let signal = Signal::Node { node, action };
        rt.emit(SENSOR_PATH, SENSOR_INTERFACE, signal.clone());
        rt.emit(&backend_path(plugin.name()), SENSOR_INTERFACE, signal);
    }

    pub fn shutdown(&mut self, rt: &mut Runtime<'_>) {
        self.monitors.detach_all(rt.events);
        for path in self.paths() {
            if let Err(e) = rt.bus.unregister_object(&path) {
                warn!("Failed to unregister {}: {}", path, e);
            }
        }
    }
}
