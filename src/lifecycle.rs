//! Device lifecycle
//!
//! A [`DeviceManager`] owns the device table of one capability: it enumerates
//! what is present at startup, follows udev hot-plug, re-scans backends that
//! cannot report hot-plug themselves, keeps the per-device bus objects in
//! step with the table, and drives smooth transitions for its devices.
use crate::bus::{Adjust, Signal};
use crate::daemon::Runtime;
use crate::device::{Device, Discovered, object_path};
use crate::error::Error;
use crate::hotplug::{Monitors, Uevent};
use crate::mainloop::Source;
use crate::map::{DeviceMap, Insertion};
use crate::plugin::{Capability, Plugin, PluginTable};
use crate::smooth::{self, Smooth, Tick};
use log::{debug, info, warn};

/// What a backend makes of a hot-plug event
#[derive(Debug)]
pub enum Hotplug {
    /// A new device that supports the capability
    Added(Discovered),
    /// Device id gone
    Removed(String),
    /// Device id may have a new value
    Changed(String),
    /// Re-enumerate this backend
    Rescan,
    Ignored,
}

/// Backend producing device records
pub trait DevicePlugin: Plugin {
    /// udev subsystems whose events concern this backend
    fn subsystems(&self) -> &'static [&'static str];

    /// Every device currently present and usable
    fn enumerate(&mut self) -> Result<Vec<Discovered>, Error>;

    fn classify(&mut self, event: &Uevent) -> Hotplug;
}

/// Where a capability's objects live and what its signals look like
#[derive(Debug, Clone, Copy)]
pub struct Layout {
    pub capability: Capability,
    /// Collection-wide object
    pub collection: &'static str,
    pub interface: &'static str,
    /// Interface of per-device child objects, if the capability has them
    pub device_interface: Option<&'static str>,
    /// Collection `Changed` carries `(id, value)` instead of a bare value
    pub named_signal: bool,
}

pub struct DeviceManager {
    layout: Layout,
    plugins: PluginTable<dyn DevicePlugin>,
    devices: DeviceMap<Device>,
    monitors: Monitors,
    generation: u64,
}

/// Signal the device's cached value, i.e. `last / max` after rounding to raw
fn emit_changed(layout: &Layout, rt: &mut Runtime<'_>, device: &Device) {
    let value = device.fraction();
    let collection = if layout.named_signal {
        Signal::Level {
            id: device.id().to_string(),
            value,
        }
    } else {
        Signal::Value(value)
    };
    rt.emit(layout.collection, layout.interface, collection);
    if let (Some(path), Some(interface)) = (device.path(), layout.device_interface) {
        rt.emit(path, interface, Signal::Value(value));
    }
}

impl DeviceManager {
    pub fn new(layout: Layout, plugins: PluginTable<dyn DevicePlugin>) -> Self {
        Self {
            monitors: Monitors::new(layout.capability),
            layout,
            plugins,
            devices: DeviceMap::new(),
            generation: 0,
        }
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn devices(&self) -> &DeviceMap<Device> {
        &self.devices
    }

    pub fn device(&self, id: &str) -> Option<&Device> {
        self.devices.get(id)
    }

    /// Id of the device whose object lives at `path`
    pub fn id_at(&self, path: &str) -> Option<String> {
        self.devices
            .iter()
            .find(|(_, d)| d.path() == Some(path))
            .map(|(id, _)| id.to_string())
    }

    /// Register the collection object and enumerate every backend
    pub fn start(&mut self, rt: &mut Runtime<'_>) -> Result<(), Error> {
        rt.bus
            .register_object(self.layout.collection, self.layout.interface)?;
        let slots: Vec<usize> = self.plugins.iter().map(|(slot, _)| slot).collect();
        for slot in slots {
            self.rescan(rt, slot);
        }
        info!(
            "{} devices: {}",
            self.layout.capability.name(),
            self.devices.len()
        );
        Ok(())
    }

    /// Open hot-plug monitors for every backend's subsystems
    pub fn attach_monitors(&mut self, rt: &mut Runtime<'_>) {
        for (slot, plugin) in self.plugins.iter() {
            for &subsystem in plugin.subsystems() {
                self.monitors.attach(rt.events, subsystem, slot);
            }
        }
    }

    /// A hot-plug monitor became readable
    pub fn on_hotplug(&mut self, rt: &mut Runtime<'_>, index: usize) {
        let Some((slot, events)) = self.monitors.drain(index) else {
            return;
        };
        for event in events {
            self.handle_event(rt, slot, &event);
        }
    }

    /// Apply one hot-plug event on behalf of the backend in `slot`
    pub fn handle_event(&mut self, rt: &mut Runtime<'_>, slot: usize, event: &Uevent) {
        let Some(plugin) = self.plugins.get_mut(slot) else {
            return;
        };
        match plugin.classify(event) {
            Hotplug::Added(discovered) => {
                let id = discovered.id.clone();
                if let Err(e) = self.insert(rt, slot, discovered, self.generation) {
                    warn!("Failed to add device '{}': {}", id, e);
                }
            }
            Hotplug::Removed(id) => {
                self.remove(rt, &id);
            }
            Hotplug::Changed(id) => self.refresh(rt, &id),
            Hotplug::Rescan => self.rescan(rt, slot),
            Hotplug::Ignored => {}
        }
    }

    /// Register a device, or update it in place if the id is known
    ///
    /// A new device's bus object is registered before it enters the table.
    /// On any failure the discovered handle is dropped and nothing is left
    /// behind.
    pub fn insert(
        &mut self,
        rt: &mut Runtime<'_>,
        slot: usize,
        mut discovered: Discovered,
        cookie: u64,
    ) -> Result<Insertion, Error> {
        if discovered.max == 0 {
            return Err(Error::InvalidArgument(format!(
                "device '{}' reports a zero range",
                discovered.id
            )));
        }
        let kind = self
            .plugins
            .get(slot)
            .map(|p| p.name())
            .ok_or(Error::NoBackend(self.layout.capability.name()))?;
        let last = discovered.control.get()?.min(discovered.max);

        if let Some(existing) = self.devices.get_mut(&discovered.id) {
            smooth::cancel(&mut existing.transition, rt.events);
            existing.replace(discovered, kind, slot, last, cookie);
            info!("Updated {} device '{}'", kind, existing.id());
            return Ok(Insertion::Replaced);
        }

        let path = match self.layout.device_interface {
            Some(interface) => {
                let path = object_path(self.layout.collection, &discovered.id);
                rt.bus.register_object(&path, interface)?;
                Some(path)
            }
            None => None,
        };
        let id = discovered.id.clone();
        info!("Added {} device '{}' (max {})", kind, id, discovered.max);
        let device = Device::new(discovered, kind, slot, last, path, cookie);
        Ok(self.devices.insert(id, device))
    }

    /// Unregister and drop a device. Returns false if it was unknown.
    pub fn remove(&mut self, rt: &mut Runtime<'_>, id: &str) -> bool {
        let Some(mut device) = self.devices.take(id) else {
            debug!("Remove for unknown device '{}'", id);
            return false;
        };
        smooth::cancel(&mut device.transition, rt.events);
        if let Some(path) = device.path()
            && let Err(e) = rt.bus.unregister_object(path)
        {
            warn!("Failed to unregister {}: {}", path, e);
        }
        info!("Removed {} device '{}'", device.kind(), id);
        true
    }

    /// Re-read a device and signal only if its value moved
    pub fn refresh(&mut self, rt: &mut Runtime<'_>, id: &str) {
        let Some(device) = self.devices.get_mut(id) else {
            return;
        };
        match device.sync() {
            Ok(true) => emit_changed(&self.layout, rt, device),
            Ok(false) => debug!("Device '{}' unchanged", id),
            Err(e) => warn!("Failed to read device '{}': {}", id, e),
        }
    }

    /// Full re-enumeration of one backend
    ///
    /// Devices still present get the new generation cookie; devices of this
    /// backend left with an older cookie are removed.
    pub fn rescan(&mut self, rt: &mut Runtime<'_>, slot: usize) {
        self.generation += 1;
        let generation = self.generation;
        let Some(plugin) = self.plugins.get_mut(slot) else {
            return;
        };
        let found = match plugin.enumerate() {
            Ok(found) => found,
            Err(e) => {
                warn!("Failed to enumerate {} devices: {}", plugin.name(), e);
                return;
            }
        };

        for discovered in found {
            match self.devices.get_mut(&discovered.id) {
                Some(device) if device.slot() == slot => device.cookie = generation,
                Some(device) => debug!(
                    "Device '{}' already provided by {}",
                    discovered.id,
                    device.kind()
                ),
                None => {
                    let id = discovered.id.clone();
                    if let Err(e) = self.insert(rt, slot, discovered, generation) {
                        warn!("Failed to add device '{}': {}", id, e);
                    }
                }
            }
        }

        let mut cursor = self.devices.cursor();
        while let Some(id) = self.devices.advance(&mut cursor) {
            let stale = self
                .devices
                .get(&id)
                .is_some_and(|d| d.slot() == slot && d.cookie != generation);
            if stale {
                self.remove(rt, &id);
            }
        }
    }

    /// Set one device, immediately or through a transition
    pub fn set(
        &mut self,
        rt: &mut Runtime<'_>,
        id: &str,
        target: f64,
        smooth: Smooth,
    ) -> Result<(), Error> {
        let device = self
            .devices
            .get_mut(id)
            .ok_or_else(|| Error::DeviceNotFound(id.to_string()))?;
        let target = target.clamp(0.0, 1.0);

        if smooth.applies_to(target) {
            let source = Source::Tick {
                capability: self.layout.capability,
                id: id.to_string(),
            };
            let start = device.fraction();
            return smooth::begin(&mut device.transition, rt.events, source, start, target, smooth);
        }

        smooth::cancel(&mut device.transition, rt.events);
        device.apply(target)?;
        emit_changed(&self.layout, rt, device);
        Ok(())
    }

    /// Absolute or relative change on one device
    pub fn adjust(
        &mut self,
        rt: &mut Runtime<'_>,
        id: &str,
        adjust: Adjust,
        value: f64,
        smooth: Smooth,
    ) -> Result<(), Error> {
        let current = self
            .devices
            .get(id)
            .map(Device::fraction)
            .ok_or_else(|| Error::DeviceNotFound(id.to_string()))?;
        let target = match adjust {
            Adjust::Absolute => value,
            Adjust::Raise => current + value,
            Adjust::Lower => current - value,
        };
        self.set(rt, id, target, smooth)
    }

    /// [`DeviceManager::adjust`] on every device
    ///
    /// Devices that succeed keep their new value even when others fail; the
    /// failures are reported together.
    pub fn adjust_all(
        &mut self,
        rt: &mut Runtime<'_>,
        adjust: Adjust,
        value: f64,
        smooth: Smooth,
    ) -> Result<(), Error> {
        self.fan_out(|manager, id| manager.adjust(rt, id, adjust, value, smooth))
    }

    /// Set the idle timeout on every device
    pub fn set_timeout_all(&mut self, seconds: i32) -> Result<(), Error> {
        self.fan_out(|manager, id| {
            manager
                .devices
                .get_mut(id)
                .ok_or_else(|| Error::DeviceNotFound(id.to_string()))?
                .set_timeout(seconds)
        })
    }

    fn fan_out(
        &mut self,
        mut op: impl FnMut(&mut Self, &str) -> Result<(), Error>,
    ) -> Result<(), Error> {
        let ids: Vec<String> = self.devices.keys().map(str::to_owned).collect();
        if ids.is_empty() {
            return Err(Error::NoBackend(self.layout.capability.name()));
        }
        let mut failed = Vec::new();
        for id in &ids {
            if let Err(e) = op(self, id) {
                warn!("{} device '{}': {}", self.layout.capability.name(), id, e);
                failed.push(id.clone());
            }
        }
        if failed.is_empty() {
            Ok(())
        } else {
            Err(Error::PartialFailure {
                failed,
                total: ids.len(),
            })
        }
    }

    /// Live value of one device as a fraction
    pub fn get(&mut self, id: &str) -> Result<f64, Error> {
        let device = self
            .devices
            .get_mut(id)
            .ok_or_else(|| Error::DeviceNotFound(id.to_string()))?;
        device.sync()?;
        Ok(device.fraction())
    }

    /// Live values of every device, best effort
    ///
    /// Devices that fail to read are logged and left out.
    pub fn levels(&mut self) -> Vec<(String, f64)> {
        let mut levels = Vec::with_capacity(self.devices.len());
        for (id, device) in self.devices.iter_mut() {
            match device.sync() {
                Ok(_) => levels.push((id.to_string(), device.fraction())),
                Err(e) => warn!("Failed to read device '{}': {}", id, e),
            }
        }
        levels
    }

    /// First device in table order
    pub fn first(&mut self) -> Result<&mut Device, Error> {
        self.devices
            .iter_mut()
            .map(|(_, d)| d)
            .next()
            .ok_or(Error::NoBackend(self.layout.capability.name()))
    }

    /// Advance the transition of `id` by one tick
    pub fn tick(&mut self, rt: &mut Runtime<'_>, id: &str) {
        let Some(device) = self.devices.get_mut(id) else {
            return;
        };
        let Some(transition) = device.transition.as_mut() else {
            return;
        };
        let tick = transition.tick();
        if let Err(e) = device.apply(tick.value()) {
            warn!("Aborting transition on '{}': {}", id, e);
            smooth::cancel(&mut device.transition, rt.events);
            return;
        }
        emit_changed(&self.layout, rt, device);
        if let Tick::Finished(value) = tick {
            debug!("Transition on '{}' reached {}", id, value);
            smooth::cancel(&mut device.transition, rt.events);
        }
    }

    /// Stop monitors, cancel transitions, and unregister every object
    pub fn shutdown(&mut self, rt: &mut Runtime<'_>) {
        self.monitors.detach_all(rt.events);
        let mut cursor = self.devices.cursor();
        while let Some(id) = self.devices.advance(&mut cursor) {
            self.remove(rt, &id);
        }
        if let Err(e) = rt.bus.unregister_object(self.layout.collection) {
            warn!("Failed to unregister {}: {}", self.layout.collection, e);
        }
    }
}
