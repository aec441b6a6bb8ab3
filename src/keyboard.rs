//! Keyboard backlight through the LED class
use crate::bus::{Adjust, KBD_INTERFACE, KBD_PATH, Reply, Request};
use crate::daemon::Runtime;
use crate::device::{Control, Discovered};
use crate::error::Error;
use crate::hotplug::{Action, Uevent};
use crate::lifecycle::{DeviceManager, DevicePlugin, Hotplug, Layout};
use crate::plugin::{Capability, Plugin, PluginTable};
use crate::smooth::Smooth;
use crate::sysfs;
use log::debug;
use std::path::{Path, PathBuf};

pub const KNOWN: &[&str] = &["leds"];

pub const LAYOUT: Layout = Layout {
    capability: Capability::Keyboard,
    collection: KBD_PATH,
    interface: KBD_INTERFACE,
    device_interface: None,
    named_signal: false,
};

const TIMEOUT_ATTR: &str = "stop_timeout";

pub fn table() -> PluginTable<dyn DevicePlugin> {
    PluginTable::new(Capability::Keyboard, KNOWN)
}

/// Parse an LED trigger timeout (`30s`, `2m`, `1h`, `1d`, bare seconds)
pub fn parse_timeout(value: &str) -> Result<i32, Error> {
    let value = value.trim();
    let invalid = || Error::InvalidArgument(format!("bad timeout {:?}", value));
    let (digits, unit) = match value.find(|c: char| !c.is_ascii_digit()) {
        Some(at) => value.split_at(at),
        None => (value, "s"),
    };
    let count: i32 = digits.parse().map_err(|_| invalid())?;
    let scale = match unit {
        "s" => 1,
        "m" => 60,
        "h" => 3600,
        "d" => 86400,
        _ => return Err(invalid()),
    };
    count.checked_mul(scale).ok_or_else(invalid)
}

pub struct LedControl {
    dir: PathBuf,
}

impl Control for LedControl {
    fn get(&mut self) -> Result<u32, Error> {
        sysfs::read_u32(&self.dir, "brightness")
    }

    fn set(&mut self, raw: u32) -> Result<(), Error> {
        sysfs::write_attr(&self.dir, "brightness", &raw.to_string())
    }

    fn timeout(&mut self) -> Result<i32, Error> {
        if !self.dir.join(TIMEOUT_ATTR).exists() {
            return Err(Error::Unsupported("keyboard backlight timeout".to_string()));
        }
        parse_timeout(&sysfs::read_attr(&self.dir, TIMEOUT_ATTR)?)
    }

    fn set_timeout(&mut self, seconds: i32) -> Result<(), Error> {
        if seconds < 0 {
            return Err(Error::InvalidArgument(format!(
                "negative timeout {}",
                seconds
            )));
        }
        if !self.dir.join(TIMEOUT_ATTR).exists() {
            return Err(Error::Unsupported("keyboard backlight timeout".to_string()));
        }
        sysfs::write_attr(&self.dir, TIMEOUT_ATTR, &format!("{}s", seconds))
    }
}

pub struct Leds {
    class_dir: PathBuf,
}

impl Leds {
    pub fn new(sysfs_root: &Path) -> Self {
        Self {
            class_dir: sysfs_root.join("class").join("leds"),
        }
    }

    fn probe(dir: &Path) -> Option<Discovered> {
        let id = sysfs::name_of(dir)?;
        if !id.contains("kbd_backlight") {
            return None;
        }
        let max = sysfs::read_u32(dir, "max_brightness").ok().filter(|&m| m > 0);
        let Some(max) = max else {
            debug!("Skipping LED '{}': no usable max_brightness", id);
            return None;
        };
        Some(Discovered {
            id: id.to_string(),
            control: Box::new(LedControl {
                dir: dir.to_path_buf(),
            }),
            max,
            internal: true,
        })
    }
}

impl Plugin for Leds {
    fn name(&self) -> &'static str {
        "Leds"
    }
}

impl DevicePlugin for Leds {
    fn subsystems(&self) -> &'static [&'static str] {
        &["leds"]
    }

    fn enumerate(&mut self) -> Result<Vec<Discovered>, Error> {
        Ok(sysfs::list(&self.class_dir)
            .iter()
            .filter_map(|dir| Self::probe(dir))
            .collect())
    }

    fn classify(&mut self, event: &Uevent) -> Hotplug {
        if !event.sysname.contains("kbd_backlight") {
            return Hotplug::Ignored;
        }
        match event.action {
            Action::Add => Self::probe(&event.syspath).map_or(Hotplug::Ignored, Hotplug::Added),
            Action::Remove => Hotplug::Removed(event.sysname.clone()),
            Action::Change => Hotplug::Changed(event.sysname.clone()),
            Action::Other => Hotplug::Ignored,
        }
    }
}

pub struct KeyboardService {
    devices: DeviceManager,
}

impl KeyboardService {
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

    pub fn handle(&mut self, rt: &mut Runtime<'_>, request: &Request) -> Result<Reply, Error> {
        match request {
            Request::KbdSet(value) => {
                if !value.is_finite() {
                    return Err(Error::InvalidArgument("value must be finite".to_string()));
                }
                self.devices
                    .adjust_all(rt, Adjust::Absolute, *value, Smooth::NONE)?;
                Ok(Reply::Bool(true))
            }
            Request::KbdGet => {
                let device = self.devices.first()?;
                device.sync()?;
                Ok(Reply::Double(device.fraction()))
            }
            Request::KbdSetTimeout(seconds) => {
                self.devices.set_timeout_all(*seconds)?;
                Ok(Reply::Bool(true))
            }
            Request::KbdGetTimeout => Ok(Reply::Int(self.devices.first()?.timeout()?)),
            other => Err(Error::Unsupported(format!("{:?} on {}", other, KBD_PATH))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sysfs::fixture::Scratch;

    fn led(root: &Scratch, name: &str, max: &str) {
        root.file(&format!("class/leds/{name}/max_brightness"), max);
        root.file(&format!("class/leds/{name}/brightness"), "1");
    }

    #[test]
    fn timeouts_parse_with_units() {
        assert_eq!(parse_timeout("30s").unwrap(), 30);
        assert_eq!(parse_timeout("2m").unwrap(), 120);
        assert_eq!(parse_timeout("1h\n").unwrap(), 3600);
        assert_eq!(parse_timeout("1d").unwrap(), 86400);
        assert_eq!(parse_timeout("45").unwrap(), 45);
        assert!(parse_timeout("5w").is_err());
        assert!(parse_timeout("s").is_err());
    }

    #[test]
    fn only_keyboard_leds_are_enumerated() {
        let root = Scratch::new("kbd-enum");
        led(&root, "tpacpi::kbd_backlight", "2");
        led(&root, "input3::capslock", "1");

        let found = Leds::new(root.path()).enumerate().unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "tpacpi::kbd_backlight");
        assert_eq!(found[0].max, 2);
    }

    #[test]
    fn timeout_round_trips_through_stop_timeout() {
        let root = Scratch::new("kbd-timeout");
        led(&root, "asus::kbd_backlight", "3");
        root.file("class/leds/asus::kbd_backlight/stop_timeout", "2m");

        let mut found = Leds::new(root.path()).enumerate().unwrap();
        let control = &mut found[0].control;
        assert_eq!(control.timeout().unwrap(), 120);

        control.set_timeout(15).unwrap();
        assert_eq!(
            sysfs::read_attr(&root.path().join("class/leds/asus::kbd_backlight"), TIMEOUT_ATTR)
                .unwrap(),
            "15s"
        );
        assert!(matches!(
            control.set_timeout(-1),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn missing_timeout_attribute_is_unsupported() {
        let root = Scratch::new("kbd-no-timeout");
        led(&root, "dell::kbd_backlight", "2");

        let mut found = Leds::new(root.path()).enumerate().unwrap();
        assert!(matches!(
            found[0].control.timeout(),
            Err(Error::Unsupported(_))
        ));
    }

    #[test]
    fn uevents_for_other_leds_are_ignored() {
        let root = Scratch::new("kbd-uevent");
        let mut plugin = Leds::new(root.path());
        let event = Uevent::new(
            Action::Remove,
            "leds",
            root.path().join("class/leds/input3::numlock"),
        );
        assert!(matches!(plugin.classify(&event), Hotplug::Ignored));

        let event = Uevent::new(
            Action::Remove,
            "leds",
            root.path().join("class/leds/tpacpi::kbd_backlight"),
        );
        assert!(matches!(plugin.classify(&event), Hotplug::Removed(id) if id == "tpacpi::kbd_backlight"));
    }
}
