//! Backlight class devices (`/sys/class/backlight`)
use crate::device::{Control, Discovered};
use crate::error::Error;
use crate::hotplug::{Action, Uevent};
use crate::lifecycle::{DevicePlugin, Hotplug};
use crate::plugin::Plugin;
use crate::sysfs;
use log::debug;
use std::path::{Path, PathBuf};

pub struct SysfsControl {
    dir: PathBuf,
}

impl Control for SysfsControl {
    fn get(&mut self) -> Result<u32, Error> {
        // actual_brightness is what the hardware reports, brightness what was requested
        sysfs::read_u32(&self.dir, "actual_brightness")
            .or_else(|_| sysfs::read_u32(&self.dir, "brightness"))
    }

    fn set(&mut self, raw: u32) -> Result<(), Error> {
        sysfs::write_attr(&self.dir, "brightness", &raw.to_string())
    }
}

pub struct Sysfs {
    class_dir: PathBuf,
}

impl Sysfs {
    pub fn new(sysfs_root: &Path) -> Self {
        Self {
            class_dir: sysfs_root.join("class").join("backlight"),
        }
    }

    /// Build a record for a backlight directory with a usable range
    fn probe(dir: &Path) -> Option<Discovered> {
        let id = sysfs::name_of(dir)?.to_string();
        let max = match sysfs::read_u32(dir, "max_brightness") {
            Ok(max) if max > 0 => max,
            Ok(_) => {
                debug!("Skipping backlight '{}': zero max_brightness", id);
                return None;
            }
            Err(e) => {
                debug!("Skipping backlight '{}': {}", id, e);
                return None;
            }
        };
        Some(Discovered {
            id,
            control: Box::new(SysfsControl {
                dir: dir.to_path_buf(),
            }),
            max,
            internal: true,
        })
    }
}

impl Plugin for Sysfs {
    fn name(&self) -> &'static str {
        "Sysfs"
    }
}

impl DevicePlugin for Sysfs {
    fn subsystems(&self) -> &'static [&'static str] {
        &["backlight"]
    }

    fn enumerate(&mut self) -> Result<Vec<Discovered>, Error> {
        Ok(sysfs::list(&self.class_dir)
            .iter()
            .filter_map(|dir| Self::probe(dir))
            .collect())
    }

    fn classify(&mut self, event: &Uevent) -> Hotplug {
        match event.action {
            Action::Add => match Self::probe(&event.syspath) {
                Some(discovered) => Hotplug::Added(discovered),
                None => Hotplug::Ignored,
            },
            Action::Remove => Hotplug::Removed(event.sysname.clone()),
            Action::Change => Hotplug::Changed(event.sysname.clone()),
            Action::Other => Hotplug::Ignored,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sysfs::fixture::Scratch;

    fn backlight(root: &Scratch, name: &str, max: &str, current: &str) {
        root.file(&format!("class/backlight/{name}/max_brightness"), max);
        root.file(&format!("class/backlight/{name}/brightness"), current);
        root.file(&format!("class/backlight/{name}/actual_brightness"), current);
    }

    #[test]
    fn enumerates_devices_with_a_range() {
        let root = Scratch::new("bl-enum");
        backlight(&root, "intel_backlight", "1000", "400");
        backlight(&root, "broken", "0", "0");

        let found = Sysfs::new(root.path()).enumerate().unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "intel_backlight");
        assert_eq!(found[0].max, 1000);
        assert!(found[0].internal);
    }

    #[test]
    fn control_reads_actual_and_writes_brightness() {
        let root = Scratch::new("bl-control");
        backlight(&root, "acpi_video0", "15", "7");

        let mut found = Sysfs::new(root.path()).enumerate().unwrap();
        let control = &mut found[0].control;
        assert_eq!(control.get().unwrap(), 7);

        control.set(12).unwrap();
        let written =
            std::fs::read_to_string(root.path().join("class/backlight/acpi_video0/brightness"))
                .unwrap();
        assert_eq!(written, "12");
    }

    #[test]
    fn missing_class_dir_enumerates_nothing() {
        let root = Scratch::new("bl-empty");
        assert!(Sysfs::new(root.path()).enumerate().unwrap().is_empty());
    }

    #[test]
    fn classifies_uevents() {
        let root = Scratch::new("bl-uevent");
        backlight(&root, "amdgpu_bl0", "255", "128");
        let mut plugin = Sysfs::new(root.path());
        let syspath = root.path().join("class/backlight/amdgpu_bl0");

        let added = plugin.classify(&Uevent::new(Action::Add, "backlight", &syspath));
        assert!(matches!(added, Hotplug::Added(d) if d.id == "amdgpu_bl0"));

        let changed = plugin.classify(&Uevent::new(Action::Change, "backlight", &syspath));
        assert!(matches!(changed, Hotplug::Changed(id) if id == "amdgpu_bl0"));

        let removed = plugin.classify(&Uevent::new(Action::Remove, "backlight", &syspath));
        assert!(matches!(removed, Hotplug::Removed(id) if id == "amdgpu_bl0"));

        let bogus = plugin.classify(&Uevent::new(
            Action::Add,
            "backlight",
            root.path().join("class/backlight/ghost"),
        ));
        assert!(matches!(bogus, Hotplug::Ignored));
    }
}
