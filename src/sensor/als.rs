//! Ambient light sensors on the IIO bus
use super::{SensorPlugin, Settings};
use crate::error::Error;
use crate::hotplug::{Action, Uevent};
use crate::plugin::Plugin;
use crate::sysfs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

const DEFAULT_INTERVAL_MS: f64 = 20.0;
const MAX_INTERVAL_MS: f64 = 1000.0;
const DEFAULT_MAX_LUX: f64 = 500.0;

const INPUT_ATTR: &str = "in_illuminance_input";
const RAW_ATTRS: &[&str] = &["in_illuminance_raw", "in_intensity_both_raw"];
const SCALE_ATTRS: &[&str] = &["in_illuminance_scale", "in_intensity_scale"];
const OFFSET_ATTR: &str = "in_illuminance_offset";

/// Whether an IIO device directory reports illuminance
pub fn is_light_sensor(dir: &Path) -> bool {
    std::iter::once(INPUT_ATTR)
        .chain(RAW_ATTRS.iter().copied())
        .any(|attr| dir.join(attr).exists())
}

/// Current illuminance in lux
///
/// Processed input is preferred; raw counts are converted with the
/// device's offset and scale, which default to 0 and 1 when absent.
pub fn read_lux(dir: &Path) -> Result<f64, Error> {
    if dir.join(INPUT_ATTR).exists() {
        return sysfs::read_f64(dir, INPUT_ATTR);
    }
    let raw_attr = RAW_ATTRS
        .iter()
        .find(|attr| dir.join(attr).exists())
        .ok_or_else(|| Error::DeviceNotFound(dir.display().to_string()))?;
    let raw = sysfs::read_f64(dir, raw_attr)?;
    let offset = sysfs::read_f64(dir, OFFSET_ATTR).unwrap_or(0.0);
    let scale = SCALE_ATTRS
        .iter()
        .find_map(|attr| sysfs::read_f64(dir, attr).ok())
        .unwrap_or(1.0);
    Ok((raw + offset) * scale)
}

/// Map lux onto `0.0..=1.0` on a log scale topping out at `max`
pub fn normalize(lux: f64, max: f64) -> f64 {
    if lux <= 0.0 {
        return 0.0;
    }
    ((1.0 + lux).ln() / (1.0 + max).ln()).clamp(0.0, 1.0)
}

pub struct Als {
    devices_dir: PathBuf,
}

impl Als {
    pub fn new(sysfs_root: &Path) -> Self {
        Self {
            devices_dir: sysfs_root.join("bus").join("iio").join("devices"),
        }
    }

    fn sensors(&self) -> Vec<PathBuf> {
        sysfs::list(&self.devices_dir)
            .into_iter()
            .filter(|dir| is_light_sensor(dir))
            .collect()
    }
}

impl Plugin for Als {
    fn name(&self) -> &'static str {
        "Als"
    }
}

impl SensorPlugin for Als {
    fn subsystem(&self) -> &'static str {
        "iio"
    }

    fn locate(&mut self, interface: &str) -> Result<String, Error> {
        let wanted = Path::new(interface).file_name();
        self.sensors()
            .into_iter()
            .find(|dir| interface.is_empty() || dir.file_name() == wanted)
            .map(|dir| dir.display().to_string())
            .ok_or(Error::BackendMismatch("Als"))
    }

    fn capture(
        &mut self,
        node: &str,
        count: usize,
        settings: &Settings,
    ) -> Result<Vec<f64>, Error> {
        let interval = settings
            .number("interval", DEFAULT_INTERVAL_MS)?
            .clamp(0.0, MAX_INTERVAL_MS);
        let max = settings.number("max", DEFAULT_MAX_LUX)?;
        if max <= 0.0 {
            return Err(Error::InvalidArgument(format!("max={}", max)));
        }

        let dir = Path::new(node);
        let mut values = Vec::with_capacity(count);
        for i in 0..count {
            if i > 0 {
                thread::sleep(Duration::from_secs_f64(interval / 1000.0));
            }
            values.push(normalize(read_lux(dir)?, max));
        }
        Ok(values)
    }

    fn node_of(&self, event: &Uevent) -> Option<String> {
        if !event.sysname.starts_with("iio:device") {
            return None;
        }
        // A removed device has no attributes left to check
        if event.action == Action::Add && !is_light_sensor(&event.syspath) {
            return None;
        }
        Some(event.syspath.display().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sysfs::fixture::Scratch;

    #[test]
    fn processed_input_is_preferred() {
        let dir = Scratch::new("als-input");
        dir.file(INPUT_ATTR, "123.5\n");
        dir.file("in_illuminance_raw", "9999");
        assert_eq!(read_lux(dir.path()).unwrap(), 123.5);
    }

    #[test]
    fn raw_counts_use_offset_and_scale() {
        let dir = Scratch::new("als-raw");
        dir.file("in_illuminance_raw", "200");
        dir.file(OFFSET_ATTR, "10");
        dir.file("in_illuminance_scale", "0.5");
        assert_eq!(read_lux(dir.path()).unwrap(), 105.0);
    }

    #[test]
    fn missing_scale_defaults_to_one() {
        let dir = Scratch::new("als-noscale");
        dir.file("in_intensity_both_raw", "42");
        assert_eq!(read_lux(dir.path()).unwrap(), 42.0);
    }

    #[test]
    fn normalization_is_logarithmic_and_bounded() {
        assert_eq!(normalize(0.0, 500.0), 0.0);
        assert_eq!(normalize(500.0, 500.0), 1.0);
        assert_eq!(normalize(5000.0, 500.0), 1.0);
        let mid = normalize(21.36, 500.0);
        assert!((mid - 0.5).abs() < 0.01, "{mid}");
    }

    fn sysfs_with_sensor(tag: &str) -> Scratch {
        let root = Scratch::new(tag);
        root.file("bus/iio/devices/iio:device0/in_accel_x_raw", "1");
        root.file("bus/iio/devices/iio:device1/in_illuminance_input", "500");
        root
    }

    #[test]
    fn locate_skips_non_light_devices() {
        let root = sysfs_with_sensor("als-locate");
        let mut als = Als::new(root.path());
        let node = als.locate("").unwrap();
        assert!(node.ends_with("iio:device1"));
        assert_eq!(als.locate("iio:device1").unwrap(), node);
        assert!(matches!(
            als.locate("iio:device0"),
            Err(Error::BackendMismatch("Als"))
        ));
    }

    #[test]
    fn capture_reads_count_samples() {
        let root = sysfs_with_sensor("als-capture");
        let mut als = Als::new(root.path());
        let node = als.locate("").unwrap();
        let settings = Settings::parse("interval=0").unwrap();
        assert_eq!(als.capture(&node, 3, &settings).unwrap(), vec![1.0; 3]);

        let bad = Settings::parse("max=0").unwrap();
        assert!(als.capture(&node, 1, &bad).is_err());
    }

    #[test]
    fn hotplug_nodes() {
        let root = sysfs_with_sensor("als-uevent");
        let als = Als::new(root.path());
        let devices = root.path().join("bus/iio/devices");

        let added = Uevent::new(Action::Add, "iio", devices.join("iio:device1"));
        assert!(als.node_of(&added).is_some());

        let accel = Uevent::new(Action::Add, "iio", devices.join("iio:device0"));
        assert_eq!(als.node_of(&accel), None);

        let removed = Uevent::new(Action::Remove, "iio", devices.join("iio:device7"));
        assert!(als.node_of(&removed).is_some());

        let trigger = Uevent::new(Action::Add, "iio", devices.join("trigger0"));
        assert_eq!(als.node_of(&trigger), None);
    }
}
