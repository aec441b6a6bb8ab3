//! External monitors over DDC/CI
//!
//! Connected DRM connectors are mapped to their i2c bus and queried for the
//! luminance VCP feature. Panels wired to the GPU directly (eDP, LVDS, DSI)
//! have no DDC channel and are skipped.
use crate::device::{Control, Discovered};
use crate::error::Error;
use crate::hotplug::Uevent;
use crate::lifecycle::{DevicePlugin, Hotplug};
use crate::plugin::Plugin;
use crate::sysfs;
use ddc::Ddc;
use log::debug;
use std::fs;
use std::path::{Path, PathBuf};

const INTERNAL_CONNECTORS: &[&str] = &["eDP", "LVDS", "DSI"];

/// `(current, max)` of a VCP reply
fn current_and_max(value: &ddc::VcpValue) -> (u32, u32) {
    (
        u32::from(value.sh) * 256 + u32::from(value.sl),
        u32::from(value.mh) * 256 + u32::from(value.ml),
    )
}

/// Connector type of a DRM connector directory name (`card0-DP-1` -> `DP`)
fn connector_type(name: &str) -> Option<&str> {
    let (_, connector) = name.split_once('-')?;
    Some(connector.rsplit_once('-').map_or(connector, |(kind, _)| kind))
}

/// i2c bus behind a DRM connector directory
///
/// AMD exposes an `i2c-N` child or a `ddc` symlink to it, Intel a
/// `ddc/i2c-dev/i2c-N` entry.
fn i2c_bus(connector: &Path) -> Option<String> {
    let is_bus = |name: &str| name.starts_with("i2c-");

    for entry in sysfs::list(connector) {
        if let Some(name) = sysfs::name_of(&entry).filter(|n| is_bus(n)) {
            return Some(name.to_string());
        }
    }
    let ddc = connector.join("ddc");
    if let Ok(target) = fs::read_link(&ddc)
        && let Some(name) = sysfs::name_of(&target).filter(|n| is_bus(n))
    {
        return Some(name.to_string());
    }
    sysfs::list(&ddc.join("i2c-dev"))
        .iter()
        .find_map(|p| sysfs::name_of(p).filter(|n| is_bus(n)).map(str::to_owned))
}

/// Monitor serial from the EDID's display serial descriptor (tag 0xFF)
pub fn edid_serial(edid: &[u8]) -> Option<String> {
    const DESCRIPTORS: [usize; 4] = [54, 72, 90, 108];
    for offset in DESCRIPTORS {
        let block = edid.get(offset..offset + 18)?;
        if block[..3] == [0, 0, 0] && block[3] == 0xff {
            let text: String = block[5..]
                .iter()
                .take_while(|&&b| b != b'\n' && b != 0)
                .map(|&b| char::from(b))
                .collect();
            let text = text.trim();
            if !text.is_empty() {
                return Some(text.to_string());
            }
        }
    }
    None
}

pub struct DdcControl {
    bus: String,
    vcp: u8,
    ddc: ddc_i2c::I2cDeviceDdc,
}

impl Control for DdcControl {
    fn get(&mut self) -> Result<u32, Error> {
        let value = self
            .ddc
            .get_vcp_feature(self.vcp)
            .map_err(|e| Error::Ddc(format!("{}: {:?}", self.bus, e)))?;
        Ok(current_and_max(&value).0)
    }

    fn set(&mut self, raw: u32) -> Result<(), Error> {
        let raw = u16::try_from(raw).unwrap_or(u16::MAX);
        self.ddc
            .set_vcp_feature(self.vcp, raw)
            .map_err(|e| Error::Ddc(format!("{}: {:?}", self.bus, e)))
    }
}

pub struct DdcBacklight {
    drm_dir: PathBuf,
    dev_root: PathBuf,
    vcp: u8,
}

impl DdcBacklight {
    pub fn new(sysfs_root: &Path, dev_root: &Path, vcp: u8) -> Self {
        Self {
            drm_dir: sysfs_root.join("class").join("drm"),
            dev_root: dev_root.to_path_buf(),
            vcp,
        }
    }

    fn probe(&self, connector: &Path) -> Option<Discovered> {
        let name = sysfs::name_of(connector)?;
        let kind = connector_type(name)?;
        if INTERNAL_CONNECTORS.iter().any(|k| kind.starts_with(k)) {
            return None;
        }
        if sysfs::read_attr(connector, "status").ok()? != "connected" {
            return None;
        }
        let bus = i2c_bus(connector)?;

        let mut ddc = match ddc_i2c::from_i2c_device(self.dev_root.join(&bus)) {
            Ok(ddc) => ddc,
            Err(e) => {
                debug!("{}: cannot open {}: {}", name, bus, e);
                return None;
            }
        };
        let value = match ddc.get_vcp_feature(self.vcp) {
            Ok(value) => value,
            Err(e) => {
                debug!("{}: no VCP 0x{:02x} on {}: {:?}", name, self.vcp, bus, e);
                return None;
            }
        };
        let (_, max) = current_and_max(&value);

        let id = fs::read(connector.join("edid"))
            .ok()
            .and_then(|edid| edid_serial(&edid))
            .unwrap_or_else(|| bus.clone());
        Some(Discovered {
            id,
            control: Box::new(DdcControl {
                bus,
                vcp: self.vcp,
                ddc,
            }),
            max,
            internal: false,
        })
    }
}

impl Plugin for DdcBacklight {
    fn name(&self) -> &'static str {
        "Ddc"
    }
}

impl DevicePlugin for DdcBacklight {
    fn subsystems(&self) -> &'static [&'static str] {
        &["drm"]
    }

    fn enumerate(&mut self) -> Result<Vec<Discovered>, Error> {
        Ok(sysfs::list(&self.drm_dir)
            .iter()
            .filter(|p| sysfs::name_of(p).is_some_and(|n| n.contains('-')))
            .filter_map(|p| self.probe(p))
            .collect())
    }

    /// Connector events name the card, not the monitor, so any of them
    /// means "look again"
    fn classify(&mut self, _event: &Uevent) -> Hotplug {
        Hotplug::Rescan
    }
}
