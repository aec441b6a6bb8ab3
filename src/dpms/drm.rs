//! DPMS through the DRM atomic CRTC `ACTIVE` property
//!
//! Works on a bare TTY only; under a compositor the card's master is taken.
use super::{DpmsOutput, DpmsPlugin, Level};
use crate::display::DisplayTarget;
use crate::drm_ops::{Card, open_card};
use crate::error::Error;
use crate::plugin::Plugin;
use log::debug;
use std::path::PathBuf;

pub struct DrmDpms {
    dev_root: PathBuf,
}

impl DrmDpms {
    pub fn new(dev_root: impl Into<PathBuf>) -> Self {
        Self {
            dev_root: dev_root.into(),
        }
    }
}

struct DrmOutput {
    card: Card,
}

impl DpmsOutput for DrmOutput {
    fn level(&mut self) -> Result<Level, Error> {
        let device = self.card.device();
        for crtc in device.connected_crtcs()? {
            if device.crtc_active(crtc)? {
                return Ok(Level::On);
            }
        }
        Ok(Level::Off)
    }

    fn set_level(&mut self, level: Level) -> Result<(), Error> {
        let active = level == Level::On;
        let device = self.card.device();
        for crtc in device.connected_crtcs()? {
            debug!(
                "{}: CRTC {:?} ACTIVE={}",
                self.card.path().display(),
                crtc,
                active
            );
            device.set_crtc_active(crtc, active)?;
        }
        Ok(())
    }
}

impl Plugin for DrmDpms {
    fn name(&self) -> &'static str {
        "Drm"
    }
}

impl DpmsPlugin for DrmDpms {
    fn open(&mut self, target: &DisplayTarget) -> Result<Box<dyn DpmsOutput>, Error> {
        if !target.display.is_empty() && !target.is_drm() {
            return Err(Error::BackendMismatch("Drm"));
        }
        let card = open_card(&self.dev_root, target.drm_card(&self.dev_root).as_deref())?;
        Ok(Box::new(DrmOutput { card }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_server_targets_are_not_served() {
        let mut plugin = DrmDpms::new("/dev");
        assert!(matches!(
            plugin.open(&DisplayTarget::new(":0", "")),
            Err(Error::BackendMismatch("Drm"))
        ));
    }
}
