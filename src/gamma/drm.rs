//! Gamma through DRM legacy CRTC gamma tables
//!
//! Only usable while no compositor holds DRM master, i.e. on a bare TTY.
use super::temperature;
use super::{GammaOutput, GammaPlugin};
use crate::display::DisplayTarget;
use crate::drm_ops::{Card, open_card};
use crate::error::Error;
use crate::plugin::Plugin;
use std::path::PathBuf;

pub struct DrmGamma {
    dev_root: PathBuf,
}

impl DrmGamma {
    pub fn new(dev_root: impl Into<PathBuf>) -> Self {
        Self {
            dev_root: dev_root.into(),
        }
    }
}

struct DrmOutput {
    card: Card,
}

impl GammaOutput for DrmOutput {
    fn set(&mut self, temp: i32) -> Result<(), Error> {
        let device = self.card.device();
        for crtc in device.connected_crtcs()? {
            let size = device.gamma_size(crtc)?;
            if size == 0 {
                continue;
            }
            let [red, green, blue] = temperature::ramps(size, temp);
            device.set_crtc_gamma(crtc, &red, &green, &blue)?;
        }
        Ok(())
    }

    fn get(&mut self) -> Result<i32, Error> {
        let device = self.card.device();
        let crtc = device
            .connected_crtcs()?
            .into_iter()
            .next()
            .ok_or_else(|| Error::TargetInvalid("no connected display".to_string()))?;
        Ok(temperature::temperature_of_ramps(&device.crtc_gamma(crtc)?))
    }
}

impl Plugin for DrmGamma {
    fn name(&self) -> &'static str {
        "Drm"
    }
}

impl GammaPlugin for DrmGamma {
    fn open(&mut self, target: &DisplayTarget) -> Result<Box<dyn GammaOutput>, Error> {
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
        let mut plugin = DrmGamma::new("/dev");
        assert!(matches!(
            plugin.open(&DisplayTarget::new(":0", "")),
            Err(Error::BackendMismatch("Drm"))
        ));
        assert!(matches!(
            plugin.open(&DisplayTarget::new("wayland-0", "")),
            Err(Error::BackendMismatch("Drm"))
        ));
    }
}
