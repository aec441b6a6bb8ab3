//! Gamma through the X RandR extension
use super::temperature;
use super::{GammaOutput, GammaPlugin};
use crate::display::{DisplayTarget, connect_xorg};
use crate::error::Error;
use crate::plugin::Plugin;
use x11rb::connection::{Connection, RequestConnection};
use x11rb::protocol::randr::{self, ConnectionExt as _};
use x11rb::protocol::xproto::Window;
use x11rb::rust_connection::RustConnection;

pub struct XorgGamma;

struct XorgOutput {
    conn: RustConnection,
    root: Window,
}

impl XorgOutput {
    fn crtcs(&self) -> Result<Vec<randr::Crtc>, Error> {
        let resources = self
            .conn
            .randr_get_screen_resources_current(self.root)?
            .reply()?;
        Ok(resources.crtcs)
    }
}

impl GammaOutput for XorgOutput {
    fn set(&mut self, temp: i32) -> Result<(), Error> {
        for crtc in self.crtcs()? {
            let size = self.conn.randr_get_crtc_gamma_size(crtc)?.reply()?.size;
            if size == 0 {
                continue;
            }
            let [red, green, blue] = temperature::ramps(usize::from(size), temp);
            self.conn
                .randr_set_crtc_gamma(crtc, &red, &green, &blue)?
                .check()?;
        }
        self.conn.flush()?;
        Ok(())
    }

    fn get(&mut self) -> Result<i32, Error> {
        // The first CRTC stands for the whole screen
        let crtc = self
            .crtcs()?
            .into_iter()
            .next()
            .ok_or_else(|| Error::TargetInvalid("screen has no CRTC".to_string()))?;
        let gamma = self.conn.randr_get_crtc_gamma(crtc)?.reply()?;
        Ok(temperature::temperature_of_ramps(&[
            gamma.red,
            gamma.green,
            gamma.blue,
        ]))
    }
}

impl Plugin for XorgGamma {
    fn name(&self) -> &'static str {
        "Xorg"
    }
}

impl GammaPlugin for XorgGamma {
    fn open(&mut self, target: &DisplayTarget) -> Result<Box<dyn GammaOutput>, Error> {
        let (conn, screen) = connect_xorg(target, self.name())?;
        if conn
            .extension_information(randr::X11_EXTENSION_NAME)?
            .is_none()
        {
            return Err(Error::ProtocolNotSupported("RandR"));
        }
        let root = conn
            .setup()
            .roots
            .get(screen)
            .map(|s| s.root)
            .ok_or_else(|| Error::TargetInvalid(format!("{}: no screen {}", target.display, screen)))?;
        Ok(Box::new(XorgOutput { conn, root }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wayland_targets_are_not_served() {
        let result = XorgGamma.open(&DisplayTarget::new("wayland-0", "/run/user/1000"));
        assert!(matches!(result, Err(Error::BackendMismatch("Xorg"))));
    }
}
