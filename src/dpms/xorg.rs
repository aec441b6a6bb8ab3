//! DPMS through the X DPMS extension
use super::{DpmsOutput, DpmsPlugin, Level, Timeouts};
use crate::display::{DisplayTarget, connect_xorg};
use crate::error::Error;
use crate::plugin::Plugin;
use x11rb::connection::{Connection, RequestConnection};
use x11rb::protocol::dpms::{self, ConnectionExt as _, DPMSMode};
use x11rb::rust_connection::RustConnection;

pub struct XorgDpms;

struct XorgOutput {
    conn: RustConnection,
}

fn to_mode(level: Level) -> DPMSMode {
    match level {
        Level::On => DPMSMode::ON,
        Level::Standby => DPMSMode::STANDBY,
        Level::Suspend => DPMSMode::SUSPEND,
        Level::Off => DPMSMode::OFF,
    }
}

fn from_mode(mode: DPMSMode) -> Level {
    match mode {
        DPMSMode::STANDBY => Level::Standby,
        DPMSMode::SUSPEND => Level::Suspend,
        DPMSMode::OFF => Level::Off,
        _ => Level::On,
    }
}

fn to_u16(seconds: i32) -> u16 {
    u16::try_from(seconds).unwrap_or(u16::MAX)
}

impl DpmsOutput for XorgOutput {
    fn level(&mut self) -> Result<Level, Error> {
        let info = self.conn.dpms_info()?.reply()?;
        // A disabled extension leaves the monitor on
        if !info.state {
            return Ok(Level::On);
        }
        Ok(from_mode(info.power_level))
    }

    fn set_level(&mut self, level: Level) -> Result<(), Error> {
        self.conn.dpms_enable()?.check()?;
        self.conn.dpms_force_level(to_mode(level))?.check()?;
        self.conn.flush()?;
        Ok(())
    }

    fn timeouts(&mut self) -> Result<Timeouts, Error> {
        let reply = self.conn.dpms_get_timeouts()?.reply()?;
        Ok(Timeouts {
            standby: i32::from(reply.standby_timeout),
            suspend: i32::from(reply.suspend_timeout),
            off: i32::from(reply.off_timeout),
        })
    }

    fn set_timeouts(&mut self, timeouts: Timeouts) -> Result<(), Error> {
        self.conn
            .dpms_set_timeouts(
                to_u16(timeouts.standby),
                to_u16(timeouts.suspend),
                to_u16(timeouts.off),
            )?
            .check()?;
        self.conn.flush()?;
        Ok(())
    }
}

impl Plugin for XorgDpms {
    fn name(&self) -> &'static str {
        "Xorg"
    }
}

impl DpmsPlugin for XorgDpms {
    fn open(&mut self, target: &DisplayTarget) -> Result<Box<dyn DpmsOutput>, Error> {
        let (conn, _) = connect_xorg(target, self.name())?;
        if conn
            .extension_information(dpms::X11_EXTENSION_NAME)?
            .is_none()
        {
            return Err(Error::ProtocolNotSupported("DPMS"));
        }
        if !conn.dpms_capable()?.reply()?.capable {
            return Err(Error::Unsupported(format!(
                "{}: server is not DPMS capable",
                target.display
            )));
        }
        Ok(Box::new(XorgOutput { conn }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modes_map_both_ways() {
        for level in [Level::On, Level::Standby, Level::Suspend, Level::Off] {
            assert_eq!(from_mode(to_mode(level)), level);
        }
    }

    #[test]
    fn timeouts_saturate_to_protocol_range() {
        assert_eq!(to_u16(600), 600);
        assert_eq!(to_u16(100_000), u16::MAX);
    }

    #[test]
    fn drm_targets_are_not_served() {
        assert!(matches!(
            XorgDpms.open(&DisplayTarget::new("card0", "")),
            Err(Error::BackendMismatch("Xorg"))
        ));
    }
}
