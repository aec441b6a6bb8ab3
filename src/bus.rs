//! Transport-neutral bus surface
//!
//! The daemon core never touches D-Bus types directly. Incoming method calls
//! arrive as a decoded [`Call`], replies leave as a [`Reply`], and objects and
//! signals go out through the [`Bus`] trait. The zbus adapter in
//! [`crate::dbus`] is one implementation; tests use a recording one.
use crate::error::Error;
use crate::smooth::Smooth;

pub const BUS_NAME: &str = "org.clightd.clightd";
pub const OBJECT_ROOT: &str = "/org/clightd/clightd";

pub const BACKLIGHT_PATH: &str = "/org/clightd/clightd/Backlight2";
pub const BACKLIGHT_INTERFACE: &str = "org.clightd.clightd.Backlight2";
pub const BACKLIGHT_SERVER_INTERFACE: &str = "org.clightd.clightd.Backlight2.Server";

pub const GAMMA_PATH: &str = "/org/clightd/clightd/Gamma";
pub const GAMMA_INTERFACE: &str = "org.clightd.clightd.Gamma";

pub const DPMS_PATH: &str = "/org/clightd/clightd/Dpms";
pub const DPMS_INTERFACE: &str = "org.clightd.clightd.Dpms";

pub const SENSOR_PATH: &str = "/org/clightd/clightd/Sensor";
pub const SENSOR_INTERFACE: &str = "org.clightd.clightd.Sensor";

pub const KBD_PATH: &str = "/org/clightd/clightd/KbdBacklight";
pub const KBD_INTERFACE: &str = "org.clightd.clightd.KbdBacklight";

pub const PROPERTIES_INTERFACE: &str = "org.freedesktop.DBus.Properties";

/// Absolute or relative backlight change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adjust {
    Absolute,
    Raise,
    Lower,
}

impl Adjust {
    /// Adjustment named by a backlight method
    pub fn from_member(member: &str) -> Option<Self> {
        match member {
            "Set" => Some(Adjust::Absolute),
            "Raise" => Some(Adjust::Raise),
            "Lower" => Some(Adjust::Lower),
            _ => None,
        }
    }
}

/// Decoded method call body
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    BacklightSet {
        adjust: Adjust,
        value: f64,
        smooth: Smooth,
    },
    BacklightGet,
    GammaSet {
        display: String,
        env: String,
        temp: i32,
        smooth: bool,
        step: u32,
        wait: u32,
    },
    GammaGet {
        display: String,
        env: String,
    },
    DpmsGet {
        display: String,
        env: String,
    },
    DpmsSet {
        display: String,
        env: String,
        level: i32,
    },
    DpmsGetTimeouts {
        display: String,
        env: String,
    },
    DpmsSetTimeouts {
        display: String,
        env: String,
        timeouts: (i32, i32, i32),
    },
    SensorCapture {
        interface: String,
        count: i32,
        settings: String,
    },
    SensorIsAvailable {
        interface: String,
    },
    KbdSet(f64),
    KbdGet,
    KbdSetTimeout(i32),
    KbdGetTimeout,
    GetProperty {
        interface: String,
        name: String,
    },
    GetAllProperties {
        interface: String,
    },
}

impl Request {
    /// Whether the call mutates hardware (or opens a capture device) and
    /// therefore needs authorization
    pub fn is_privileged(&self) -> bool {
        matches!(
            self,
            Request::BacklightSet { .. }
                | Request::GammaSet { .. }
                | Request::DpmsSet { .. }
                | Request::DpmsSetTimeouts { .. }
                | Request::SensorCapture { .. }
                | Request::KbdSet(_)
                | Request::KbdSetTimeout(_)
        )
    }
}

/// One incoming method call
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    /// Unique bus name of the caller
    pub sender: String,
    /// Bus name the call was addressed to
    pub destination: String,
    pub path: String,
    pub member: String,
    pub request: Request,
}

impl Call {
    /// Authorization action id for this call, `<destination>.<member>`
    pub fn action_id(&self) -> String {
        action_id(&self.destination, &self.member)
    }
}

pub fn action_id(destination: &str, member: &str) -> String {
    format!("{}.{}", destination, member)
}

/// Constant property values
#[derive(Debug, Clone, PartialEq)]
pub enum PropValue {
    Int(i32),
    Bool(bool),
}

/// Reply body, one variant per reply shape on the bus
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Empty,
    Bool(bool),
    Int(i32),
    Double(f64),
    Timeouts(i32, i32, i32),
    /// `a(sd)`
    Levels(Vec<(String, f64)>),
    /// `sad`
    Capture { node: String, values: Vec<f64> },
    /// `sb`
    Availability { node: String, available: bool },
    Property(PropValue),
    Properties(Vec<(String, PropValue)>),
}

/// Body of a `Changed` signal
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    /// `(sd)` device id and fraction
    ///
    /// Backlight fractions are read back from the raw value the device
    /// holds, so they are quantised to `1 / max` and need not equal the
    /// requested value exactly.
    Level { id: String, value: f64 },
    /// `(d)` bare fraction, quantised like [`Signal::Level`]
    Value(f64),
    /// `(si)` display and value
    Display { display: String, value: i32 },
    /// `(ss)` sensor node and action
    Node { node: String, action: &'static str },
}

/// Transport primitives the core needs
pub trait Bus {
    fn register_object(&mut self, path: &str, interface: &'static str) -> Result<(), Error>;
    fn unregister_object(&mut self, path: &str) -> Result<(), Error>;
    /// Emit `Changed` on `path`
    fn emit(&mut self, path: &str, interface: &'static str, signal: Signal) -> Result<(), Error>;
}

/// External authorization check
pub trait Authority {
    fn check(&mut self, sender: &str, action: &str) -> bool;
}

impl<F> Authority for F
where
    F: FnMut(&str, &str) -> bool,
{
    fn check(&mut self, sender: &str, action: &str) -> bool {
        self(sender, action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_id_joins_destination_and_member() {
        assert_eq!(action_id(BUS_NAME, "Set"), "org.clightd.clightd.Set");
    }

    #[test]
    fn backlight_members_map_to_adjustments() {
        assert_eq!(Adjust::from_member("Raise"), Some(Adjust::Raise));
        assert_eq!(Adjust::from_member("Set"), Some(Adjust::Absolute));
        assert_eq!(Adjust::from_member("Get"), None);
    }

    #[test]
    fn mutating_requests_are_privileged() {
        let set = Request::BacklightSet {
            adjust: Adjust::Raise,
            value: 0.1,
            smooth: Smooth::NONE,
        };
        assert!(set.is_privileged());
        assert!(Request::KbdSetTimeout(10).is_privileged());
        assert!(
            Request::SensorCapture {
                interface: String::new(),
                count: 1,
                settings: String::new()
            }
            .is_privileged()
        );

        assert!(!Request::BacklightGet.is_privileged());
        assert!(
            !Request::GammaGet {
                display: ":0".into(),
                env: String::new()
            }
            .is_privileged()
        );
        assert!(
            !Request::SensorIsAvailable {
                interface: String::new()
            }
            .is_privileged()
        );
    }

    #[test]
    fn closures_act_as_authorities() {
        let mut deny_all = |_: &str, _: &str| false;
        assert!(!deny_all.check(":1.42", "org.clightd.clightd.Set"));

        let mut seen = Vec::new();
        let mut recording = |sender: &str, action: &str| {
            seen.push(format!("{sender} {action}"));
            true
        };
        assert!(recording.check(":1.7", "org.clightd.clightd.Capture"));
        assert_eq!(seen, vec![":1.7 org.clightd.clightd.Capture"]);
    }
}
