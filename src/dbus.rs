//! D-Bus transport and polkit authorization
//!
//! Method calls are read on a dedicated thread and handed to the event loop
//! through a channel plus a wake-up socket; decoding, handling and replying
//! all happen on the loop thread. Introspection and `Peer` calls are
//! answered here without reaching the daemon core.
use crate::bus::{
    Adjust, BACKLIGHT_INTERFACE, BACKLIGHT_SERVER_INTERFACE, BUS_NAME, Bus, Call, DPMS_INTERFACE,
    GAMMA_INTERFACE, KBD_INTERFACE, PROPERTIES_INTERFACE, PropValue, Reply, Request,
    SENSOR_INTERFACE, Signal,
};
use crate::error::Error;
use crate::smooth::Smooth;
use log::{debug, info, trace, warn};
use std::collections::{BTreeSet, HashMap};
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::sync::mpsc::{self, Receiver};
use std::thread;
use zbus::blocking::{Connection, MessageIterator};
use zbus::message::{Header, Type};
use zbus::zvariant::{ObjectPath, Value};
use zbus::Message;

const INTROSPECTABLE_INTERFACE: &str = "org.freedesktop.DBus.Introspectable";
const PEER_INTERFACE: &str = "org.freedesktop.DBus.Peer";

const UNKNOWN_METHOD: &str = "org.freedesktop.DBus.Error.UnknownMethod";
const UNKNOWN_OBJECT: &str = "org.freedesktop.DBus.Error.UnknownObject";
const READ_ONLY: &str = "org.freedesktop.DBus.Error.PropertyReadOnly";

const DBUS_NAME: &str = "org.freedesktop.DBus";
const DBUS_PATH: &str = "/org/freedesktop/DBus";
/// `DBUS_NAME_FLAG_DO_NOT_QUEUE`
const DO_NOT_QUEUE: u32 = 4;
const PRIMARY_OWNER: u32 = 1;
const ALREADY_OWNER: u32 = 4;

const POLKIT_NAME: &str = "org.freedesktop.PolicyKit1";
const POLKIT_PATH: &str = "/org/freedesktop/PolicyKit1/Authority";
const POLKIT_INTERFACE: &str = "org.freedesktop.PolicyKit1.Authority";

/// A decoded call together with the message it answers
pub struct Incoming {
    pub message: Message,
    pub call: Call,
}

/// Method call body for `member` on `interface`
pub fn decode(message: &Message, interface: &str, member: &str) -> Result<Request, Error> {
    let body = message.body();
    let bad = |e: zbus::Error| Error::InvalidArgument(format!("{}: {}", member, e));
    let unknown = || Error::Unsupported(format!("{}.{}", interface, member));

    let request = match interface {
        BACKLIGHT_INTERFACE | BACKLIGHT_SERVER_INTERFACE => match Adjust::from_member(member) {
            Some(adjust) => {
                let (value, (step, wait)): (f64, (f64, u32)) = body.deserialize().map_err(bad)?;
                Request::BacklightSet {
                    adjust,
                    value,
                    smooth: Smooth::new(step, wait),
                }
            }
            None if member == "Get" => Request::BacklightGet,
            None => return Err(unknown()),
        },
        GAMMA_INTERFACE => match member {
            "Set" => {
                let (display, env, temp, (smooth, step, wait)): (String, String, i32, (bool, u32, u32)) =
                    body.deserialize().map_err(bad)?;
                Request::GammaSet {
                    display,
                    env,
                    temp,
                    smooth,
                    step,
                    wait,
                }
            }
            "Get" => {
                let (display, env): (String, String) = body.deserialize().map_err(bad)?;
                Request::GammaGet { display, env }
            }
            _ => return Err(unknown()),
        },
        DPMS_INTERFACE => match member {
            "Get" | "GetTimeouts" => {
                let (display, env): (String, String) = body.deserialize().map_err(bad)?;
                if member == "Get" {
                    Request::DpmsGet { display, env }
                } else {
                    Request::DpmsGetTimeouts { display, env }
                }
            }
            "Set" => {
                let (display, env, level): (String, String, i32) =
                    body.deserialize().map_err(bad)?;
                Request::DpmsSet {
                    display,
                    env,
                    level,
                }
            }
            "SetTimeouts" => {
                let (display, env, standby, suspend, off): (String, String, i32, i32, i32) =
                    body.deserialize().map_err(bad)?;
                Request::DpmsSetTimeouts {
                    display,
                    env,
                    timeouts: (standby, suspend, off),
                }
            }
            _ => return Err(unknown()),
        },
        SENSOR_INTERFACE => match member {
            "Capture" => {
                let (interface, count, settings): (String, i32, String) =
                    body.deserialize().map_err(bad)?;
                Request::SensorCapture {
                    interface,
                    count,
                    settings,
                }
            }
            "IsAvailable" => Request::SensorIsAvailable {
                interface: body.deserialize().map_err(bad)?,
            },
            _ => return Err(unknown()),
        },
        KBD_INTERFACE => match member {
            "Set" => Request::KbdSet(body.deserialize().map_err(bad)?),
            "Get" => Request::KbdGet,
            "SetTimeout" => Request::KbdSetTimeout(body.deserialize().map_err(bad)?),
            "GetTimeout" => Request::KbdGetTimeout,
            _ => return Err(unknown()),
        },
        PROPERTIES_INTERFACE => match member {
            "Get" => {
                let (interface, name): (String, String) = body.deserialize().map_err(bad)?;
                Request::GetProperty { interface, name }
            }
            "GetAll" => Request::GetAllProperties {
                interface: body.deserialize().map_err(bad)?,
            },
            _ => return Err(unknown()),
        },
        _ => return Err(unknown()),
    };
    Ok(request)
}

fn prop_value(value: &PropValue) -> Value<'static> {
    match value {
        PropValue::Int(i) => Value::from(*i),
        PropValue::Bool(b) => Value::from(*b),
    }
}

/// Introspection fragment of one of our interfaces
fn interface_xml(interface: &str) -> &'static str {
    match interface {
        BACKLIGHT_INTERFACE => {
            r#"  <interface name="org.clightd.clightd.Backlight2">
    <method name="Set"><arg name="value" type="d" direction="in"/><arg name="smooth" type="(du)" direction="in"/></method>
    <method name="Raise"><arg name="value" type="d" direction="in"/><arg name="smooth" type="(du)" direction="in"/></method>
    <method name="Lower"><arg name="value" type="d" direction="in"/><arg name="smooth" type="(du)" direction="in"/></method>
    <method name="Get"><arg name="levels" type="a(sd)" direction="out"/></method>
    <signal name="Changed"><arg name="id" type="s"/><arg name="value" type="d"/></signal>
  </interface>
"#
        }
        BACKLIGHT_SERVER_INTERFACE => {
            r#"  <interface name="org.clightd.clightd.Backlight2.Server">
    <method name="Set"><arg name="value" type="d" direction="in"/><arg name="smooth" type="(du)" direction="in"/></method>
    <method name="Raise"><arg name="value" type="d" direction="in"/><arg name="smooth" type="(du)" direction="in"/></method>
    <method name="Lower"><arg name="value" type="d" direction="in"/><arg name="smooth" type="(du)" direction="in"/></method>
    <method name="Get"><arg name="value" type="d" direction="out"/></method>
    <signal name="Changed"><arg name="value" type="d"/></signal>
    <property name="Max" type="i" access="read"><annotation name="org.freedesktop.DBus.Property.EmitsChangedSignal" value="const"/></property>
    <property name="Internal" type="b" access="read"><annotation name="org.freedesktop.DBus.Property.EmitsChangedSignal" value="const"/></property>
  </interface>
"#
        }
        GAMMA_INTERFACE => {
            r#"  <interface name="org.clightd.clightd.Gamma">
    <method name="Set"><arg name="display" type="s" direction="in"/><arg name="env" type="s" direction="in"/><arg name="temp" type="i" direction="in"/><arg name="smooth" type="(buu)" direction="in"/><arg name="ok" type="b" direction="out"/></method>
    <method name="Get"><arg name="display" type="s" direction="in"/><arg name="env" type="s" direction="in"/><arg name="temp" type="i" direction="out"/></method>
    <signal name="Changed"><arg name="display" type="s"/><arg name="temp" type="i"/></signal>
  </interface>
"#
        }
        DPMS_INTERFACE => {
            r#"  <interface name="org.clightd.clightd.Dpms">
    <method name="Get"><arg name="display" type="s" direction="in"/><arg name="env" type="s" direction="in"/><arg name="level" type="i" direction="out"/></method>
    <method name="Set"><arg name="display" type="s" direction="in"/><arg name="env" type="s" direction="in"/><arg name="level" type="i" direction="in"/><arg name="level" type="i" direction="out"/></method>
    <method name="GetTimeouts"><arg name="display" type="s" direction="in"/><arg name="env" type="s" direction="in"/><arg name="standby" type="i" direction="out"/><arg name="suspend" type="i" direction="out"/><arg name="off" type="i" direction="out"/></method>
    <method name="SetTimeouts"><arg name="display" type="s" direction="in"/><arg name="env" type="s" direction="in"/><arg name="standby" type="i" direction="in"/><arg name="suspend" type="i" direction="in"/><arg name="off" type="i" direction="in"/><arg name="standby" type="i" direction="out"/><arg name="suspend" type="i" direction="out"/><arg name="off" type="i" direction="out"/></method>
    <signal name="Changed"><arg name="display" type="s"/><arg name="level" type="i"/></signal>
  </interface>
"#
        }
        SENSOR_INTERFACE => {
            r#"  <interface name="org.clightd.clightd.Sensor">
    <method name="Capture"><arg name="interface" type="s" direction="in"/><arg name="count" type="i" direction="in"/><arg name="settings" type="s" direction="in"/><arg name="node" type="s" direction="out"/><arg name="values" type="ad" direction="out"/></method>
    <method name="IsAvailable"><arg name="interface" type="s" direction="in"/><arg name="node" type="s" direction="out"/><arg name="available" type="b" direction="out"/></method>
    <signal name="Changed"><arg name="node" type="s"/><arg name="action" type="s"/></signal>
  </interface>
"#
        }
        KBD_INTERFACE => {
            r#"  <interface name="org.clightd.clightd.KbdBacklight">
    <method name="Set"><arg name="value" type="d" direction="in"/><arg name="ok" type="b" direction="out"/></method>
    <method name="Get"><arg name="value" type="d" direction="out"/></method>
    <method name="SetTimeout"><arg name="timeout" type="i" direction="in"/><arg name="ok" type="b" direction="out"/></method>
    <method name="GetTimeout"><arg name="timeout" type="i" direction="out"/></method>
    <signal name="Changed"><arg name="value" type="d"/></signal>
  </interface>
"#
        }
        _ => "",
    }
}

const STANDARD_XML: &str = r#"  <interface name="org.freedesktop.DBus.Introspectable">
    <method name="Introspect"><arg name="xml" type="s" direction="out"/></method>
  </interface>
  <interface name="org.freedesktop.DBus.Peer">
    <method name="Ping"/>
    <method name="GetMachineId"><arg name="machine_uuid" type="s" direction="out"/></method>
  </interface>
  <interface name="org.freedesktop.DBus.Properties">
    <method name="Get"><arg name="interface" type="s" direction="in"/><arg name="name" type="s" direction="in"/><arg name="value" type="v" direction="out"/></method>
    <method name="GetAll"><arg name="interface" type="s" direction="in"/><arg name="values" type="a{sv}" direction="out"/></method>
  </interface>
"#;

/// Object registry and introspection data
#[derive(Debug, Default)]
pub struct Objects {
    paths: HashMap<String, &'static str>,
}

impl Objects {
    pub fn insert(&mut self, path: &str, interface: &'static str) -> Result<(), Error> {
        ObjectPath::try_from(path)
            .map_err(|e| Error::InvalidArgument(format!("object path {:?}: {}", path, e)))?;
        self.paths.insert(path.to_string(), interface);
        Ok(())
    }

    pub fn remove(&mut self, path: &str) -> Result<(), Error> {
        self.paths
            .remove(path)
            .map(drop)
            .ok_or_else(|| Error::DeviceNotFound(path.to_string()))
    }

    pub fn interface(&self, path: &str) -> Option<&'static str> {
        self.paths.get(path).copied()
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Names of the direct children of `path`, registered or implied
    pub fn children(&self, path: &str) -> BTreeSet<&str> {
        let prefix = if path == "/" {
            "/".to_string()
        } else {
            format!("{}/", path)
        };
        self.paths
            .keys()
            .filter_map(|p| p.strip_prefix(prefix.as_str()))
            .filter_map(|rest| rest.split('/').next())
            .filter(|name| !name.is_empty())
            .collect()
    }

    pub fn introspect(&self, path: &str) -> String {
        let mut xml = String::from(
            "<!DOCTYPE node PUBLIC \"-//freedesktop//DTD D-BUS Object Introspection 1.0//EN\"\n \
             \"http://www.freedesktop.org/standards/dbus/1.0/introspect.dtd\">\n<node>\n",
        );
        xml.push_str(STANDARD_XML);
        if let Some(interface) = self.interface(path) {
            xml.push_str(interface_xml(interface));
        }
        for child in self.children(path) {
            xml.push_str(&format!("  <node name=\"{}\"/>\n", child));
        }
        xml.push_str("</node>\n");
        xml
    }
}

/// [`Bus`] over a zbus connection
pub struct DbusBus {
    connection: Connection,
    calls: Receiver<Message>,
    wake: UnixStream,
    objects: Objects,
}

impl DbusBus {
    /// Start reading method calls from `connection`
    pub fn new(connection: Connection) -> Result<Self, Error> {
        let (wake, mut notify) = UnixStream::pair()?;
        wake.set_nonblocking(true)?;
        let (sender, calls) = mpsc::channel();

        let reader = connection.clone();
        thread::Builder::new()
            .name("clightd-bus".to_string())
            .spawn(move || {
                for message in MessageIterator::from(reader) {
                    match message {
                        Ok(message) if message.message_type() == Type::MethodCall => {
                            if sender.send(message).is_err() || notify.write_all(&[1]).is_err() {
                                break;
                            }
                        }
                        Ok(_) => {}
                        Err(e) => warn!("Bus read failed: {}", e),
                    }
                }
                debug!("Bus reader stopped");
            })?;

        Ok(Self {
            connection,
            calls,
            wake,
            objects: Objects::default(),
        })
    }

    /// Descriptor that becomes readable when calls are queued
    pub fn waker(&self) -> Result<UnixStream, Error> {
        Ok(self.wake.try_clone()?)
    }

    pub fn objects(&self) -> &Objects {
        &self.objects
    }

    /// Take ownership of the well-known bus name
    pub fn claim_name(&mut self) -> Result<(), Error> {
        let reply = self.connection.call_method(
            Some(DBUS_NAME),
            DBUS_PATH,
            Some(DBUS_NAME),
            "RequestName",
            &(BUS_NAME, DO_NOT_QUEUE),
        )?;
        match reply.body().deserialize::<u32>()? {
            PRIMARY_OWNER | ALREADY_OWNER => {
                info!("Serving {}", BUS_NAME);
                Ok(())
            }
            code => Err(Error::Bus(format!(
                "{} is owned by another process (RequestName returned {})",
                BUS_NAME, code
            ))),
        }
    }

    /// Decode every queued call; calls answered here are not returned
    pub fn drain_calls(&mut self) -> Vec<Incoming> {
        let mut buf = [0u8; 64];
        while matches!(self.wake.read(&mut buf), Ok(n) if n > 0) {}

        let mut incoming = Vec::new();
        while let Ok(message) = self.calls.try_recv() {
            if let Some(call) = self.route(message) {
                incoming.push(call);
            }
        }
        incoming
    }

    fn route(&mut self, message: Message) -> Option<Incoming> {
        let header = message.header();
        let path = header.path().map(|p| p.to_string()).unwrap_or_default();
        let member = header.member().map(|m| m.to_string()).unwrap_or_default();
        let sender = header.sender().map(|s| s.to_string()).unwrap_or_default();
        let destination = header
            .destination()
            .map(|d| d.to_string())
            .filter(|d| !d.starts_with(':'))
            .unwrap_or_else(|| BUS_NAME.to_string());
        let registered = self.objects.interface(&path);
        let interface = header
            .interface()
            .map(|i| i.to_string())
            .or_else(|| registered.map(str::to_string))
            .unwrap_or_default();
        trace!("{} -> {} {}.{}", sender, path, interface, member);

        match (interface.as_str(), member.as_str()) {
            (INTROSPECTABLE_INTERFACE, "Introspect") => {
                let xml = self.objects.introspect(&path);
                self.log_failure(self.connection.reply(&header, &xml));
                return None;
            }
            (PEER_INTERFACE, "Ping") => {
                self.log_failure(self.connection.reply(&header, &()));
                return None;
            }
            (PEER_INTERFACE, "GetMachineId") => {
                let id = std::fs::read_to_string("/etc/machine-id").unwrap_or_default();
                self.log_failure(self.connection.reply(&header, &id.trim()));
                return None;
            }
            (PROPERTIES_INTERFACE, "Set") => {
                let sent = self
                    .connection
                    .reply_error(&header, READ_ONLY, &"properties are read-only");
                self.log_failure(sent);
                return None;
            }
            _ => {}
        }

        if registered.is_none() {
            let sent = self
                .connection
                .reply_error(&header, UNKNOWN_OBJECT, &format!("no object at {}", path));
            self.log_failure(sent);
            return None;
        }

        let request = match decode(&message, &interface, &member) {
            Ok(request) => request,
            Err(Error::Unsupported(what)) => {
                let sent = self
                    .connection
                    .reply_error(&header, UNKNOWN_METHOD, &format!("unknown method {}", what));
                self.log_failure(sent);
                return None;
            }
            Err(e) => {
                let sent = self
                    .connection
                    .reply_error(&header, e.bus_name(), &e.to_string());
                self.log_failure(sent);
                return None;
            }
        };

        let call = Call {
            sender,
            destination,
            path,
            member,
            request,
        };
        drop(header);
        Some(Incoming { message, call })
    }

    fn log_failure<T>(&self, sent: zbus::Result<T>) {
        if let Err(e) = sent {
            warn!("Failed to answer bus call: {}", e);
        }
    }

    /// Send the reply, or the typed error, for `incoming`
    pub fn answer(&mut self, incoming: &Incoming, result: Result<Reply, Error>) {
        let header = incoming.message.header();
        let sent = match result {
            Ok(reply) => self.reply(&header, reply),
            Err(e) => self
                .connection
                .reply_error(&header, e.bus_name(), &e.to_string())
                .map(drop),
        };
        self.log_failure(sent);
    }

    fn reply(&self, header: &Header<'_>, reply: Reply) -> zbus::Result<()> {
        let c = &self.connection;
        match reply {
            Reply::Empty => c.reply(header, &()),
            Reply::Bool(b) => c.reply(header, &b),
            Reply::Int(i) => c.reply(header, &i),
            Reply::Double(d) => c.reply(header, &d),
            Reply::Timeouts(standby, suspend, off) => c.reply(header, &(standby, suspend, off)),
            Reply::Levels(levels) => c.reply(header, &levels),
            Reply::Capture { node, values } => c.reply(header, &(node, values)),
            Reply::Availability { node, available } => c.reply(header, &(node, available)),
            Reply::Property(value) => c.reply(header, &prop_value(&value)),
            Reply::Properties(props) => {
                let map: HashMap<String, Value<'static>> = props
                    .iter()
                    .map(|(name, value)| (name.clone(), prop_value(value)))
                    .collect();
                c.reply(header, &map)
            }
        }
        .map(drop)
    }
}

impl Bus for DbusBus {
    fn register_object(&mut self, path: &str, interface: &'static str) -> Result<(), Error> {
        self.objects.insert(path, interface)?;
        debug!("Registered {} ({})", path, interface);
        Ok(())
    }

    fn unregister_object(&mut self, path: &str) -> Result<(), Error> {
        self.objects.remove(path)?;
        debug!("Unregistered {}", path);
        Ok(())
    }

    fn emit(&mut self, path: &str, interface: &'static str, signal: Signal) -> Result<(), Error> {
        let c = &self.connection;
        let none = None::<&str>;
        match signal {
            Signal::Level { id, value } => c.emit_signal(none, path, interface, "Changed", &(id, value)),
            Signal::Value(value) => c.emit_signal(none, path, interface, "Changed", &value),
            Signal::Display { display, value } => {
                c.emit_signal(none, path, interface, "Changed", &(display, value))
            }
            Signal::Node { node, action } => {
                c.emit_signal(none, path, interface, "Changed", &(node, action))
            }
        }?;
        Ok(())
    }
}

/// Authorization through polkit's `CheckAuthorization`
pub struct PolkitAuthority {
    connection: Connection,
}

impl PolkitAuthority {
    pub fn new(connection: Connection) -> Self {
        Self { connection }
    }

    fn query(&self, sender: &str, action: &str) -> Result<bool, Error> {
        let mut subject_details: HashMap<&str, Value<'_>> = HashMap::new();
        subject_details.insert("name", Value::from(sender));
        let subject = ("system-bus-name", subject_details);
        let details: HashMap<&str, &str> = HashMap::new();

        let reply = self.connection.call_method(
            Some(POLKIT_NAME),
            POLKIT_PATH,
            Some(POLKIT_INTERFACE),
            "CheckAuthorization",
            &(subject, action, details, 0u32, ""),
        )?;
        let (authorized, _challenge, _details): (bool, bool, HashMap<String, String>) =
            reply.body().deserialize()?;
        Ok(authorized)
    }
}

impl crate::bus::Authority for PolkitAuthority {
    fn check(&mut self, sender: &str, action: &str) -> bool {
        match self.query(sender, action) {
            Ok(authorized) => {
                debug!("polkit: {} for {}: {}", action, sender, authorized);
                authorized
            }
            Err(e) => {
                warn!("polkit check of {} for {} failed: {}", action, sender, e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{BACKLIGHT_PATH, KBD_PATH, SENSOR_PATH};
    use crate::device::object_path;

    fn registry() -> Objects {
        let mut objects = Objects::default();
        objects
            .insert(BACKLIGHT_PATH, BACKLIGHT_INTERFACE)
            .unwrap();
        objects
            .insert(
                &object_path(BACKLIGHT_PATH, "intel_backlight"),
                BACKLIGHT_SERVER_INTERFACE,
            )
            .unwrap();
        objects.insert(KBD_PATH, KBD_INTERFACE).unwrap();
        objects.insert(SENSOR_PATH, SENSOR_INTERFACE).unwrap();
        objects
            .insert(&format!("{}/Als", SENSOR_PATH), SENSOR_INTERFACE)
            .unwrap();
        objects
    }

    #[test]
    fn invalid_object_paths_are_rejected() {
        let mut objects = Objects::default();
        assert!(objects.insert("/org/clightd/clightd/a:b", KBD_INTERFACE).is_err());
        assert!(objects.is_empty());
    }

    #[test]
    fn unregistering_unknown_paths_fails() {
        let mut objects = registry();
        assert!(objects.remove(KBD_PATH).is_ok());
        assert!(matches!(
            objects.remove(KBD_PATH),
            Err(Error::DeviceNotFound(_))
        ));
    }

    #[test]
    fn children_include_implied_nodes() {
        let objects = registry();
        assert_eq!(
            objects.children("/").into_iter().collect::<Vec<_>>(),
            vec!["org"]
        );
        assert_eq!(
            objects
                .children("/org/clightd/clightd")
                .into_iter()
                .collect::<Vec<_>>(),
            vec!["Backlight2", "KbdBacklight", "Sensor"]
        );
        assert_eq!(
            objects.children(SENSOR_PATH).into_iter().collect::<Vec<_>>(),
            vec!["Als"]
        );
    }

    #[test]
    fn introspection_lists_interface_and_children() {
        let objects = registry();
        let xml = objects.introspect(BACKLIGHT_PATH);
        assert!(xml.contains("name=\"org.clightd.clightd.Backlight2\""));
        assert!(xml.contains("<node name=\"intel_5fbacklight\"/>"));
        assert!(xml.contains("org.freedesktop.DBus.Properties"));

        let device = objects.introspect(&object_path(BACKLIGHT_PATH, "intel_backlight"));
        assert!(device.contains("name=\"Max\""));
    }

    #[test]
    fn every_interface_has_introspection_data() {
        for interface in [
            BACKLIGHT_INTERFACE,
            BACKLIGHT_SERVER_INTERFACE,
            GAMMA_INTERFACE,
            DPMS_INTERFACE,
            SENSOR_INTERFACE,
            KBD_INTERFACE,
        ] {
            let xml = interface_xml(interface);
            assert!(xml.contains(&format!("name=\"{}\"", interface)), "{interface}");
            assert!(xml.contains("<signal name=\"Changed\">"), "{interface}");
        }
    }

    #[test]
    fn property_values_keep_their_type() {
        assert_eq!(prop_value(&PropValue::Int(255)), Value::from(255i32));
        assert_eq!(prop_value(&PropValue::Bool(true)), Value::from(true));
    }
}
