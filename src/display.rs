//! Display targets
//!
//! Gamma and DPMS calls name their target as a `(display, env)` pair. What
//! the pair means depends on the backend that ends up serving it:
//!
//! - Xorg: `display` is an X display (`:0`), `env` the caller's XAUTHORITY
//! - Wayland: `display` is the socket name (`wayland-0`, default when
//!   empty), `env` the caller's XDG_RUNTIME_DIR
//! - DRM: `display` is a card (`card0` or `/dev/dri/card0`), empty for the
//!   first card
//!
//! Each backend checks whether the target is its kind before connecting and
//! reports a mismatch so the next backend can try.
use crate::error::Error;
use log::debug;
use std::ffi::OsString;
use std::net::TcpStream;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};

const DEFAULT_WAYLAND_SOCKET: &str = "wayland-0";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayTarget {
    pub display: String,
    pub env: String,
}

impl DisplayTarget {
    pub fn new(display: impl Into<String>, env: impl Into<String>) -> Self {
        Self {
            display: display.into(),
            env: env.into(),
        }
    }

    /// Key under which a resolved backend handle is cached
    pub fn key(&self) -> String {
        self.display.clone()
    }

    /// Looks like an X display name (`:0`, `host:0.1`)
    pub fn is_x11(&self) -> bool {
        self.display.contains(':') && !self.display.contains('/')
    }

    /// Looks like a DRM card (`card0`, `/dev/dri/card0`)
    pub fn is_drm(&self) -> bool {
        let name = self.display.rsplit('/').next().unwrap_or_default();
        name.starts_with("card")
    }

    /// Path of the Wayland socket this target names, if it can name one
    pub fn wayland_socket(&self) -> Option<PathBuf> {
        if self.is_x11() || self.is_drm() {
            return None;
        }
        let name = if self.display.is_empty() {
            DEFAULT_WAYLAND_SOCKET
        } else {
            self.display.as_str()
        };
        if Path::new(name).is_absolute() {
            return Some(PathBuf::from(name));
        }
        let runtime_dir = if self.env.is_empty() {
            std::env::var_os("XDG_RUNTIME_DIR").map(PathBuf::from)?
        } else {
            PathBuf::from(&self.env)
        };
        Some(runtime_dir.join(name))
    }

    /// Card device this target names, `None` for "first card"
    pub fn drm_card(&self, dev_root: &Path) -> Option<PathBuf> {
        if self.display.is_empty() {
            return None;
        }
        if Path::new(&self.display).is_absolute() {
            return Some(PathBuf::from(&self.display));
        }
        Some(dev_root.join("dri").join(&self.display))
    }
}

/// Connect to the Wayland compositor this target names
///
/// Targets that are not Wayland sockets, or whose socket is absent, are a
/// backend mismatch.
pub fn connect_wayland(
    target: &DisplayTarget,
    backend: &'static str,
) -> Result<wayland_client::Connection, Error> {
    let socket = target
        .wayland_socket()
        .ok_or(Error::BackendMismatch(backend))?;
    if !socket.exists() {
        debug!("No Wayland socket at {}", socket.display());
        return Err(Error::BackendMismatch(backend));
    }
    let stream = UnixStream::connect(&socket)?;
    wayland_client::Connection::from_socket(stream)
        .map_err(|e| Error::Wayland(format!("{}: {}", socket.display(), e)))
}

/// `MIT-MAGIC-COOKIE-1` and friends as stored in an Xauthority file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XauthEntry {
    pub family: u16,
    pub address: Vec<u8>,
    pub number: Vec<u8>,
    pub name: Vec<u8>,
    pub data: Vec<u8>,
}

const FAMILY_LOCAL: u16 = 256;
const FAMILY_WILD: u16 = 65535;
const MIT_MAGIC_COOKIE: &[u8] = b"MIT-MAGIC-COOKIE-1";

/// Split an Xauthority file into its entries
///
/// Every field is a big-endian `u16` length followed by that many bytes;
/// the family is a bare big-endian `u16`.
pub fn parse_xauthority(mut bytes: &[u8]) -> Result<Vec<XauthEntry>, Error> {
    fn take_u16(bytes: &mut &[u8]) -> Result<u16, Error> {
        let (head, rest) = bytes
            .split_first_chunk::<2>()
            .ok_or_else(|| Error::InvalidArgument("truncated Xauthority entry".to_string()))?;
        *bytes = rest;
        Ok(u16::from_be_bytes(*head))
    }
    fn take_field(bytes: &mut &[u8]) -> Result<Vec<u8>, Error> {
        let len = usize::from(take_u16(bytes)?);
        if bytes.len() < len {
            return Err(Error::InvalidArgument(
                "truncated Xauthority entry".to_string(),
            ));
        }
        let (field, rest) = bytes.split_at(len);
        *bytes = rest;
        Ok(field.to_vec())
    }

    let mut entries = Vec::new();
    while !bytes.is_empty() {
        entries.push(XauthEntry {
            family: take_u16(&mut bytes)?,
            address: take_field(&mut bytes)?,
            number: take_field(&mut bytes)?,
            name: take_field(&mut bytes)?,
            data: take_field(&mut bytes)?,
        });
    }
    Ok(entries)
}

/// Parsed X display name: `[host]:display[.screen]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XDisplay {
    pub host: String,
    pub number: u16,
    pub screen: usize,
}

impl XDisplay {
    pub fn parse(name: &str) -> Option<Self> {
        let (host, rest) = name.rsplit_once(':')?;
        let (number, screen) = match rest.split_once('.') {
            Some((number, screen)) => (number, screen.parse().ok()?),
            None => (rest, 0),
        };
        Some(Self {
            host: host.to_string(),
            number: number.parse().ok()?,
            screen,
        })
    }

    /// Served over the local unix socket rather than TCP
    pub fn is_local(&self) -> bool {
        self.host.is_empty() || self.host == "unix"
    }

    fn connect(&self) -> std::io::Result<x11rb::rust_connection::DefaultStream> {
        use x11rb::rust_connection::DefaultStream;
        let (stream, _peer) = if self.is_local() {
            let socket = format!("/tmp/.X11-unix/X{}", self.number);
            DefaultStream::from_unix_stream(UnixStream::connect(socket)?)?
        } else {
            let port = 6000u16.checked_add(self.number).ok_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::InvalidInput, "display number")
            })?;
            DefaultStream::from_tcp_stream(TcpStream::connect((self.host.as_str(), port))?)?
        };
        Ok(stream)
    }

    /// Cookie for this display among `entries`, `MIT-MAGIC-COOKIE-1` first
    pub fn cookie(&self, entries: &[XauthEntry], hostname: &[u8]) -> Option<(Vec<u8>, Vec<u8>)> {
        let number = self.number.to_string();
        let matching = entries.iter().filter(|e| {
            let host_ok = match e.family {
                FAMILY_WILD => true,
                FAMILY_LOCAL => self.is_local() && e.address == hostname,
                _ => !self.is_local() && e.address == self.host.as_bytes(),
            };
            host_ok && e.number == number.as_bytes()
        });
        let mut fallback = None;
        for entry in matching {
            if entry.name == MIT_MAGIC_COOKIE {
                return Some((entry.name.clone(), entry.data.clone()));
            }
            if fallback.is_none() {
                fallback = Some((entry.name.clone(), entry.data.clone()));
            }
        }
        fallback
    }
}

/// Xauthority file to read for a call
///
/// The caller's `env` wins. Without one the daemon's own inherited
/// `XAUTHORITY` is used, then `~/.Xauthority`.
pub fn xauthority_file(
    env: &str,
    inherited: Option<OsString>,
    home: Option<OsString>,
) -> Option<PathBuf> {
    if !env.is_empty() {
        return Some(PathBuf::from(env));
    }
    inherited
        .filter(|p| !p.is_empty())
        .map(PathBuf::from)
        .or_else(|| home.map(|h| Path::new(&h).join(".Xauthority")))
}

fn read_cookie(path: &Path, display: &XDisplay) -> Option<(Vec<u8>, Vec<u8>)> {
    let entries = match std::fs::read(path)
        .map_err(Error::from)
        .and_then(|bytes| parse_xauthority(&bytes))
    {
        Ok(entries) => entries,
        Err(e) => {
            debug!("No X cookie from {}: {}", path.display(), e);
            return None;
        }
    };
    let hostname = nix::unistd::gethostname().unwrap_or_default();
    display.cookie(&entries, hostname.as_bytes())
}

/// Connect to the X server this target names
///
/// The cookie comes from the target's own Xauthority file and is handed to
/// the connection directly, so one call's credentials never reach another.
/// A name that looks like an X display but cannot be reached is an invalid
/// target, not a mismatch.
pub fn connect_xorg(
    target: &DisplayTarget,
    backend: &'static str,
) -> Result<(x11rb::rust_connection::RustConnection, usize), Error> {
    if !target.is_x11() {
        return Err(Error::BackendMismatch(backend));
    }
    let invalid = |e: &dyn std::fmt::Display| {
        Error::TargetInvalid(format!("{}: {}", target.display, e))
    };
    let display = XDisplay::parse(&target.display).ok_or_else(|| invalid(&"bad display name"))?;
    let stream = display.connect().map_err(|e| invalid(&e))?;

    let file = xauthority_file(
        &target.env,
        std::env::var_os("XAUTHORITY"),
        std::env::var_os("HOME"),
    );
    let (name, data) = file
        .and_then(|path| read_cookie(&path, &display))
        .unwrap_or_default();
    let conn = x11rb::rust_connection::RustConnection::connect_to_stream_with_auth_info(
        stream,
        display.screen,
        name,
        data,
    )
    .map_err(|e| invalid(&e))?;
    Ok((conn, display.screen))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn x11_names() {
        assert!(DisplayTarget::new(":0", "").is_x11());
        assert!(DisplayTarget::new("remote:1.0", "").is_x11());
        assert!(!DisplayTarget::new("wayland-0", "").is_x11());
        assert!(!DisplayTarget::new("/run/user/1000/wayland-0", "").is_x11());
    }

    #[test]
    fn drm_names() {
        assert!(DisplayTarget::new("card0", "").is_drm());
        assert!(DisplayTarget::new("/dev/dri/card1", "").is_drm());
        assert!(!DisplayTarget::new("", "").is_drm());
        assert!(!DisplayTarget::new(":0", "").is_drm());
    }

    #[test]
    fn wayland_socket_defaults_to_wayland_0() {
        let target = DisplayTarget::new("", "/run/user/1000");
        assert_eq!(
            target.wayland_socket(),
            Some(PathBuf::from("/run/user/1000/wayland-0"))
        );

        let target = DisplayTarget::new("wayland-1", "/run/user/1000");
        assert_eq!(
            target.wayland_socket(),
            Some(PathBuf::from("/run/user/1000/wayland-1"))
        );
    }

    #[test]
    fn wayland_socket_accepts_absolute_paths() {
        let target = DisplayTarget::new("/tmp/sock", "");
        assert_eq!(target.wayland_socket(), Some(PathBuf::from("/tmp/sock")));
    }

    #[test]
    fn non_wayland_targets_have_no_socket() {
        assert!(DisplayTarget::new(":0", "/run/user/1000").wayland_socket().is_none());
        assert!(DisplayTarget::new("card0", "").wayland_socket().is_none());
    }

    #[test]
    fn drm_card_paths() {
        let dev = Path::new("/dev");
        assert_eq!(DisplayTarget::new("", "").drm_card(dev), None);
        assert_eq!(
            DisplayTarget::new("card1", "").drm_card(dev),
            Some(PathBuf::from("/dev/dri/card1"))
        );
        assert_eq!(
            DisplayTarget::new("/dev/dri/card0", "").drm_card(dev),
            Some(PathBuf::from("/dev/dri/card0"))
        );
    }

    #[test]
    fn missing_wayland_socket_is_a_mismatch() {
        let target = DisplayTarget::new("clightd-test-no-such-socket", "/nonexistent");
        assert!(matches!(
            connect_wayland(&target, "Wl"),
            Err(Error::BackendMismatch("Wl"))
        ));
    }

    #[test]
    fn non_x11_target_is_a_mismatch_for_xorg() {
        let target = DisplayTarget::new("wayland-0", "");
        assert!(matches!(
            connect_xorg(&target, "Xorg"),
            Err(Error::BackendMismatch("Xorg"))
        ));
    }

    fn entry(family: u16, address: &str, number: &str, name: &[u8], data: &[u8]) -> XauthEntry {
        XauthEntry {
            family,
            address: address.as_bytes().to_vec(),
            number: number.as_bytes().to_vec(),
            name: name.to_vec(),
            data: data.to_vec(),
        }
    }

    fn encode(entries: &[XauthEntry]) -> Vec<u8> {
        let mut out = Vec::new();
        for e in entries {
            out.extend_from_slice(&e.family.to_be_bytes());
            for field in [&e.address, &e.number, &e.name, &e.data] {
                out.extend_from_slice(&(field.len() as u16).to_be_bytes());
                out.extend_from_slice(field);
            }
        }
        out
    }

    #[test]
    fn xauthority_entries_parse() {
        let entries = vec![
            entry(FAMILY_LOCAL, "laptop", "0", MIT_MAGIC_COOKIE, &[1, 2, 3, 4]),
            entry(FAMILY_WILD, "", "1", b"XDM-AUTHORIZATION-1", &[9]),
        ];
        assert_eq!(parse_xauthority(&encode(&entries)).unwrap(), entries);
        assert!(parse_xauthority(&[]).unwrap().is_empty());

        let mut truncated = encode(&entries);
        truncated.pop();
        assert!(matches!(
            parse_xauthority(&truncated),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn display_names_parse() {
        assert_eq!(
            XDisplay::parse(":0"),
            Some(XDisplay {
                host: String::new(),
                number: 0,
                screen: 0
            })
        );
        let remote = XDisplay::parse("remote:1.2").unwrap();
        assert_eq!((remote.host.as_str(), remote.number, remote.screen), ("remote", 1, 2));
        assert!(!remote.is_local());
        assert!(XDisplay::parse("unix:3").unwrap().is_local());
        assert_eq!(XDisplay::parse(":x"), None);
        assert_eq!(XDisplay::parse("wayland-0"), None);
    }

    #[test]
    fn cookie_matches_host_and_display() {
        let entries = vec![
            entry(FAMILY_LOCAL, "other", "0", MIT_MAGIC_COOKIE, b"wrong-host"),
            entry(FAMILY_LOCAL, "laptop", "1", MIT_MAGIC_COOKIE, b"wrong-display"),
            entry(FAMILY_LOCAL, "laptop", "0", b"XDM-AUTHORIZATION-1", b"xdm"),
            entry(FAMILY_LOCAL, "laptop", "0", MIT_MAGIC_COOKIE, b"right"),
        ];
        let local = XDisplay::parse(":0").unwrap();
        assert_eq!(
            local.cookie(&entries, b"laptop"),
            Some((MIT_MAGIC_COOKIE.to_vec(), b"right".to_vec()))
        );
        assert_eq!(local.cookie(&entries[..3], b"laptop").unwrap().1, b"xdm");
        assert_eq!(local.cookie(&entries, b"desktop"), None);

        let wild = [entry(FAMILY_WILD, "", "2", MIT_MAGIC_COOKIE, b"any")];
        assert!(XDisplay::parse(":2").unwrap().cookie(&wild, b"laptop").is_some());
    }

    #[test]
    fn each_call_picks_its_own_xauthority() {
        let home = Some(OsString::from("/home/me"));
        assert_eq!(
            xauthority_file("/run/user/1000/xauth_a", None, home.clone()),
            Some(PathBuf::from("/run/user/1000/xauth_a"))
        );
        // An empty env after a caller-supplied one falls back to the
        // daemon's own settings, not the previous caller's file
        assert_eq!(
            xauthority_file("", None, home.clone()),
            Some(PathBuf::from("/home/me/.Xauthority"))
        );
        assert_eq!(
            xauthority_file("", Some(OsString::from("/root/.Xauthority")), home),
            Some(PathBuf::from("/root/.Xauthority"))
        );
        assert_eq!(xauthority_file("", Some(OsString::new()), None), None);
    }
}
