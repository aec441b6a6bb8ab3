//! Device records
//!
//! One [`Device`] per controllable unit (backlight panel, external monitor,
//! keyboard LED). The record exclusively owns the backend's [`Control`]
//! handle; dropping the record releases it.
use crate::error::Error;
use crate::smooth::Transition;

/// Escape `id` into a single object-path element
///
/// ASCII alphanumerics pass through; every other byte, `_` included,
/// becomes `_xx` in lowercase hex. The mapping is injective, so distinct ids
/// never share a path. An empty id becomes `_`.
pub fn escape_label(id: &str) -> String {
    if id.is_empty() {
        return "_".to_string();
    }
    let mut out = String::with_capacity(id.len());
    for byte in id.bytes() {
        if byte.is_ascii_alphanumeric() {
            out.push(char::from(byte));
        } else {
            out.push_str(&format!("_{:02x}", byte));
        }
    }
    out
}

/// Object path of a child named `id` under `root`
pub fn object_path(root: &str, id: &str) -> String {
    format!("{}/{}", root, escape_label(id))
}

/// Raw value access to one device
///
/// Values are in device units, `0..=max`.
pub trait Control {
    fn get(&mut self) -> Result<u32, Error>;
    fn set(&mut self, raw: u32) -> Result<(), Error>;

    /// Idle timeout in seconds
    fn timeout(&mut self) -> Result<i32, Error> {
        Err(Error::Unsupported("device timeout".to_string()))
    }

    fn set_timeout(&mut self, _seconds: i32) -> Result<(), Error> {
        Err(Error::Unsupported("device timeout".to_string()))
    }
}

/// A device found by enumeration or hot-plug, not yet registered
pub struct Discovered {
    pub id: String,
    pub control: Box<dyn Control>,
    pub max: u32,
    pub internal: bool,
}

impl std::fmt::Debug for Discovered {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Discovered")
            .field("id", &self.id)
            .field("max", &self.max)
            .field("internal", &self.internal)
            .finish_non_exhaustive()
    }
}

pub struct Device {
    id: String,
    kind: &'static str,
    slot: usize,
    control: Box<dyn Control>,
    max: u32,
    internal: bool,
    last: u32,
    path: Option<String>,
    pub(crate) transition: Option<Transition>,
    pub(crate) cookie: u64,
}

impl Device {
    pub(crate) fn new(
        discovered: Discovered,
        kind: &'static str,
        slot: usize,
        last: u32,
        path: Option<String>,
        cookie: u64,
    ) -> Self {
        Self {
            id: discovered.id,
            kind,
            slot,
            control: discovered.control,
            max: discovered.max,
            internal: discovered.internal,
            last,
            path,
            transition: None,
            cookie,
        }
    }

    /// Swap in a fresh backend handle; the previous one is dropped
    pub(crate) fn replace(
        &mut self,
        discovered: Discovered,
        kind: &'static str,
        slot: usize,
        last: u32,
        cookie: u64,
    ) {
        self.kind = kind;
        self.slot = slot;
        self.control = discovered.control;
        self.max = discovered.max;
        self.internal = discovered.internal;
        self.last = last;
        self.cookie = cookie;
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Name of the backend that owns this record
    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn max(&self) -> u32 {
        self.max
    }

    pub fn internal(&self) -> bool {
        self.internal
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Last raw value read from or written to the device
    pub fn last(&self) -> u32 {
        self.last
    }

    pub fn is_transitioning(&self) -> bool {
        self.transition.is_some()
    }

    /// Cached value as a fraction of `max`
    pub fn fraction(&self) -> f64 {
        if self.max == 0 {
            return 0.0;
        }
        f64::from(self.last) / f64::from(self.max)
    }

    pub fn to_raw(&self, fraction: f64) -> u32 {
        (fraction.clamp(0.0, 1.0) * f64::from(self.max)).round() as u32
    }

    /// Read the live raw value without touching the cache
    pub fn read(&mut self) -> Result<u32, Error> {
        Ok(self.control.get()?.min(self.max))
    }

    /// Re-read the device and cache the result. Returns true if it changed.
    pub fn sync(&mut self) -> Result<bool, Error> {
        let raw = self.read()?;
        let changed = raw != self.last;
        self.last = raw;
        Ok(changed)
    }

    /// Write `fraction` and cache the raw value written
    pub fn apply(&mut self, fraction: f64) -> Result<(), Error> {
        let raw = self.to_raw(fraction);
        self.control.set(raw)?;
        self.last = raw;
        Ok(())
    }

    pub fn timeout(&mut self) -> Result<i32, Error> {
        self.control.timeout()
    }

    pub fn set_timeout(&mut self, seconds: i32) -> Result<(), Error> {
        self.control.set_timeout(seconds)
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("max", &self.max)
            .field("last", &self.last)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}
