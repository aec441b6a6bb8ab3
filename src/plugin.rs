//! Capability plugin registry
//!
//! Each capability owns a [`PluginTable`] with one slot per known backend.
//! Slot position is priority: when no backend is named explicitly the slots
//! are probed in order and the first success wins. Successful probes are
//! cached per target in a [`TargetCache`] so later calls reuse the handle.
use crate::error::Error;
use crate::map::DeviceMap;
use log::{debug, info, warn};

/// Logical hardware functions exposed on the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Backlight,
    Gamma,
    Dpms,
    Sensor,
    Keyboard,
}

impl Capability {
    pub fn name(self) -> &'static str {
        match self {
            Capability::Backlight => "backlight",
            Capability::Gamma => "gamma",
            Capability::Dpms => "dpms",
            Capability::Sensor => "sensor",
            Capability::Keyboard => "keyboard backlight",
        }
    }
}

/// Common surface of every backend plugin
pub trait Plugin {
    /// Human-readable backend name, also used for per-backend bus sub-paths
    fn name(&self) -> &'static str;
}

/// A probe result together with the slot that produced it
#[derive(Debug)]
pub struct Resolved<H> {
    pub slot: usize,
    pub handle: H,
}

/// Fixed-size, priority-ordered backend table for one capability
pub struct PluginTable<P: ?Sized> {
    capability: Capability,
    known: &'static [&'static str],
    slots: Vec<Option<Box<P>>>,
}

impl<P: ?Sized + Plugin> PluginTable<P> {
    /// Create an empty table whose slots match `known` tokens in order
    pub fn new(capability: Capability, known: &'static [&'static str]) -> Self {
        Self {
            capability,
            known,
            slots: known.iter().map(|_| None).collect(),
        }
    }

    pub fn capability(&self) -> Capability {
        self.capability
    }

    /// Slot whose token appears in `name` (case-insensitive substring)
    pub fn slot_of(&self, name: &str) -> Option<usize> {
        let name = name.to_ascii_lowercase();
        self.known
            .iter()
            .position(|token| name.contains(&token.to_ascii_lowercase()))
    }

    /// Bucket `plugin` into its priority slot
    ///
    /// Unknown names and duplicates are logged and rejected; neither is fatal.
    pub fn register(&mut self, plugin: Box<P>) -> Option<usize> {
        let name = plugin.name();
        let Some(slot) = self.slot_of(name) else {
            warn!(
                "Rejecting {} plugin '{}': not a known backend",
                self.capability.name(),
                name
            );
            return None;
        };
        if self.slots[slot].is_some() {
            warn!(
                "Rejecting {} plugin '{}': slot already taken",
                self.capability.name(),
                name
            );
            return None;
        }
        debug!(
            "Registered {} plugin '{}' at priority {}",
            self.capability.name(),
            name,
            slot
        );
        self.slots[slot] = Some(plugin);
        Some(slot)
    }

    pub fn get(&self, slot: usize) -> Option<&P> {
        self.slots.get(slot)?.as_deref()
    }

    pub fn get_mut(&mut self, slot: usize) -> Option<&mut P> {
        self.slots.get_mut(slot)?.as_deref_mut()
    }

    /// Registered plugins in priority order
    pub fn iter(&self) -> impl Iterator<Item = (usize, &P)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(slot, p)| p.as_deref().map(|p| (slot, p)))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (usize, &mut P)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(slot, p)| p.as_deref_mut().map(|p| (slot, p)))
    }

    /// Number of registered plugins
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|p| p.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Probe backends for a target
    ///
    /// With `explicit` set only that backend is tried and its error is
    /// returned as-is. Otherwise slots are tried in priority order: probe
    /// misses move on to the next slot, any other error stops the search, and
    /// running out of slots yields [`Error::NoBackend`].
    pub fn resolve<H>(
        &mut self,
        explicit: Option<&str>,
        mut probe: impl FnMut(&mut P) -> Result<H, Error>,
    ) -> Result<Resolved<H>, Error> {
        let capability = self.capability;

        if let Some(name) = explicit {
            let slot = self
                .slot_of(name)
                .ok_or_else(|| Error::UnknownBackend(name.to_string()))?;
            let plugin = self
                .get_mut(slot)
                .ok_or(Error::NoBackend(capability.name()))?;
            let handle = probe(plugin)?;
            return Ok(Resolved { slot, handle });
        }

        for (slot, plugin) in self.iter_mut() {
            match probe(&mut *plugin) {
                Ok(handle) => {
                    info!("Using {} backend '{}'", capability.name(), plugin.name());
                    return Ok(Resolved { slot, handle });
                }
                Err(e) if e.is_probe_miss() => {
                    debug!(
                        "{} backend '{}' skipped: {}",
                        capability.name(),
                        plugin.name(),
                        e
                    );
                }
                Err(e) => return Err(e),
            }
        }

        Err(Error::NoBackend(capability.name()))
    }
}

/// Resolved backend handles keyed by target
pub struct TargetCache<H> {
    entries: DeviceMap<Resolved<H>>,
}

impl<H> Default for TargetCache<H> {
    fn default() -> Self {
        Self {
            entries: DeviceMap::new(),
        }
    }
}

impl<H> TargetCache<H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached handle for `key`, resolving it on first use
    pub fn get_or_resolve<P: ?Sized + Plugin>(
        &mut self,
        key: &str,
        table: &mut PluginTable<P>,
        explicit: Option<&str>,
        probe: impl FnMut(&mut P) -> Result<H, Error>,
    ) -> Result<&mut Resolved<H>, Error> {
        if !self.entries.contains(key) {
            let resolved = table.resolve(explicit, probe)?;
            self.entries.insert(key, resolved);
        }
        self.entries
            .get_mut(key)
            .ok_or_else(|| Error::TargetInvalid(key.to_string()))
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Resolved<H>> {
        self.entries.get_mut(key)
    }

    /// Drop a cached handle so the next call probes again
    pub fn invalidate(&mut self, key: &str) -> bool {
        self.entries.remove(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Probe: Plugin {
        fn probe(&mut self, target: &str) -> Result<String, Error>;
    }

    struct Fake {
        name: &'static str,
        outcome: fn(&str) -> Result<String, Error>,
        calls: usize,
    }

    impl Plugin for Fake {
        fn name(&self) -> &'static str {
            self.name
        }
    }

    impl Probe for Fake {
        fn probe(&mut self, target: &str) -> Result<String, Error> {
            self.calls += 1;
            (self.outcome)(target)
        }
    }

    const KNOWN: &[&str] = &["xorg", "wl", "drm"];

    fn fake(name: &'static str, outcome: fn(&str) -> Result<String, Error>) -> Box<dyn Probe> {
        Box::new(Fake {
            name,
            outcome,
            calls: 0,
        })
    }

    fn table(plugins: Vec<Box<dyn Probe>>) -> PluginTable<dyn Probe> {
        let mut table: PluginTable<dyn Probe> = PluginTable::new(Capability::Gamma, KNOWN);
        for p in plugins {
            table.register(p);
        }
        table
    }

    #[test]
    fn registration_buckets_by_token_regardless_of_call_order() {
        let t = table(vec![
            fake("Drm", |_| Ok("drm".into())),
            fake("Xorg", |_| Ok("xorg".into())),
        ]);
        assert_eq!(t.get(0).map(|p| p.name()), Some("Xorg"));
        assert!(t.get(1).is_none());
        assert_eq!(t.get(2).map(|p| p.name()), Some("Drm"));
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn registration_matches_case_insensitive_substring() {
        let mut t: PluginTable<dyn Probe> = PluginTable::new(Capability::Gamma, KNOWN);
        assert_eq!(t.register(fake("WL-gamma", |_| Ok(String::new()))), Some(1));
    }

    #[test]
    fn unknown_and_duplicate_names_are_rejected() {
        let mut t: PluginTable<dyn Probe> = PluginTable::new(Capability::Gamma, KNOWN);
        assert_eq!(t.register(fake("Quartz", |_| Ok(String::new()))), None);
        assert_eq!(t.register(fake("Drm", |_| Ok(String::new()))), Some(2));
        assert_eq!(t.register(fake("drm2", |_| Ok(String::new()))), None);
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn protocol_unsupported_falls_through_to_next_slot() {
        let mut t = table(vec![
            fake("Wl", |_| Err(Error::ProtocolNotSupported("wlr-gamma-control"))),
            fake("Drm", |t| Ok(format!("drm:{t}"))),
        ]);
        let resolved = t.resolve(None, |p| p.probe("card0")).unwrap();
        assert_eq!(resolved.slot, 2);
        assert_eq!(resolved.handle, "drm:card0");
    }

    #[test]
    fn target_invalid_stops_probing() {
        let mut t = table(vec![
            fake("Xorg", |_| Err(Error::TargetInvalid(":9".into()))),
            fake("Drm", |_| Ok("drm".into())),
        ]);
        let result = t.resolve(None, |p| p.probe(":9"));
        assert!(matches!(result, Err(Error::TargetInvalid(_))));
    }

    #[test]
    fn exhausted_slots_report_no_backend() {
        let mut t = table(vec![
            fake("Xorg", |_| Err(Error::BackendMismatch("Xorg"))),
            fake("Wl", |_| Err(Error::ProtocolNotSupported("wlr"))),
        ]);
        let result = t.resolve(None, |p| p.probe("x"));
        assert!(matches!(result, Err(Error::NoBackend("gamma"))));
    }

    #[test]
    fn explicit_backend_only_probes_that_slot() {
        let mut t = table(vec![
            fake("Xorg", |_| Ok("xorg".into())),
            fake("Wl", |_| Err(Error::ProtocolNotSupported("wlr"))),
        ]);
        let result = t.resolve(Some("wl"), |p| p.probe("wayland-0"));
        assert!(matches!(result, Err(Error::ProtocolNotSupported(_))));

        let result = t.resolve(Some("quartz"), |p| p.probe("x"));
        assert!(matches!(result, Err(Error::UnknownBackend(_))));

        let result = t.resolve(Some("drm"), |p| p.probe("x"));
        assert!(matches!(result, Err(Error::NoBackend(_))));
    }

    #[test]
    fn cache_reuses_resolved_handle() {
        let mut t = table(vec![fake("Drm", |t| Ok(format!("drm:{t}")))]);
        let mut cache: TargetCache<String> = TargetCache::new();

        cache
            .get_or_resolve("card0", &mut t, None, |p| p.probe("card0"))
            .unwrap();
        cache
            .get_or_resolve("card0", &mut t, None, |p| p.probe("card0"))
            .unwrap();
        assert_eq!(cache.len(), 1);

        let mut probes = 0;
        cache
            .get_or_resolve("card0", &mut t, None, |p| {
                probes += 1;
                p.probe("card0")
            })
            .unwrap();
        assert_eq!(probes, 0);

        assert!(cache.invalidate("card0"));
        cache
            .get_or_resolve("card0", &mut t, None, |p| {
                probes += 1;
                p.probe("card0")
            })
            .unwrap();
        assert_eq!(probes, 1);
    }
}
