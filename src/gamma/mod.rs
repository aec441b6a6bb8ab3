//! Screen colour temperature
//!
//! Each call names a display target. The first call for a target probes the
//! backends in priority order and caches the winning handle; later calls,
//! and the ticks of a smooth transition, reuse it until a backend error
//! invalidates it.
pub mod drm;
pub mod temperature;
pub mod wayland;
pub mod xorg;

use crate::bus::{GAMMA_INTERFACE, GAMMA_PATH, Reply, Request, Signal};
use crate::daemon::Runtime;
use crate::display::DisplayTarget;
use crate::error::Error;
use crate::mainloop::Source;
use crate::plugin::{Capability, Plugin, PluginTable, TargetCache};
use crate::smooth::{self, Smooth, Tick, Transition};
use log::{debug, info, warn};
use temperature::{MAX_TEMP, MIN_TEMP};

pub const KNOWN: &[&str] = &["xorg", "wl", "drm"];

/// Gamma ramps of one display target
pub trait GammaOutput {
    /// Apply `temp` Kelvin to every output of the target
    fn set(&mut self, temp: i32) -> Result<(), Error>;
    fn get(&mut self) -> Result<i32, Error>;
}

pub trait GammaPlugin: Plugin {
    /// Connect to `target`
    ///
    /// Returns [`Error::BackendMismatch`] or [`Error::ProtocolNotSupported`]
    /// when another backend should be tried.
    fn open(&mut self, target: &DisplayTarget) -> Result<Box<dyn GammaOutput>, Error>;
}

pub fn table() -> PluginTable<dyn GammaPlugin> {
    PluginTable::new(Capability::Gamma, KNOWN)
}

pub fn check_temperature(temp: i32) -> Result<(), Error> {
    if (MIN_TEMP..=MAX_TEMP).contains(&temp) {
        Ok(())
    } else {
        Err(Error::InvalidArgument(format!(
            "temperature {} outside {}..={}",
            temp, MIN_TEMP, MAX_TEMP
        )))
    }
}

struct GammaTarget {
    output: Box<dyn GammaOutput>,
    transition: Option<Transition>,
}

pub struct GammaService {
    plugins: PluginTable<dyn GammaPlugin>,
    targets: TargetCache<GammaTarget>,
    explicit: Option<String>,
}

impl GammaService {
    pub fn new(plugins: PluginTable<dyn GammaPlugin>, explicit: Option<String>) -> Self {
        Self {
            plugins,
            targets: TargetCache::new(),
            explicit,
        }
    }

    pub fn plugins(&self) -> &PluginTable<dyn GammaPlugin> {
        &self.plugins
    }

    /// Number of targets with a cached backend handle
    pub fn cached(&self) -> usize {
        self.targets.len()
    }

    pub fn is_transitioning(&mut self, display: &str) -> bool {
        self.targets
            .get_mut(display)
            .is_some_and(|t| t.handle.transition.is_some())
    }

    pub fn handle(&mut self, rt: &mut Runtime<'_>, request: &Request) -> Result<Reply, Error> {
        match request {
            Request::GammaSet {
                display,
                env,
                temp,
                smooth,
                step,
                wait,
            } => {
                check_temperature(*temp)?;
                let smooth = if *smooth {
                    Smooth::new(f64::from(*step), *wait)
                } else {
                    Smooth::NONE
                };
                let target = DisplayTarget::new(display.as_str(), env.as_str());
                self.guarded(rt, &target, |service, rt| {
                    service.set(rt, &target, *temp, smooth)
                })?;
                Ok(Reply::Bool(true))
            }
            Request::GammaGet { display, env } => {
                let target = DisplayTarget::new(display.as_str(), env.as_str());
                let temp = self.guarded(rt, &target, |service, _| {
                    service.resolve(&target)?.output.get()
                })?;
                Ok(Reply::Int(temp))
            }
            other => Err(Error::Unsupported(format!("{:?} on {}", other, GAMMA_PATH))),
        }
    }

    /// Run `op`, dropping the target's cached handle if it failed in a way
    /// that makes the handle suspect
    fn guarded<T>(
        &mut self,
        rt: &mut Runtime<'_>,
        target: &DisplayTarget,
        op: impl FnOnce(&mut Self, &mut Runtime<'_>) -> Result<T, Error>,
    ) -> Result<T, Error> {
        let result = op(self, rt);
        if let Err(e) = &result
            && e.invalidates_handle()
        {
            self.forget(rt, &target.key());
        }
        result
    }

    fn resolve(&mut self, target: &DisplayTarget) -> Result<&mut GammaTarget, Error> {
        let resolved = self.targets.get_or_resolve(
            &target.key(),
            &mut self.plugins,
            self.explicit.as_deref(),
            |plugin| {
                let output = plugin.open(target)?;
                Ok(GammaTarget {
                    output,
                    transition: None,
                })
            },
        )?;
        Ok(&mut resolved.handle)
    }

    fn set(
        &mut self,
        rt: &mut Runtime<'_>,
        target: &DisplayTarget,
        temp: i32,
        smooth: Smooth,
    ) -> Result<(), Error> {
        let key = target.key();
        let entry = self.resolve(target)?;

        if smooth.applies_to(f64::from(temp)) {
            let start = entry.output.get()?;
            let source = Source::Tick {
                capability: Capability::Gamma,
                id: key,
            };
            return smooth::begin(
                &mut entry.transition,
                rt.events,
                source,
                f64::from(start),
                f64::from(temp),
                smooth,
            );
        }

        smooth::cancel(&mut entry.transition, rt.events);
        entry.output.set(temp)?;
        info!("Gamma on '{}' set to {} K", key, temp);
        rt.emit(
            GAMMA_PATH,
            GAMMA_INTERFACE,
            Signal::Display {
                display: key,
                value: temp,
            },
        );
        Ok(())
    }

    /// Advance the transition of the target cached as `key`
    pub fn tick(&mut self, rt: &mut Runtime<'_>, key: &str) {
        let Some(resolved) = self.targets.get_mut(key) else {
            return;
        };
        let entry = &mut resolved.handle;
        let Some(transition) = entry.transition.as_mut() else {
            return;
        };
        let tick = transition.tick();
        let temp = tick.value().round() as i32;

        if let Err(e) = entry.output.set(temp) {
            warn!("Aborting gamma transition on '{}': {}", key, e);
            self.forget(rt, key);
            return;
        }
        rt.emit(
            GAMMA_PATH,
            GAMMA_INTERFACE,
            Signal::Display {
                display: key.to_string(),
                value: temp,
            },
        );
        if let Tick::Finished(_) = tick {
            debug!("Gamma transition on '{}' reached {} K", key, temp);
            smooth::cancel(&mut entry.transition, rt.events);
        }
    }

    /// Cancel any transition and drop the cached handle for `key`
    fn forget(&mut self, rt: &mut Runtime<'_>, key: &str) {
        if let Some(resolved) = self.targets.get_mut(key) {
            smooth::cancel(&mut resolved.handle.transition, rt.events);
        }
        if self.targets.invalidate(key) {
            debug!("Dropped gamma handle for '{}'", key);
        }
    }

    pub fn shutdown(&mut self, rt: &mut Runtime<'_>) {
        let keys: Vec<String> = self.targets.keys().map(str::to_owned).collect();
        for key in keys {
            self.forget(rt, &key);
        }
    }
}
