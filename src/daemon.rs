//! Daemon core
//!
//! [`Daemon`] owns the event loop, the bus transport and one service per
//! capability. Everything runs on one thread: the loop reports ready
//! sources, the daemon routes each to the service that owns it, and
//! services act on hardware and talk back through a [`Runtime`].
use crate::backlight::{self, BacklightService};
use crate::bus::{
    Authority, BACKLIGHT_PATH, BACKLIGHT_SERVER_INTERFACE, Bus, Call, DPMS_INTERFACE, DPMS_PATH,
    GAMMA_INTERFACE, GAMMA_PATH, Reply, Request, Signal,
};
use crate::cli::Options;
use crate::dbus::{DbusBus, PolkitAuthority};
use crate::dpms::{self, DpmsService};
use crate::env::PluginEnv;
use crate::error::Error;
use crate::gamma::{self, GammaService};
use crate::keyboard::{self, KeyboardService};
use crate::mainloop::{EventLoop, ShutdownSignal, Source};
use crate::plugin::Capability;
use crate::sensor::{self, SensorService};
use log::{debug, info, warn};
use std::time::Duration;

/// What services get to touch while handling a call or event
pub struct Runtime<'a> {
    pub events: &'a mut EventLoop,
    pub bus: &'a mut dyn Bus,
}

impl Runtime<'_> {
    /// Emit `Changed` on `path`; a failed emission is logged, not returned
    pub fn emit(&mut self, path: &str, interface: &'static str, signal: Signal) {
        if let Err(e) = self.bus.emit(path, interface, signal) {
            warn!("Failed to emit Changed on {}: {}", path, e);
        }
    }
}

/// One service per capability
pub struct Services {
    pub backlight: BacklightService,
    pub keyboard: KeyboardService,
    pub gamma: GammaService,
    pub dpms: DpmsService,
    pub sensor: SensorService,
}

impl Services {
    /// Every built-in backend, registered in priority order
    pub fn standard(env: &PluginEnv) -> Self {
        let mut backlight = backlight::table();
        backlight.register(Box::new(backlight::sysfs::Sysfs::new(&env.sysfs_root)));
        if env.ddc_enabled {
            backlight.register(Box::new(backlight::ddc::DdcBacklight::new(
                &env.sysfs_root,
                &env.dev_root,
                env.vcp_code,
            )));
        } else {
            info!("DDC/CI backlight disabled");
        }

        let mut keyboard = keyboard::table();
        keyboard.register(Box::new(keyboard::Leds::new(&env.sysfs_root)));

        let mut gamma = gamma::table();
        gamma.register(Box::new(gamma::xorg::XorgGamma));
        gamma.register(Box::new(gamma::wayland::WlGamma));
        gamma.register(Box::new(gamma::drm::DrmGamma::new(env.dev_root.clone())));

        let mut dpms = dpms::table();
        dpms.register(Box::new(dpms::xorg::XorgDpms));
        dpms.register(Box::new(dpms::wayland::WlDpms));
        dpms.register(Box::new(dpms::drm::DrmDpms::new(env.dev_root.clone())));

        let mut sensor = sensor::table();
        sensor.register(Box::new(sensor::als::Als::new(&env.sysfs_root)));
        sensor.register(Box::new(sensor::webcam::Webcam::new(&env.dev_root)));

        Self {
            backlight: BacklightService::new(backlight),
            keyboard: KeyboardService::new(keyboard),
            gamma: GammaService::new(gamma, env.gamma_backend.clone()),
            dpms: DpmsService::new(dpms, env.dpms_backend.clone()),
            sensor: SensorService::new(sensor),
        }
    }
}

pub struct Daemon<B: Bus> {
    events: EventLoop,
    bus: B,
    authority: Box<dyn Authority>,
    services: Services,
}

impl<B: Bus> Daemon<B> {
    pub fn new(bus: B, authority: Box<dyn Authority>, services: Services) -> Result<Self, Error> {
        Ok(Self {
            events: EventLoop::new()?,
            bus,
            authority,
            services,
        })
    }

    pub fn events(&self) -> &EventLoop {
        &self.events
    }

    pub fn events_mut(&mut self) -> &mut EventLoop {
        &mut self.events
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn services_mut(&mut self) -> &mut Services {
        &mut self.services
    }

    fn split(&mut self) -> (Runtime<'_>, &mut Services) {
        let rt = Runtime {
            events: &mut self.events,
            bus: &mut self.bus,
        };
        (rt, &mut self.services)
    }

    /// Register collection objects and enumerate devices
    pub fn start(&mut self) -> Result<(), Error> {
        let (mut rt, services) = self.split();
        rt.bus.register_object(GAMMA_PATH, GAMMA_INTERFACE)?;
        rt.bus.register_object(DPMS_PATH, DPMS_INTERFACE)?;
        services.backlight.devices_mut().start(&mut rt)?;
        services.keyboard.devices_mut().start(&mut rt)?;
        services.sensor.start(&mut rt)?;
        Ok(())
    }

    /// Start following udev for every capability that has devices
    pub fn attach_monitors(&mut self) {
        let (mut rt, services) = self.split();
        services.backlight.devices_mut().attach_monitors(&mut rt);
        services.keyboard.devices_mut().attach_monitors(&mut rt);
        services.sensor.attach_monitors(&mut rt);
    }

    /// Authorize and route one method call
    pub fn handle(&mut self, call: &Call) -> Result<Reply, Error> {
        if call.request.is_privileged() {
            let action = call.action_id();
            if !self.authority.check(&call.sender, &action) {
                info!("Denied {} to {}", action, call.sender);
                return Err(Error::PermissionDenied);
            }
        }

        let (mut rt, services) = self.split();
        match &call.request {
            request @ (Request::BacklightSet { .. } | Request::BacklightGet) => {
                services.backlight.handle(&mut rt, &call.path, request)
            }
            request @ (Request::GammaSet { .. } | Request::GammaGet { .. }) => {
                services.gamma.handle(&mut rt, request)
            }
            request @ (Request::DpmsGet { .. }
            | Request::DpmsSet { .. }
            | Request::DpmsGetTimeouts { .. }
            | Request::DpmsSetTimeouts { .. }) => services.dpms.handle(&mut rt, request),
            request @ (Request::SensorCapture { .. } | Request::SensorIsAvailable { .. }) => {
                services.sensor.handle(&call.path, request)
            }
            request @ (Request::KbdSet(_)
            | Request::KbdGet
            | Request::KbdSetTimeout(_)
            | Request::KbdGetTimeout) => services.keyboard.handle(&mut rt, request),
            Request::GetProperty { interface, name } => {
                properties(&services.backlight, &call.path, interface)?
                    .into_iter()
                    .find(|(key, _)| key == name)
                    .map(|(_, value)| Reply::Property(value))
                    .ok_or_else(|| {
                        Error::InvalidArgument(format!("no property {} on {}", name, call.path))
                    })
            }
            Request::GetAllProperties { interface } => Ok(Reply::Properties(properties(
                &services.backlight,
                &call.path,
                interface,
            )?)),
        }
    }

    /// Route a ready loop source to its owner
    ///
    /// Bus readiness is the transport's business and is ignored here.
    pub fn dispatch(&mut self, source: Source) {
        let (mut rt, services) = self.split();
        match source {
            Source::Shutdown => {
                info!("Shutdown requested");
                rt.events.quit();
            }
            Source::Bus => {}
            Source::Hotplug { capability, index } => match capability {
                Capability::Backlight => services.backlight.devices_mut().on_hotplug(&mut rt, index),
                Capability::Keyboard => services.keyboard.devices_mut().on_hotplug(&mut rt, index),
                Capability::Sensor => services.sensor.on_hotplug(&mut rt, index),
                Capability::Gamma | Capability::Dpms => {
                    debug!("Stray {} hot-plug source", capability.name())
                }
            },
            Source::Tick { capability, id } => match capability {
                Capability::Backlight => services.backlight.devices_mut().tick(&mut rt, &id),
                Capability::Keyboard => services.keyboard.devices_mut().tick(&mut rt, &id),
                Capability::Gamma => services.gamma.tick(&mut rt, &id),
                Capability::Dpms | Capability::Sensor => {
                    debug!("Stray {} tick", capability.name())
                }
            },
        }
    }

    /// Wait once and dispatch everything that became ready
    ///
    /// Returns the number of sources dispatched.
    pub fn turn(&mut self, timeout: Option<Duration>) -> Result<usize, Error> {
        let batch = self.events.poll(timeout)?;
        let mut dispatched = 0;
        for (token, source) in batch {
            // An earlier source in the batch may have cancelled this one
            if !self.events.contains(token) {
                continue;
            }
            self.dispatch(source);
            dispatched += 1;
        }
        Ok(dispatched)
    }

    /// Cancel transitions, drop handles, and unregister every object
    pub fn shutdown(&mut self) {
        let (mut rt, services) = self.split();
        services.sensor.shutdown(&mut rt);
        services.dpms.shutdown();
        services.gamma.shutdown(&mut rt);
        services.keyboard.devices_mut().shutdown(&mut rt);
        services.backlight.devices_mut().shutdown(&mut rt);
        for path in [DPMS_PATH, GAMMA_PATH] {
            if let Err(e) = rt.bus.unregister_object(path) {
                warn!("Failed to unregister {}: {}", path, e);
            }
        }
    }
}

/// Constant properties of the object at `path` under `interface`
fn properties(
    backlight: &BacklightService,
    path: &str,
    interface: &str,
) -> Result<Vec<(String, crate::bus::PropValue)>, Error> {
    let is_device = path
        .strip_prefix(BACKLIGHT_PATH)
        .is_some_and(|rest| rest.starts_with('/'));
    if is_device && (interface.is_empty() || interface == BACKLIGHT_SERVER_INTERFACE) {
        backlight.properties(path)
    } else {
        Ok(Vec::new())
    }
}

impl Daemon<DbusBus> {
    /// Answer every method call the transport has queued
    fn serve_bus(&mut self) {
        for incoming in self.bus.drain_calls() {
            let result = self.handle(&incoming.call);
            if let Err(e) = &result {
                debug!("{} on {} failed: {}", incoming.call.member, incoming.call.path, e);
            }
            self.bus.answer(&incoming, result);
        }
    }

    fn serve(&mut self, signal: &mut ShutdownSignal) -> Result<(), Error> {
        while self.events.is_running() {
            for (token, source) in self.events.poll(None)? {
                if !self.events.contains(token) {
                    continue;
                }
                match source {
                    Source::Bus => self.serve_bus(),
                    Source::Shutdown => {
                        signal.drain();
                        self.dispatch(Source::Shutdown);
                    }
                    other => self.dispatch(other),
                }
            }
        }
        Ok(())
    }
}

/// Run the daemon until SIGINT or SIGTERM
pub fn run(options: &Options) -> Result<(), Error> {
    let env = PluginEnv::from_env();
    debug!("Plugin environment: {:?}", env);
    let services = Services::standard(&env);

    let mut signal = ShutdownSignal::install()?;
    let connection = if options.session_bus {
        zbus::blocking::Connection::session()?
    } else {
        zbus::blocking::Connection::system()?
    };
    let authority: Box<dyn Authority> = if options.session_bus {
        // Only our own user can reach the session bus
        Box::new(|_: &str, _: &str| true)
    } else {
        Box::new(PolkitAuthority::new(connection.clone()))
    };
    let bus = DbusBus::new(connection)?;

    let mut daemon = Daemon::new(bus, authority, services)?;
    let waker = daemon.bus().waker()?;
    let bus_token = daemon.events_mut().register(&waker, Source::Bus)?;
    let signal_token = daemon.events_mut().register(&signal, Source::Shutdown)?;

    daemon.bus_mut().claim_name()?;
    daemon.start()?;
    daemon.attach_monitors();
    info!("clightd ready");

    let result = daemon.serve(&mut signal);

    daemon.shutdown();
    if let Err(e) = daemon.events_mut().deregister(signal_token, &signal) {
        warn!("Failed to stop watching signals: {}", e);
    }
    if let Err(e) = daemon.events_mut().deregister(bus_token, &waker) {
        warn!("Failed to stop watching the bus: {}", e);
    }
    info!("clightd stopped");
    result
}
