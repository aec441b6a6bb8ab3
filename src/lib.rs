//! clightd: a bus daemon for screen backlight, gamma, DPMS, keyboard
//! backlight and ambient brightness sensors
pub mod backlight;
pub mod bus;
pub mod cli;
pub mod daemon;
pub mod dbus;
pub mod device;
pub mod display;
pub mod dpms;
pub mod drm_ops;
pub mod env;
pub mod error;
pub mod gamma;
pub mod hotplug;
pub mod keyboard;
pub mod lifecycle;
pub mod mainloop;
pub mod map;
pub mod plugin;
pub mod sensor;
pub mod smooth;
pub mod sysfs;
