//! Gamma through wlr-gamma-control
//!
//! The compositor resets gamma as soon as a control object is destroyed, so
//! controls live as long as the cached handle. The protocol has no way to
//! read ramps back; `get` reports the last temperature applied.
use super::temperature::{self, NEUTRAL_TEMP};
use super::{GammaOutput, GammaPlugin};
use crate::display::{DisplayTarget, connect_wayland};
use crate::error::Error;
use crate::plugin::Plugin;
use log::debug;
use nix::sys::memfd::{MemFdCreateFlag, memfd_create};
use std::fs::File;
use std::io::{Seek, SeekFrom, Write};
use std::os::fd::AsFd;
use wayland_client::{
    Connection, Dispatch, EventQueue, QueueHandle,
    globals::{GlobalListContents, registry_queue_init},
    protocol::{wl_output, wl_registry},
};
use wayland_protocols_wlr::gamma_control::v1::client::{
    zwlr_gamma_control_manager_v1, zwlr_gamma_control_v1,
};

const PROTOCOL: &str = "wlr-gamma-control";

fn wl_err(e: impl std::fmt::Display) -> Error {
    Error::Wayland(e.to_string())
}

struct Head {
    control: zwlr_gamma_control_v1::ZwlrGammaControlV1,
    size: u32,
    failed: bool,
}

struct GammaState {
    heads: Vec<Head>,
}

pub struct WlGamma;

struct WlGammaOutput {
    connection: Connection,
    queue: EventQueue<GammaState>,
    state: GammaState,
    last: i32,
}

/// Anonymous file holding the three ramps back to back, rewound
fn ramp_file(size: usize, temp: i32) -> Result<File, Error> {
    let fd = memfd_create(c"clightd-gamma", MemFdCreateFlag::MFD_CLOEXEC)?;
    let mut file = File::from(fd);
    let mut bytes = Vec::with_capacity(size * 6);
    for ramp in temperature::ramps(size, temp) {
        for value in ramp {
            bytes.extend_from_slice(&value.to_ne_bytes());
        }
    }
    file.write_all(&bytes)?;
    file.seek(SeekFrom::Start(0))?;
    Ok(file)
}

impl GammaOutput for WlGammaOutput {
    fn set(&mut self, temp: i32) -> Result<(), Error> {
        // Files must stay open until the compositor has read them
        let mut files = Vec::new();
        for head in self.state.heads.iter().filter(|h| !h.failed && h.size > 0) {
            let file = ramp_file(head.size as usize, temp)?;
            head.control.set_gamma(file.as_fd());
            files.push(file);
        }
        self.queue.roundtrip(&mut self.state).map_err(wl_err)?;

        if self.state.heads.iter().any(|h| h.failed) {
            return Err(Error::Wayland("gamma control failed".to_string()));
        }
        self.last = temp;
        Ok(())
    }

    fn get(&mut self) -> Result<i32, Error> {
        Ok(self.last)
    }
}

impl Drop for WlGammaOutput {
    fn drop(&mut self) {
        for head in &self.state.heads {
            head.control.destroy();
        }
        let _ = self.connection.flush();
    }
}

impl Plugin for WlGamma {
    fn name(&self) -> &'static str {
        "Wl"
    }
}

impl GammaPlugin for WlGamma {
    fn open(&mut self, target: &DisplayTarget) -> Result<Box<dyn GammaOutput>, Error> {
        let connection = connect_wayland(target, self.name())?;
        let (globals, mut queue) = registry_queue_init::<GammaState>(&connection).map_err(wl_err)?;
        let qh = queue.handle();

        let manager = globals
            .bind::<zwlr_gamma_control_manager_v1::ZwlrGammaControlManagerV1, _, _>(
                &qh,
                1..=1,
                (),
            )
            .map_err(|_| Error::ProtocolNotSupported(PROTOCOL))?;

        let outputs: Vec<(u32, u32)> = globals.contents().with_list(|list| {
            list.iter()
                .filter(|g| g.interface == "wl_output")
                .map(|g| (g.name, g.version))
                .collect()
        });
        if outputs.is_empty() {
            return Err(Error::TargetInvalid(format!(
                "{}: compositor has no outputs",
                target.display
            )));
        }

        let mut state = GammaState { heads: Vec::new() };
        for (index, (name, version)) in outputs.into_iter().enumerate() {
            let output =
                globals
                    .registry()
                    .bind::<wl_output::WlOutput, _, _>(name, version.min(4), &qh, ());
            let control = manager.get_gamma_control(&output, &qh, index);
            state.heads.push(Head {
                control,
                size: 0,
                failed: false,
            });
        }
        queue.roundtrip(&mut state).map_err(wl_err)?;

        if state.heads.iter().all(|h| h.failed) {
            // Another client holds every output's gamma
            return Err(Error::Wayland("gamma control unavailable".to_string()));
        }
        debug!("wlr gamma controls on {} outputs", state.heads.len());
        Ok(Box::new(WlGammaOutput {
            connection,
            queue,
            state,
            last: NEUTRAL_TEMP,
        }))
    }
}

impl Dispatch<wl_registry::WlRegistry, GlobalListContents> for GammaState {
    fn event(
        _state: &mut Self,
        _proxy: &wl_registry::WlRegistry,
        _event: wl_registry::Event,
        _data: &GlobalListContents,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
    }
}

impl Dispatch<wl_output::WlOutput, ()> for GammaState {
    fn event(
        _state: &mut Self,
        _proxy: &wl_output::WlOutput,
        _event: wl_output::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
    }
}

impl Dispatch<zwlr_gamma_control_manager_v1::ZwlrGammaControlManagerV1, ()> for GammaState {
    fn event(
        _state: &mut Self,
        _proxy: &zwlr_gamma_control_manager_v1::ZwlrGammaControlManagerV1,
        _event: zwlr_gamma_control_manager_v1::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
    }
}

impl Dispatch<zwlr_gamma_control_v1::ZwlrGammaControlV1, usize> for GammaState {
    fn event(
        state: &mut Self,
        _proxy: &zwlr_gamma_control_v1::ZwlrGammaControlV1,
        event: zwlr_gamma_control_v1::Event,
        index: &usize,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        let Some(head) = state.heads.get_mut(*index) else {
            return;
        };
        match event {
            zwlr_gamma_control_v1::Event::GammaSize { size } => head.size = size,
            zwlr_gamma_control_v1::Event::Failed => head.failed = true,
            _ => {}
        }
    }
}
