//! DPMS through wlr-output-power-management
//!
//! The protocol only knows on and off, so every level other than `On`
//! switches outputs off. Power controls are single-use: one is created per
//! request and destroyed once the compositor has answered.
use super::{DpmsOutput, DpmsPlugin, Level};
use crate::display::{DisplayTarget, connect_wayland};
use crate::error::Error;
use crate::plugin::Plugin;

use wayland_client::{
    Connection, Dispatch, EventQueue, QueueHandle, WEnum,
    globals::{GlobalListContents, registry_queue_init},
    protocol::{wl_output, wl_registry},
};
use wayland_protocols_wlr::output_power_management::v1::client::{
    zwlr_output_power_manager_v1, zwlr_output_power_v1,
};

const PROTOCOL: &str = "wlr-output-power-management";

fn wl_err(e: impl std::fmt::Display) -> Error {
    Error::Wayland(e.to_string())
}

/// Event state for one request
#[derive(Default)]
struct PowerState {
    modes: Vec<Option<zwlr_output_power_v1::Mode>>,
    failed: bool,
}

pub struct WlDpms;

struct WlOutput {
    queue: EventQueue<PowerState>,
    manager: zwlr_output_power_manager_v1::ZwlrOutputPowerManagerV1,
    outputs: Vec<wl_output::WlOutput>,
}

impl WlOutput {
    /// Create one power control per output, run `request` on each, and
    /// collect the compositor's answers
    fn exchange(
        &mut self,
        request: impl Fn(&zwlr_output_power_v1::ZwlrOutputPowerV1),
    ) -> Result<PowerState, Error> {
        let qh = self.queue.handle();
        let mut state = PowerState {
            modes: vec![None; self.outputs.len()],
            failed: false,
        };
        let controls: Vec<_> = self
            .outputs
            .iter()
            .enumerate()
            .map(|(index, output)| self.manager.get_output_power(output, &qh, index))
            .collect();
        for control in &controls {
            request(control);
        }

        let result = self.queue.roundtrip(&mut state).map_err(wl_err);
        for control in &controls {
            control.destroy();
        }
        result?;

        if state.failed {
            return Err(Error::Wayland("output power control failed".to_string()));
        }
        Ok(state)
    }
}

impl DpmsOutput for WlOutput {
    fn level(&mut self) -> Result<Level, Error> {
        let state = self.exchange(|_| {})?;
        // The target counts as off only when every output is
        let all_off = state
            .modes
            .iter()
            .all(|m| *m == Some(zwlr_output_power_v1::Mode::Off));
        Ok(if all_off { Level::Off } else { Level::On })
    }

    fn set_level(&mut self, level: Level) -> Result<(), Error> {
        let mode = match level {
            Level::On => zwlr_output_power_v1::Mode::On,
            _ => zwlr_output_power_v1::Mode::Off,
        };
        self.exchange(|control| control.set_mode(mode))?;
        Ok(())
    }
}

impl Plugin for WlDpms {
    fn name(&self) -> &'static str {
        "Wl"
    }
}

impl DpmsPlugin for WlDpms {
    fn open(&mut self, target: &DisplayTarget) -> Result<Box<dyn DpmsOutput>, Error> {
        let connection = connect_wayland(target, self.name())?;
        let (globals, mut queue) = registry_queue_init::<PowerState>(&connection).map_err(wl_err)?;
        let qh = queue.handle();

        let manager = globals
            .bind::<zwlr_output_power_manager_v1::ZwlrOutputPowerManagerV1, _, _>(&qh, 1..=1, ())
            .map_err(|_| Error::ProtocolNotSupported(PROTOCOL))?;

        let outputs: Vec<wl_output::WlOutput> = globals.contents().with_list(|list| {
            list.iter()
                .filter(|g| g.interface == "wl_output")
                .map(|g| {
                    globals
                        .registry()
                        .bind::<wl_output::WlOutput, _, _>(g.name, g.version.min(4), &qh, ())
                })
                .collect()
        });
        if outputs.is_empty() {
            return Err(Error::TargetInvalid(format!(
                "{}: compositor has no outputs",
                target.display
            )));
        }

        queue
            .roundtrip(&mut PowerState::default())
            .map_err(wl_err)?;

        Ok(Box::new(WlOutput {
            queue,
            manager,
            outputs,
        }))
    }
}

impl Dispatch<wl_registry::WlRegistry, GlobalListContents> for PowerState {
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

impl Dispatch<wl_output::WlOutput, ()> for PowerState {
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

impl Dispatch<zwlr_output_power_manager_v1::ZwlrOutputPowerManagerV1, ()> for PowerState {
    fn event(
        _state: &mut Self,
        _proxy: &zwlr_output_power_manager_v1::ZwlrOutputPowerManagerV1,
        _event: zwlr_output_power_manager_v1::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
    }
}

impl Dispatch<zwlr_output_power_v1::ZwlrOutputPowerV1, usize> for PowerState {
    fn event(
        state: &mut Self,
        _proxy: &zwlr_output_power_v1::ZwlrOutputPowerV1,
        event: zwlr_output_power_v1::Event,
        index: &usize,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        match event {
            zwlr_output_power_v1::Event::Mode {
                mode: WEnum::Value(mode),
            } => {
                if let Some(slot) = state.modes.get_mut(*index) {
                    *slot = Some(mode);
                }
            }
            zwlr_output_power_v1::Event::Failed => state.failed = true,
            _ => {}
        }
    }
}
