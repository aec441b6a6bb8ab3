//! DRM card access for gamma and DPMS
//!
//! Cards are opened through libseat when a seat is available, which hands
//! out DRM master without root, and directly otherwise. The seat has to stay
//! open for as long as the device is used, so both travel together in a
//! [`Card`].
use crate::error::Error;
use drm::Device;
use drm::control::{AtomicCommitFlags, Device as ControlDevice, atomic, connector, crtc, property};
use drm::node::{DrmNode, NodeType};
use log::debug;
use std::fs::{File, OpenOptions};
use std::os::fd::{AsFd, BorrowedFd};
use std::path::{Path, PathBuf};

/// Primary card nodes under `<dev_root>/dri`, sorted by name
///
/// Render nodes and anything `DrmNode` does not recognise are skipped.
pub fn discover_cards(dev_root: &Path) -> Vec<PathBuf> {
    crate::sysfs::list(&dev_root.join("dri"))
        .into_iter()
        .filter(|path| crate::sysfs::name_of(path).is_some_and(|n| n.starts_with("card")))
        .filter(|path| {
            DrmNode::from_path(path).is_ok_and(|node| node.ty() == NodeType::Primary)
        })
        .collect()
}

#[derive(Debug)]
pub struct DrmDevice {
    inner: DrmDeviceInner,
}

#[derive(Debug)]
enum DrmDeviceInner {
    /// Opened via libseat, master granted by the seat
    Libseat(libseat::Device),
    /// Opened directly, master only if nobody else holds it
    Direct(File),
}

impl AsFd for DrmDevice {
    fn as_fd(&self) -> BorrowedFd<'_> {
        match &self.inner {
            DrmDeviceInner::Libseat(dev) => dev.as_fd(),
            DrmDeviceInner::Direct(file) => file.as_fd(),
        }
    }
}

impl Device for DrmDevice {}
impl ControlDevice for DrmDevice {}

/// Seat backing a libseat-opened device, if any
pub enum SeatHolder {
    Seat(libseat::Seat),
    None,
}

impl std::fmt::Debug for SeatHolder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SeatHolder::Seat(_) => write!(f, "SeatHolder::Seat(...)"),
            SeatHolder::None => write!(f, "SeatHolder::None"),
        }
    }
}

/// An open card and the seat keeping it usable
#[derive(Debug)]
pub struct Card {
    path: PathBuf,
    device: DrmDevice,
    _seat: SeatHolder,
}

impl Card {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn device(&self) -> &DrmDevice {
        &self.device
    }
}

fn open_with_libseat(candidates: &[PathBuf]) -> Result<Card, Error> {
    use std::sync::{Arc, Mutex};

    // Seat events have to be consumed but need no action here
    let seat_event: Arc<Mutex<Option<libseat::SeatEvent>>> = Arc::new(Mutex::new(None));
    let seat_event_clone = Arc::clone(&seat_event);

    let mut seat = libseat::Seat::open(move |_seat, event| {
        if let Ok(mut guard) = seat_event_clone.lock() {
            *guard = Some(event);
        }
    })
    .map_err(|e| Error::SeatError(format!("Failed to open seat: {:?}", e)))?;

    seat.dispatch(0)
        .map_err(|e| Error::SeatError(format!("Failed to dispatch seat events: {:?}", e)))?;

    for path in candidates {
        // The fd libseat returns carries master; a second open would not
        match seat.open_device(path) {
            Ok(device) => {
                return Ok(Card {
                    path: path.clone(),
                    device: DrmDevice {
                        inner: DrmDeviceInner::Libseat(device),
                    },
                    _seat: SeatHolder::Seat(seat),
                });
            }
            Err(e) => debug!("libseat could not open {}: {:?}", path.display(), e),
        }
    }

    Err(Error::SeatError(
        "No DRM device could be opened via libseat".to_string(),
    ))
}

fn open_direct(candidates: &[PathBuf]) -> Result<Card, Error> {
    let mut last_error: Option<String> = None;

    for path in candidates {
        let file = match OpenOptions::new().read(true).write(true).open(path) {
            Ok(file) => file,
            Err(e) => {
                last_error = Some(format!("{}: {}", path.display(), e));
                continue;
            }
        };
        let device = DrmDevice {
            inner: DrmDeviceInner::Direct(file),
        };
        // Fails while a compositor holds master
        if let Err(e) = device.acquire_master_lock() {
            last_error = Some(format!(
                "{}: failed to acquire DRM master ({:?})",
                path.display(),
                e
            ));
            continue;
        }
        return Ok(Card {
            path: path.clone(),
            device,
            _seat: SeatHolder::None,
        });
    }

    Err(Error::DrmError(last_error.unwrap_or_else(|| {
        "No DRM device could be opened".to_string()
    })))
}

/// Open `path`, or the first usable card under `dev_root` when `None`
///
/// libseat is tried first, direct access second.
pub fn open_card(dev_root: &Path, path: Option<&Path>) -> Result<Card, Error> {
    let candidates = match path {
        Some(path) => {
            if !path.exists() {
                return Err(Error::TargetInvalid(path.display().to_string()));
            }
            vec![path.to_path_buf()]
        }
        None => discover_cards(dev_root),
    };
    if candidates.is_empty() {
        return Err(Error::DrmError(format!(
            "No DRM devices found in {}",
            dev_root.join("dri").display()
        )));
    }

    match open_with_libseat(&candidates) {
        Ok(card) => Ok(card),
        Err(seat_err) => {
            debug!("{}, trying direct access", seat_err);
            open_direct(&candidates)
        }
    }
}

impl DrmDevice {
    /// CRTCs driving a connected connector, in connector order
    pub fn connected_crtcs(&self) -> Result<Vec<crtc::Handle>, Error> {
        let res = self
            .resource_handles()
            .map_err(|e| Error::DrmError(format!("Failed to get resource handles: {:?}", e)))?;

        let mut crtcs = Vec::new();
        for conn_handle in res.connectors() {
            let conn_info = self
                .get_connector(*conn_handle, false)
                .map_err(|e| Error::DrmError(format!("Failed to get connector info: {:?}", e)))?;
            if conn_info.state() != connector::State::Connected {
                continue;
            }

            let encoders = conn_info
                .current_encoder()
                .into_iter()
                .chain(conn_info.encoders().iter().copied());
            for encoder_handle in encoders {
                let encoder_info = self.get_encoder(encoder_handle).map_err(|e| {
                    Error::DrmError(format!("Failed to get encoder info: {:?}", e))
                })?;
                if let Some(crtc_handle) = encoder_info.crtc() {
                    if !crtcs.contains(&crtc_handle) {
                        crtcs.push(crtc_handle);
                    }
                    break;
                }
            }
        }

        if crtcs.is_empty() {
            return Err(Error::TargetInvalid("no connected display".to_string()));
        }
        Ok(crtcs)
    }

    fn active_property(&self, crtc_handle: crtc::Handle) -> Result<(property::Handle, bool), Error> {
        let props = self
            .get_properties(crtc_handle)
            .map_err(|e| Error::DrmError(format!("Failed to get CRTC properties: {:?}", e)))?;
        let prop_map = props.as_hashmap(self).map_err(|e| {
            Error::DrmError(format!("Failed to convert properties to hashmap: {:?}", e))
        })?;
        let handle = prop_map
            .get("ACTIVE")
            .map(|info| info.handle())
            .ok_or_else(|| Error::Unsupported("CRTC ACTIVE property".to_string()))?;

        let (ids, values) = props.as_props_and_values();
        let active = ids
            .iter()
            .position(|id| *id == handle)
            .and_then(|i| values.get(i))
            .is_some_and(|&value| value != 0);
        Ok((handle, active))
    }

    pub fn crtc_active(&self, crtc_handle: crtc::Handle) -> Result<bool, Error> {
        Ok(self.active_property(crtc_handle)?.1)
    }

    /// Set the CRTC ACTIVE property with an atomic commit
    pub fn set_crtc_active(&self, crtc_handle: crtc::Handle, active: bool) -> Result<(), Error> {
        self.set_client_capability(drm::ClientCapability::Atomic, true)
            .map_err(|e| Error::DrmError(format!("Failed to set atomic capability: {:?}", e)))?;
        let (handle, _) = self.active_property(crtc_handle)?;

        let mut req = atomic::AtomicModeReq::new();
        req.add_property(crtc_handle, handle, property::Value::Boolean(active));

        // ACTIVE changes are a modeset
        self.atomic_commit(AtomicCommitFlags::ALLOW_MODESET, req)
            .map_err(|e| Error::DrmError(format!("Atomic commit failed: {:?}", e)))
    }

    pub fn gamma_size(&self, crtc_handle: crtc::Handle) -> Result<usize, Error> {
        let info = self
            .get_crtc(crtc_handle)
            .map_err(|e| Error::DrmError(format!("Failed to get CRTC info: {:?}", e)))?;
        Ok(info.gamma_length() as usize)
    }

    pub fn set_crtc_gamma(
        &self,
        crtc_handle: crtc::Handle,
        red: &[u16],
        green: &[u16],
        blue: &[u16],
    ) -> Result<(), Error> {
        self.set_gamma(crtc_handle, red, green, blue)
            .map_err(|e| Error::DrmError(format!("Failed to set gamma: {:?}", e)))
    }

    /// Current ramps of a CRTC as `[red, green, blue]`
    pub fn crtc_gamma(&self, crtc_handle: crtc::Handle) -> Result<[Vec<u16>; 3], Error> {
        let size = self.gamma_size(crtc_handle)?;
        let (mut red, mut green, mut blue) = (vec![0; size], vec![0; size], vec![0; size]);
        self.get_gamma(crtc_handle, &mut red, &mut green, &mut blue)
            .map_err(|e| Error::DrmError(format!("Failed to get gamma: {:?}", e)))?;
        Ok([red, green, blue])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sysfs::fixture::Scratch;

    #[test]
    fn drm_device_implements_required_traits() {
        fn assert_device<T: Device>() {}
        fn assert_control_device<T: ControlDevice>() {}

        assert_device::<DrmDevice>();
        assert_control_device::<DrmDevice>();
    }

    #[test]
    fn plain_files_are_not_cards() {
        let dev = Scratch::new("drm-discover");
        dev.file("dri/card0", "");
        dev.file("dri/renderD128", "");
        assert!(discover_cards(dev.path()).is_empty());
    }

    #[test]
    fn missing_card_is_an_invalid_target() {
        let dev = Scratch::new("drm-missing");
        let card = dev.path().join("dri/card7");
        assert!(matches!(
            open_card(dev.path(), Some(&card)),
            Err(Error::TargetInvalid(_))
        ));
    }

    #[test]
    fn no_cards_is_a_drm_error() {
        let dev = Scratch::new("drm-empty");
        assert!(matches!(open_card(dev.path(), None), Err(Error::DrmError(_))));
    }
}
