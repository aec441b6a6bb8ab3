//! Webcam brightness through V4L2
//!
//! A capture opens the device, negotiates a small greyscale (or YUYV)
//! frame, streams `count` frames through a single memory-mapped buffer and
//! reports each frame's mean luma. Controls named in the settings are set
//! for the duration of the capture and restored afterwards.
use super::{SensorPlugin, Settings};
use crate::env::parse_number;
use crate::error::Error;
use crate::hotplug::Uevent;
use crate::plugin::Plugin;
use log::{debug, warn};
use nix::libc;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use nix::sys::mman::{MapFlags, ProtFlags, mmap, munmap};
use std::ffi::c_void;
use std::fs::{File, OpenOptions};
use std::num::NonZeroUsize;
use std::os::fd::{AsFd, AsRawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;

const BUF_TYPE_VIDEO_CAPTURE: u32 = 1;
const MEMORY_MMAP: u32 = 1;
const FIELD_NONE: u32 = 1;
const CAP_VIDEO_CAPTURE: u32 = 0x0000_0001;
const CAP_STREAMING: u32 = 0x0400_0000;
const CAP_DEVICE_CAPS: u32 = 0x8000_0000;

const fn fourcc(code: &[u8; 4]) -> u32 {
    (code[0] as u32) | ((code[1] as u32) << 8) | ((code[2] as u32) << 16) | ((code[3] as u32) << 24)
}

const PIX_FMT_GREY: u32 = fourcc(b"GREY");
const PIX_FMT_YUYV: u32 = fourcc(b"YUYV");

const FRAME_WIDTH: u32 = 160;
const FRAME_HEIGHT: u32 = 120;
const FRAME_TIMEOUT_MS: u16 = 2000;

#[repr(C)]
#[derive(Clone, Copy)]
struct Capability {
    driver: [u8; 16],
    card: [u8; 32],
    bus_info: [u8; 32],
    version: u32,
    capabilities: u32,
    device_caps: u32,
    reserved: [u32; 3],
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
struct PixFormat {
    width: u32,
    height: u32,
    pixelformat: u32,
    field: u32,
    bytesperline: u32,
    sizeimage: u32,
    colorspace: u32,
    priv_: u32,
    flags: u32,
    ycbcr_enc: u32,
    quantization: u32,
    xfer_func: u32,
}

#[repr(C)]
#[derive(Clone, Copy)]
union FormatUnion {
    pix: PixFormat,
    raw: [u64; 25],
}

#[repr(C)]
#[derive(Clone, Copy)]
struct Format {
    type_: u32,
    fmt: FormatUnion,
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
struct RequestBuffers {
    count: u32,
    type_: u32,
    memory: u32,
    capabilities: u32,
    flags: u8,
    reserved: [u8; 3],
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
struct Timecode {
    type_: u32,
    flags: u32,
    frames: u8,
    seconds: u8,
    minutes: u8,
    hours: u8,
    userbits: [u8; 4],
}

#[repr(C)]
#[derive(Clone, Copy)]
union BufferLocation {
    offset: u32,
    userptr: libc::c_ulong,
}

#[repr(C)]
#[derive(Clone, Copy)]
struct Buffer {
    index: u32,
    type_: u32,
    bytesused: u32,
    flags: u32,
    field: u32,
    timestamp: libc::timeval,
    timecode: Timecode,
    sequence: u32,
    memory: u32,
    m: BufferLocation,
    length: u32,
    reserved2: u32,
    request_fd: i32,
}

impl Buffer {
    fn mmap_capture(index: u32) -> Self {
        Self {
            index,
            type_: BUF_TYPE_VIDEO_CAPTURE,
            bytesused: 0,
            flags: 0,
            field: 0,
            timestamp: libc::timeval {
                tv_sec: 0,
                tv_usec: 0,
            },
            timecode: Timecode::default(),
            sequence: 0,
            memory: MEMORY_MMAP,
            m: BufferLocation { userptr: 0 },
            length: 0,
            reserved2: 0,
            request_fd: 0,
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
struct Control {
    id: u32,
    value: i32,
}

mod ioctl {
    use super::{Buffer, Capability, Control, Format, RequestBuffers};
    use nix::libc;

    nix::ioctl_read!(querycap, b'V', 0, Capability);
    nix::ioctl_readwrite!(s_fmt, b'V', 5, Format);
    nix::ioctl_readwrite!(reqbufs, b'V', 8, RequestBuffers);
    nix::ioctl_readwrite!(querybuf, b'V', 9, Buffer);
    nix::ioctl_readwrite!(qbuf, b'V', 15, Buffer);
    nix::ioctl_readwrite!(dqbuf, b'V', 17, Buffer);
    nix::ioctl_write_ptr!(streamon, b'V', 18, libc::c_int);
    nix::ioctl_write_ptr!(streamoff, b'V', 19, libc::c_int);
    nix::ioctl_readwrite!(g_ctrl, b'V', 27, Control);
    nix::ioctl_readwrite!(s_ctrl, b'V', 28, Control);
}

fn video_err(what: &str, node: &str, e: nix::Error) -> Error {
    Error::Video(format!("{} on {}: {}", what, node, e))
}

/// Mean luma of a frame in `0.0..=1.0`
///
/// GREY frames are all luma; YUYV interleaves luma with chroma, every
/// other byte.
pub fn mean_luma(frame: &[u8], pixelformat: u32) -> f64 {
    let stride = if pixelformat == PIX_FMT_YUYV { 2 } else { 1 };
    let (sum, n) = frame
        .iter()
        .step_by(stride)
        .fold((0u64, 0u64), |(sum, n), &y| (sum + u64::from(y), n + 1));
    if n == 0 {
        return 0.0;
    }
    sum as f64 / n as f64 / 255.0
}

/// Control overrides from settings: keys are V4L2 control ids
fn control_overrides(settings: &Settings) -> Result<Vec<Control>, Error> {
    settings
        .iter()
        .map(|(key, value)| {
            let id = parse_number(key)
                .ok_or_else(|| Error::InvalidArgument(format!("control id {:?}", key)))?;
            let value = value
                .parse::<i32>()
                .map_err(|_| Error::InvalidArgument(format!("control value {:?}", value)))?;
            Ok(Control { id, value })
        })
        .collect()
}

/// One memory-mapped capture buffer, unmapped on drop
struct Mapping {
    ptr: NonNull<c_void>,
    len: usize,
}

impl Mapping {
    fn bytes(&self, used: usize) -> &[u8] {
        // SAFETY: `ptr` maps `len` readable bytes for the life of `self`
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr().cast::<u8>(), used.min(self.len)) }
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        // SAFETY: the mapping was created by mmap with this length
        if let Err(e) = unsafe { munmap(self.ptr, self.len) } {
            warn!("munmap failed: {}", e);
        }
    }
}

struct Camera {
    node: String,
    file: File,
}

impl Camera {
    fn open(node: &str) -> Result<Self, Error> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(node)
            .map_err(|e| Error::DeviceNotFound(format!("{}: {}", node, e)))?;
        Ok(Self {
            node: node.to_string(),
            file,
        })
    }

    fn fd(&self) -> libc::c_int {
        self.file.as_raw_fd()
    }

    fn is_capture_device(&self) -> bool {
        // SAFETY: all-zero is a valid `Capability`
        let mut cap: Capability = unsafe { std::mem::zeroed() };
        // SAFETY: `cap` matches the kernel's v4l2_capability layout
        if unsafe { ioctl::querycap(self.fd(), &mut cap) }.is_err() {
            return false;
        }
        let caps = if cap.capabilities & CAP_DEVICE_CAPS != 0 {
            cap.device_caps
        } else {
            cap.capabilities
        };
        caps & CAP_VIDEO_CAPTURE != 0 && caps & CAP_STREAMING != 0
    }

    /// Ask for a small GREY frame, then YUYV; returns the accepted format
    fn negotiate(&self) -> Result<PixFormat, Error> {
        for pixelformat in [PIX_FMT_GREY, PIX_FMT_YUYV] {
            let mut format = Format {
                type_: BUF_TYPE_VIDEO_CAPTURE,
                fmt: FormatUnion { raw: [0; 25] },
            };
            format.fmt.pix = PixFormat {
                width: FRAME_WIDTH,
                height: FRAME_HEIGHT,
                pixelformat,
                field: FIELD_NONE,
                ..PixFormat::default()
            };
            // SAFETY: `format` matches the kernel's v4l2_format layout
            unsafe { ioctl::s_fmt(self.fd(), &mut format) }
                .map_err(|e| video_err("VIDIOC_S_FMT", &self.node, e))?;
            // SAFETY: the driver filled in the pix member for a capture type
            let accepted = unsafe { format.fmt.pix };
            if accepted.pixelformat == PIX_FMT_GREY || accepted.pixelformat == PIX_FMT_YUYV {
                return Ok(accepted);
            }
        }
        Err(Error::Unsupported(format!(
            "{}: neither GREY nor YUYV frames",
            self.node
        )))
    }

    /// Apply overrides and return the values they replaced
    fn apply_controls(&self, overrides: &[Control]) -> Vec<Control> {
        let mut saved = Vec::with_capacity(overrides.len());
        for wanted in overrides {
            let mut current = Control {
                id: wanted.id,
                value: 0,
            };
            // SAFETY: `Control` matches the kernel's v4l2_control layout
            if let Err(e) = unsafe { ioctl::g_ctrl(self.fd(), &mut current) } {
                warn!("{}: control 0x{:x} unavailable: {}", self.node, wanted.id, e);
                continue;
            }
            let mut next = *wanted;
            // SAFETY: as above
            match unsafe { ioctl::s_ctrl(self.fd(), &mut next) } {
                Ok(_) => saved.push(current),
                Err(e) => warn!("{}: cannot set control 0x{:x}: {}", self.node, wanted.id, e),
            }
        }
        saved
    }

    fn restore_controls(&self, saved: &[Control]) {
        for control in saved {
            let mut control = *control;
            // SAFETY: `Control` matches the kernel's v4l2_control layout
            if let Err(e) = unsafe { ioctl::s_ctrl(self.fd(), &mut control) } {
                warn!("{}: cannot restore control 0x{:x}: {}", self.node, control.id, e);
            }
        }
    }

    fn map_buffer(&self) -> Result<Mapping, Error> {
        let mut request = RequestBuffers {
            count: 1,
            type_: BUF_TYPE_VIDEO_CAPTURE,
            memory: MEMORY_MMAP,
            ..RequestBuffers::default()
        };
        // SAFETY: `request` matches the kernel's v4l2_requestbuffers layout
        unsafe { ioctl::reqbufs(self.fd(), &mut request) }
            .map_err(|e| video_err("VIDIOC_REQBUFS", &self.node, e))?;
        if request.count == 0 {
            return Err(Error::ResourceExhausted(format!(
                "{}: no capture buffers",
                self.node
            )));
        }

        let mut buffer = Buffer::mmap_capture(0);
        // SAFETY: `buffer` matches the kernel's v4l2_buffer layout
        unsafe { ioctl::querybuf(self.fd(), &mut buffer) }
            .map_err(|e| video_err("VIDIOC_QUERYBUF", &self.node, e))?;

        let len = NonZeroUsize::new(buffer.length as usize)
            .ok_or_else(|| Error::Video(format!("{}: zero-length buffer", self.node)))?;
        // SAFETY: the driver filled `m.offset` for an MMAP buffer
        let offset = unsafe { buffer.m.offset };
        // SAFETY: mapping a driver buffer at the offset it reported
        let ptr = unsafe {
            mmap(
                None,
                len,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
                self.file.as_fd(),
                libc::off_t::from(offset),
            )
        }
        .map_err(|e| video_err("mmap", &self.node, e))?;
        Ok(Mapping {
            ptr,
            len: len.get(),
        })
    }

    fn queue(&self) -> Result<(), Error> {
        let mut buffer = Buffer::mmap_capture(0);
        // SAFETY: `buffer` matches the kernel's v4l2_buffer layout
        unsafe { ioctl::qbuf(self.fd(), &mut buffer) }
            .map(drop)
            .map_err(|e| video_err("VIDIOC_QBUF", &self.node, e))
    }

    /// Wait for the next frame and return its used length
    fn dequeue(&self) -> Result<usize, Error> {
        let mut fds = [PollFd::new(self.file.as_fd(), PollFlags::POLLIN)];
        let ready = poll(&mut fds, PollTimeout::from(FRAME_TIMEOUT_MS))
            .map_err(|e| video_err("poll", &self.node, e))?;
        if ready == 0 {
            return Err(Error::Video(format!("{}: frame timeout", self.node)));
        }
        let mut buffer = Buffer::mmap_capture(0);
        // SAFETY: `buffer` matches the kernel's v4l2_buffer layout
        unsafe { ioctl::dqbuf(self.fd(), &mut buffer) }
            .map_err(|e| video_err("VIDIOC_DQBUF", &self.node, e))?;
        Ok(buffer.bytesused as usize)
    }

    fn stream(&self, format: &PixFormat, count: usize) -> Result<Vec<f64>, Error> {
        let mapping = self.map_buffer()?;
        let kind: libc::c_int = BUF_TYPE_VIDEO_CAPTURE as libc::c_int;

        self.queue()?;
        // SAFETY: STREAMON takes a pointer to the buffer type
        unsafe { ioctl::streamon(self.fd(), &kind) }
            .map_err(|e| video_err("VIDIOC_STREAMON", &self.node, e))?;

        let mut values = Vec::with_capacity(count);
        let result = (|| {
            for _ in 0..count {
                let used = self.dequeue()?;
                values.push(mean_luma(mapping.bytes(used), format.pixelformat));
                self.queue()?;
            }
            Ok(())
        })();

        // SAFETY: as for STREAMON
        if let Err(e) = unsafe { ioctl::streamoff(self.fd(), &kind) } {
            warn!("{}: VIDIOC_STREAMOFF failed: {}", self.node, e);
        }
        drop(mapping);
        result.map(|()| values)
    }
}

pub struct Webcam {
    dev_root: PathBuf,
}

impl Webcam {
    pub fn new(dev_root: &Path) -> Self {
        Self {
            dev_root: dev_root.to_path_buf(),
        }
    }

    fn candidates(&self) -> Vec<PathBuf> {
        crate::sysfs::list(&self.dev_root)
            .into_iter()
            .filter(|p| crate::sysfs::name_of(p).is_some_and(|n| n.starts_with("video")))
            .collect()
    }
}

impl Plugin for Webcam {
    fn name(&self) -> &'static str {
        "Webcam"
    }
}

impl SensorPlugin for Webcam {
    fn subsystem(&self) -> &'static str {
        "video4linux"
    }

    fn locate(&mut self, interface: &str) -> Result<String, Error> {
        let wanted = Path::new(interface).file_name();
        self.candidates()
            .into_iter()
            .filter(|p| interface.is_empty() || p.file_name() == wanted)
            .map(|p| p.display().to_string())
            .find(|node| Camera::open(node).is_ok_and(|cam| cam.is_capture_device()))
            .ok_or(Error::BackendMismatch("Webcam"))
    }

    fn capture(
        &mut self,
        node: &str,
        count: usize,
        settings: &Settings,
    ) -> Result<Vec<f64>, Error> {
        let overrides = control_overrides(settings)?;
        let camera = Camera::open(node)?;
        let format = camera.negotiate()?;
        debug!(
            "{}: {}x{} frames",
            node, format.width, format.height
        );

        let saved = camera.apply_controls(&overrides);
        let result = camera.stream(&format, count);
        camera.restore_controls(&saved);
        result
    }

    fn node_of(&self, event: &Uevent) -> Option<String> {
        if !event.sysname.starts_with("video") {
            return None;
        }
        let node = event
            .devnode
            .clone()
            .unwrap_or_else(|| self.dev_root.join(&event.sysname));
        Some(node.display().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hotplug::Action;

    #[test]
    fn structures_match_kernel_layout() {
        assert_eq!(std::mem::size_of::<Capability>(), 104);
        assert_eq!(std::mem::size_of::<PixFormat>(), 48);
        assert_eq!(std::mem::size_of::<Format>(), 208);
        assert_eq!(std::mem::size_of::<RequestBuffers>(), 20);
        assert_eq!(std::mem::size_of::<Control>(), 8);
        #[cfg(target_pointer_width = "64")]
        assert_eq!(std::mem::size_of::<Buffer>(), 88);
    }

    #[test]
    fn fourcc_codes() {
        assert_eq!(PIX_FMT_GREY, 0x5945_5247);
        assert_eq!(PIX_FMT_YUYV, 0x5659_5559);
    }

    #[test]
    fn luma_of_grey_and_yuyv_frames() {
        assert_eq!(mean_luma(&[255, 255, 0, 0], PIX_FMT_GREY), 0.5);
        // Y U Y V: only the Y bytes count
        assert_eq!(mean_luma(&[255, 0, 255, 0], PIX_FMT_YUYV), 1.0);
        assert_eq!(mean_luma(&[], PIX_FMT_GREY), 0.0);
    }

    #[test]
    fn control_overrides_accept_hex_ids() {
        let settings = Settings::parse("0x00980900=128,9963776=-5").unwrap();
        let controls = control_overrides(&settings).unwrap();
        assert_eq!(controls.len(), 2);
        assert_eq!(controls[0].id, 0x0098_0900);
        assert_eq!(controls[0].value, 128);
        assert_eq!(controls[1].id, 9_963_776);
        assert_eq!(controls[1].value, -5);

        let bad = Settings::parse("brightness=1").unwrap();
        assert!(control_overrides(&bad).is_err());
    }

    #[test]
    fn hotplug_nodes_prefer_devnode() {
        let webcam = Webcam::new(Path::new("/dev"));
        let event = Uevent::new(
            Action::Add,
            "video4linux",
            "/sys/devices/pci0000:00/video4linux/video2",
        );
        assert_eq!(webcam.node_of(&event).as_deref(), Some("/dev/video2"));

        let event = event.with_devnode("/dev/v4l/video2");
        assert_eq!(webcam.node_of(&event).as_deref(), Some("/dev/v4l/video2"));

        let other = Uevent::new(Action::Add, "video4linux", "/sys/devices/v4l-subdev0");
        assert_eq!(webcam.node_of(&other), None);
    }

    #[test]
    fn missing_device_is_not_found() {
        assert!(matches!(
            Camera::open("/nonexistent/video0"),
            Err(Error::DeviceNotFound(_))
        ));
    }
}
