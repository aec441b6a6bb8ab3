#![allow(clippy::enum_variant_names)]
/// Exit codes for the clightd binary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    /// Daemon exited cleanly
    Success = 0,
    /// Runtime error occurred
    Error = 1,
    /// Invalid command-line usage (reserved for clap)
    Usage = 2,
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> i32 {
        code as i32
    }
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> std::process::ExitCode {
        std::process::ExitCode::from(code as u8)
    }
}

/// Error types for clightd
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Permission denied")]
    PermissionDenied,

    #[error("No {0} backend available for this target")]
    NoBackend(&'static str),

    #[error("Backend '{0}' does not serve this target")]
    BackendMismatch(&'static str),

    #[error("Compositor does not support the {0} protocol")]
    ProtocolNotSupported(&'static str),

    #[error("Invalid target: {0}")]
    TargetInvalid(String),

    #[error("Device '{0}' not found")]
    DeviceNotFound(String),

    #[error("Unknown backend '{0}'")]
    UnknownBackend(String),

    #[error("Operation not supported: {0}")]
    Unsupported(String),

    #[error("Operation failed on {} of {total} devices: {}", failed.len(), failed.join(", "))]
    PartialFailure { failed: Vec<String>, total: usize },

    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("DRM operation failed: {0}")]
    DrmError(String),

    #[error("libseat operation failed: {0}")]
    SeatError(String),

    #[error("Wayland error: {0}")]
    Wayland(String),

    #[error("X11 error: {0}")]
    X11(String),

    #[error("DDC/CI error: {0}")]
    Ddc(String),

    #[error("V4L2 error: {0}")]
    Video(String),

    #[error("Bus error: {0}")]
    Bus(String),

    #[error("Signal operation failed: {0}")]
    SignalError(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<nix::Error> for Error {
    fn from(errno: nix::Error) -> Self {
        match errno {
            nix::Error::ENOMEM | nix::Error::EMFILE | nix::Error::ENFILE => {
                Error::ResourceExhausted(errno.desc().to_string())
            }
            other => Error::Io(std::io::Error::from(other)),
        }
    }
}

impl From<x11rb::errors::ConnectionError> for Error {
    fn from(e: x11rb::errors::ConnectionError) -> Self {
        Error::X11(e.to_string())
    }
}

impl From<x11rb::errors::ReplyError> for Error {
    fn from(e: x11rb::errors::ReplyError) -> Self {
        Error::X11(e.to_string())
    }
}

impl From<zbus::Error> for Error {
    fn from(e: zbus::Error) -> Self {
        Error::Bus(e.to_string())
    }
}

impl Error {
    /// Get the appropriate exit code for this error
    pub fn exit_code(&self) -> ExitCode {
        ExitCode::Error
    }

    /// Whether a capability resolver should move on to the next backend
    ///
    /// Only "this backend does not serve the target" and "the compositor
    /// lacks the protocol" are misses. Everything else ends the probe.
    pub fn is_probe_miss(&self) -> bool {
        matches!(
            self,
            Error::BackendMismatch(_) | Error::ProtocolNotSupported(_)
        )
    }

    /// Whether a cached backend handle is suspect after this error
    ///
    /// Caller mistakes and unsupported operations leave the handle usable;
    /// anything the hardware or display server reported does not.
    pub fn invalidates_handle(&self) -> bool {
        !matches!(
            self,
            Error::InvalidArgument(_)
                | Error::Unsupported(_)
                | Error::PermissionDenied
                | Error::PartialFailure { .. }
        )
    }

    /// D-Bus error name reported to bus callers
    pub fn bus_name(&self) -> &'static str {
        match self {
            Error::InvalidArgument(_) | Error::UnknownBackend(_) => {
                "org.freedesktop.DBus.Error.InvalidArgs"
            }
            Error::PermissionDenied => "org.freedesktop.DBus.Error.AccessDenied",
            Error::NoBackend(_)
            | Error::BackendMismatch(_)
            | Error::ProtocolNotSupported(_)
            | Error::Unsupported(_) => "org.freedesktop.DBus.Error.NotSupported",
            Error::DeviceNotFound(_) | Error::TargetInvalid(_) => {
                "org.freedesktop.DBus.Error.UnknownObject"
            }
            Error::ResourceExhausted(_) => "org.freedesktop.DBus.Error.NoMemory",
            _ => "org.freedesktop.DBus.Error.Failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_variants() -> Vec<Error> {
        vec![
            Error::InvalidArgument("fraction".to_string()),
            Error::PermissionDenied,
            Error::NoBackend("gamma"),
            Error::BackendMismatch("Xorg"),
            Error::ProtocolNotSupported("wlr-gamma-control"),
            Error::TargetInvalid(":0".to_string()),
            Error::DeviceNotFound("intel_backlight".to_string()),
            Error::UnknownBackend("foo".to_string()),
            Error::Unsupported("DPMS timeouts".to_string()),
            Error::PartialFailure {
                failed: vec!["a".to_string()],
                total: 2,
            },
            Error::ResourceExhausted("test".to_string()),
            Error::DrmError("test".to_string()),
            Error::SeatError("test".to_string()),
            Error::Wayland("test".to_string()),
            Error::X11("test".to_string()),
            Error::Ddc("test".to_string()),
            Error::Video("test".to_string()),
            Error::Bus("test".to_string()),
            Error::SignalError("test".to_string()),
            Error::Io(std::io::Error::other("test")),
        ]
    }

    #[test]
    fn exit_code_values() {
        assert_eq!(ExitCode::Success as i32, 0);
        assert_eq!(ExitCode::Error as i32, 1);
        assert_eq!(ExitCode::Usage as i32, 2);
    }

    #[test]
    fn exit_code_from_conversion() {
        assert_eq!(i32::from(ExitCode::Success), 0);
        assert_eq!(i32::from(ExitCode::Error), 1);
        assert_eq!(i32::from(ExitCode::Usage), 2);
    }

    #[test]
    fn all_errors_return_error_exit_code() {
        for error in all_variants() {
            assert_eq!(
                error.exit_code(),
                ExitCode::Error,
                "Error variant {:?} should return ExitCode::Error",
                error
            );
        }
    }

    #[test]
    fn error_messages_are_non_empty() {
        for error in all_variants() {
            assert!(
                !error.to_string().is_empty(),
                "Error variant {:?} should have a non-empty message",
                error
            );
        }
    }

    #[test]
    fn only_mismatch_and_protocol_are_probe_misses() {
        for error in all_variants() {
            let expected = matches!(
                error,
                Error::BackendMismatch(_) | Error::ProtocolNotSupported(_)
            );
            assert_eq!(error.is_probe_miss(), expected, "{:?}", error);
        }
    }

    #[test]
    fn caller_errors_keep_cached_handles() {
        assert!(!Error::InvalidArgument("level".into()).invalidates_handle());
        assert!(!Error::Unsupported("DPMS timeouts".into()).invalidates_handle());
        assert!(Error::X11("connection reset".into()).invalidates_handle());
        assert!(Error::Wayland("broken pipe".into()).invalidates_handle());
    }

    #[test]
    fn permission_denied_message_is_opaque() {
        let error = Error::PermissionDenied;
        assert_eq!(error.to_string(), "Permission denied");
        assert_eq!(error.bus_name(), "org.freedesktop.DBus.Error.AccessDenied");
    }

    #[test]
    fn partial_failure_message_lists_devices() {
        let error = Error::PartialFailure {
            failed: vec!["acpi_video0".to_string(), "i2c-4".to_string()],
            total: 3,
        };
        let message = error.to_string();
        assert!(message.contains("2 of 3"));
        assert!(message.contains("acpi_video0"));
        assert!(message.contains("i2c-4"));
    }

    #[test]
    fn nix_resource_errors_map_to_exhaustion() {
        assert!(matches!(
            Error::from(nix::Error::EMFILE),
            Error::ResourceExhausted(_)
        ));
        assert!(matches!(Error::from(nix::Error::EIO), Error::Io(_)));
    }
}
