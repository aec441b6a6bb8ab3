use log::warn;
use std::path::PathBuf;

/// DDC/CI VCP feature code for luminance
pub const DEFAULT_VCP_CODE: u8 = 0x10;

/// Plugin configuration read once from the process environment
///
/// Variables:
/// - `CLIGHTD_SYSFS_ROOT`: sysfs mount point (default `/sys`)
/// - `CLIGHTD_DEV_ROOT`: device directory (default `/dev`)
/// - `CLIGHTD_BL_VCP`: VCP code for monitor brightness, decimal or `0x` hex
/// - `CLIGHTD_BL_DDC`: `0` disables the DDC/CI backlight backend
/// - `CLIGHTD_GAMMA_BACKEND`, `CLIGHTD_DPMS_BACKEND`: force a backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginEnv {
    pub sysfs_root: PathBuf,
    pub dev_root: PathBuf,
    pub vcp_code: u8,
    pub ddc_enabled: bool,
    pub gamma_backend: Option<String>,
    pub dpms_backend: Option<String>,
}

impl Default for PluginEnv {
    fn default() -> Self {
        Self {
            sysfs_root: PathBuf::from("/sys"),
            dev_root: PathBuf::from("/dev"),
            vcp_code: DEFAULT_VCP_CODE,
            ddc_enabled: true,
            gamma_backend: None,
            dpms_backend: None,
        }
    }
}

/// Parse an unsigned integer written in decimal or `0x` hex
pub fn parse_number(value: &str) -> Option<u32> {
    let value = value.trim();
    match value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
    {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => value.parse().ok(),
    }
}

impl PluginEnv {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup
    ///
    /// Unparseable values are logged and replaced by their default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut env = Self::default();
        let set = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(root) = set("CLIGHTD_SYSFS_ROOT") {
            env.sysfs_root = PathBuf::from(root);
        }
        if let Some(root) = set("CLIGHTD_DEV_ROOT") {
            env.dev_root = PathBuf::from(root);
        }
        if let Some(code) = set("CLIGHTD_BL_VCP") {
            match parse_number(&code).and_then(|c| u8::try_from(c).ok()) {
                Some(code) => env.vcp_code = code,
                None => warn!(
                    "Ignoring CLIGHTD_BL_VCP={:?}, using 0x{:02x}",
                    code, DEFAULT_VCP_CODE
                ),
            }
        }
        if let Some(flag) = set("CLIGHTD_BL_DDC") {
            match flag.trim() {
                "0" => env.ddc_enabled = false,
                "1" => env.ddc_enabled = true,
                other => warn!("Ignoring CLIGHTD_BL_DDC={:?}", other),
            }
        }
        env.gamma_backend = set("CLIGHTD_GAMMA_BACKEND");
        env.dpms_backend = set("CLIGHTD_DPMS_BACKEND");
        env
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> PluginEnv {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        PluginEnv::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        assert_eq!(env_of(&[]), PluginEnv::default());
    }

    #[test]
    fn roots_are_overridable() {
        let env = env_of(&[
            ("CLIGHTD_SYSFS_ROOT", "/tmp/sys"),
            ("CLIGHTD_DEV_ROOT", "/tmp/dev"),
        ]);
        assert_eq!(env.sysfs_root, PathBuf::from("/tmp/sys"));
        assert_eq!(env.dev_root, PathBuf::from("/tmp/dev"));
    }

    #[test]
    fn vcp_code_accepts_decimal_and_hex() {
        assert_eq!(env_of(&[("CLIGHTD_BL_VCP", "0x6B")]).vcp_code, 0x6b);
        assert_eq!(env_of(&[("CLIGHTD_BL_VCP", "16")]).vcp_code, 16);
    }

    #[test]
    fn invalid_vcp_code_falls_back() {
        assert_eq!(
            env_of(&[("CLIGHTD_BL_VCP", "0x1ff")]).vcp_code,
            DEFAULT_VCP_CODE
        );
        assert_eq!(
            env_of(&[("CLIGHTD_BL_VCP", "bright")]).vcp_code,
            DEFAULT_VCP_CODE
        );
    }

    #[test]
    fn ddc_can_be_disabled() {
        assert!(!env_of(&[("CLIGHTD_BL_DDC", "0")]).ddc_enabled);
        assert!(env_of(&[("CLIGHTD_BL_DDC", "yes")]).ddc_enabled);
    }

    #[test]
    fn explicit_backends() {
        let env = env_of(&[("CLIGHTD_GAMMA_BACKEND", "drm"), ("CLIGHTD_DPMS_BACKEND", "")]);
        assert_eq!(env.gamma_backend.as_deref(), Some("drm"));
        assert_eq!(env.dpms_backend, None);
    }

    #[test]
    fn reads_process_environment() {
        // SAFETY: This is a test and we're the only ones modifying this env var
        unsafe {
            std::env::set_var("CLIGHTD_DPMS_BACKEND", "wl");
        }

        let env = PluginEnv::from_env();

        // SAFETY: This is a test and we're the only ones modifying this env var
        unsafe {
            std::env::remove_var("CLIGHTD_DPMS_BACKEND");
        }

        assert_eq!(env.dpms_backend.as_deref(), Some("wl"));
    }

    #[test]
    fn number_parsing() {
        assert_eq!(parse_number("0x10"), Some(16));
        assert_eq!(parse_number(" 42 "), Some(42));
        assert_eq!(parse_number("0xZZ"), None);
        assert_eq!(parse_number("-1"), None);
    }
}
