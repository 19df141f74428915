//! Execution context detection.
//!
//! The native shell exposes a bridge that can report whether the process runs
//! on a native platform. The bridge is optional: its absence is the ordinary
//! web case. Detection happens once at startup and the resulting
//! [`ExecutionContext`] is passed explicitly to the client factory.

use std::fmt;
use std::str::FromStr;

/// Environment variable consulted by [`EnvBridge`]
pub const ENV_PLATFORM: &str = "SNAPVOCAB_PLATFORM";

/// Capability exposed by a native runtime bridge.
pub trait PlatformCapability {
    fn is_native_platform(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionContext {
    Web,
    Native,
}

impl ExecutionContext {
    /// Classify the runtime. A missing bridge and a bridge reporting a
    /// non-native platform both resolve to `Web`.
    pub fn detect(bridge: Option<&dyn PlatformCapability>) -> Self {
        match bridge {
            Some(bridge) if bridge.is_native_platform() => ExecutionContext::Native,
            _ => ExecutionContext::Web,
        }
    }

    pub fn is_native(self) -> bool {
        self == ExecutionContext::Native
    }
}

impl fmt::Display for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionContext::Web => write!(f, "web"),
            ExecutionContext::Native => write!(f, "native"),
        }
    }
}

impl FromStr for ExecutionContext {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "web" => Ok(ExecutionContext::Web),
            "native" => Ok(ExecutionContext::Native),
            other => Err(format!("unknown platform '{}', expected 'web' or 'native'", other)),
        }
    }
}

/// Bridge compiled into mobile builds.
#[derive(Debug, Default, Clone, Copy)]
pub struct TargetBridge;

impl PlatformCapability for TargetBridge {
    fn is_native_platform(&self) -> bool {
        cfg!(any(target_os = "ios", target_os = "android"))
    }
}

/// Bridge reporting whatever `SNAPVOCAB_PLATFORM` says, captured at creation.
#[derive(Debug, Clone, Copy)]
pub struct EnvBridge {
    native: bool,
}

impl EnvBridge {
    /// Returns `None` when the variable is unset, i.e. no bridge is present
    pub fn probe() -> Option<Self> {
        let value = std::env::var(ENV_PLATFORM).ok()?;
        let context = value.parse::<ExecutionContext>().ok()?;
        Some(Self {
            native: context.is_native(),
        })
    }
}

impl PlatformCapability for EnvBridge {
    fn is_native_platform(&self) -> bool {
        self.native
    }
}
