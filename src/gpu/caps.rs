use crate::foundation::error::{OitError, OitResult};
use crate::oit::OitMethod;

/// Device capabilities the engine depends on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DeviceCaps {
    /// Per-pixel mutual exclusion for fragment invocations (fragment shader interlock).
    pub pixel_interlock: bool,
    /// Largest single storage buffer the device accepts.
    pub max_storage_buffer_bytes: u64,
}

impl DeviceCaps {
    /// Capabilities of the host emulation: interlock available, 2 GiB buffers.
    pub fn host() -> Self {
        Self {
            pixel_interlock: true,
            max_storage_buffer_bytes: 2 << 30,
        }
    }

    pub fn without_pixel_interlock(self) -> Self {
        Self {
            pixel_interlock: false,
            ..self
        }
    }

    pub fn with_max_storage_buffer_bytes(self, bytes: u64) -> Self {
        Self {
            max_storage_buffer_bytes: bytes,
            ..self
        }
    }

    /// Fail when `method` needs pixel interlock and the device has none.
    pub fn check(&self, method: OitMethod) -> OitResult<()> {
        if method.requires_pixel_interlock() && !self.pixel_interlock {
            return Err(OitError::missing_capability(format!(
                "{} requires per-pixel fragment interlock",
                method.name()
            )));
        }
        Ok(())
    }
}

impl Default for DeviceCaps {
    fn default() -> Self {
        Self::host()
    }
}
