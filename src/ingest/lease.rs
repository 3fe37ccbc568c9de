//! Process-wide exclusive device leases.
//!
//! A session must hold the lease for its device before opening it. A second
//! acquire on the same device fails immediately instead of sharing access.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, OnceLock};

use crate::PipelineError;

static LEASES: OnceLock<Mutex<HashSet<String>>> = OnceLock::new();

fn leases() -> MutexGuard<'static, HashSet<String>> {
    LEASES
        .get_or_init(|| Mutex::new(HashSet::new()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Exclusive claim on one device id. Released on drop.
#[derive(Debug)]
pub struct DeviceLease {
    device: String,
}

impl DeviceLease {
    pub fn acquire(device: &str) -> Result<Self, PipelineError> {
        if !leases().insert(device.to_string()) {
            return Err(PipelineError::device_unavailable(device, "device busy"));
        }
        log::debug!("device lease acquired: {}", device);
        Ok(Self {
            device: device.to_string(),
        })
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn is_leased(device: &str) -> bool {
        leases().contains(device)
    }
}

impl Drop for DeviceLease {
    fn drop(&mut self) {
        leases().remove(&self.device);
        log::debug!("device lease released: {}", self.device);
    }
}
