//! Connect orchestration: find the block device a fabric connect created.
//!
//! The fabric subsystem gives user space no handle on the device a connect
//! produces, so the device is identified by diffing the fabric device
//! listing taken before the connect against the one taken after it:
//!
//! 1. take the host lock,
//! 2. `before = list`,
//! 3. connect,
//! 4. `after = list`, `new = after - before`,
//! 5. exactly one new device is the answer; more than one is ambiguous;
//!    none means the kernel has not published it yet, so list again with
//!    backoff until the discovery policy runs out.

use std::path::PathBuf;
use std::thread;

use tracing::{debug, info, instrument, warn};

use crate::config::DiscoveryPolicy;
use crate::error::NvmeofError;
use crate::fabric::enumerator::DeviceEnumerator;
use crate::fabric::lock::HostLock;
use crate::fabric::session::FabricSessionManager;
use crate::types::{AttachState, FabricDevice, VolumeDescriptor};

/// Combines the enumerator and the session manager into `attach`.
#[derive(Clone)]
pub struct Connector {
    enumerator: DeviceEnumerator,
    sessions: FabricSessionManager,
    lock_file: PathBuf,
    policy: DiscoveryPolicy,
}

impl Connector {
    pub fn new(
        enumerator: DeviceEnumerator,
        sessions: FabricSessionManager,
        lock_file: impl Into<PathBuf>,
        policy: DiscoveryPolicy,
    ) -> Self {
        Self {
            enumerator,
            sessions,
            lock_file: lock_file.into(),
            policy,
        }
    }

    pub fn sessions(&self) -> &FabricSessionManager {
        &self.sessions
    }

    pub fn enumerator(&self) -> &DeviceEnumerator {
        &self.enumerator
    }

    /// Take the host-wide attach lock.
    ///
    /// Callers that must check host state before attaching hold this across
    /// the check and [`Self::attach_observed`].
    pub fn lock(&self) -> Result<HostLock, NvmeofError> {
        HostLock::acquire(&self.lock_file)
    }

    /// Connect to the target in `descriptor` and return the single device
    /// that appeared as a result.
    pub fn attach(&self, descriptor: &VolumeDescriptor) -> Result<FabricDevice, NvmeofError> {
        let guard = self.lock()?;
        self.attach_observed(&guard, descriptor, |_| {})
    }

    /// [`Self::attach`] under a lock the caller already holds, calling
    /// `observe` when the connect has gone through and discovery starts.
    #[instrument(skip_all, fields(volume = %descriptor.volume_name()))]
    pub fn attach_observed<F>(
        &self,
        _guard: &HostLock,
        descriptor: &VolumeDescriptor,
        mut observe: F,
    ) -> Result<FabricDevice, NvmeofError>
    where
        F: FnMut(AttachState),
    {
        let before = self.enumerator.list_fabric_devices()?;
        self.sessions.connect(descriptor)?;
        observe(AttachState::Discovering);

        let attempts = self.policy.attempts.max(1);
        for attempt in 0..attempts {
            let delay = self.policy.delay_before(attempt);
            if !delay.is_zero() {
                debug!(attempt, ?delay, "new device not visible yet, listing again");
                thread::sleep(delay);
            }

            let after = self.enumerator.list_fabric_devices()?;
            let mut new = after.difference(&before);
            match new.len() {
                1 => {
                    let device = new.remove(0);
                    info!(device = %device, "discovered newly attached device");
                    return Ok(device);
                }
                0 => continue,
                _ => {
                    let candidates: Vec<String> = new.into_iter().map(|d| d.id).collect();
                    warn!(?candidates, "more than one device appeared during connect");
                    return Err(NvmeofError::Discovery {
                        reason: "more than one new device appeared".to_owned(),
                        candidates,
                    });
                }
            }
        }

        Err(NvmeofError::Discovery {
            reason: format!("no new device after {attempts} listing(s)"),
            candidates: Vec::new(),
        })
    }
}
