//! Accelerator manager: keeps at most one heavy resource resident.
//!
//! Resources are built lazily from registered factories and cached for the
//! lifetime of the manager. Switching residency offloads the active resource,
//! runs a best-effort memory reclamation pass, and activates the requested
//! one. Every transfer and build happens inside one critical section, so
//! concurrent callers serialize strictly.

use std::collections::HashMap;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::resource::{Resource, ResourceHandle, ResourceType};
use opencine_core::{Error, JobContext, Result};

/// Builds a resource on first use. May be slow.
pub type ResourceFactory = Arc<dyn Fn() -> Result<Resource> + Send + Sync>;

/// Frees device memory after a resource has been offloaded.
pub trait MemoryReclaimer: Send + Sync {
    fn reclaim(&self) -> Result<()>;
}

/// How long a waiting caller blocks before re-checking its job context.
const DEFAULT_WAIT_SLICE: Duration = Duration::from_millis(100);

struct ManagerState {
    factories: HashMap<ResourceType, ResourceFactory>,
    instances: HashMap<ResourceType, Resource>,
    active: Option<ResourceType>,
}

/// Arbitrates the single accelerator between heavy resources.
pub struct AcceleratorManager {
    state: Mutex<ManagerState>,
    reclaimer: Option<Arc<dyn MemoryReclaimer>>,
    wait_slice: Duration,
}

/// Exclusive use of the resident resource.
///
/// The critical section stays held while the lease is alive, so the resource
/// cannot be swapped out mid-generation. Dropping the lease does not change
/// residency; only the next `acquire` of a different type does.
pub struct AcceleratorLease<'a> {
    _guard: MutexGuard<'a, ManagerState>,
    resource: Resource,
}

impl Deref for AcceleratorLease<'_> {
    type Target = Resource;

    fn deref(&self) -> &Resource {
        &self.resource
    }
}

impl AcceleratorManager {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ManagerState {
                factories: HashMap::new(),
                instances: HashMap::new(),
                active: None,
            }),
            reclaimer: None,
            wait_slice: DEFAULT_WAIT_SLICE,
        }
    }

    /// Attach a reclamation hook run after every offload.
    pub fn with_reclaimer(mut self, reclaimer: Arc<dyn MemoryReclaimer>) -> Self {
        self.reclaimer = Some(reclaimer);
        self
    }

    /// Register (or replace) the factory for a resource type.
    pub fn register_factory<F>(&self, kind: ResourceType, factory: F)
    where
        F: Fn() -> Result<Resource> + Send + Sync + 'static,
    {
        info!("Registering resource factory: {}", kind);
        self.state.lock().factories.insert(kind, Arc::new(factory));
    }

    /// Currently resident resource type, if any.
    pub fn active(&self) -> Option<ResourceType> {
        self.state.lock().active
    }

    /// Whether `kind` has been built and cached.
    pub fn is_instantiated(&self, kind: ResourceType) -> bool {
        self.state.lock().instances.contains_key(&kind)
    }

    /// Make `kind` the resident resource and return exclusive use of it.
    ///
    /// Blocks while another caller holds the accelerator, and for as long as
    /// an offload, first-time build or activation takes. Gives up with
    /// `Cancelled`/`DeadlineExceeded` if `ctx` ends while waiting.
    pub fn acquire(&self, kind: ResourceType, ctx: &JobContext) -> Result<AcceleratorLease<'_>> {
        ctx.check()?;
        let mut state = self.lock_state(ctx)?;

        let factory = state
            .factories
            .get(&kind)
            .cloned()
            .ok_or_else(|| Error::UnregisteredResource(kind.to_string()))?;

        if state.active == Some(kind) {
            if let Some(resource) = state.instances.get(&kind).cloned() {
                debug!("Resource {} already resident", kind);
                return Ok(AcceleratorLease {
                    _guard: state,
                    resource,
                });
            }
        }

        if let Some(previous) = state.active {
            if let Some(resident) = state.instances.get(&previous).cloned() {
                info!("Offloading resource {} from accelerator", previous);
                resident.deactivate()?;
            }
            state.active = None;
            self.reclaim_memory();
        }

        ctx.check()?;

        let cached = state.instances.get(&kind).cloned();
        let resource = match cached {
            Some(resource) => resource,
            None => {
                info!("Instantiating resource: {}", kind);
                let resource = factory()?;
                if resource.kind() != kind {
                    return Err(Error::Internal(format!(
                        "factory for {} built a {} resource",
                        kind,
                        resource.kind()
                    )));
                }
                state.instances.insert(kind, resource.clone());
                resource
            }
        };

        info!("Moving resource {} onto accelerator", kind);
        resource.activate()?;
        state.active = Some(kind);

        Ok(AcceleratorLease {
            _guard: state,
            resource,
        })
    }

    fn lock_state(&self, ctx: &JobContext) -> Result<MutexGuard<'_, ManagerState>> {
        loop {
            if let Some(guard) = self.state.try_lock_for(self.wait_slice) {
                return Ok(guard);
            }
            ctx.check()?;
        }
    }

    fn reclaim_memory(&self) {
        if let Some(reclaimer) = &self.reclaimer {
            if let Err(e) = reclaimer.reclaim() {
                warn!("Device memory reclamation failed: {}", e);
            }
        }
    }
}

impl Default for AcceleratorManager {
    fn default() -> Self {
        Self::new()
    }
}
