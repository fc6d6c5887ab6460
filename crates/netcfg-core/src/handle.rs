use crate::subsystem::{ConfigSubsystem, LockAcquireError, SubsystemError};
use crate::NetCfgError;
use std::time::Duration;
use tracing::{debug, warn};

/// An open, optionally write-locked session on the configuration store.
///
/// Created by [`open`](Self::open), torn down by [`close`](Self::close). A
/// handle that is dropped without being closed is closed from `Drop`, so the
/// lock and the subsystem runtime are released on every exit path.
pub struct ConfigStoreHandle<S: ConfigSubsystem> {
    subsystem: S,
    has_write_lock: bool,
    lock_holder_name: Option<String>,
    open: bool,
}

/// Releases a staged acquisition on drop unless disarmed.
struct Staged<'a, S: ConfigSubsystem> {
    subsystem: &'a S,
    release: fn(&S),
    armed: bool,
}

impl<'a, S: ConfigSubsystem> Staged<'a, S> {
    fn new(subsystem: &'a S, release: fn(&S)) -> Self {
        Self {
            subsystem,
            release,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl<S: ConfigSubsystem> Drop for Staged<'_, S> {
    fn drop(&mut self) {
        if self.armed {
            (self.release)(self.subsystem);
        }
    }
}

fn release_lock_staged<S: ConfigSubsystem>(subsystem: &S) {
    debug!("releasing write lock after failed open");
    if let Err(e) = subsystem.release_write_lock() {
        warn!("failed to release write lock after failed open: {e}");
    }
}

fn disconnect_staged<S: ConfigSubsystem>(subsystem: &S) {
    subsystem.disconnect();
}

impl<S: ConfigSubsystem> ConfigStoreHandle<S> {
    /// Connect `subsystem`, take the write lock under `app_name` if requested,
    /// and initialize the store.
    ///
    /// The lock is taken before initialization; if initialization then fails
    /// the lock is released before returning. Any failure disconnects the
    /// subsystem again.
    pub fn open(
        subsystem: S,
        request_write_lock: bool,
        app_name: &str,
        timeout: Duration,
    ) -> Result<Self, NetCfgError> {
        subsystem.connect().map_err(NetCfgError::StoreInitFailed)?;
        let connected = Staged::new(&subsystem, disconnect_staged::<S>);

        let locked = if request_write_lock {
            debug!("acquiring write lock as '{app_name}' (timeout {timeout:?})");
            match subsystem.acquire_write_lock(timeout, app_name) {
                Ok(()) => Some(Staged::new(&subsystem, release_lock_staged::<S>)),
                Err(LockAcquireError::Contended { holder }) => {
                    debug!(
                        "write lock held by {}",
                        holder.as_deref().unwrap_or("unknown")
                    );
                    return Err(NetCfgError::LockContention { holder });
                }
                Err(LockAcquireError::Failed(e)) => return Err(NetCfgError::StoreInitFailed(e)),
            }
        } else {
            None
        };

        subsystem
            .initialize()
            .map_err(NetCfgError::StoreInitFailed)?;

        let has_write_lock = locked.map(Staged::disarm).is_some();
        connected.disarm();
        debug!("configuration store open (write lock: {has_write_lock})");

        Ok(Self {
            subsystem,
            has_write_lock,
            lock_holder_name: has_write_lock.then(|| app_name.to_owned()),
            open: true,
        })
    }

    pub fn subsystem(&self) -> &S {
        &self.subsystem
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn has_write_lock(&self) -> bool {
        self.has_write_lock
    }

    /// Name the write lock was taken under, when this session holds it.
    pub fn lock_holder_name(&self) -> Option<&str> {
        self.lock_holder_name.as_deref()
    }

    /// Uninitialize the store, then release the write lock if held, then
    /// disconnect. Every step runs even if an earlier one failed; the first
    /// error is returned.
    pub fn close(mut self) -> Result<(), SubsystemError> {
        self.teardown()
    }

    fn teardown(&mut self) -> Result<(), SubsystemError> {
        if !self.open {
            return Ok(());
        }
        self.open = false;

        let mut first_err = None;
        if let Err(e) = self.subsystem.uninitialize() {
            warn!("store uninitialize failed: {e}");
            first_err = Some(e);
        }
        if self.has_write_lock {
            if let Err(e) = self.subsystem.release_write_lock() {
                warn!("write lock release failed: {e}");
                first_err.get_or_insert(e);
            }
            self.has_write_lock = false;
            self.lock_holder_name = None;
        }
        self.subsystem.disconnect();
        debug!("configuration store closed");

        first_err.map_or(Ok(()), Err)
    }
}

impl<S: ConfigSubsystem> Drop for ConfigStoreHandle<S> {
    fn drop(&mut self) {
        if self.open {
            warn!("configuration store handle dropped while open; closing");
            let _ = self.teardown();
        }
    }
}
