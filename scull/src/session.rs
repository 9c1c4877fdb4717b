//! Open sessions
//!
//! A session binds one caller to one device through the controller that
//! admitted it. It keeps its own cursor; reads and writes go to the
//! device's quantum store under the device lock.
//!
//! # Block-granular access
//!
//! A single [`Session::read`] or [`Session::write`] never crosses a block
//! boundary, so both may transfer fewer bytes than asked for. Callers loop
//! (see [`Session::write_all`]). A read returning 0 before the end of the
//! device means a hole: no data was ever written there.
//!
//! # Cancellation
//!
//! Every lock wait of a session can be cancelled through the token passed
//! in the [`OpenRequest`]; the interrupted operation fails with
//! `Interrupted` and has no effect.

use std::fmt;
use std::io::SeekFrom;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::access::{AccessMode, Caller, Controller};
use crate::config::{ConfigField, Geometry};
use crate::device::Device;
use crate::error::{Result, ScullError};
use crate::idgen::SessionId;

/// Everything needed to open a device
#[derive(Debug, Clone)]
pub struct OpenRequest {
    pub access: AccessMode,
    pub caller: Caller,
    /// Cancels the open and, later, any lock wait of the session
    pub cancel: CancellationToken,
}

impl OpenRequest {
    #[must_use]
    pub fn new(access: AccessMode, caller: Caller) -> Self {
        Self {
            access,
            caller,
            cancel: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

pub struct Session {
    id: SessionId,
    device_id: String,
    access: AccessMode,
    caller: Caller,
    controller: Arc<Controller>,
    device: Arc<Device>,
    cancel: CancellationToken,
    pos: u64,
    closed: bool,
}

impl Session {
    /// Wrap an admission granted by `controller`
    ///
    /// The session releases the admission when closed or dropped.
    pub(crate) fn new(
        id: SessionId,
        device_id: &str,
        controller: Arc<Controller>,
        device: Arc<Device>,
        request: OpenRequest,
    ) -> Self {
        Self {
            id,
            device_id: device_id.to_string(),
            access: request.access,
            caller: request.caller,
            controller,
            device,
            cancel: request.cancel,
            pos: 0,
            closed: false,
        }
    }

    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Identifier the session was opened with
    #[must_use]
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    #[must_use]
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    #[must_use]
    pub fn access(&self) -> AccessMode {
        self.access
    }

    #[must_use]
    pub fn caller(&self) -> &Caller {
        &self.caller
    }

    /// Current cursor position
    #[must_use]
    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Token that interrupts this session's lock waits
    #[must_use]
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Read at the cursor and advance it
    ///
    /// Returns 0 at or past the end of the data and inside a hole.
    ///
    /// # Errors
    ///
    /// `Interrupted` if the lock wait is cancelled, `OutOfMemory` if a set
    /// on the way cannot be allocated.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        // No device can hold data that far out
        let Ok(pos) = usize::try_from(self.pos) else {
            return Ok(0);
        };
        let n = self.device.lock(&self.cancel).await?.read(pos, buf)?;
        self.pos += n as u64;
        trace!(session = %self.id, pos, requested = buf.len(), read = n, "read");
        Ok(n)
    }

    /// Write at the cursor and advance it
    ///
    /// Returns the number of bytes written, which may be less than
    /// `data.len()` at a block boundary.
    ///
    /// # Errors
    ///
    /// `Interrupted` if the lock wait is cancelled, `OutOfMemory` if an
    /// allocation fails (the size is then unchanged), `InvalidArgument` if
    /// the position is beyond the address space.
    pub async fn write(&mut self, data: &[u8]) -> Result<usize> {
        let pos = usize::try_from(self.pos)
            .map_err(|_| ScullError::InvalidArgument(format!("position {} too large", self.pos)))?;
        let n = self.device.lock(&self.cancel).await?.write(pos, data)?;
        self.pos += n as u64;
        trace!(session = %self.id, pos, requested = data.len(), written = n, "write");
        Ok(n)
    }

    /// Write all of `data`, one block at a time
    ///
    /// # Errors
    ///
    /// As [`Session::write`]; the bytes written before the failure stay
    /// written and the cursor points past them.
    pub async fn write_all(&mut self, mut data: &[u8]) -> Result<()> {
        while !data.is_empty() {
            let n = self.write(data).await?;
            data = &data[n..];
        }
        Ok(())
    }

    /// Move the cursor
    ///
    /// Positions past the end are legal; a write there leaves a hole.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if the new position would be negative or overflow,
    /// `Interrupted` if the lock wait for [`SeekFrom::End`] is cancelled.
    pub async fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::Current(delta) => self.pos.checked_add_signed(delta),
            SeekFrom::End(delta) => {
                let size = self.device.lock(&self.cancel).await?.size() as u64;
                size.checked_add_signed(delta)
            }
        };
        let target = target.ok_or_else(|| ScullError::InvalidArgument(format!("bad seek {pos:?}")))?;
        self.pos = target;
        Ok(target)
    }

    /// Bytes stored in the bound device
    ///
    /// # Errors
    ///
    /// `Interrupted` if the lock wait is cancelled.
    pub async fn device_size(&self) -> Result<usize> {
        Ok(self.device.lock(&self.cancel).await?.size())
    }

    /// Set `field` for allocations made from now on
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for a zero value, `Interrupted` if the lock wait
    /// is cancelled.
    pub async fn configure(&self, field: ConfigField, value: usize) -> Result<()> {
        self.exchange_config(field, value).await.map(|_| ())
    }

    /// Current value of `field`
    ///
    /// # Errors
    ///
    /// `Interrupted` if the lock wait is cancelled.
    pub async fn query_config(&self, field: ConfigField) -> Result<usize> {
        Ok(self.device.lock(&self.cancel).await?.geometry().get(field))
    }

    /// Set `field` and return its previous value, atomically
    ///
    /// # Errors
    ///
    /// As [`Session::configure`].
    pub async fn exchange_config(&self, field: ConfigField, value: usize) -> Result<usize> {
        let mut store = self.device.lock(&self.cancel).await?;
        let old: Geometry = store.geometry();
        store.set_geometry(old.with(field, value)?);
        debug!(session = %self.id, device = %self.device.name(), %field, old = old.get(field), new = value, "configured");
        Ok(old.get(field))
    }

    /// Restore the default sizing and empty the device
    ///
    /// # Errors
    ///
    /// `Interrupted` if the lock wait is cancelled.
    pub async fn reset_config(&self) -> Result<()> {
        debug!(session = %self.id, device = %self.device.name(), "reset");
        self.device.trim(&self.cancel).await
    }

    /// Release the admission
    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.controller.release(&self.caller);
        debug!(session = %self.id, device = %self.device_id, uid = self.caller.uid, "closed");
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Session(id={}, device={}, access={:?}, uid={}, pos={}, closed={})",
            self.id, self.device_id, self.access, self.caller.uid, self.pos, self.closed
        )
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.release();
    }
}

impl embedded_io_async::ErrorType for Session {
    type Error = ScullError;
}

impl embedded_io_async::Read for Session {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        Session::read(self, buf).await
    }
}

impl embedded_io_async::Write for Session {
    async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        Session::write(self, buf).await
    }

    async fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

impl embedded_io_async::Seek for Session {
    async fn seek(&mut self, pos: embedded_io_async::SeekFrom) -> Result<u64> {
        let pos = match pos {
            embedded_io_async::SeekFrom::Start(offset) => SeekFrom::Start(offset),
            embedded_io_async::SeekFrom::End(delta) => SeekFrom::End(delta),
            embedded_io_async::SeekFrom::Current(delta) => SeekFrom::Current(delta),
        };
        Session::seek(self, pos).await
    }
}
