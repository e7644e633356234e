// firmware.rs: over-the-air image upload boundary

use std::sync::Mutex;

use crate::*;

/// Destination of an uploaded firmware image, one session per upload.
pub trait FirmwareUpdate: Send {
    fn begin(&mut self) -> AppResult<Box<dyn FirmwareSink + '_>>;
}

/// An open update session. Nothing takes effect unless `complete` succeeds.
pub trait FirmwareSink: Send {
    fn write(&mut self, chunk: &[u8]) -> AppResult<()>;
    fn complete(self: Box<Self>) -> AppResult<()>;
    fn abort(self: Box<Self>);
}

/// Keeps the last completed image in memory.
#[derive(Clone, Default)]
pub struct MemoryFirmware {
    image: Arc<Mutex<Option<Vec<u8>>>>,
}

impl MemoryFirmware {
    pub fn image(&self) -> Option<Vec<u8>> {
        self.image.lock().ok().and_then(|i| i.clone())
    }
}

struct MemorySink<'a> {
    target: &'a MemoryFirmware,
    staged: Vec<u8>,
}

impl FirmwareUpdate for MemoryFirmware {
    fn begin(&mut self) -> AppResult<Box<dyn FirmwareSink + '_>> {
        Ok(Box::new(MemorySink {
            target: self,
            staged: Vec::new(),
        }))
    }
}

impl FirmwareSink for MemorySink<'_> {
    fn write(&mut self, chunk: &[u8]) -> AppResult<()> {
        self.staged.extend_from_slice(chunk);
        Ok(())
    }

    fn complete(self: Box<Self>) -> AppResult<()> {
        let MemorySink { target, staged } = *self;
        info!("Firmware image of {} bytes stored", staged.len());
        let mut image = target
            .image
            .lock()
            .map_err(|_| AppError::Message("firmware store poisoned".into()))?;
        *image = Some(staged);
        Ok(())
    }

    fn abort(self: Box<Self>) {
        warn!("Firmware upload aborted after {} bytes", self.staged.len());
    }
}

// EOF
