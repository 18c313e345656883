//! Device record persistence with file locking.
//!
//! Each device is one JSON document under `devices/`. Writers hold the
//! device's lock file under `locks/` for the whole read-modify-write, and
//! documents are replaced atomically so readers never see a partial record.

use crate::{Device, Error, Result};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

const MAX_DEVICE_ID_LEN: usize = 64;

/// Normalize a device id and check that it is safe to use as a file stem
pub fn validate_device_id(device_id: &str) -> Result<&str> {
    let id = device_id.trim();
    if id.is_empty() {
        return Err(Error::invalid("device_id", "must not be empty"));
    }
    if id.len() > MAX_DEVICE_ID_LEN {
        return Err(Error::invalid(
            "device_id",
            format!("must be at most {} characters", MAX_DEVICE_ID_LEN),
        ));
    }
    if id.starts_with('.')
        || !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(Error::invalid(
            "device_id",
            format!("{:?} may only contain letters, digits, '-', '_' and '.'", id),
        ));
    }
    Ok(id)
}

/// Exclusive per-device lock, released on drop
#[derive(Debug)]
pub struct DeviceLock {
    file: File,
}

impl Drop for DeviceLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            tracing::warn!("Failed to release device lock: {}", e);
        }
    }
}

/// File-backed collection of device records
#[derive(Clone, Debug)]
pub struct DeviceStore {
    devices_dir: PathBuf,
    locks_dir: PathBuf,
}

impl DeviceStore {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        let data_dir = data_dir.as_ref();
        Self {
            devices_dir: data_dir.join("devices"),
            locks_dir: data_dir.join("locks"),
        }
    }

    fn record_path(&self, device_id: &str) -> PathBuf {
        self.devices_dir.join(format!("{}.json", device_id))
    }

    /// Block until this process holds the device's exclusive lock
    pub fn lock(&self, device_id: &str) -> Result<DeviceLock> {
        std::fs::create_dir_all(&self.locks_dir)?;
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(self.locks_dir.join(format!("{}.lock", device_id)))?;
        file.lock_exclusive()?;
        Ok(DeviceLock { file })
    }

    /// Load a device record with shared locking
    ///
    /// Returns `None` if the device has never been saved. A record that exists
    /// but cannot be parsed is an error, never a missing device.
    pub fn load(&self, device_id: &str) -> Result<Option<Device>> {
        let path = self.record_path(device_id);
        let file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        file.lock_shared()?;
        let mut contents = String::new();
        let read = std::io::BufReader::new(&file).read_to_string(&mut contents);
        file.unlock()?;
        read?;

        let device = serde_json::from_str::<Device>(&contents).map_err(|e| {
            tracing::warn!("Device record {:?} is corrupted: {}", path, e);
            Error::Json(e)
        })?;
        tracing::debug!("Loaded device {} from {:?}", device_id, path);
        Ok(Some(device))
    }

    /// Save a device record atomically
    ///
    /// Writes to a temp file in the same directory, syncs it, then renames it
    /// over the previous record.
    pub fn save(&self, device: &Device) -> Result<()> {
        std::fs::create_dir_all(&self.devices_dir)?;

        let temp = NamedTempFile::new_in(&self.devices_dir)?;
        {
            let mut writer = std::io::BufWriter::new(temp.as_file());
            let contents = serde_json::to_string(device)?;
            writer.write_all(contents.as_bytes())?;
            writer.flush()?;
        }
        temp.as_file().sync_all()?;

        let path = self.record_path(&device.device_id);
        temp.persist(&path).map_err(|e| Error::Io(e.error))?;

        tracing::debug!("Saved device {} to {:?}", device.device_id, path);
        Ok(())
    }

    /// Ids of every stored device, sorted
    pub fn device_ids(&self) -> Result<Vec<String>> {
        if !self.devices_dir.exists() {
            return Ok(Vec::new());
        }

        let mut ids = Vec::new();
        for entry in std::fs::read_dir(&self.devices_dir)? {
            let path = entry?.path();
            if path.extension().map_or(false, |ext| ext == "json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    ids.push(stem.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}
