//! File-backed cookie store.
//!
//! `BinaryCookieStore` keeps one cookie file per zone in a directory:
//! `cookies.dat` for the default zone and `cookies-<zone id>.dat` for the
//! others.
//!
//! ### Writes
//! The jar is encoded in memory and written to a `.tmp` sibling. The previous
//! file is renamed to its `.bak` sibling and the temporary file takes its
//! place.
//!
//! ### Reads
//! A file with an unusable header is skipped in favour of the `.bak` copy. A
//! missing file (and missing backup) leaves the jar empty.
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::engine::cookies::store::CookieStore;
use crate::engine::cookies::CookieJar;
use crate::engine::errors::{CookieError, CookieResult};
use crate::engine::zone::ZoneId;

pub struct BinaryCookieStore {
    /// Directory holding the cookie files.
    dir: PathBuf,
}

impl BinaryCookieStore {
    pub fn new(dir: impl Into<PathBuf>) -> Arc<Self> {
        Arc::new(Self { dir: dir.into() })
    }

    /// Cookie file of `zone_id`.
    pub fn path_for(&self, zone_id: ZoneId) -> PathBuf {
        if zone_id.is_default() {
            self.dir.join("cookies.dat")
        } else {
            self.dir.join(format!("cookies-{zone_id}.dat"))
        }
    }

    fn read_optional(path: &Path) -> io::Result<Option<Vec<u8>>> {
        match fs::read(path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn write_replacing(&self, path: &Path, bytes: &[u8]) -> io::Result<()> {
        fs::create_dir_all(&self.dir)?;
        let tmp = path.with_extension("tmp");
        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        drop(file);

        if path.exists() {
            fs::rename(path, path.with_extension("bak"))?;
        }
        fs::rename(&tmp, path)
    }
}

impl CookieStore for BinaryCookieStore {
    fn load_into(&self, zone_id: ZoneId, jar: &mut CookieJar) -> CookieResult<()> {
        let path = self.path_for(zone_id);
        if let Some(bytes) = Self::read_optional(&path)? {
            match jar.read_persistent(&bytes) {
                Ok(_) => return Ok(()),
                Err(CookieError::Format(e)) => {
                    log::warn!("{} is unreadable ({e}), trying the backup", path.display());
                }
                Err(e) => return Err(e),
            }
        }

        let backup = path.with_extension("bak");
        match Self::read_optional(&backup)? {
            Some(bytes) => match jar.read_persistent(&bytes) {
                Ok(_) => Ok(()),
                Err(CookieError::Format(e)) => {
                    log::warn!("{} is unreadable as well ({e}), starting empty", backup.display());
                    Ok(())
                }
                Err(e) => Err(e),
            },
            None => Ok(()),
        }
    }

    fn persist_zone(&self, zone_id: ZoneId, jar: &mut CookieJar) -> CookieResult<()> {
        let path = self.path_for(zone_id);
        let mut bytes = Vec::new();
        jar.write_persistent(&mut bytes)?;

        if let Err(e) = self.write_replacing(&path, &bytes) {
            log::error!("failed to write {}: {e}", path.display());
            jar.mark_dirty();
            return Err(e.into());
        }
        log::debug!("wrote {} bytes to {}", bytes.len(), path.display());
        Ok(())
    }

    fn remove_zone(&self, zone_id: ZoneId) -> CookieResult<()> {
        let path = self.path_for(zone_id);
        for file in [path.clone(), path.with_extension("bak"), path.with_extension("tmp")] {
            match fs::remove_file(&file) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}
