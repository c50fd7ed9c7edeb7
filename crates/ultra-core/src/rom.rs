use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};

use log::{debug, error};

use crate::engine::Engine;
use crate::error::{ErrorSlot, RomError};

/// Extensions of playable ROM images, matched case-insensitively.
pub const ROM_EXTENSIONS: [&str; 3] = [".z64", ".v64", ".n64"];

/// Turns an archive into a single playable ROM file.
pub trait RomResolver: Send + Sync {
    /// Extracts the first playable ROM in `archive` into `output_dir` and
    /// returns the extracted file's path.
    fn extract_first_rom(&self, archive: &Path, output_dir: &Path) -> Result<PathBuf, RomError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ZipRomResolver;

impl RomResolver for ZipRomResolver {
    fn extract_first_rom(&self, archive: &Path, output_dir: &Path) -> Result<PathBuf, RomError> {
        if !archive.exists() {
            return Err(RomError::ArchiveMissing(archive.to_path_buf()));
        }
        if !archive.is_file() {
            return Err(RomError::NotAFile(archive.to_path_buf()));
        }

        let reader = BufReader::new(File::open(archive)?);
        let mut zip = zip::ZipArchive::new(reader)?;

        for i in 0..zip.len() {
            let mut entry = zip.by_index(i)?;
            if entry.is_dir() || !is_rom_name(entry.name()) {
                continue;
            }

            let relative = entry
                .enclosed_name()
                .ok_or_else(|| RomError::UnsafeEntry(entry.name().to_string()))?;
            let dest = output_dir.join(relative);
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }

            let mut out = File::create(&dest)?;
            let bytes = io::copy(&mut entry, &mut out)?;
            debug!("rom: unzipped {} ({bytes} bytes)", dest.display());
            return Ok(dest);
        }

        Err(RomError::NoRomInArchive)
    }
}

pub fn is_rom_name(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    ROM_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

pub fn is_archive_path(path: &Path) -> bool {
    path.to_string_lossy().to_lowercase().ends_with(".zip")
}

/// Creates `dir` if needed and deletes everything inside it.
pub fn clear_scratch_dir(dir: &Path) -> Result<(), RomError> {
    fs::create_dir_all(dir)?;
    for child in fs::read_dir(dir)? {
        let child = child?;
        if child.file_type()?.is_dir() {
            fs::remove_dir_all(child.path())?;
        } else {
            fs::remove_file(child.path())?;
        }
    }
    Ok(())
}

/// First of `base`, `base_`, `base__`, ... not occupied by a regular file.
pub fn free_scratch_dir(base: &Path) -> PathBuf {
    let mut candidate = base.to_path_buf();
    while candidate.exists() && !candidate.is_dir() {
        let mut name = OsString::from(candidate.as_os_str());
        name.push("_");
        candidate = PathBuf::from(name);
    }
    candidate
}

/// Normalizes the CRC pair reported by a ROM header.
///
/// Accepts `"<crc1> <crc2>"` with the separator neither first nor last;
/// each half is upper-cased and left-padded with zeros to 8 digits.
/// Anything else yields `None`.
pub fn check_crc(crc: &str) -> Option<String> {
    if crc.len() < 3 {
        return None;
    }

    let x = crc.find(' ')?;
    if x < 1 || x >= crc.len() - 1 {
        return None;
    }

    if crc.len() == 17 {
        return Some(crc.to_uppercase());
    }

    Some(format!(
        "{} {}",
        pad_crc_half(&crc[..x]),
        pad_crc_half(&crc[x + 1..])
    ))
}

fn pad_crc_half(half: &str) -> String {
    let padded: Vec<char> = format!("00000000{}", half.to_uppercase().trim())
        .chars()
        .collect();
    padded[padded.len() - 8..].iter().collect()
}

/// Reads the header CRC of `rom`, extracting archives first.
///
/// Failures set the `READ_HEADER` error and yield `None`.
pub fn header_crc(
    engine: &dyn Engine,
    resolver: &dyn RomResolver,
    rom: &Path,
    temp_dir: &Path,
    errors: &ErrorSlot,
) -> Option<String> {
    query_header(resolver, rom, temp_dir, errors, |path| {
        engine.header_crc(path).and_then(|crc| check_crc(&crc))
    })
}

/// Reads the internal game name of `rom`, extracting archives first.
pub fn header_name(
    engine: &dyn Engine,
    resolver: &dyn RomResolver,
    rom: &Path,
    temp_dir: &Path,
    errors: &ErrorSlot,
) -> Option<String> {
    query_header(resolver, rom, temp_dir, errors, |path| engine.header_name(path))
}

fn query_header(
    resolver: &dyn RomResolver,
    rom: &Path,
    temp_dir: &Path,
    errors: &ErrorSlot,
    query: impl FnOnce(&Path) -> Option<String>,
) -> Option<String> {
    if rom.as_os_str().is_empty() {
        error!("rom: filename not specified for header query");
        errors.set("READ_HEADER", "filename not specified");
        return None;
    }

    if !is_archive_path(rom) {
        return query(rom);
    }

    let scratch = free_scratch_dir(temp_dir);
    let extracted =
        clear_scratch_dir(&scratch).and_then(|()| resolver.extract_first_rom(rom, &scratch));
    let path = match extracted {
        Ok(path) => path,
        Err(e) => {
            error!("rom: unable to unzip ROM '{}': {e}", rom.display());
            errors.set("READ_HEADER", e.to_string());
            return None;
        }
    };

    let result = query(&path);
    if let Err(e) = fs::remove_file(&path) {
        debug!("rom: could not delete {}: {e}", path.display());
    }
    result
}
