//! Volume configuration loaded from an INI file.
//!
//! ```ini
//! [device]
//! image = /var/lib/lfs/disk.img
//! total_blocks = 4096
//!
//! [log]
//! segment_blocks = 64
//!
//! [mount]
//! format_if_missing = true
//! ```
//!
//! `device.image` and `device.total_blocks` are required. `total_blocks` only
//! matters when the image is created; an existing image keeps its own size.

use std::path::PathBuf;

use configparser::ini::Ini;
use thiserror::Error;

pub const DEFAULT_SEGMENT_BLOCKS: u32 = 64;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not load {path}: {reason}")]
    Load { path: String, reason: String },
    #[error("missing {section}.{key}")]
    Missing { section: &'static str, key: &'static str },
    #[error("invalid {section}.{key}: {reason}")]
    Invalid {
        section: &'static str,
        key: &'static str,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LfsConfig {
    /// Image file backing the block device.
    pub image_path: PathBuf,
    /// Size of a newly created image, in blocks.
    pub total_blocks: u32,
    /// Blocks per log segment when formatting.
    pub segment_blocks: u32,
    /// Format the image when it has no superblock instead of failing.
    pub format_if_missing: bool,
}

pub fn load_config(path: &str) -> Result<LfsConfig, ConfigError> {
    let mut ini = Ini::new();
    ini.load(path).map_err(|reason| ConfigError::Load {
        path: path.to_string(),
        reason,
    })?;
    from_ini(&ini)
}

/// Same as [`load_config`] for INI text already in memory.
pub fn parse_config(text: &str) -> Result<LfsConfig, ConfigError> {
    let mut ini = Ini::new();
    ini.read(text.to_string()).map_err(|reason| ConfigError::Load {
        path: "<memory>".to_string(),
        reason,
    })?;
    from_ini(&ini)
}

fn from_ini(ini: &Ini) -> Result<LfsConfig, ConfigError> {
    // [device]
    let image_path = ini
        .get("device", "image")
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
        .ok_or(ConfigError::Missing {
            section: "device",
            key: "image",
        })?;

    let total_blocks =
        get_u32(ini, "device", "total_blocks")?.ok_or(ConfigError::Missing {
            section: "device",
            key: "total_blocks",
        })?;

    // [log]
    let segment_blocks = get_u32(ini, "log", "segment_blocks")?.unwrap_or(DEFAULT_SEGMENT_BLOCKS);
    if segment_blocks == 0 {
        return Err(ConfigError::Invalid {
            section: "log",
            key: "segment_blocks",
            reason: "must be greater than zero".to_string(),
        });
    }

    // [mount]
    let format_if_missing = ini
        .getbool("mount", "format_if_missing")
        .map_err(|reason| ConfigError::Invalid {
            section: "mount",
            key: "format_if_missing",
            reason,
        })?
        .unwrap_or(false);

    Ok(LfsConfig {
        image_path,
        total_blocks,
        segment_blocks,
        format_if_missing,
    })
}

fn get_u32(ini: &Ini, section: &'static str, key: &'static str) -> Result<Option<u32>, ConfigError> {
    let value = ini.getuint(section, key).map_err(|reason| ConfigError::Invalid {
        section,
        key,
        reason,
    })?;
    value
        .map(|v| {
            u32::try_from(v).map_err(|_| ConfigError::Invalid {
                section,
                key,
                reason: format!("{} does not fit in 32 bits", v),
            })
        })
        .transpose()
}
