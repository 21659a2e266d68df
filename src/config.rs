//! Daemon configuration.
//!
//! Layered the usual way: compiled defaults, then the TOML config file,
//! then `RIPD_`-prefixed environment variables (`__` separates nesting,
//! e.g. `RIPD_GENERAL__TEMP_DIRECTORY`).

use std::path::{Path, PathBuf};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::core::models::RingLog;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/ripd/config.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Run against simulated drives and stages instead of real hardware.
    pub simulation: bool,
    pub general: GeneralConfig,
    pub drives: DrivesConfig,
    pub audio: AudioConfig,
    pub video: VideoConfig,
    pub data: DataConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            simulation: false,
            general: GeneralConfig::default(),
            drives: DrivesConfig::default(),
            audio: AudioConfig::default(),
            video: VideoConfig::default(),
            data: DataConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Root for per-job scratch folders.
    pub temp_directory: PathBuf,
    /// Root for finished output, one subfolder per disc label.
    pub output_directory: PathBuf,
    /// Ring log capacity per job.
    pub log_lines: usize,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            temp_directory: std::env::temp_dir().join("ripd"),
            output_directory: PathBuf::from("/var/lib/ripd/output"),
            log_lines: RingLog::DEFAULT_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DrivesConfig {
    /// Device paths permanently excluded from allocation.
    pub blacklist: Vec<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Output format handed to abcde (-o).
    pub output_format: String,
    /// Optional abcde config file (-c).
    pub abcde_config: Option<PathBuf>,
    /// Extra abcde arguments appended verbatim.
    pub additional_options: Vec<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            output_format: "flac".to_string(),
            abcde_config: None,
            additional_options: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    /// Run HandBrake after extraction. Off means raw MKV titles are the
    /// final output.
    pub transcode: bool,
    /// HandBrake preset name (-Z).
    pub preset: String,
    /// Optional preset import file.
    pub preset_file: Option<PathBuf>,
    /// Minimum title length in seconds for makemkvcon.
    pub min_title_length: u32,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            transcode: true,
            preset: "Fast 1080p30".to_string(),
            preset_file: None,
            min_title_length: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Compress the ISO image after extraction.
    pub compress: bool,
    pub codec: CompressionCodec,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            compress: true,
            codec: CompressionCodec::Zst,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionCodec {
    Zst,
    Bz2,
}

impl CompressionCodec {
    /// File extension appended to the compressed image.
    pub fn extension(&self) -> &'static str {
        match self {
            CompressionCodec::Zst => "zst",
            CompressionCodec::Bz2 => "bz2",
        }
    }
}

impl AppConfig {
    pub fn load(config_file: Option<&Path>) -> Result<Self, figment::Error> {
        let path = config_file.unwrap_or(Path::new(DEFAULT_CONFIG_PATH));
        Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("RIPD_").split("__"))
            .extract()
    }
}
