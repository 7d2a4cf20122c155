use std::collections::HashSet;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use common_s3::S3Settings;
use envconfig::Envconfig;
use thiserror::Error;
use tracing::Level;

use crate::provision::DOWNLOAD_SUFFIX;
use crate::store::{MultipartSettings, MAX_PARTS, MIN_PART_SIZE};
use crate::target::ProbeTarget;

/// Comma-separated list, e.g. `FILE_SIZES=1024,8388608`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvList<T>(pub Vec<T>);

impl<T> FromStr for CsvList<T>
where
    T: FromStr,
    T::Err: Display,
{
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .split(',')
            .map(str::trim)
            .enumerate()
            .map(|(position, item)| {
                if item.is_empty() {
                    return Err(format!("empty item at position {position}"));
                }
                item.parse::<T>()
                    .map_err(|e| format!("invalid item '{item}' at position {position}: {e}"))
            })
            .collect::<Result<Vec<T>, String>>()
            .map(CsvList)
    }
}

impl<T> CsvList<T> {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Text,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "text" | "plain" => Ok(LogFormat::Text),
            _ => Err(format!("Unknown log format: {s}, must be json or text")),
        }
    }
}

#[derive(Envconfig, Debug, Clone)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "::")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "8080")]
    pub port: u16,

    #[envconfig(from = "S3_ENDPOINT", default = "http://localhost:9000")]
    pub s3_endpoint: String,

    #[envconfig(from = "S3_REGION", default = "us-east-1")]
    pub s3_region: String,

    #[envconfig(from = "S3_ACCESS_KEY")]
    pub s3_access_key: String,

    #[envconfig(from = "S3_SECRET_KEY")]
    pub s3_secret_key: String,

    #[envconfig(from = "S3_BUCKET")]
    pub s3_bucket: String,

    #[envconfig(from = "S3_FORCE_PATH_STYLE", default = "true")]
    pub s3_force_path_style: bool,

    #[envconfig(from = "FILE_PATTERNS")]
    pub file_names: CsvList<String>,

    #[envconfig(from = "FILE_SIZES")]
    pub file_sizes: CsvList<u64>,

    #[envconfig(from = "UPLOAD_TIMEOUTS")]
    pub upload_timeouts_secs: CsvList<u64>,

    #[envconfig(from = "DOWNLOAD_TIMEOUTS")]
    pub download_timeouts_secs: CsvList<u64>,

    #[envconfig(from = "DELETE_TIMEOUTS")]
    pub delete_timeouts_secs: CsvList<u64>,

    #[envconfig(from = "FILES_DIR", default = "/tmp")]
    pub files_dir: PathBuf,

    #[envconfig(from = "MIN_FILE_SIZE_FOR_MULTIPART", default = "8388608")] // 8 MiB
    pub multipart_threshold: u64,

    #[envconfig(from = "MULTIPART_PART_SIZE", default = "8388608")]
    pub multipart_part_size: u64,

    #[envconfig(from = "MULTIPART_CONCURRENCY", default = "5")]
    pub multipart_concurrency: usize,

    #[envconfig(from = "CYCLE_INTERVAL_SECS", default = "5")]
    pub cycle_interval_secs: u64,

    #[envconfig(from = "READINESS_TIMEOUT_SECS", default = "5")]
    pub readiness_timeout_secs: u64,

    #[envconfig(from = "LOG_LEVEL", default = "info")]
    pub log_level: Level,

    #[envconfig(from = "LOG_FORMAT", default = "json")]
    pub log_format: LogFormat,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("FILE_PATTERNS must name at least one file")]
    NoTargets,
    #[error("{list} has {actual} entries but FILE_PATTERNS has {expected}")]
    LengthMismatch {
        list: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("file name '{0}' appears more than once in FILE_PATTERNS")]
    DuplicateName(String),
    #[error("file name '{name}' collides with the download copy of '{owner}'")]
    DownloadPathClash { name: String, owner: String },
    #[error("file name '{0}' must be a plain file name, not a path")]
    InvalidName(String),
    #[error("{list} entry for '{file}' must be greater than zero")]
    ZeroTimeout { list: &'static str, file: String },
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("MULTIPART_PART_SIZE must be at least {min} bytes, got {actual}")]
    PartSizeTooSmall { min: u64, actual: u64 },
    #[error("'{file}' would need {parts} parts, more than the {max} a multipart upload allows")]
    TooManyParts { file: String, parts: u64, max: u64 },
}

fn check_len<T>(list: &'static str, values: &CsvList<T>, expected: usize) -> Result<(), ConfigError> {
    if values.len() != expected {
        return Err(ConfigError::LengthMismatch {
            list,
            expected,
            actual: values.len(),
        });
    }
    Ok(())
}

fn timeout(list: &'static str, file: &str, secs: u64) -> Result<Duration, ConfigError> {
    if secs == 0 {
        return Err(ConfigError::ZeroTimeout {
            list,
            file: file.to_string(),
        });
    }
    Ok(Duration::from_secs(secs))
}

impl Config {
    /// Zip the per-file lists into probe targets. All lists must have the
    /// same length.
    pub fn targets(&self) -> Result<Vec<ProbeTarget>, ConfigError> {
        let names = &self.file_names;
        if names.is_empty() {
            return Err(ConfigError::NoTargets);
        }
        let expected = names.len();
        check_len("FILE_SIZES", &self.file_sizes, expected)?;
        check_len("UPLOAD_TIMEOUTS", &self.upload_timeouts_secs, expected)?;
        check_len("DOWNLOAD_TIMEOUTS", &self.download_timeouts_secs, expected)?;
        check_len("DELETE_TIMEOUTS", &self.delete_timeouts_secs, expected)?;

        let mut seen = HashSet::new();
        let mut targets = Vec::with_capacity(expected);
        for (i, name) in names.0.iter().enumerate() {
            if name.contains('/') || name.contains('\\') || name == "." || name == ".." {
                return Err(ConfigError::InvalidName(name.clone()));
            }
            if !seen.insert(name.as_str()) {
                return Err(ConfigError::DuplicateName(name.clone()));
            }
            // "{name}-tmp" is where `name` is downloaded to
            if let Some(owner) = name.strip_suffix(DOWNLOAD_SUFFIX) {
                if names.0.iter().any(|other| other == owner) {
                    return Err(ConfigError::DownloadPathClash {
                        name: name.clone(),
                        owner: owner.to_string(),
                    });
                }
            }
            targets.push(ProbeTarget {
                name: name.clone(),
                size: self.file_sizes.0[i],
                upload_timeout: timeout("UPLOAD_TIMEOUTS", name, self.upload_timeouts_secs.0[i])?,
                download_timeout: timeout(
                    "DOWNLOAD_TIMEOUTS",
                    name,
                    self.download_timeouts_secs.0[i],
                )?,
                delete_timeout: timeout("DELETE_TIMEOUTS", name, self.delete_timeouts_secs.0[i])?,
            });
        }
        Ok(targets)
    }

    /// Multipart settings, checked against the targets that will use them
    pub fn multipart(&self, targets: &[ProbeTarget]) -> Result<MultipartSettings, ConfigError> {
        if self.multipart_concurrency == 0 {
            return Err(ConfigError::Zero("MULTIPART_CONCURRENCY"));
        }
        if self.multipart_part_size < MIN_PART_SIZE {
            return Err(ConfigError::PartSizeTooSmall {
                min: MIN_PART_SIZE,
                actual: self.multipart_part_size,
            });
        }

        let settings = MultipartSettings {
            threshold: self.multipart_threshold,
            part_size: self.multipart_part_size,
            concurrency: self.multipart_concurrency,
        };
        for target in targets {
            let parts = settings.part_count(target.size);
            if parts > MAX_PARTS {
                return Err(ConfigError::TooManyParts {
                    file: target.name.clone(),
                    parts,
                    max: MAX_PARTS,
                });
            }
        }
        Ok(settings)
    }

    pub fn s3_settings(&self) -> S3Settings {
        S3Settings {
            endpoint: self.s3_endpoint.clone(),
            region: self.s3_region.clone(),
            access_key_id: self.s3_access_key.clone(),
            secret_access_key: self.s3_secret_key.clone(),
            force_path_style: self.s3_force_path_style,
        }
    }

    pub fn cycle_interval(&self) -> Duration {
        Duration::from_secs(self.cycle_interval_secs)
    }

    pub fn readiness_timeout(&self) -> Duration {
        Duration::from_secs(self.readiness_timeout_secs)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
