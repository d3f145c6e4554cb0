use thiserror::Error;

use crate::counters::SampleParseError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid topology: {0}")]
    Topology(String),
    #[error("no path on {switch} towards {dst}")]
    NoPath { switch: String, dst: String },
    #[error("no candidate path for {0}")]
    NoCandidate(String),
    #[error("counter sample: {0}")]
    SampleParse(#[from] SampleParseError),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("background task: {0}")]
    Join(String),
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("toml: {0}")]
    Toml(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
