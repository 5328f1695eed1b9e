use std::path::PathBuf;

use thiserror::Error;

use crate::codec::CategoricalField;

#[derive(Error, Debug)]
pub enum ForecastError {
    #[error("unknown {field} label '{label}' (not seen during training)")]
    UnknownCategory {
        field: CategoricalField,
        label: String,
    },

    #[error("code {code} is out of range for {field} (table has {len} labels)")]
    InvalidCode {
        field: CategoricalField,
        code: usize,
        len: usize,
    },

    #[error("invalid lecture timing '{0}'")]
    InvalidTiming(String),

    #[error("invalid timetable: {0}")]
    InvalidTimetable(String),

    #[error("feature vector has {actual} columns, expected {expected}")]
    FeatureWidth { expected: usize, actual: usize },
}

#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("CSV error in {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("no artifact set has been published under {0}")]
    NothingPublished(PathBuf),

    #[error("stale artifact set: {artifact} belongs to run {found}, manifest expects {expected}")]
    StaleArtifactSet {
        artifact: String,
        expected: String,
        found: String,
    },

    #[error("another retraining run holds {0}")]
    RetrainInProgress(PathBuf),
}

#[derive(Error, Debug)]
pub enum TrainingError {
    #[error("dataset is empty")]
    EmptyDataset,

    #[error("training labels contain a single class ({0}); cannot fit a classifier")]
    SingleClass(u8),

    #[error("model fit failed: {0}")]
    Fit(String),

    #[error("column {0} has no values to impute from")]
    EmptyColumn(&'static str),

    #[error("codec error: {0}")]
    Codec(#[from] ForecastError),

    #[error("artifact error: {0}")]
    Artifact(#[from] ArtifactError),
}

#[derive(Error, Debug)]
pub enum DecryptError {
    #[error("malformed encrypted field: {0}")]
    MalformedField(#[from] serde_json::Error),

    #[error("decrypt request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("decrypt service returned HTTP {0}")]
    Status(u16),

    #[error("decrypt response carried no plaintext")]
    MissingPlaintext,
}

#[derive(Error, Debug)]
pub enum MarksError {
    #[error("missing current_sem in input data")]
    MissingSemester,

    #[error("no trained model or scaler found for semester {0}")]
    NoModel(u32),

    #[error("semester {semester} has {rows} training rows; need at least {min}")]
    InsufficientRows { semester: u32, rows: usize, min: usize },

    #[error("ridge fit failed for semester {semester}: {reason}")]
    Fit { semester: u32, reason: String },

    #[error("feature error: {0}")]
    Features(#[from] ForecastError),

    #[error("artifact error: {0}")]
    Artifact(#[from] ArtifactError),
}
