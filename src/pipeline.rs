use std::path::Path;

use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::artifacts::{self, ArtifactBundle, ArtifactStore, Manifest};
use crate::classifier::{self, TrainingReport, VotingClassifier};
use crate::codec::CodecSet;
use crate::error::TrainingError;
use crate::features::{self, LectureFeatures};
use crate::models::{EnrichedLectureRecord, RawLectureRow};
use crate::scaler::ScalerParams;

/// Encoded feature rows in [`LectureFeatures`] column order with their labels.
#[derive(Debug, Clone)]
pub struct EncodedDataset {
    pub rows: Vec<Vec<f64>>,
    pub labels: Vec<u8>,
}

impl EncodedDataset {
    fn select(&self, indices: &[usize]) -> Self {
        Self {
            rows: indices.iter().map(|&i| self.rows[i].clone()).collect(),
            labels: indices.iter().map(|&i| self.labels[i]).collect(),
        }
    }
}

pub fn aggregate(raw: Vec<RawLectureRow>) -> Result<Vec<EnrichedLectureRecord>, TrainingError> {
    let records = features::impute(raw)?;
    let enriched = features::enrich(&records)?;
    info!(rows = enriched.len(), "aggregated attendance rates");
    Ok(enriched)
}

pub fn encode(dataset: &[EnrichedLectureRecord]) -> Result<(CodecSet, EncodedDataset), TrainingError> {
    if dataset.is_empty() {
        return Err(TrainingError::EmptyDataset);
    }
    let codecs = CodecSet::fit(dataset);

    let rows = dataset
        .iter()
        .map(|record| LectureFeatures::from_enriched(record, &codecs).map(|f| f.to_vec()))
        .collect::<Result<Vec<_>, _>>()?;
    let labels = dataset.iter().map(|r| u8::from(r.attendance)).collect();
    debug!(
        subjects = codecs.subject.len(),
        teachers = codecs.teacher.len(),
        lecture_types = codecs.lecture_type.len(),
        "fitted label codecs"
    );

    Ok((codecs, EncodedDataset { rows, labels }))
}

pub fn split(encoded: &EncodedDataset) -> (EncodedDataset, EncodedDataset) {
    let (train_idx, holdout_idx) = classifier::stratified_split(&encoded.labels);
    (encoded.select(&train_idx), encoded.select(&holdout_idx))
}

/// Fit the scaler on the training rows only, then transform both sets.
pub fn scale(
    train: &EncodedDataset,
    holdout: &EncodedDataset,
) -> Result<(ScalerParams, EncodedDataset, EncodedDataset), TrainingError> {
    let params = ScalerParams::fit(&train.rows)?.ok_or(TrainingError::EmptyDataset)?;
    let scaled_train = EncodedDataset {
        rows: params.transform_all(&train.rows)?,
        labels: train.labels.clone(),
    };
    let scaled_holdout = EncodedDataset {
        rows: params.transform_all(&holdout.rows)?,
        labels: holdout.labels.clone(),
    };
    Ok((params, scaled_train, scaled_holdout))
}

pub fn train(
    train: &EncodedDataset,
    holdout: &EncodedDataset,
) -> Result<(VotingClassifier, TrainingReport), TrainingError> {
    classifier::train(&train.rows, &train.labels, &holdout.rows, &holdout.labels)
}

pub fn run(raw: Vec<RawLectureRow>) -> Result<ArtifactBundle, TrainingError> {
    let dataset = aggregate(raw)?;
    let (codecs, encoded) = encode(&dataset)?;
    let (train_set, holdout_set) = split(&encoded);
    let (scaler, train_set, holdout_set) = scale(&train_set, &holdout_set)?;
    let (classifier, report) = train(&train_set, &holdout_set)?;

    let manifest = Manifest {
        run_id: Uuid::new_v4(),
        created_at: Utc::now(),
        enriched_rows: dataset.len(),
        feature_names: LectureFeatures::FEATURE_NAMES
            .iter()
            .map(|name| name.to_string())
            .collect(),
        report,
    };

    Ok(ArtifactBundle {
        manifest,
        codecs,
        scaler,
        classifier,
        dataset,
    })
}

/// Nothing is published unless every stage succeeds.
pub fn retrain(raw_path: &Path, store: &ArtifactStore) -> Result<Manifest, TrainingError> {
    let _guard = store.lock_retrain()?;
    info!(path = %raw_path.display(), "retraining attendance model");

    let raw: Vec<RawLectureRow> = artifacts::read_csv(raw_path)?;
    let bundle = run(raw)?;
    store.publish(&bundle)?;

    Ok(bundle.manifest)
}
