use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use linfa::prelude::*;
use linfa_elasticnet::ElasticNet;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::artifacts;
use crate::error::MarksError;
use crate::scaler::ScalerParams;

pub const SEMESTERS: u32 = 6;
const RIDGE_ALPHA: f64 = 1.0;
const MIN_TRAINING_ROWS: usize = 2;
const HOLDOUT_STRIDE: usize = 5;
const DEFAULT_OBTAINABLE: f64 = 1000.0;
const DEFAULT_INPUT: f64 = 50.0;
/// Prior semesters used as features.
const LOOKBACK: u32 = 2;

/// Maximum marks per semester used to derive training percentages.
pub fn max_marks(semester: u32) -> f64 {
    if semester <= 4 {
        1000.0
    } else {
        800.0
    }
}

pub fn grade(percentage: f64) -> &'static str {
    const BANDS: [(&str, f64); 7] = [
        ("O", 80.0),
        ("A+", 70.0),
        ("A", 60.0),
        ("B+", 55.0),
        ("B", 50.0),
        ("C", 45.0),
        ("D", 40.0),
    ];
    BANDS
        .iter()
        .find(|(_, threshold)| percentage >= *threshold)
        .map(|(grade, _)| *grade)
        .unwrap_or("F")
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AcademicSummary {
    pub prn: i64,
    #[serde(default)]
    pub student_name: Option<String>,
    #[serde(default)]
    pub current_sem: Option<u32>,
    #[serde(default)]
    pub sem_1_attendance_perc: Option<f64>,
    #[serde(default)]
    pub sem_1_marks_total: Option<f64>,
    #[serde(default)]
    pub sem_1_obtainable_total: Option<f64>,
    #[serde(default)]
    pub sem_2_attendance_perc: Option<f64>,
    #[serde(default)]
    pub sem_2_marks_total: Option<f64>,
    #[serde(default)]
    pub sem_2_obtainable_total: Option<f64>,
    #[serde(default)]
    pub sem_3_attendance_perc: Option<f64>,
    #[serde(default)]
    pub sem_3_marks_total: Option<f64>,
    #[serde(default)]
    pub sem_3_obtainable_total: Option<f64>,
    #[serde(default)]
    pub sem_4_attendance_perc: Option<f64>,
    #[serde(default)]
    pub sem_4_marks_total: Option<f64>,
    #[serde(default)]
    pub sem_4_obtainable_total: Option<f64>,
    #[serde(default)]
    pub sem_5_attendance_perc: Option<f64>,
    #[serde(default)]
    pub sem_5_marks_total: Option<f64>,
    #[serde(default)]
    pub sem_5_obtainable_total: Option<f64>,
    #[serde(default)]
    pub sem_6_attendance_perc: Option<f64>,
    #[serde(default)]
    pub sem_6_marks_total: Option<f64>,
    #[serde(default)]
    pub sem_6_obtainable_total: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SemesterRecord {
    pub attendance_perc: Option<f64>,
    pub marks_total: Option<f64>,
    pub obtainable_total: Option<f64>,
}

impl AcademicSummary {
    pub fn semester(&self, semester: u32) -> SemesterRecord {
        let (attendance_perc, marks_total, obtainable_total) = match semester {
            1 => (self.sem_1_attendance_perc, self.sem_1_marks_total, self.sem_1_obtainable_total),
            2 => (self.sem_2_attendance_perc, self.sem_2_marks_total, self.sem_2_obtainable_total),
            3 => (self.sem_3_attendance_perc, self.sem_3_marks_total, self.sem_3_obtainable_total),
            4 => (self.sem_4_attendance_perc, self.sem_4_marks_total, self.sem_4_obtainable_total),
            5 => (self.sem_5_attendance_perc, self.sem_5_marks_total, self.sem_5_obtainable_total),
            6 => (self.sem_6_attendance_perc, self.sem_6_marks_total, self.sem_6_obtainable_total),
            _ => (None, None, None),
        };
        SemesterRecord {
            attendance_perc,
            marks_total,
            obtainable_total,
        }
    }

    fn obtainable(&self, semester: u32) -> f64 {
        self.semester(semester)
            .obtainable_total
            .filter(|total| *total > 0.0)
            .unwrap_or(DEFAULT_OBTAINABLE)
    }

    /// Marks percentage against the recorded obtainable total.
    pub fn marks_percentage(&self, semester: u32) -> Option<f64> {
        let record = self.semester(semester);
        match (record.marks_total, record.obtainable_total) {
            (Some(marks), Some(total)) if total > 0.0 => Some(marks / total * 100.0),
            _ => None,
        }
    }
}

fn feature_semesters(semester: u32) -> std::ops::Range<u32> {
    semester.saturating_sub(LOOKBACK).max(1)..semester
}

fn feature_names(semester: u32) -> Vec<String> {
    let mut names: Vec<String> = feature_semesters(semester)
        .map(|s| format!("sem_{s}_marks_percentage"))
        .collect();
    names.push(format!("sem_{semester}_attendance_perc"));
    names
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemesterModel {
    pub semester: u32,
    pub features: Vec<String>,
    pub scaler: ScalerParams,
    pub weights: Vec<f64>,
    pub intercept: f64,
    pub training_rows: usize,
    pub holdout_mae: Option<f64>,
    pub holdout_r2: Option<f64>,
}

impl SemesterModel {
    /// Predicted marks percentage for an unscaled feature row.
    pub fn predict(&self, row: &[f64]) -> Result<f64, MarksError> {
        let scaled = self.scaler.transform(row)?;
        Ok(self.intercept + scaled.iter().zip(&self.weights).map(|(x, w)| x * w).sum::<f64>())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarksModels {
    pub run_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub semesters: BTreeMap<u32, SemesterModel>,
}

impl MarksModels {
    pub fn save(&self, path: &Path) -> Result<(), MarksError> {
        artifacts::write_json(path, self)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, MarksError> {
        Ok(artifacts::read_json(path)?)
    }
}

/// Ridge regression with an unpenalised intercept, as (weights, intercept).
///
/// The elastic net objective scales the squared loss by `1 / 2n`, so a pure
/// L2 penalty of `alpha / n` matches the usual `alpha` ridge objective.
fn fit_ridge(x: &[Vec<f64>], y: &[f64], alpha: f64) -> Result<(Vec<f64>, f64), String> {
    let width = x.first().map_or(0, Vec::len);
    let records = Array2::from_shape_vec((x.len(), width), x.concat()).map_err(|e| e.to_string())?;
    let targets = Array1::from(y.to_vec());

    let model = ElasticNet::params()
        .penalty(alpha / x.len() as f64)
        .l1_ratio(0.0)
        .fit(&Dataset::new(records, targets))
        .map_err(|e| e.to_string())?;

    Ok((model.hyperplane().to_vec(), model.intercept()))
}

fn training_row(summary: &AcademicSummary, semester: u32) -> Option<(Vec<f64>, f64)> {
    let percentage = |s: u32| {
        summary
            .semester(s)
            .marks_total
            .map(|marks| marks / max_marks(s) * 100.0)
    };

    let mut row = feature_semesters(semester)
        .map(percentage)
        .collect::<Option<Vec<f64>>>()?;
    row.push(summary.semester(semester).attendance_perc?);
    Some((row, percentage(semester)?))
}

fn train_semester(semester: u32, rows: &[(Vec<f64>, f64)]) -> Result<SemesterModel, MarksError> {
    let (train, holdout): (Vec<_>, Vec<_>) = rows
        .iter()
        .enumerate()
        .partition(|(i, _)| rows.len() < HOLDOUT_STRIDE || (i + 1) % HOLDOUT_STRIDE != 0);
    let train_x: Vec<Vec<f64>> = train.iter().map(|(_, (x, _))| x.clone()).collect();
    let train_y: Vec<f64> = train.iter().map(|(_, (_, y))| *y).collect();

    let scaler = ScalerParams::fit(&train_x)?.ok_or(MarksError::InsufficientRows {
        semester,
        rows: 0,
        min: MIN_TRAINING_ROWS,
    })?;
    let scaled = scaler.transform_all(&train_x)?;
    let (weights, intercept) = fit_ridge(&scaled, &train_y, RIDGE_ALPHA)
        .map_err(|reason| MarksError::Fit { semester, reason })?;

    let mut model = SemesterModel {
        semester,
        features: feature_names(semester),
        scaler,
        weights,
        intercept,
        training_rows: train_x.len(),
        holdout_mae: None,
        holdout_r2: None,
    };

    if !holdout.is_empty() {
        let predicted = holdout
            .iter()
            .map(|(_, (x, _))| model.predict(x))
            .collect::<Result<Vec<f64>, _>>()?;
        let actual: Vec<f64> = holdout.iter().map(|(_, (_, y))| *y).collect();
        let n = actual.len() as f64;
        let mean = actual.iter().sum::<f64>() / n;
        let ss_res: f64 = predicted.iter().zip(&actual).map(|(p, a)| (a - p).powi(2)).sum();
        let ss_tot: f64 = actual.iter().map(|a| (a - mean).powi(2)).sum();

        model.holdout_mae = Some(predicted.iter().zip(&actual).map(|(p, a)| (a - p).abs()).sum::<f64>() / n);
        model.holdout_r2 = (ss_tot > 0.0).then(|| 1.0 - ss_res / ss_tot);
    }

    Ok(model)
}

/// Fit one regressor for every semester present in `summaries` except the
/// first, which has no prior marks to learn from.
pub fn train_marks(summaries: &[AcademicSummary]) -> Result<MarksModels, MarksError> {
    let mut by_semester: BTreeMap<u32, Vec<(Vec<f64>, f64)>> = BTreeMap::new();
    let mut skipped = 0usize;
    for summary in summaries {
        let Some(semester) = summary.current_sem.filter(|s| (2..=SEMESTERS).contains(s)) else {
            continue;
        };
        match training_row(summary, semester) {
            Some(row) => by_semester.entry(semester).or_default().push(row),
            None => skipped += 1,
        }
    }
    if skipped > 0 {
        debug!(skipped, "skipped academic summaries with missing inputs");
    }

    let mut semesters = BTreeMap::new();
    for (semester, rows) in by_semester {
        if rows.len() < MIN_TRAINING_ROWS {
            return Err(MarksError::InsufficientRows {
                semester,
                rows: rows.len(),
                min: MIN_TRAINING_ROWS,
            });
        }
        let model = train_semester(semester, &rows)?;
        info!(
            semester,
            training_rows = model.training_rows,
            holdout_mae = ?model.holdout_mae,
            holdout_r2 = ?model.holdout_r2,
            "trained marks regressor"
        );
        semesters.insert(semester, model);
    }

    Ok(MarksModels {
        run_id: Uuid::new_v4(),
        created_at: Utc::now(),
        semesters,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreviousSemester {
    pub semester: u32,
    pub marks: f64,
    pub total_obtainable: f64,
    pub perc: f64,
    pub grade: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarksPrediction {
    pub prn: i64,
    pub student_name: Option<String>,
    pub latest_sem: u32,
    pub current_attendance_perc: f64,
    pub predicted_marks: f64,
    pub total_obtainable: f64,
    pub predicted_perc: f64,
    pub predicted_grade_range: String,
    pub prev_sem1: Option<PreviousSemester>,
    pub prev_sem2: Option<PreviousSemester>,
}

fn previous_semester(summary: &AcademicSummary, semester: u32) -> Option<PreviousSemester> {
    if semester < 1 {
        return None;
    }
    let marks = summary.semester(semester).marks_total.unwrap_or(0.0);
    let total = summary.obtainable(semester);
    let perc = marks / total * 100.0;
    Some(PreviousSemester {
        semester,
        marks,
        total_obtainable: total,
        perc: round2(perc),
        grade: grade(perc).to_string(),
    })
}

pub fn predict_marks(models: &MarksModels, summary: &AcademicSummary) -> Result<MarksPrediction, MarksError> {
    let semester = summary.current_sem.ok_or(MarksError::MissingSemester)?;
    let model = models
        .semesters
        .get(&semester)
        .ok_or(MarksError::NoModel(semester))?;

    let attendance = summary
        .semester(semester)
        .attendance_perc
        .unwrap_or(DEFAULT_INPUT);
    let mut row: Vec<f64> = feature_semesters(semester)
        .map(|s| summary.marks_percentage(s).unwrap_or(DEFAULT_INPUT))
        .collect();
    row.push(attendance);

    let obtainable = summary.obtainable(semester);
    let predicted = model.predict(&row)?;
    let marks = (predicted / 100.0 * obtainable).round().clamp(0.0, obtainable);
    let perc = marks / obtainable * 100.0;

    Ok(MarksPrediction {
        prn: summary.prn,
        student_name: summary.student_name.clone(),
        latest_sem: semester,
        current_attendance_perc: attendance,
        predicted_marks: marks,
        total_obtainable: obtainable,
        predicted_perc: round2(perc),
        predicted_grade_range: grade(perc).to_string(),
        prev_sem1: semester.checked_sub(1).and_then(|s| previous_semester(summary, s)),
        prev_sem2: semester.checked_sub(2).and_then(|s| previous_semester(summary, s)),
    })
}
