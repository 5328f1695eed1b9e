use std::collections::HashMap;
use std::fmt;

use crate::codec::CodecTable;
use crate::models::EnrichedLectureRecord;

/// How far back the most specific tier looks, in weeks.
pub const RECENT_WEEKS: i32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TrendTier {
    /// student, subject, teacher, lecture type and slot within the recent weeks
    RecentExact = 1,
    /// student, subject and teacher over all history
    SubjectTeacher = 2,
    /// student and subject where the encoded day name equals the slot minutes
    DayNameSlot = 3,
    /// student, subject and lecture type
    LectureType = 4,
    /// student, subject and slot
    TimeSlot = 5,
}

impl TrendTier {
    pub const CASCADE: [TrendTier; 5] = [
        TrendTier::RecentExact,
        TrendTier::SubjectTeacher,
        TrendTier::DayNameSlot,
        TrendTier::LectureType,
        TrendTier::TimeSlot,
    ];
}

impl fmt::Display for TrendTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tier {}", *self as u8)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrendQuery<'q> {
    pub prn: i64,
    pub subject: &'q str,
    pub teacher: &'q str,
    pub lecture_type: &'q str,
    pub time_in_minutes: u32,
}

/// `weekly_rate` and `daily_rate` stay `None` when no tier matched.
#[derive(Debug, Clone, PartialEq)]
pub struct TrendFeatures {
    pub weekly_rate: Option<f64>,
    pub daily_rate: Option<f64>,
    pub lecture_type_rate: f64,
    pub lecture_timing_rate: f64,
    pub teacher_subject_rate: f64,
    pub tier: Option<TrendTier>,
}

impl TrendFeatures {
    pub fn missing() -> Self {
        Self {
            weekly_rate: None,
            daily_rate: None,
            lecture_type_rate: 0.0,
            lecture_timing_rate: 0.0,
            teacher_subject_rate: 0.0,
            tier: None,
        }
    }

    fn average(rows: &[&EnrichedLectureRecord], tier: TrendTier) -> Self {
        let n = rows.len() as f64;
        let avg = |pick: fn(&EnrichedLectureRecord) -> f64| rows.iter().map(|r| pick(r)).sum::<f64>() / n;

        Self {
            weekly_rate: Some(avg(|r| r.weekly_rate)),
            daily_rate: Some(avg(|r| r.daily_rate)),
            lecture_type_rate: avg(|r| r.lecture_type_rate),
            lecture_timing_rate: avg(|r| r.lecture_timing_rate),
            teacher_subject_rate: avg(|r| r.teacher_subject_rate),
            tier: Some(tier),
        }
    }
}

pub struct TrendLookup<'a> {
    by_student_subject: HashMap<(i64, &'a str), Vec<&'a EnrichedLectureRecord>>,
    day_codec: &'a CodecTable,
    current_week: i32,
}

impl<'a> TrendLookup<'a> {
    /// `day_codec` is the fitted day-name table; tier 3 compares its codes.
    pub fn new(records: &'a [EnrichedLectureRecord], day_codec: &'a CodecTable) -> Self {
        let mut by_student_subject: HashMap<(i64, &'a str), Vec<&'a EnrichedLectureRecord>> =
            HashMap::new();
        for record in records {
            by_student_subject
                .entry((record.prn, record.subject.as_str()))
                .or_default()
                .push(record);
        }

        let current_week = records.iter().map(|r| r.week_number).max().unwrap_or(0);

        Self {
            by_student_subject,
            day_codec,
            current_week,
        }
    }

    pub fn current_week(&self) -> i32 {
        self.current_week
    }

    pub fn lookup(&self, query: &TrendQuery<'_>) -> TrendFeatures {
        let Some(candidates) = self.by_student_subject.get(&(query.prn, query.subject)) else {
            return TrendFeatures::missing();
        };

        for tier in TrendTier::CASCADE {
            let matched: Vec<&EnrichedLectureRecord> = candidates
                .iter()
                .copied()
                .filter(|record| self.matches(tier, record, query))
                .collect();

            if !matched.is_empty() {
                return TrendFeatures::average(&matched, tier);
            }
        }

        TrendFeatures::missing()
    }

    fn matches(&self, tier: TrendTier, record: &EnrichedLectureRecord, query: &TrendQuery<'_>) -> bool {
        match tier {
            TrendTier::RecentExact => {
                record.teacher == query.teacher
                    && record.lecture_type == query.lecture_type
                    && record.time_in_minutes == query.time_in_minutes
                    && record.week_number >= self.current_week - RECENT_WEEKS
            }
            TrendTier::SubjectTeacher => record.teacher == query.teacher,
            TrendTier::DayNameSlot => self
                .day_codec
                .encode(&record.day_name)
                .map(|code| code as u64 == u64::from(query.time_in_minutes))
                .unwrap_or(false),
            TrendTier::LectureType => record.lecture_type == query.lecture_type,
            TrendTier::TimeSlot => record.time_in_minutes == query.time_in_minutes,
        }
    }
}

/// Batch-mean imputation; a column empty across the whole batch takes `fallback`.
pub fn impute_batch_means(trends: &mut [TrendFeatures], fallback: (f64, f64)) {
    let batch_mean = |values: Vec<f64>| -> Option<f64> {
        if values.is_empty() {
            None
        } else {
            Some(values.iter().sum::<f64>() / values.len() as f64)
        }
    };

    let weekly = batch_mean(trends.iter().filter_map(|t| t.weekly_rate).collect()).unwrap_or(fallback.0);
    let daily = batch_mean(trends.iter().filter_map(|t| t.daily_rate).collect()).unwrap_or(fallback.1);

    for trend in trends.iter_mut() {
        trend.weekly_rate.get_or_insert(weekly);
        trend.daily_rate.get_or_insert(daily);
    }
}
