use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

use chrono::{Datelike, NaiveTime, Timelike, Weekday};
use tracing::{debug, warn};

use crate::codec::{festival_label, CategoricalField, CodecSet};
use crate::error::{ForecastError, TrainingError};
use crate::models::{EnrichedLectureRecord, LectureRecord, RawLectureRow};

const TIME_FORMATS: [&str; 4] = ["%H:%M:%S", "%H:%M", "%I:%M:%S %p", "%I:%M %p"];

/// Parse `HH:MM`, `HH:MM:SS` or the 12-hour `HH:MM:SS AM/PM` forms.
pub fn parse_lecture_time(text: &str) -> Result<NaiveTime, ForecastError> {
    let trimmed = text.trim();
    TIME_FORMATS
        .iter()
        .find_map(|format| NaiveTime::parse_from_str(trimmed, format).ok())
        .ok_or_else(|| ForecastError::InvalidTiming(text.to_string()))
}

pub fn minutes_since_midnight(time: NaiveTime) -> u32 {
    time.hour() * 60 + time.minute()
}

pub fn weekday_name(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

/// Monday = 0 .. Sunday = 6; `None` for anything that is not a weekday name.
pub fn weekday_order(day_name: &str) -> Option<u32> {
    day_name
        .trim()
        .parse::<Weekday>()
        .ok()
        .map(|day| day.num_days_from_monday())
}

fn mode<T: Ord + Clone>(values: impl Iterator<Item = T>) -> Option<T> {
    let mut counts: BTreeMap<T, usize> = BTreeMap::new();
    for value in values {
        *counts.entry(value).or_insert(0) += 1;
    }

    let mut best: Option<(T, usize)> = None;
    for (value, count) in counts {
        match &best {
            Some((_, best_count)) if *best_count >= count => {}
            _ => best = Some((value, count)),
        }
    }
    best.map(|(value, _)| value)
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 {
        None
    } else {
        Some(sum / count as f64)
    }
}

/// Numeric gaps take the column mean, categorical gaps the column mode.
/// Rows without a student id are dropped.
pub fn impute(rows: Vec<RawLectureRow>) -> Result<Vec<LectureRecord>, TrainingError> {
    let before = rows.len();
    let rows: Vec<RawLectureRow> = rows.into_iter().filter(|r| r.prn.is_some()).collect();
    if rows.len() < before {
        warn!(dropped = before - rows.len(), "dropping rows without a student id");
    }
    if rows.is_empty() {
        return Err(TrainingError::EmptyDataset);
    }

    let week_number = mean(rows.iter().filter_map(|r| r.week_number).map(f64::from))
        .map(|m| m.round() as i32)
        .unwrap_or(0);
    let day_no = mean(rows.iter().filter_map(|r| r.day_no).map(f64::from))
        .map(|m| m.round() as i32)
        .unwrap_or(0);
    let attendance = mean(
        rows.iter()
            .filter_map(|r| r.attendance)
            .map(|a| if a { 1.0 } else { 0.0 }),
    )
    .map(|m| m >= 0.5)
    .unwrap_or(false);

    let subject = mode(rows.iter().filter_map(|r| r.subject.clone()));
    let teacher = mode(rows.iter().filter_map(|r| r.teacher.clone()));
    let day_name = mode(rows.iter().filter_map(|r| r.day_name.clone()));
    let lecture_type = mode(rows.iter().filter_map(|r| r.lecture_type.clone()));
    let lecture_timing = mode(rows.iter().filter_map(|r| r.lecture_timing.clone()));
    let festival = mode(rows.iter().filter_map(|r| r.festival)).unwrap_or(false);
    let date = mode(rows.iter().filter_map(|r| r.date));

    let records = rows
        .into_iter()
        .map(|row| {
            Ok(LectureRecord {
                prn: row.prn.unwrap_or_default(),
                subject: fill(row.subject, &subject, "subject")?,
                teacher: fill(row.teacher, &teacher, "teacher")?,
                week_number: row.week_number.unwrap_or(week_number),
                day_name: fill(row.day_name, &day_name, "day_name")?,
                day_no: row.day_no.unwrap_or(day_no),
                lecture_type: fill(row.lecture_type, &lecture_type, "lecture_type")?,
                lecture_timing: fill(row.lecture_timing, &lecture_timing, "lecture_timing")?,
                attendance: row.attendance.unwrap_or(attendance),
                festival: row.festival.unwrap_or(festival),
                date: fill(row.date, &date, "date")?,
            })
        })
        .collect::<Result<Vec<_>, TrainingError>>()?;

    debug!(rows = records.len(), "imputed raw lecture rows");
    Ok(records)
}

fn fill<T: Clone>(value: Option<T>, fallback: &Option<T>, column: &'static str) -> Result<T, TrainingError> {
    match value {
        Some(v) => Ok(v),
        None => fallback.clone().ok_or(TrainingError::EmptyColumn(column)),
    }
}

fn group_means<'a, K, F>(records: &'a [LectureRecord], outcomes: &[f64], key: F) -> HashMap<K, f64>
where
    K: Eq + Hash,
    F: Fn(usize, &'a LectureRecord) -> K,
{
    let mut sums: HashMap<K, (f64, usize)> = HashMap::new();
    for (idx, record) in records.iter().enumerate() {
        let entry = sums.entry(key(idx, record)).or_insert((0.0, 0));
        entry.0 += outcomes[idx];
        entry.1 += 1;
    }
    sums.into_iter()
        .map(|(k, (sum, count))| (k, sum / count as f64))
        .collect()
}

pub fn enrich(records: &[LectureRecord]) -> Result<Vec<EnrichedLectureRecord>, ForecastError> {
    let minutes = records
        .iter()
        .map(|r| parse_lecture_time(&r.lecture_timing).map(minutes_since_midnight))
        .collect::<Result<Vec<u32>, _>>()?;
    let weekdays: Vec<&'static str> = records.iter().map(|r| weekday_name(r.date.weekday())).collect();
    let outcomes: Vec<f64> = records
        .iter()
        .map(|r| if r.attendance { 1.0 } else { 0.0 })
        .collect();

    let weekly = group_means(records, &outcomes, |_, r| (r.prn, r.subject.as_str(), r.week_number));
    let daily = group_means(records, &outcomes, |i, r| (r.prn, weekdays[i]));
    let by_type = group_means(records, &outcomes, |_, r| (r.prn, r.lecture_type.as_str()));
    let by_timing = group_means(records, &outcomes, |i, r| (r.prn, minutes[i]));
    let by_teacher = group_means(records, &outcomes, |_, r| (r.teacher.as_str(), r.subject.as_str()));

    let enriched = records
        .iter()
        .enumerate()
        .map(|(i, r)| EnrichedLectureRecord {
            prn: r.prn,
            subject: r.subject.clone(),
            teacher: r.teacher.clone(),
            week_number: r.week_number,
            day_name: r.day_name.clone(),
            day_no: r.day_no,
            lecture_type: r.lecture_type.clone(),
            lecture_timing: r.lecture_timing.clone(),
            time_in_minutes: minutes[i],
            attendance: r.attendance,
            festival: r.festival,
            date: r.date,
            weekday: weekdays[i].to_string(),
            weekly_rate: rate(&weekly, &(r.prn, r.subject.as_str(), r.week_number)),
            daily_rate: rate(&daily, &(r.prn, weekdays[i])),
            lecture_type_rate: rate(&by_type, &(r.prn, r.lecture_type.as_str())),
            lecture_timing_rate: rate(&by_timing, &(r.prn, minutes[i])),
            teacher_subject_rate: rate(&by_teacher, &(r.teacher.as_str(), r.subject.as_str())),
        })
        .collect();

    Ok(enriched)
}

fn rate<K: Eq + Hash>(table: &HashMap<K, f64>, key: &K) -> f64 {
    table.get(key).copied().unwrap_or_default()
}

/// The twelve model inputs in their fixed column order.
#[derive(Debug, Clone, PartialEq)]
pub struct LectureFeatures {
    pub prn: f64,
    pub subject: f64,
    pub teacher: f64,
    pub day_name: f64,
    pub lecture_type: f64,
    pub time_in_minutes: f64,
    pub week_number: f64,
    pub weekly_rate: f64,
    pub daily_rate: f64,
    pub teacher_subject_rate: f64,
    pub lecture_type_rate: f64,
    pub lecture_timing_rate: f64,
}

impl LectureFeatures {
    pub const NUM_FEATURES: usize = 12;

    pub const FEATURE_NAMES: [&'static str; 12] = [
        "prn",
        "subject",
        "teacher",
        "day_name",
        "lecture_type",
        "time_in_minutes",
        "week_number",
        "weekly_rate",
        "daily_rate",
        "teacher_subject_rate",
        "lecture_type_rate",
        "lecture_timing_rate",
    ];

    pub fn from_enriched(record: &EnrichedLectureRecord, codecs: &CodecSet) -> Result<Self, ForecastError> {
        // festival is encoded for parity with the stored tables but is not a model input
        codecs.encode(CategoricalField::Festival, festival_label(record.festival))?;

        Ok(Self {
            prn: record.prn as f64,
            subject: codecs.encode(CategoricalField::Subject, &record.subject)? as f64,
            teacher: codecs.encode(CategoricalField::Teacher, &record.teacher)? as f64,
            day_name: codecs.encode(CategoricalField::DayName, &record.day_name)? as f64,
            lecture_type: codecs.encode(CategoricalField::LectureType, &record.lecture_type)? as f64,
            time_in_minutes: f64::from(record.time_in_minutes),
            week_number: f64::from(record.week_number),
            weekly_rate: record.weekly_rate,
            daily_rate: record.daily_rate,
            teacher_subject_rate: record.teacher_subject_rate,
            lecture_type_rate: record.lecture_type_rate,
            lecture_timing_rate: record.lecture_timing_rate,
        })
    }

    pub fn to_vec(&self) -> Vec<f64> {
        vec![
            self.prn,
            self.subject,
            self.teacher,
            self.day_name,
            self.lecture_type,
            self.time_in_minutes,
            self.week_number,
            self.weekly_rate,
            self.daily_rate,
            self.teacher_subject_rate,
            self.lecture_type_rate,
            self.lecture_timing_rate,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::NaiveDate;

    fn lecture(prn: i64, week: i32, date: NaiveDate, timing: &str, attended: bool) -> LectureRecord {
        LectureRecord {
            prn,
            subject: "Maths".to_string(),
            teacher: "A. Rao".to_string(),
            week_number: week,
            day_name: weekday_name(date.weekday()).to_string(),
            day_no: date.weekday().number_from_monday() as i32,
            lecture_type: "Theory".to_string(),
            lecture_timing: timing.to_string(),
            attendance: attended,
            festival: false,
            date,
        }
    }

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    #[test]
    fn parses_all_timing_forms() {
        assert_eq!(minutes_since_midnight(parse_lecture_time("09:30").unwrap()), 570);
        assert_eq!(minutes_since_midnight(parse_lecture_time("14:00:00").unwrap()), 840);
        assert_eq!(minutes_since_midnight(parse_lecture_time("02:15:00 PM").unwrap()), 855);
        assert_eq!(minutes_since_midnight(parse_lecture_time("12:00:00 AM").unwrap()), 0);
        assert!(matches!(
            parse_lecture_time("after lunch"),
            Err(ForecastError::InvalidTiming(_))
        ));
    }

    #[test]
    fn weekday_order_accepts_full_names() {
        assert_eq!(weekday_order("Monday"), Some(0));
        assert_eq!(weekday_order("saturday"), Some(5));
        assert_eq!(weekday_order("Holiday"), None);
    }

    #[test]
    fn two_students_two_weeks_rates_match_hand_computation() {
        // 2024-01-01 is a Monday, 2024-01-08 the next Monday
        let records = vec![
            lecture(1, 1, date(1), "09:00", true),
            lecture(1, 1, date(2), "11:00", true),
            lecture(1, 2, date(8), "09:00", true),
            lecture(1, 2, date(9), "11:00", true),
            lecture(2, 1, date(1), "09:00", false),
            lecture(2, 1, date(2), "11:00", false),
            lecture(2, 2, date(8), "09:00", false),
            lecture(2, 2, date(9), "11:00", false),
        ];

        let enriched = enrich(&records).unwrap();
        assert_eq!(enriched.len(), records.len());

        for row in &enriched {
            let expected = if row.prn == 1 { 1.0 } else { 0.0 };
            assert_relative_eq!(row.weekly_rate, expected);
            assert_relative_eq!(row.daily_rate, expected);
            assert_relative_eq!(row.lecture_type_rate, expected);
            assert_relative_eq!(row.lecture_timing_rate, expected);
            // one teacher/subject pair shared by both students
            assert_relative_eq!(row.teacher_subject_rate, 0.5);
        }
        assert_eq!(enriched[0].weekday, "Monday");
        assert_eq!(enriched[1].time_in_minutes, 660);
    }

    #[test]
    fn mixed_attendance_averages_within_group() {
        let records = vec![
            lecture(1, 1, date(1), "09:00", true),
            lecture(1, 1, date(2), "09:00", false),
            lecture(1, 1, date(3), "10:00", false),
            lecture(1, 2, date(8), "09:00", true),
        ];

        let enriched = enrich(&records).unwrap();
        assert_relative_eq!(enriched[0].weekly_rate, 1.0 / 3.0);
        assert_relative_eq!(enriched[3].weekly_rate, 1.0);
        // Mondays: 01-01 attended, 01-08 attended
        assert_relative_eq!(enriched[0].daily_rate, 1.0);
        // 09:00 slot: attended, missed, attended
        assert_relative_eq!(enriched[1].lecture_timing_rate, 2.0 / 3.0);
        assert_relative_eq!(enriched[2].lecture_timing_rate, 0.0);
    }

    #[test]
    fn single_member_group_takes_its_own_outcome() {
        let records = vec![lecture(7, 3, date(4), "08:00", true)];
        let enriched = enrich(&records).unwrap();
        assert_relative_eq!(enriched[0].weekly_rate, 1.0);
        assert_relative_eq!(enriched[0].teacher_subject_rate, 1.0);
    }

    #[test]
    fn impute_fills_numeric_mean_and_categorical_mode() {
        let base = RawLectureRow {
            prn: Some(1),
            subject: Some("Maths".into()),
            teacher: Some("A. Rao".into()),
            week_number: Some(2),
            day_name: Some("Monday".into()),
            day_no: Some(1),
            lecture_type: Some("Theory".into()),
            lecture_timing: Some("09:00".into()),
            attendance: Some(true),
            festival: Some(false),
            date: Some(date(1)),
        };
        let rows = vec![
            base.clone(),
            RawLectureRow {
                week_number: Some(4),
                lecture_type: Some("Lab".into()),
                ..base.clone()
            },
            RawLectureRow {
                week_number: None,
                lecture_type: None,
                subject: None,
                ..base.clone()
            },
            RawLectureRow {
                prn: None,
                ..base.clone()
            },
        ];

        let records = impute(rows).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[2].week_number, 3);
        assert_eq!(records[2].subject, "Maths");
        // Lab and Theory tie; the smaller label wins
        assert_eq!(records[2].lecture_type, "Lab");
    }

    #[test]
    fn impute_rejects_column_without_values() {
        let rows = vec![RawLectureRow {
            prn: Some(1),
            ..RawLectureRow::default()
        }];
        assert!(matches!(impute(rows), Err(TrainingError::EmptyColumn(_))));
    }

    #[test]
    fn feature_vector_has_fixed_width() {
        let records = vec![lecture(1, 1, date(1), "09:00", true)];
        let enriched = enrich(&records).unwrap();
        let codecs = CodecSet::fit(&enriched);

        let features = LectureFeatures::from_enriched(&enriched[0], &codecs).unwrap();
        let row = features.to_vec();
        assert_eq!(row.len(), LectureFeatures::NUM_FEATURES);
        assert_eq!(LectureFeatures::FEATURE_NAMES.len(), LectureFeatures::NUM_FEATURES);
        assert_relative_eq!(row[5], 540.0);
    }
}
