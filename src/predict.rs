use tracing::{debug, warn};

use crate::aggregate;
use crate::artifacts::ArtifactBundle;
use crate::codec::{CategoricalField, CodecSet};
use crate::error::ForecastError;
use crate::features::{self, LectureFeatures};
use crate::models::{AttendanceForecast, LecturePrediction, Timetable, UpcomingLecture};
use crate::trend::{self, TrendLookup, TrendQuery};

pub fn flatten_timetable(timetable: &Timetable) -> Result<Vec<UpcomingLecture>, ForecastError> {
    let mut lectures = Vec::new();

    for day in &timetable.days {
        let n = day.subjects.len();
        if day.teachers.len() != n || day.lecture_types.len() != n || day.lecture_timings.len() != n {
            return Err(ForecastError::InvalidTimetable(format!(
                "{} lists {} subjects, {} teachers, {} lecture types and {} timings",
                day.day_name,
                n,
                day.teachers.len(),
                day.lecture_types.len(),
                day.lecture_timings.len()
            )));
        }

        for i in 0..n {
            let time = features::parse_lecture_time(&day.lecture_timings[i])?;
            lectures.push(UpcomingLecture {
                prn: timetable.prn,
                subject: day.subjects[i].clone(),
                teacher: day.teachers[i].clone(),
                day_name: day.day_name.clone(),
                lecture_type: day.lecture_types[i].clone(),
                time_in_minutes: features::minutes_since_midnight(time),
                week_number: day.week_number,
            });
        }
    }

    Ok(lectures)
}

struct EncodedLecture {
    subject: usize,
    teacher: usize,
    day_name: usize,
    lecture_type: usize,
}

fn encode_lecture(codecs: &CodecSet, lecture: &UpcomingLecture) -> Result<EncodedLecture, ForecastError> {
    Ok(EncodedLecture {
        subject: codecs.encode(CategoricalField::Subject, &lecture.subject)?,
        teacher: codecs.encode(CategoricalField::Teacher, &lecture.teacher)?,
        day_name: codecs.encode(CategoricalField::DayName, &lecture.day_name)?,
        lecture_type: codecs.encode(CategoricalField::LectureType, &lecture.lecture_type)?,
    })
}

pub fn predict_attendance(
    bundle: &ArtifactBundle,
    timetable: &Timetable,
) -> Result<AttendanceForecast, ForecastError> {
    let lectures = flatten_timetable(timetable)?;
    let encoded = lectures
        .iter()
        .map(|lecture| encode_lecture(&bundle.codecs, lecture))
        .collect::<Result<Vec<_>, _>>()?;

    let lookup = TrendLookup::new(&bundle.dataset, &bundle.codecs.day_name);
    let mut trends: Vec<_> = lectures
        .iter()
        .map(|lecture| {
            lookup.lookup(&TrendQuery {
                prn: lecture.prn,
                subject: &lecture.subject,
                teacher: &lecture.teacher,
                lecture_type: &lecture.lecture_type,
                time_in_minutes: lecture.time_in_minutes,
            })
        })
        .collect();

    let mut missing_history = 0;
    for (lecture, trend) in lectures.iter().zip(&trends) {
        match trend.tier {
            Some(tier) => debug!(subject = %lecture.subject, %tier, "trend matched"),
            None => {
                missing_history += 1;
                warn!(
                    prn = lecture.prn,
                    subject = %lecture.subject,
                    teacher = %lecture.teacher,
                    lecture_type = %lecture.lecture_type,
                    time_in_minutes = lecture.time_in_minutes,
                    "no attendance history at any fallback tier"
                );
            }
        }
    }

    // a batch with no history at all falls back to the training means
    let training_mean = bundle.scaler.mean();
    trend::impute_batch_means(&mut trends, (training_mean[7], training_mean[8]));

    let mut predictions = Vec::with_capacity(lectures.len());
    for ((lecture, codes), trend) in lectures.iter().zip(&encoded).zip(&trends) {
        let row = LectureFeatures {
            prn: lecture.prn as f64,
            subject: codes.subject as f64,
            teacher: codes.teacher as f64,
            day_name: codes.day_name as f64,
            lecture_type: codes.lecture_type as f64,
            time_in_minutes: f64::from(lecture.time_in_minutes),
            week_number: f64::from(lecture.week_number),
            weekly_rate: trend.weekly_rate.unwrap_or_default(),
            daily_rate: trend.daily_rate.unwrap_or_default(),
            teacher_subject_rate: trend.teacher_subject_rate,
            lecture_type_rate: trend.lecture_type_rate,
            lecture_timing_rate: trend.lecture_timing_rate,
        }
        .to_vec();

        let scaled = bundle.scaler.transform(&row)?;
        let probability = bundle.classifier.predict_proba(&scaled)?;
        predictions.push(LecturePrediction {
            day_name: lecture.day_name.clone(),
            subject: lecture.subject.clone(),
            probability,
        });
    }

    let history = bundle.dataset.iter().filter(|r| r.prn == timetable.prn);

    Ok(AttendanceForecast {
        prn: timetable.prn,
        attendance_by_subject: aggregate::subject_impact(history),
        daily_predictions: aggregate::daily_forecast(&predictions),
        missing_history,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TimetableDay;
    use crate::pipeline;
    use crate::pipeline::tests::synthetic_rows;

    fn day(name: &str, lectures: &[(&str, &str, &str, &str)]) -> TimetableDay {
        TimetableDay {
            day_name: name.to_string(),
            week_number: 7,
            subjects: lectures.iter().map(|l| l.0.to_string()).collect(),
            teachers: lectures.iter().map(|l| l.1.to_string()).collect(),
            lecture_types: lectures.iter().map(|l| l.2.to_string()).collect(),
            lecture_timings: lectures.iter().map(|l| l.3.to_string()).collect(),
        }
    }

    fn week(prn: i64) -> Timetable {
        Timetable {
            prn,
            days: vec![
                day(
                    "Wednesday",
                    &[("Maths", "A. Rao", "Tutorial", "02:00:00 PM")],
                ),
                day(
                    "Monday",
                    &[
                        ("Maths", "A. Rao", "Theory", "09:00:00 AM"),
                        ("Physics", "B. Shah", "Lab", "11:00:00 AM"),
                    ],
                ),
            ],
        }
    }

    #[test]
    fn flatten_keeps_one_row_per_lecture() {
        let lectures = flatten_timetable(&week(101)).unwrap();
        assert_eq!(lectures.len(), 3);
        assert_eq!(lectures[0].time_in_minutes, 840);
        assert_eq!(lectures[2].time_in_minutes, 660);
        assert!(lectures.iter().all(|l| l.week_number == 7));
    }

    #[test]
    fn ragged_day_is_rejected() {
        let mut timetable = week(101);
        timetable.days[0].teachers.clear();
        assert!(matches!(
            flatten_timetable(&timetable),
            Err(ForecastError::InvalidTimetable(_))
        ));
    }

    #[test]
    fn forecast_covers_scheduled_days_in_order() {
        let bundle = pipeline::run(synthetic_rows()).unwrap();
        let forecast = predict_attendance(&bundle, &week(101)).unwrap();

        let days: Vec<&str> = forecast
            .daily_predictions
            .iter()
            .map(|d| d.day_name.as_str())
            .collect();
        assert_eq!(days, ["Monday", "Wednesday"]);
        assert!(forecast
            .daily_predictions
            .iter()
            .all(|d| (0.0..=1.0).contains(&d.average_prediction)));
        assert_eq!(forecast.missing_history, 0);

        let subjects: Vec<&str> = forecast
            .attendance_by_subject
            .iter()
            .map(|s| s.subject.as_str())
            .collect();
        assert_eq!(subjects, ["Maths", "Physics"]);
        assert_eq!(forecast.attendance_by_subject[0].total_lectures, 12);
        assert!((forecast.attendance_by_subject[0].attendance_percentage - 100.0).abs() < 1e-9);
    }

    #[test]
    fn consistent_attender_outscores_consistent_absentee() {
        let bundle = pipeline::run(synthetic_rows()).unwrap();
        let present = predict_attendance(&bundle, &week(101)).unwrap();
        let absent = predict_attendance(&bundle, &week(102)).unwrap();

        assert!(present.daily_predictions[0].average_prediction > absent.daily_predictions[0].average_prediction);
    }

    #[test]
    fn new_student_is_imputed_and_counted() {
        let bundle = pipeline::run(synthetic_rows()).unwrap();
        let forecast = predict_attendance(&bundle, &week(999)).unwrap();

        assert_eq!(forecast.missing_history, 3);
        assert!(forecast.attendance_by_subject.is_empty());
        assert_eq!(forecast.daily_predictions.len(), 2);
    }

    #[test]
    fn unknown_teacher_fails_the_request() {
        let bundle = pipeline::run(synthetic_rows()).unwrap();
        let mut timetable = week(101);
        timetable.days[1].teachers[0] = "C. Iyer".to_string();

        match predict_attendance(&bundle, &timetable) {
            Err(ForecastError::UnknownCategory { field, label }) => {
                assert_eq!(field, CategoricalField::Teacher);
                assert_eq!(label, "C. Iyer");
            }
            other => panic!("expected unknown category, got {other:?}"),
        }
    }
}
