use std::collections::{BTreeMap, HashMap};

use crate::features::weekday_order;
use crate::models::{DailyPrediction, EnrichedLectureRecord, LecturePrediction, SubjectImpact};

pub fn daily_forecast(predictions: &[LecturePrediction]) -> Vec<DailyPrediction> {
    let mut by_day: HashMap<&str, (f64, usize)> = HashMap::new();
    for prediction in predictions {
        let entry = by_day.entry(prediction.day_name.as_str()).or_insert((0.0, 0));
        entry.0 += prediction.probability;
        entry.1 += 1;
    }

    let mut days: Vec<DailyPrediction> = by_day
        .into_iter()
        .map(|(day_name, (sum, count))| DailyPrediction {
            day_name: day_name.to_string(),
            average_prediction: sum / count as f64,
        })
        .collect();

    days.sort_by_key(|d| (weekday_order(&d.day_name).unwrap_or(u32::MAX), d.day_name.clone()));
    days
}

pub fn subject_impact<'a>(history: impl IntoIterator<Item = &'a EnrichedLectureRecord>) -> Vec<SubjectImpact> {
    let mut by_subject: BTreeMap<&str, (u32, u32)> = BTreeMap::new();
    for record in history {
        let entry = by_subject.entry(record.subject.as_str()).or_insert((0, 0));
        if record.attendance {
            entry.0 += 1;
        }
        entry.1 += 1;
    }

    by_subject
        .into_iter()
        .map(|(subject, (attended, total))| project(subject, attended, total))
        .collect()
}

pub fn project(subject: &str, attended: u32, total: u32) -> SubjectImpact {
    let attended_f = f64::from(attended);
    let total_f = f64::from(total);
    SubjectImpact {
        subject: subject.to_string(),
        attended_lectures: attended,
        total_lectures: total,
        attendance_percentage: if total == 0 {
            0.0
        } else {
            attended_f / total_f * 100.0
        },
        new_percentage_attend: (attended_f + 1.0) / (total_f + 1.0) * 100.0,
        new_percentage_miss: attended_f / (total_f + 1.0) * 100.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::NaiveDate;

    fn prediction(day: &str, probability: f64) -> LecturePrediction {
        LecturePrediction {
            day_name: day.to_string(),
            subject: "Maths".to_string(),
            probability,
        }
    }

    fn history(subject: &str, attended: bool) -> EnrichedLectureRecord {
        EnrichedLectureRecord {
            prn: 1,
            subject: subject.to_string(),
            teacher: "A. Rao".to_string(),
            week_number: 1,
            day_name: "Monday".to_string(),
            day_no: 1,
            lecture_type: "Theory".to_string(),
            lecture_timing: "09:00".to_string(),
            time_in_minutes: 540,
            attendance: attended,
            festival: false,
            date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            weekday: "Monday".to_string(),
            weekly_rate: 0.0,
            daily_rate: 0.0,
            lecture_type_rate: 0.0,
            lecture_timing_rate: 0.0,
            teacher_subject_rate: 0.0,
        }
    }

    #[test]
    fn daily_forecast_averages_and_orders_weekdays() {
        let predictions = vec![
            prediction("Tuesday", 0.9),
            prediction("Monday", 0.8),
            prediction("Monday", 0.6),
            prediction("Monday", 0.4),
        ];

        let days = daily_forecast(&predictions);
        assert_eq!(days.len(), 2);
        assert_eq!(days[0].day_name, "Monday");
        assert_relative_eq!(days[0].average_prediction, 0.6, epsilon = 1e-12);
        assert_eq!(days[1].day_name, "Tuesday");
        assert_relative_eq!(days[1].average_prediction, 0.9, epsilon = 1e-12);
    }

    #[test]
    fn saturday_follows_friday() {
        let predictions = vec![prediction("Saturday", 0.2), prediction("Friday", 0.3)];
        let days = daily_forecast(&predictions);
        let names: Vec<&str> = days.iter().map(|d| d.day_name.as_str()).collect();
        assert_eq!(names, ["Friday", "Saturday"]);
    }

    #[test]
    fn nine_of_ten_projects_both_ways() {
        let impact = project("DBMS", 9, 10);
        assert_relative_eq!(impact.attendance_percentage, 90.0, epsilon = 1e-9);
        assert_relative_eq!(impact.new_percentage_attend, 1000.0 / 11.0, epsilon = 1e-9);
        assert_relative_eq!(impact.new_percentage_miss, 900.0 / 11.0, epsilon = 1e-9);
        assert!((impact.new_percentage_attend - 90.91).abs() < 0.01);
        assert!((impact.new_percentage_miss - 81.82).abs() < 0.01);
    }

    #[test]
    fn subject_impact_counts_history_per_subject() {
        let mut records: Vec<EnrichedLectureRecord> = (0..10).map(|i| history("Maths", i != 3)).collect();
        records.push(history("Physics", false));
        records.push(history("Physics", true));

        let impact = subject_impact(&records);
        assert_eq!(impact.len(), 2);
        assert_eq!(impact[0].subject, "Maths");
        assert_eq!(impact[0].attended_lectures, 9);
        assert_eq!(impact[0].total_lectures, 10);
        assert_eq!(impact[1].subject, "Physics");
        assert_relative_eq!(impact[1].attendance_percentage, 50.0);
    }
}
