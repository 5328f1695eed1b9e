use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawLectureRow {
    pub prn: Option<i64>,
    pub subject: Option<String>,
    pub teacher: Option<String>,
    pub week_number: Option<i32>,
    pub day_name: Option<String>,
    pub day_no: Option<i32>,
    pub lecture_type: Option<String>,
    pub lecture_timing: Option<String>,
    pub attendance: Option<bool>,
    pub festival: Option<bool>,
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LectureRecord {
    pub prn: i64,
    pub subject: String,
    pub teacher: String,
    pub week_number: i32,
    pub day_name: String,
    pub day_no: i32,
    pub lecture_type: String,
    pub lecture_timing: String,
    pub attendance: bool,
    pub festival: bool,
    pub date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedLectureRecord {
    pub prn: i64,
    pub subject: String,
    pub teacher: String,
    pub week_number: i32,
    pub day_name: String,
    pub day_no: i32,
    pub lecture_type: String,
    pub lecture_timing: String,
    pub time_in_minutes: u32,
    pub attendance: bool,
    pub festival: bool,
    pub date: NaiveDate,
    pub weekday: String,
    pub weekly_rate: f64,
    pub daily_rate: f64,
    pub lecture_type_rate: f64,
    pub lecture_timing_rate: f64,
    pub teacher_subject_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimetableDay {
    pub day_name: String,
    pub week_number: i32,
    pub subjects: Vec<String>,
    pub teachers: Vec<String>,
    pub lecture_types: Vec<String>,
    pub lecture_timings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timetable {
    pub prn: i64,
    pub days: Vec<TimetableDay>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpcomingLecture {
    pub prn: i64,
    pub subject: String,
    pub teacher: String,
    pub day_name: String,
    pub lecture_type: String,
    pub time_in_minutes: u32,
    pub week_number: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LecturePrediction {
    pub day_name: String,
    pub subject: String,
    pub probability: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectImpact {
    pub subject: String,
    pub attended_lectures: u32,
    pub total_lectures: u32,
    pub attendance_percentage: f64,
    pub new_percentage_attend: f64,
    pub new_percentage_miss: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyPrediction {
    pub day_name: String,
    pub average_prediction: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceForecast {
    pub prn: i64,
    pub attendance_by_subject: Vec<SubjectImpact>,
    pub daily_predictions: Vec<DailyPrediction>,
    pub missing_history: usize,
}
