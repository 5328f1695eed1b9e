use std::collections::HashMap;

use anyhow::Context;
use chrono::{NaiveDate, NaiveTime};
use sqlx::{PgPool, Row};
use tracing::{debug, info};

use crate::decrypt::{DecryptCache, DecryptClient};
use crate::features::weekday_order;
use crate::marks::AcademicSummary;
use crate::models::{RawLectureRow, Timetable, TimetableDay};

#[derive(Debug, Clone)]
pub struct AttendanceRow {
    pub prn: i64,
    pub subject: Option<String>,
    pub encrypted_teacher: Option<String>,
    pub week_number: Option<i32>,
    pub day_name: Option<String>,
    pub day_no: Option<i32>,
    pub lecture_type: Option<String>,
    pub lecture_timing: Option<NaiveTime>,
    pub attendance: Option<bool>,
    pub festival: Option<bool>,
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Clone)]
pub struct TimetableSlot {
    pub subject: String,
    pub teacher: String,
    pub lecture_type: String,
    pub day_name: String,
    pub lecture_timing: NaiveTime,
    pub week_number: i32,
}

pub async fn fetch_student_ids(pool: &PgPool) -> anyhow::Result<Vec<i64>> {
    let rows = sqlx::query(
        "SELECT DISTINCT student_id::int8 AS student_id FROM psat_final.student_data ORDER BY student_id",
    )
    .fetch_all(pool)
    .await
    .context("failed to list students")?;

    Ok(rows.into_iter().map(|row| row.get("student_id")).collect())
}

pub async fn fetch_attendance_rows(pool: &PgPool, prn: i64) -> anyhow::Result<Vec<AttendanceRow>> {
    let rows = sqlx::query(
        r#"
        SELECT prn::int8 AS prn,
               subject_name,
               teacher_name,
               week_number::int4 AS week_number,
               day_name,
               day_no::int4 AS day_no,
               lecture_type,
               lecture_timing::time AS lecture_timing,
               attendance::bool AS attendance,
               festival::bool AS festival,
               date::date AS date
        FROM psat_final.vw_student_attendance_details
        WHERE prn = $1
        "#,
    )
    .bind(prn)
    .fetch_all(pool)
    .await
    .with_context(|| format!("failed to read attendance for student {prn}"))?;

    let mut records = Vec::with_capacity(rows.len());
    for row in rows {
        records.push(AttendanceRow {
            prn: row.get("prn"),
            subject: row.get("subject_name"),
            encrypted_teacher: row.get("teacher_name"),
            week_number: row.get("week_number"),
            day_name: row.get("day_name"),
            day_no: row.get("day_no"),
            lecture_type: row.get("lecture_type"),
            lecture_timing: row.get("lecture_timing"),
            attendance: row.get("attendance"),
            festival: row.get("festival"),
            date: row.get("date"),
        });
    }

    Ok(records)
}

pub async fn subject_teachers(
    rows: &[AttendanceRow],
    cache: &mut DecryptCache<'_>,
) -> anyhow::Result<HashMap<String, String>> {
    let mut map = HashMap::new();
    for row in rows {
        let (Some(subject), Some(blob)) = (&row.subject, &row.encrypted_teacher) else {
            continue;
        };
        let teacher = cache
            .get(blob)
            .await
            .with_context(|| format!("failed to decrypt teacher for {subject}"))?;
        map.insert(subject.clone(), teacher);
    }
    Ok(map)
}

pub fn to_raw_row(row: AttendanceRow, teachers: &HashMap<String, String>) -> RawLectureRow {
    let teacher = row
        .subject
        .as_ref()
        .and_then(|subject| teachers.get(subject))
        .cloned();

    RawLectureRow {
        prn: Some(row.prn),
        subject: row.subject,
        teacher,
        week_number: row.week_number,
        day_name: row.day_name,
        day_no: row.day_no,
        lecture_type: row.lecture_type,
        lecture_timing: row.lecture_timing.map(|t| t.format("%H:%M").to_string()),
        attendance: row.attendance,
        festival: row.festival,
        date: row.date,
    }
}

pub async fn fetch_all_attendance(
    pool: &PgPool,
    client: &DecryptClient,
) -> anyhow::Result<Vec<RawLectureRow>> {
    let students = fetch_student_ids(pool).await?;
    info!(students = students.len(), "fetching attendance history");

    let mut cache = DecryptCache::new(client);
    let mut raw = Vec::new();
    for prn in students {
        let rows = fetch_attendance_rows(pool, prn).await?;
        let teachers = subject_teachers(&rows, &mut cache).await?;
        debug!(prn, rows = rows.len(), subjects = teachers.len(), "student attendance fetched");
        raw.extend(rows.into_iter().map(|row| to_raw_row(row, &teachers)));
    }

    info!(rows = raw.len(), decrypted = cache.len(), "attendance history fetched");
    Ok(raw)
}

pub fn assemble_timetable(prn: i64, mut slots: Vec<TimetableSlot>) -> Timetable {
    slots.sort_by(|a, b| {
        let day = |s: &TimetableSlot| weekday_order(&s.day_name).unwrap_or(u32::MAX);
        day(a)
            .cmp(&day(b))
            .then_with(|| a.day_name.cmp(&b.day_name))
            .then_with(|| a.lecture_timing.cmp(&b.lecture_timing))
    });

    let mut days: Vec<TimetableDay> = Vec::new();
    for slot in slots {
        let same_day = days.last().is_some_and(|d| d.day_name == slot.day_name);
        if !same_day {
            days.push(TimetableDay {
                day_name: slot.day_name.clone(),
                week_number: slot.week_number,
                subjects: Vec::new(),
                teachers: Vec::new(),
                lecture_types: Vec::new(),
                lecture_timings: Vec::new(),
            });
        }
        if let Some(day) = days.last_mut() {
            day.subjects.push(slot.subject);
            day.teachers.push(slot.teacher);
            day.lecture_types.push(slot.lecture_type);
            day.lecture_timings
                .push(slot.lecture_timing.format("%I:%M:%S %p").to_string());
        }
    }

    Timetable { prn, days }
}

pub async fn fetch_latest_timetable(
    pool: &PgPool,
    client: &DecryptClient,
    prn: i64,
) -> anyhow::Result<Timetable> {
    let rows = sqlx::query(
        r#"
        SELECT subject_name,
               teacher_fullname,
               lecture_type,
               day_name,
               lecture_timing::time AS lecture_timing,
               week_number::int4 AS week_number
        FROM psat_final.vw_latest_timetable
        WHERE week_number = (SELECT MAX(week_number) FROM psat_final.vw_latest_timetable)
        "#,
    )
    .fetch_all(pool)
    .await
    .context("failed to read the latest timetable")?;

    let mut cache = DecryptCache::new(client);
    let mut slots = Vec::with_capacity(rows.len());
    for row in rows {
        let blob: String = row.get("teacher_fullname");
        let teacher = cache.get(&blob).await.context("failed to decrypt timetable teacher")?;
        slots.push(TimetableSlot {
            subject: row.get("subject_name"),
            teacher,
            lecture_type: row.get("lecture_type"),
            day_name: row.get("day_name"),
            lecture_timing: row.get("lecture_timing"),
            week_number: row.get("week_number"),
        });
    }

    Ok(assemble_timetable(prn, slots))
}

pub async fn fetch_academic_summary(
    pool: &PgPool,
    client: &DecryptClient,
    prn: i64,
) -> anyhow::Result<Option<AcademicSummary>> {
    let mut columns = String::new();
    for sem in 1..=6 {
        columns.push_str(&format!(
            ", sem_{sem}_attendance_perc::float8 AS sem_{sem}_attendance_perc\
             , sem_{sem}_marks_total::float8 AS sem_{sem}_marks_total\
             , sem_{sem}_obtainable_total::float8 AS sem_{sem}_obtainable_total"
        ));
    }
    let query = format!(
        "SELECT prn::int8 AS prn, student_full_name, current_sem::int4 AS current_sem{columns} \
         FROM psat_final.student_academic_summary WHERE prn = $1"
    );

    let Some(row) = sqlx::query(&query)
        .bind(prn)
        .fetch_optional(pool)
        .await
        .with_context(|| format!("failed to read academic summary for student {prn}"))?
    else {
        return Ok(None);
    };

    let student_name = match row.get::<Option<String>, _>("student_full_name") {
        Some(blob) => Some(
            client
                .decrypt_blob(&blob)
                .await
                .context("failed to decrypt student name")?,
        ),
        None => None,
    };

    let current_sem: Option<i32> = row.get("current_sem");
    let f = |name: &str| -> Option<f64> { row.get(name) };

    Ok(Some(AcademicSummary {
        prn: row.get("prn"),
        student_name,
        current_sem: current_sem.and_then(|s| u32::try_from(s).ok()),
        sem_1_attendance_perc: f("sem_1_attendance_perc"),
        sem_1_marks_total: f("sem_1_marks_total"),
        sem_1_obtainable_total: f("sem_1_obtainable_total"),
        sem_2_attendance_perc: f("sem_2_attendance_perc"),
        sem_2_marks_total: f("sem_2_marks_total"),
        sem_2_obtainable_total: f("sem_2_obtainable_total"),
        sem_3_attendance_perc: f("sem_3_attendance_perc"),
        sem_3_marks_total: f("sem_3_marks_total"),
        sem_3_obtainable_total: f("sem_3_obtainable_total"),
        sem_4_attendance_perc: f("sem_4_attendance_perc"),
        sem_4_marks_total: f("sem_4_marks_total"),
        sem_4_obtainable_total: f("sem_4_obtainable_total"),
        sem_5_attendance_perc: f("sem_5_attendance_perc"),
        sem_5_marks_total: f("sem_5_marks_total"),
        sem_5_obtainable_total: f("sem_5_obtainable_total"),
        sem_6_attendance_perc: f("sem_6_attendance_perc"),
        sem_6_marks_total: f("sem_6_marks_total"),
        sem_6_obtainable_total: f("sem_6_obtainable_total"),
    }))
}
