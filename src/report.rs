use std::fmt::Write;

use crate::models::AttendanceForecast;

pub fn build_report(forecast: &AttendanceForecast) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Attendance Forecast");
    let _ = writeln!(output, "Generated for student {}", forecast.prn);
    let _ = writeln!(output);
    let _ = writeln!(output, "## Subject Attendance");

    if forecast.attendance_by_subject.is_empty() {
        let _ = writeln!(output, "No attendance history recorded for this student.");
    } else {
        let _ = writeln!(output, "| Subject | Attended | Current % | If attended | If missed |");
        let _ = writeln!(output, "|---|---|---|---|---|");
        for subject in &forecast.attendance_by_subject {
            let _ = writeln!(
                output,
                "| {} | {}/{} | {:.2} | {:.2} | {:.2} |",
                subject.subject,
                subject.attended_lectures,
                subject.total_lectures,
                subject.attendance_percentage,
                subject.new_percentage_attend,
                subject.new_percentage_miss
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Daily Forecast");

    if forecast.daily_predictions.is_empty() {
        let _ = writeln!(output, "No lectures scheduled for the upcoming week.");
    } else {
        for day in &forecast.daily_predictions {
            let _ = writeln!(
                output,
                "- {}: {:.1}% likely to attend",
                day.day_name,
                day.average_prediction * 100.0
            );
        }
    }

    if forecast.missing_history > 0 {
        let _ = writeln!(output);
        let _ = writeln!(
            output,
            "_{} lecture(s) had no matching history; their trends were imputed._",
            forecast.missing_history
        );
    }

    output
}
