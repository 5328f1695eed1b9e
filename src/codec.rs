use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ForecastError;
use crate::models::EnrichedLectureRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoricalField {
    Subject,
    Teacher,
    DayName,
    LectureType,
    Festival,
}

impl fmt::Display for CategoricalField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CategoricalField::Subject => "subject",
            CategoricalField::Teacher => "teacher",
            CategoricalField::DayName => "day_name",
            CategoricalField::LectureType => "lecture_type",
            CategoricalField::Festival => "festival",
        };
        f.write_str(name)
    }
}

pub fn festival_label(festival: bool) -> &'static str {
    if festival {
        "TRUE"
    } else {
        "FALSE"
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodecTable {
    field: CategoricalField,
    labels: Vec<String>,
}

impl CodecTable {
    pub fn fit<I, S>(field: CategoricalField, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let distinct: BTreeSet<String> = labels
            .into_iter()
            .map(|label| label.as_ref().to_string())
            .collect();

        Self {
            field,
            labels: distinct.into_iter().collect(),
        }
    }

    pub fn field(&self) -> CategoricalField {
        self.field
    }

    pub fn encode(&self, label: &str) -> Result<usize, ForecastError> {
        self.labels
            .binary_search_by(|known| known.as_str().cmp(label))
            .map_err(|_| ForecastError::UnknownCategory {
                field: self.field,
                label: label.to_string(),
            })
    }

    pub fn decode(&self, code: usize) -> Result<&str, ForecastError> {
        self.labels
            .get(code)
            .map(String::as_str)
            .ok_or(ForecastError::InvalidCode {
                field: self.field,
                code,
                len: self.labels.len(),
            })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_canonical(&self) -> bool {
        self.labels.windows(2).all(|pair| pair[0] < pair[1])
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodecSet {
    pub subject: CodecTable,
    pub teacher: CodecTable,
    pub day_name: CodecTable,
    pub lecture_type: CodecTable,
    pub festival: CodecTable,
}

impl CodecSet {
    pub fn fit(records: &[EnrichedLectureRecord]) -> Self {
        Self {
            subject: CodecTable::fit(
                CategoricalField::Subject,
                records.iter().map(|r| r.subject.as_str()),
            ),
            teacher: CodecTable::fit(
                CategoricalField::Teacher,
                records.iter().map(|r| r.teacher.as_str()),
            ),
            day_name: CodecTable::fit(
                CategoricalField::DayName,
                records.iter().map(|r| r.day_name.as_str()),
            ),
            lecture_type: CodecTable::fit(
                CategoricalField::LectureType,
                records.iter().map(|r| r.lecture_type.as_str()),
            ),
            festival: CodecTable::fit(
                CategoricalField::Festival,
                records.iter().map(|r| festival_label(r.festival)),
            ),
        }
    }

    pub fn table(&self, field: CategoricalField) -> &CodecTable {
        match field {
            CategoricalField::Subject => &self.subject,
            CategoricalField::Teacher => &self.teacher,
            CategoricalField::DayName => &self.day_name,
            CategoricalField::LectureType => &self.lecture_type,
            CategoricalField::Festival => &self.festival,
        }
    }

    pub fn encode(&self, field: CategoricalField, label: &str) -> Result<usize, ForecastError> {
        self.table(field).encode(label)
    }

    pub fn tables(&self) -> [&CodecTable; 5] {
        [
            &self.subject,
            &self.teacher,
            &self.day_name,
            &self.lecture_type,
            &self.festival,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_follow_sorted_order() {
        let table = CodecTable::fit(
            CategoricalField::DayName,
            ["Wednesday", "Monday", "Tuesday", "Monday"],
        );

        assert_eq!(table.len(), 3);
        assert_eq!(table.encode("Monday").unwrap(), 0);
        assert_eq!(table.encode("Tuesday").unwrap(), 1);
        assert_eq!(table.encode("Wednesday").unwrap(), 2);
        assert!(table.is_canonical());
    }

    #[test]
    fn decode_reverses_encode() {
        let labels = ["Maths", "Physics", "Chemistry", "DBMS", "Physics"];
        let table = CodecTable::fit(CategoricalField::Subject, labels);

        for label in labels {
            let code = table.encode(label).unwrap();
            assert_eq!(table.decode(code).unwrap(), label);
        }
    }

    #[test]
    fn unknown_label_names_the_field() {
        let table = CodecTable::fit(CategoricalField::Teacher, ["A. Rao"]);
        let err = table.encode("B. Shah").unwrap_err();

        match err {
            ForecastError::UnknownCategory { field, label } => {
                assert_eq!(field, CategoricalField::Teacher);
                assert_eq!(label, "B. Shah");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn out_of_range_code_is_rejected() {
        let table = CodecTable::fit(CategoricalField::LectureType, ["Lab", "Theory"]);
        assert!(matches!(
            table.decode(2),
            Err(ForecastError::InvalidCode { code: 2, len: 2, .. })
        ));
    }

    #[test]
    fn festival_labels_sort_false_first() {
        let table = CodecTable::fit(
            CategoricalField::Festival,
            [festival_label(true), festival_label(false)],
        );
        assert_eq!(table.encode(festival_label(false)).unwrap(), 0);
        assert_eq!(table.encode(festival_label(true)).unwrap(), 1);
    }

    #[test]
    fn table_survives_json() {
        let table = CodecTable::fit(CategoricalField::Subject, ["OS", "CN"]);
        let json = serde_json::to_string(&table).unwrap();
        let back: CodecTable = serde_json::from_str(&json).unwrap();
        assert_eq!(back, table);
        assert_eq!(back.field(), CategoricalField::Subject);
    }
}
