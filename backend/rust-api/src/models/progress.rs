use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::content::CmsCourse;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProgressStatus {
    InProgress,
    Completed,
}

impl ProgressStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressStatus::InProgress => "IN_PROGRESS",
            ProgressStatus::Completed => "COMPLETED",
        }
    }
}

/// A student's position inside one course.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProgressRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub user_id: String,
    pub course_id: i64,
    pub current_lesson_id: i64,
    pub current_part_id: i64,
    pub current_test_id: Option<i64>,
    pub status: ProgressStatus,
    pub completion: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProgressRecord {
    /// Fresh enrolment positioned on the first part of the first lesson.
    pub fn started(user_id: &str, course_id: i64, lesson_id: i64, part_id: i64) -> Self {
        let now = Utc::now();
        Self {
            id: None,
            user_id: user_id.to_string(),
            course_id,
            current_lesson_id: lesson_id,
            current_part_id: part_id,
            current_test_id: None,
            status: ProgressStatus::InProgress,
            completion: 0.0,
            completion_date: None,
            rating: None,
            feedback: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.status == ProgressStatus::Completed && self.completion >= 100.0
    }

    /// Returns a copy with `update` applied. The only way records change.
    pub fn apply(&self, update: ProgressUpdate) -> ProgressRecord {
        let mut next = self.clone();
        next.updated_at = Utc::now();

        match update {
            ProgressUpdate::Position(position) => {
                next.current_lesson_id = position.lesson_id;
                next.current_part_id = position.part_id;
                next.current_test_id = position.test_id;
                // completion never goes backwards
                next.completion = position.completion.clamp(0.0, 100.0).max(self.completion);
            }
            ProgressUpdate::Complete { at } => {
                next.status = ProgressStatus::Completed;
                next.completion = 100.0;
                next.completion_date = Some(at);
            }
            ProgressUpdate::Evaluation { rating, feedback } => {
                next.rating = Some(rating);
                next.feedback = feedback;
            }
        }

        next
    }

    /// Position reached by `level`, before completion is recomputed.
    pub fn position_after(&self, level: &Advance) -> Position {
        match *level {
            Advance::Test { test_id } => Position {
                lesson_id: self.current_lesson_id,
                part_id: self.current_part_id,
                test_id: Some(test_id),
                completion: self.completion,
            },
            Advance::Part { part_id } => Position {
                lesson_id: self.current_lesson_id,
                part_id,
                test_id: None,
                completion: self.completion,
            },
            Advance::Lesson { lesson_id, part_id } => Position {
                lesson_id,
                part_id,
                test_id: None,
                completion: self.completion,
            },
        }
    }
}

/// A move found by the traversal, one variant per advancement level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    Test { test_id: i64 },
    Part { part_id: i64 },
    Lesson { lesson_id: i64, part_id: i64 },
}

impl Advance {
    pub fn level(&self) -> &'static str {
        match self {
            Advance::Test { .. } => "test",
            Advance::Part { .. } => "part",
            Advance::Lesson { .. } => "lesson",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    pub lesson_id: i64,
    pub part_id: i64,
    pub test_id: Option<i64>,
    pub completion: f64,
}

impl Position {
    pub fn with_completion(mut self, completion: f64) -> Self {
        self.completion = completion;
        self
    }
}

/// Patch applied to a stored record.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressUpdate {
    Position(Position),
    Complete { at: DateTime<Utc> },
    Evaluation { rating: u8, feedback: Option<String> },
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct StartCourseRequest {
    #[validate(length(min = 1, max = 128))]
    pub user_id: String,
    #[validate(range(min = 1))]
    pub course_id: i64,
}

#[derive(Debug, Deserialize, Validate)]
pub struct EvaluateCourseRequest {
    #[validate(range(max = 10))]
    pub rating: u8,
    #[validate(length(max = 2000))]
    pub feedback: Option<String>,
}

/// Completed course plus its CMS metadata.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Certificate {
    #[serde(flatten)]
    pub progress: ProgressRecord,
    pub course: Option<CmsCourse>,
}
