use chrono::{DateTime, Utc};
use serde::Serialize;

pub mod content;
pub mod progress;

pub use content::{CmsCourse, CmsLesson, CmsPart, CmsTest, PartRef, RedactedTest};
pub use progress::{
    Certificate, EvaluateCourseRequest, ProgressRecord, ProgressStatus, StartCourseRequest,
};

/// What the student should be looking at right now.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "doing", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CurrentStep {
    Finished,
    Part { part: CmsPart },
    Test { test: RedactedTest },
}

/// Notifications for downstream reward processing.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    CourseCompleted {
        record: ProgressRecord,
        occurred_at: DateTime<Utc>,
    },
    EvaluationSubmitted {
        user_id: String,
        course_id: i64,
        occurred_at: DateTime<Utc>,
    },
}

impl ProgressEvent {
    pub fn course_completed(record: ProgressRecord) -> Self {
        ProgressEvent::CourseCompleted {
            record,
            occurred_at: Utc::now(),
        }
    }

    pub fn evaluation_submitted(user_id: &str, course_id: i64) -> Self {
        ProgressEvent::EvaluationSubmitted {
            user_id: user_id.to_string(),
            course_id,
            occurred_at: Utc::now(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ProgressEvent::CourseCompleted { .. } => "course_completed",
            ProgressEvent::EvaluationSubmitted { .. } => "evaluation_submitted",
        }
    }

    pub fn user_id(&self) -> &str {
        match self {
            ProgressEvent::CourseCompleted { record, .. } => &record.user_id,
            ProgressEvent::EvaluationSubmitted { user_id, .. } => user_id,
        }
    }

    pub fn course_id(&self) -> i64 {
        match self {
            ProgressEvent::CourseCompleted { record, .. } => record.course_id,
            ProgressEvent::EvaluationSubmitted { course_id, .. } => *course_id,
        }
    }
}
