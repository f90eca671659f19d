use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;

use crate::metrics::record_progress_operation;
use crate::models::content::{find_by_id, find_by_ordem, next_sequence_number};
use crate::models::progress::{Advance, Position, ProgressUpdate};
use crate::models::{Certificate, CurrentStep, ProgressEvent, ProgressRecord, ProgressStatus};
use crate::services::content_graph::ContentGraph;
use crate::services::events::EventQueue;
use crate::services::progress_store::{ProgressStore, StoreError};
use crate::services::AppState;

#[derive(Debug, Error)]
pub enum ProgressError {
    #[error("User has not started this course")]
    NotFound,

    #[error("User is already enrolled in this course")]
    AlreadyEnrolled,

    #[error("{0}")]
    InvalidState(String),

    #[error("Course content is inconsistent: {0}")]
    ContentGraphInconsistent(String),

    #[error("Internal failure: {0}")]
    Internal(anyhow::Error),
}

impl ProgressError {
    fn outcome(&self) -> &'static str {
        match self {
            ProgressError::NotFound => "not_found",
            ProgressError::AlreadyEnrolled => "already_enrolled",
            ProgressError::InvalidState(_) => "invalid_state",
            ProgressError::ContentGraphInconsistent(_) => "inconsistent_content",
            ProgressError::Internal(_) => "internal",
        }
    }
}

impl From<StoreError> for ProgressError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateKey => ProgressError::AlreadyEnrolled,
            StoreError::Backend(err) => ProgressError::Internal(err),
        }
    }
}

fn content_error(err: anyhow::Error) -> ProgressError {
    ProgressError::Internal(err.context("Content service request failed"))
}

fn inconsistent(message: String) -> ProgressError {
    tracing::error!("Content graph inconsistency: {}", message);
    ProgressError::ContentGraphInconsistent(message)
}

fn observe<T>(operation: &str, result: Result<T, ProgressError>) -> Result<T, ProgressError> {
    match &result {
        Ok(_) => record_progress_operation(operation, "ok"),
        Err(err) => {
            record_progress_operation(operation, err.outcome());
            if let ProgressError::Internal(source) = err {
                tracing::error!("{} failed: {:#}", operation, source);
            }
        }
    }
    result
}

/// Completion percentage of a position inside a course.
///
/// Each lesson weighs `100 / lessons`, split evenly among its parts and
/// again among the current part's tests. Being on a part without a current
/// test counts as its first test. A part without tests counts as a single
/// unit. The result is clamped to `[0, 100]`.
pub fn completion_percentage(
    lessons: usize,
    lesson_ordem: i64,
    parts: usize,
    part_ordem: i64,
    tests: usize,
    test_ordem: Option<i64>,
) -> f64 {
    let per_lesson = 100.0 / lessons as f64;
    let per_part = per_lesson / parts as f64;
    let per_test = per_part / tests.max(1) as f64;

    let completion = per_lesson * (lesson_ordem - 1) as f64
        + per_part * (part_ordem - 1) as f64
        + per_test * test_ordem.unwrap_or(1) as f64;

    completion.clamp(0.0, 100.0)
}

/// Moves students through a course's content graph.
pub struct ProgressionService {
    content: Arc<dyn ContentGraph>,
    store: Arc<dyn ProgressStore>,
    events: EventQueue,
}

impl ProgressionService {
    pub fn new(
        content: Arc<dyn ContentGraph>,
        store: Arc<dyn ProgressStore>,
        events: EventQueue,
    ) -> Self {
        Self {
            content,
            store,
            events,
        }
    }

    pub fn from_state(state: &AppState) -> Self {
        Self::new(
            state.content.clone(),
            state.store.clone(),
            state.events.clone(),
        )
    }

    pub async fn list_progress(&self, user_id: &str) -> Result<Vec<ProgressRecord>, ProgressError> {
        let result = self.store.find_by_user(user_id).await.map_err(Into::into);
        observe("list_progress", result)
    }

    /// Enrols the user on lesson #1 / part #1 of the course.
    pub async fn start_course(
        &self,
        user_id: &str,
        course_id: i64,
    ) -> Result<ProgressRecord, ProgressError> {
        let result = self.start_course_inner(user_id, course_id).await;
        observe("start_course", result)
    }

    async fn start_course_inner(
        &self,
        user_id: &str,
        course_id: i64,
    ) -> Result<ProgressRecord, ProgressError> {
        let lessons = self
            .content
            .lessons_by_course(course_id)
            .await
            .map_err(content_error)?;
        let first_lesson = find_by_ordem(&lessons, 1)
            .ok_or_else(|| inconsistent(format!("course {} has no lesson #1", course_id)))?;

        let parts = self
            .content
            .parts_by_lesson(first_lesson.id)
            .await
            .map_err(content_error)?;
        let first_part = find_by_ordem(&parts, 1)
            .ok_or_else(|| inconsistent(format!("lesson {} has no part #1", first_lesson.id)))?;

        let record = ProgressRecord::started(user_id, course_id, first_lesson.id, first_part.id);
        let saved = self.store.save(&record).await?;

        tracing::info!(
            "Course started: user={}, course={}, lesson={}, part={}",
            user_id,
            course_id,
            first_lesson.id,
            first_part.id
        );

        Ok(saved)
    }

    /// Moves the record one step forward: next test, else next part, else
    /// next lesson, else completes the course.
    pub async fn advance_on_course(
        &self,
        user_id: &str,
        course_id: i64,
    ) -> Result<ProgressRecord, ProgressError> {
        let result = self.advance_inner(user_id, course_id).await;
        observe("advance_on_course", result)
    }

    async fn advance_inner(
        &self,
        user_id: &str,
        course_id: i64,
    ) -> Result<ProgressRecord, ProgressError> {
        let record = self.find_record(user_id, course_id).await?;
        if record.is_finished() {
            tracing::debug!(
                "Advance ignored, course already finished: user={}, course={}",
                user_id,
                course_id
            );
            return Ok(record);
        }

        match self.next_step(&record).await? {
            Some(advance) => {
                let position = record.position_after(&advance);
                let completion = self.calculate_completion(&record, &position).await?;
                let updated =
                    record.apply(ProgressUpdate::Position(position.with_completion(completion)));
                let saved = self.store.save(&updated).await?;

                tracing::info!(
                    "Advanced on course: user={}, course={}, level={}, completion={:.2}",
                    user_id,
                    course_id,
                    advance.level(),
                    saved.completion
                );
                Ok(saved)
            }
            None => {
                let updated = record.apply(ProgressUpdate::Complete { at: Utc::now() });
                let saved = self.store.save(&updated).await?;
                self.events.emit(ProgressEvent::course_completed(saved.clone()));

                tracing::info!("Course completed: user={}, course={}", user_id, course_id);
                Ok(saved)
            }
        }
    }

    /// First level (test, part, lesson) that has a node with `ordem + 1`.
    async fn next_step(&self, record: &ProgressRecord) -> Result<Option<Advance>, ProgressError> {
        let tests = self
            .content
            .tests_by_part(record.current_part_id)
            .await
            .map_err(content_error)?;
        let current_test = match record.current_test_id {
            Some(test_id) => Some(find_by_id(&tests, test_id).ok_or_else(|| {
                inconsistent(format!(
                    "test {} is not listed under part {}",
                    test_id, record.current_part_id
                ))
            })?),
            None => None,
        };
        if let Some(next_test) = find_by_ordem(&tests, next_sequence_number(current_test)) {
            return Ok(Some(Advance::Test {
                test_id: next_test.id,
            }));
        }

        let parts = self
            .content
            .parts_by_lesson(record.current_lesson_id)
            .await
            .map_err(content_error)?;
        let current_part = find_by_id(&parts, record.current_part_id).ok_or_else(|| {
            inconsistent(format!(
                "part {} is not listed under lesson {}",
                record.current_part_id, record.current_lesson_id
            ))
        })?;
        if let Some(next_part) = find_by_ordem(&parts, next_sequence_number(Some(current_part))) {
            return Ok(Some(Advance::Part {
                part_id: next_part.id,
            }));
        }

        let lessons = self
            .content
            .lessons_by_course(record.course_id)
            .await
            .map_err(content_error)?;
        let current_lesson = find_by_id(&lessons, record.current_lesson_id).ok_or_else(|| {
            inconsistent(format!(
                "lesson {} is not listed under course {}",
                record.current_lesson_id, record.course_id
            ))
        })?;
        if let Some(next_lesson) =
            find_by_ordem(&lessons, next_sequence_number(Some(current_lesson)))
        {
            let first_part = find_by_ordem(&next_lesson.partes, 1).ok_or_else(|| {
                inconsistent(format!("lesson {} has no part #1", next_lesson.id))
            })?;
            return Ok(Some(Advance::Lesson {
                lesson_id: next_lesson.id,
                part_id: first_part.id,
            }));
        }

        Ok(None)
    }

    async fn calculate_completion(
        &self,
        record: &ProgressRecord,
        position: &Position,
    ) -> Result<f64, ProgressError> {
        if record.status == ProgressStatus::Completed {
            return Ok(100.0);
        }

        let (lessons, parts, tests) = tokio::try_join!(
            self.content.lessons_by_course(record.course_id),
            self.content.parts_by_lesson(position.lesson_id),
            self.content.tests_by_part(position.part_id),
        )
        .map_err(content_error)?;

        let current_lesson = find_by_id(&lessons, position.lesson_id).ok_or_else(|| {
            inconsistent(format!(
                "lesson {} is not listed under course {}",
                position.lesson_id, record.course_id
            ))
        })?;
        let current_part = find_by_id(&parts, position.part_id).ok_or_else(|| {
            inconsistent(format!(
                "part {} is not listed under lesson {}",
                position.part_id, position.lesson_id
            ))
        })?;
        let test_ordem = match position.test_id {
            Some(test_id) => Some(
                find_by_id(&tests, test_id)
                    .ok_or_else(|| {
                        inconsistent(format!(
                            "test {} is not listed under part {}",
                            test_id, position.part_id
                        ))
                    })?
                    .ordem,
            ),
            None => None,
        };

        Ok(completion_percentage(
            lessons.len(),
            current_lesson.ordem,
            parts.len(),
            current_part.ordem,
            tests.len(),
            test_ordem,
        ))
    }

    /// Content the student is on. Tests come back without their answer.
    pub async fn current_step(
        &self,
        user_id: &str,
        course_id: i64,
    ) -> Result<CurrentStep, ProgressError> {
        let result = self.current_step_inner(user_id, course_id).await;
        observe("current_step", result)
    }

    async fn current_step_inner(
        &self,
        user_id: &str,
        course_id: i64,
    ) -> Result<CurrentStep, ProgressError> {
        let record = self.find_record(user_id, course_id).await?;

        if record.is_finished() {
            return Ok(CurrentStep::Finished);
        }

        match record.current_test_id {
            None => {
                let part = self
                    .content
                    .part_by_id(record.current_part_id)
                    .await
                    .map_err(content_error)?;
                Ok(CurrentStep::Part { part })
            }
            Some(test_id) => {
                let test = self
                    .content
                    .test_by_id(test_id)
                    .await
                    .map_err(content_error)?;
                Ok(CurrentStep::Test { test: test.redact() })
            }
        }
    }

    /// Stores the student's rating of a finished course.
    pub async fn evaluate(
        &self,
        user_id: &str,
        course_id: i64,
        rating: u8,
        feedback: Option<String>,
    ) -> Result<ProgressRecord, ProgressError> {
        let result = self.evaluate_inner(user_id, course_id, rating, feedback).await;
        observe("evaluate", result)
    }

    async fn evaluate_inner(
        &self,
        user_id: &str,
        course_id: i64,
        rating: u8,
        feedback: Option<String>,
    ) -> Result<ProgressRecord, ProgressError> {
        let record = self.find_record(user_id, course_id).await?;
        if !record.is_finished() {
            return Err(ProgressError::InvalidState(
                "Course not finished by user".to_string(),
            ));
        }

        let updated = record.apply(ProgressUpdate::Evaluation { rating, feedback });
        let saved = self.store.save(&updated).await?;
        self.events
            .emit(ProgressEvent::evaluation_submitted(user_id, course_id));

        tracing::info!(
            "Course evaluated: user={}, course={}, rating={}",
            user_id,
            course_id,
            rating
        );
        Ok(saved)
    }

    /// Completed courses joined with their CMS metadata.
    pub async fn certificates(&self, user_id: &str) -> Result<Vec<Certificate>, ProgressError> {
        let result = self.certificates_inner(user_id).await;
        observe("certificates", result)
    }

    async fn certificates_inner(&self, user_id: &str) -> Result<Vec<Certificate>, ProgressError> {
        let completed = self.store.find_completed_by_user(user_id).await?;
        if completed.is_empty() {
            return Ok(Vec::new());
        }

        let course_ids: Vec<i64> = completed.iter().map(|record| record.course_id).collect();
        let courses = self
            .content
            .courses_by_ids(&course_ids)
            .await
            .map_err(content_error)?;

        Ok(completed
            .into_iter()
            .map(|progress| {
                let course = courses
                    .iter()
                    .find(|course| course.id == progress.course_id)
                    .cloned();
                Certificate { progress, course }
            })
            .collect())
    }

    async fn find_record(
        &self,
        user_id: &str,
        course_id: i64,
    ) -> Result<ProgressRecord, ProgressError> {
        self.store
            .find_by_user_and_course(user_id, course_id)
            .await?
            .ok_or(ProgressError::NotFound)
    }
}
