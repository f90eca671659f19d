mod common;

use axum::http::StatusCode;
use common::{create_test_app, send, token_for};
use course_progress_api::models::ProgressEvent;
use serde_json::json;

const BASE: &str = "/api/v2/course-taken";
const USER: &str = "student-1";

fn uri(path: &str) -> String {
    format!("{}{}", BASE, path)
}

#[tokio::test]
async fn test_requests_without_token_are_unauthorized() {
    let app = create_test_app();

    let (status, _) = send(&app.router, "GET", &uri("/user/student-1"), None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(
        &app.router,
        "GET",
        &uri("/user/student-1"),
        Some("not-a-jwt"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_teacher_role_is_forbidden() {
    let app = create_test_app();
    let token = token_for("teacher-1", "teacher");

    let (status, _) = send(&app.router, "GET", &uri("/user/teacher-1"), Some(&token), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_start_course_creates_record() {
    let app = create_test_app();
    let token = token_for(USER, "student");

    let (status, body) = send(
        &app.router,
        "POST",
        &uri("/start-course"),
        Some(&token),
        Some(json!({ "userId": USER, "courseId": 1 })),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["userId"], USER);
    assert_eq!(body["courseId"], 1);
    assert_eq!(body["currentLessonId"], 10);
    assert_eq!(body["currentPartId"], 100);
    assert!(body["currentTestId"].is_null());
    assert_eq!(body["status"], "IN_PROGRESS");
    assert_eq!(body["completion"], 0.0);
    assert!(body["id"].is_string());

    let (status, body) = send(&app.router, "GET", &uri("/user/student-1"), Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().map(Vec::len), Some(1));
}

#[tokio::test]
async fn test_start_course_twice_conflicts() {
    let app = create_test_app();
    let token = token_for(USER, "student");
    let request = json!({ "userId": USER, "courseId": 1 });

    let (status, _) = send(
        &app.router,
        "POST",
        &uri("/start-course"),
        Some(&token),
        Some(request.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send(
        &app.router,
        "POST",
        &uri("/start-course"),
        Some(&token),
        Some(request),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["status"], 409);
    assert_eq!(app.store.write_count(), 1);
}

#[tokio::test]
async fn test_start_course_validation() {
    let app = create_test_app();
    let token = token_for(USER, "student");

    let (status, body) = send(
        &app.router,
        "POST",
        &uri("/start-course"),
        Some(&token),
        Some(json!({ "userId": USER, "courseId": 0 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], 400);

    let (status, body) = send(
        &app.router,
        "POST",
        &uri("/start-course"),
        Some(&token),
        Some(json!({ "courseId": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].is_string());
    assert_eq!(app.store.write_count(), 0);
}

#[tokio::test]
async fn test_start_unknown_course_reports_inconsistent_content() {
    let app = create_test_app();
    let token = token_for(USER, "student");

    let (status, body) = send(
        &app.router,
        "POST",
        &uri("/start-course"),
        Some(&token),
        Some(json!({ "userId": USER, "courseId": 99 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["status"], 502);
    assert_eq!(app.store.write_count(), 0);
}

#[tokio::test]
async fn test_advance_without_enrollment_is_not_found() {
    let app = create_test_app();
    let token = token_for(USER, "student");

    let (status, body) = send(
        &app.router,
        "POST",
        &uri("/advance-on-course/user/student-1/course/1"),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["status"], 404);
    assert_eq!(app.store.write_count(), 0);

    let (status, _) = send(
        &app.router,
        "GET",
        &uri("/current-step/user/student-1/course/1"),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_single_part_course_walkthrough() {
    let mut app = create_test_app();
    let token = token_for(USER, "student");
    let advance = uri("/advance-on-course/user/student-1/course/2");
    let step = uri("/current-step/user/student-1/course/2");

    let (status, _) = send(
        &app.router,
        "POST",
        &uri("/start-course"),
        Some(&token),
        Some(json!({ "userId": USER, "courseId": 2 })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send(&app.router, "GET", &step, Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["doing"], "PART");
    assert_eq!(body["part"]["id"], 200);
    assert_eq!(body["part"]["conteudo"], "Part 200 body");

    let (status, body) = send(&app.router, "POST", &advance, Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["currentTestId"], 2000);
    assert_eq!(body["completion"], 50.0);

    let (_, body) = send(&app.router, "GET", &step, Some(&token), None).await;
    assert_eq!(body["doing"], "TEST");
    assert_eq!(body["test"]["id"], 2000);
    assert_eq!(body["test"]["pergunta"], "Question 2000");
    assert!(body["test"].get("alternativa_certa").is_none());

    let (_, body) = send(&app.router, "POST", &advance, Some(&token), None).await;
    assert_eq!(body["currentTestId"], 2001);
    assert_eq!(body["completion"], 100.0);
    assert_eq!(body["status"], "IN_PROGRESS");
    assert!(app.drain_events().is_empty());

    let (_, body) = send(&app.router, "POST", &advance, Some(&token), None).await;
    assert_eq!(body["status"], "COMPLETED");
    assert_eq!(body["completion"], 100.0);
    assert!(body["completionDate"].is_string());

    let (_, body) = send(&app.router, "GET", &step, Some(&token), None).await;
    assert_eq!(body["doing"], "FINISHED");

    // Further advances leave the finished record untouched.
    let writes = app.store.write_count();
    let (status, body) = send(&app.router, "POST", &advance, Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "COMPLETED");
    assert_eq!(app.store.write_count(), writes);

    let events = app.drain_events();
    assert_eq!(events.len(), 1);
    match &events[0] {
        ProgressEvent::CourseCompleted { record, .. } => {
            assert_eq!(record.user_id, USER);
            assert_eq!(record.course_id, 2);
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test]
async fn test_multi_lesson_course_crosses_parts_and_lessons() {
    let app = create_test_app();
    let token = token_for(USER, "student");
    let advance = uri("/advance-on-course/user/student-1/course/1");

    send(
        &app.router,
        "POST",
        &uri("/start-course"),
        Some(&token),
        Some(json!({ "userId": USER, "courseId": 1 })),
    )
    .await;

    let mut positions = Vec::new();
    for _ in 0..4 {
        let (status, body) = send(&app.router, "POST", &advance, Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        positions.push((
            body["currentLessonId"].as_i64(),
            body["currentPartId"].as_i64(),
            body["currentTestId"].as_i64(),
        ));
    }

    assert_eq!(
        positions,
        vec![
            (Some(10), Some(100), Some(1000)),
            (Some(10), Some(100), Some(1001)),
            (Some(10), Some(101), None),
            (Some(11), Some(110), None),
        ]
    );

    let (_, body) = send(&app.router, "POST", &advance, Some(&token), None).await;
    assert_eq!(body["status"], "COMPLETED");
}

#[tokio::test]
async fn test_cms_outage_is_internal_error() {
    let app = create_test_app();
    let token = token_for(USER, "student");

    send(
        &app.router,
        "POST",
        &uri("/start-course"),
        Some(&token),
        Some(json!({ "userId": USER, "courseId": 2 })),
    )
    .await;
    app.graph.set_failing(true);

    let (status, body) = send(
        &app.router,
        "POST",
        &uri("/advance-on-course/user/student-1/course/2"),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["status"], 500);
    assert_eq!(app.store.write_count(), 1);
}

#[tokio::test]
async fn test_store_outage_is_opaque_internal_error() {
    let app = create_test_app();
    let token = token_for(USER, "student");
    app.store.set_failing_saves(true);

    let (status, body) = send(
        &app.router,
        "POST",
        &uri("/start-course"),
        Some(&token),
        Some(json!({ "userId": USER, "courseId": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        body,
        json!({ "message": "Internal server error", "status": 500 })
    );
    assert_eq!(app.store.write_count(), 0);
}

#[tokio::test]
async fn test_completion_fetch_failure_leaves_record_untouched() {
    let app = create_test_app();
    let token = token_for(USER, "student");

    send(
        &app.router,
        "POST",
        &uri("/start-course"),
        Some(&token),
        Some(json!({ "userId": USER, "courseId": 2 })),
    )
    .await;
    app.graph.fail_endpoint("lessons");

    let (status, body) = send(
        &app.router,
        "POST",
        &uri("/advance-on-course/user/student-1/course/2"),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["message"], "Internal server error");
    assert_eq!(app.store.write_count(), 1);

    let (_, body) = send(&app.router, "GET", &uri("/user/student-1"), Some(&token), None).await;
    assert!(body[0]["currentTestId"].is_null());
    assert_eq!(body[0]["completion"], 0.0);
}

#[tokio::test]
async fn test_non_numeric_course_id_is_json_bad_request() {
    let app = create_test_app();
    let token = token_for(USER, "student");

    for (method, path) in [
        ("POST", "/advance-on-course/user/student-1/course/abc"),
        ("GET", "/current-step/user/student-1/course/abc"),
        ("POST", "/evaluate/user/student-1/course/abc"),
    ] {
        let (status, body) = send(
            &app.router,
            method,
            &uri(path),
            Some(&token),
            Some(json!({ "rating": 5 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{} {}", method, path);
        assert_eq!(body["status"], 400);
        assert!(body["message"]
            .as_str()
            .is_some_and(|message| message.starts_with("Invalid path parameters")));
    }
}

async fn complete_course(app: &common::TestApp, token: &str, course_id: i64) {
    send(
        &app.router,
        "POST",
        &uri("/start-course"),
        Some(token),
        Some(json!({ "userId": USER, "courseId": course_id })),
    )
    .await;

    let advance = uri(&format!(
        "/advance-on-course/user/{}/course/{}",
        USER, course_id
    ));
    for _ in 0..10 {
        let (_, body) = send(&app.router, "POST", &advance, Some(token), None).await;
        if body["status"] == "COMPLETED" {
            return;
        }
    }
    panic!("course {} never completed", course_id);
}

#[tokio::test]
async fn test_evaluate_requires_finished_course() {
    let mut app = create_test_app();
    let token = token_for(USER, "student");
    let evaluate = uri("/evaluate/user/student-1/course/2");

    send(
        &app.router,
        "POST",
        &uri("/start-course"),
        Some(&token),
        Some(json!({ "userId": USER, "courseId": 2 })),
    )
    .await;

    let (status, body) = send(
        &app.router,
        "POST",
        &evaluate,
        Some(&token),
        Some(json!({ "rating": 8 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Course not finished by user");
    assert!(app.drain_events().is_empty());
}

#[tokio::test]
async fn test_evaluate_finished_course() {
    let mut app = create_test_app();
    let token = token_for(USER, "student");
    complete_course(&app, &token, 2).await;
    app.drain_events();

    let (status, _) = send(
        &app.router,
        "POST",
        &uri("/evaluate/user/student-1/course/2"),
        Some(&token),
        Some(json!({ "rating": 11 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(
        &app.router,
        "POST",
        &uri("/evaluate/user/student-1/course/2"),
        Some(&token),
        Some(json!({ "rating": 9, "feedback": "Clear explanations" })),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(body.is_null());

    let (_, body) = send(&app.router, "GET", &uri("/user/student-1"), Some(&token), None).await;
    assert_eq!(body[0]["rating"], 9);
    assert_eq!(body[0]["feedback"], "Clear explanations");

    let events = app.drain_events();
    assert_eq!(events.len(), 1);
    assert!(matches!(
        &events[0],
        ProgressEvent::EvaluationSubmitted { course_id: 2, .. }
    ));
}

#[tokio::test]
async fn test_certificates_list_completed_courses_only() {
    let app = create_test_app();
    let token = token_for(USER, "student");

    let (status, body) = send(
        &app.router,
        "GET",
        &uri("/certificate/user/student-1"),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([]));

    complete_course(&app, &token, 2).await;
    send(
        &app.router,
        "POST",
        &uri("/start-course"),
        Some(&token),
        Some(json!({ "userId": USER, "courseId": 1 })),
    )
    .await;

    let (status, body) = send(
        &app.router,
        "GET",
        &uri("/certificate/user/student-1"),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let certificates = body.as_array().cloned().unwrap_or_default();
    assert_eq!(certificates.len(), 1);
    assert_eq!(certificates[0]["courseId"], 2);
    assert_eq!(certificates[0]["status"], "COMPLETED");
    assert_eq!(certificates[0]["course"]["titulo"], "Async Rust");
}

#[tokio::test]
async fn test_health_reports_store() {
    let app = create_test_app();

    let (status, body) = send(&app.router, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["dependencies"]["progress_store"]["status"], "healthy");
    assert_eq!(body["dependencies"]["redis"]["status"], "not_configured");
}

#[tokio::test]
async fn test_metrics_require_basic_auth() {
    let app = create_test_app();

    let (status, _) = send(&app.router, "GET", "/metrics", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}
