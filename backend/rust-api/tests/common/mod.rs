#![allow(dead_code)]

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use course_progress_api::{
    config::Config,
    create_router,
    middlewares::auth::{JwtClaims, JwtService},
    models::{CmsCourse, CmsLesson, CmsPart, CmsTest, ProgressEvent},
    services::{
        content_graph::InMemoryContentGraph,
        events::{event_queue, EventReceiver},
        progress_store::InMemoryProgressStore,
        AppState,
    },
};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tower::ServiceExt;

pub const JWT_SECRET: &str = "test-secret";

pub struct TestApp {
    pub router: Router,
    pub graph: InMemoryContentGraph,
    pub store: InMemoryProgressStore,
    pub events: EventReceiver,
}

impl TestApp {
    pub fn drain_events(&mut self) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

fn test_config() -> Config {
    Config {
        mongo_uri: "mongodb://unused".to_string(),
        mongo_database: "course_progress_test".to_string(),
        redis_uri: "redis://unused".to_string(),
        jwt_secret: JWT_SECRET.to_string(),
        cms_api_url: "http://cms.invalid".to_string(),
        cms_timeout_secs: 1,
        events_stream: "course_progress_events_test".to_string(),
        bind_addr: "127.0.0.1:0".to_string(),
    }
}

/// Router wired to in-memory collaborators seeded with two courses:
///
/// - course 1: lesson 10 (part 100 with tests 1000, 1001; part 101),
///   lesson 11 (part 110)
/// - course 2: lesson 20 (part 200 with tests 2000, 2001)
pub fn create_test_app() -> TestApp {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();

    let graph = InMemoryContentGraph::new();
    seed_content(&graph);
    let store = InMemoryProgressStore::new();
    let (queue, events) = event_queue();

    let state = Arc::new(AppState::from_parts(
        test_config(),
        Arc::new(graph.clone()),
        Arc::new(store.clone()),
        queue,
    ));

    TestApp {
        router: create_router(state),
        graph,
        store,
        events,
    }
}

fn node_extra(pairs: &[(&str, Value)]) -> Map<String, Value> {
    pairs
        .iter()
        .map(|(key, value)| (key.to_string(), value.clone()))
        .collect()
}

fn seed_content(graph: &InMemoryContentGraph) {
    graph.add_course(CmsCourse {
        id: 1,
        extra: node_extra(&[("titulo", json!("Ownership and borrowing"))]),
    });
    graph.add_course(CmsCourse {
        id: 2,
        extra: node_extra(&[("titulo", json!("Async Rust"))]),
    });

    for (course_id, lesson_id, ordem) in [(1, 10, 1), (1, 11, 2), (2, 20, 1)] {
        graph.add_lesson(
            course_id,
            CmsLesson {
                id: lesson_id,
                ordem,
                partes: Vec::new(),
                extra: node_extra(&[("titulo", json!(format!("Lesson {}", lesson_id)))]),
            },
        );
    }

    for (lesson_id, part_id, ordem) in [(10, 100, 1), (10, 101, 2), (11, 110, 1), (20, 200, 1)] {
        graph.add_part(
            lesson_id,
            CmsPart {
                id: part_id,
                ordem,
                extra: node_extra(&[("conteudo", json!(format!("Part {} body", part_id)))]),
            },
        );
    }

    for (part_id, test_id, ordem) in [(100, 1000, 1), (100, 1001, 2), (200, 2000, 1), (200, 2001, 2)]
    {
        graph.add_test(
            part_id,
            CmsTest {
                id: test_id,
                ordem,
                correct_answer: Some(json!("b")),
                extra: node_extra(&[
                    ("pergunta", json!(format!("Question {}", test_id))),
                    ("alternativas", json!(["a", "b", "c"])),
                ]),
            },
        );
    }
}

pub fn token_for(user_id: &str, role: &str) -> String {
    let now = chrono::Utc::now().timestamp();
    JwtService::new(JWT_SECRET)
        .generate_token(&JwtClaims {
            sub: user_id.to_string(),
            role: role.to_string(),
            exp: (now + 3600) as usize,
            iat: now as usize,
        })
        .unwrap()
}

pub async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    let body = match body {
        Some(value) => {
            builder = builder.header("content-type", "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };

    let response = app
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).to_string()))
    };
    (status, json)
}
