use axum::{
    http::{header, Method},
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub mod config;
pub mod extractors;
pub mod handlers;
pub mod metrics;
pub mod middlewares;
pub mod models;
pub mod services;
pub mod telemetry;

pub use config::Config;
pub use services::AppState;

pub fn create_router(app_state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_origin(tower_http::cors::Any);

    Router::new()
        .route("/health", get(handlers::health_check))
        .route(
            "/metrics",
            get(handlers::metrics_handler)
                .layer(middleware::from_fn(handlers::metrics_auth_middleware)),
        )
        .nest(
            "/api/v2/course-taken",
            course_taken_routes()
                .route_layer(middleware::from_fn(
                    middlewares::auth::student_guard_middleware,
                ))
                .route_layer(middleware::from_fn_with_state(
                    app_state.clone(),
                    middlewares::auth::auth_middleware,
                ))
                .layer(cors),
        )
        .with_state(app_state)
        .layer(middleware::from_fn(
            middlewares::metrics::metrics_middleware,
        ))
        .layer(TraceLayer::new_for_http())
}

fn course_taken_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/user/{user_id}",
            get(handlers::course_taken::list_progress),
        )
        .route(
            "/start-course",
            post(handlers::course_taken::start_course),
        )
        .route(
            "/advance-on-course/user/{user_id}/course/{course_id}",
            post(handlers::course_taken::advance_on_course),
        )
        .route(
            "/current-step/user/{user_id}/course/{course_id}",
            get(handlers::course_taken::current_step),
        )
        .route(
            "/evaluate/user/{user_id}/course/{course_id}",
            post(handlers::course_taken::evaluate_course),
        )
        .route(
            "/certificate/user/{user_id}",
            get(handlers::course_taken::certificates),
        )
}
