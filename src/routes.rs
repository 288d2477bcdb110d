// src/routes.rs

use axum::{
    Router, http::Method, middleware,
    routing::{delete, get, post, put},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    handlers::{exam, grading, question, session, susulan},
    state::AppState,
    utils::jwt::{auth_middleware, teacher_middleware},
};

/// Assembles the main application router.
///
/// * Student session routes need authentication only.
/// * Exam administration routes additionally require the teacher role.
/// * Applies global middleware (Trace, CORS).
pub fn create_router(state: AppState) -> Router {
    let origins = [
        "http://localhost:3000".parse().unwrap(),
        "http://127.0.0.1:3000".parse().unwrap(),
    ];

    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
        ]);

    let session_routes = Router::new()
        .route("/{exam_id}/session", post(session::enter_session))
        .route("/{exam_id}/session/answers", put(session::save_answer))
        .route("/{exam_id}/session/finalize", post(session::finalize))
        .route("/{exam_id}/session/result", get(session::result));

    let teacher_routes = Router::new()
        .route("/", post(exam::create_exam).get(exam::list_exams))
        .route("/{exam_id}", get(exam::get_exam).put(exam::update_exam))
        .route("/{exam_id}/publish", post(exam::publish_exam))
        .route("/{exam_id}/finish", post(exam::finish_exam))
        .route("/{exam_id}/questions", post(question::create_question))
        .route(
            "/{exam_id}/questions/{question_id}",
            delete(question::delete_question),
        )
        .route("/{exam_id}/submissions", get(grading::list_submissions))
        .route(
            "/{exam_id}/submissions/{submission_id}",
            get(grading::get_submission),
        )
        .route(
            "/{exam_id}/submissions/{submission_id}/answers/{question_id}/grade",
            post(grading::grade_essay),
        )
        .route(
            "/{exam_id}/susulan",
            post(susulan::create_grant).get(susulan::list_grants),
        )
        .route(
            "/{exam_id}/susulan/{grant_id}/revoke",
            post(susulan::revoke_grant),
        )
        // Teacher role check runs after authentication.
        .layer(middleware::from_fn(teacher_middleware));

    let exam_routes = session_routes
        .merge(teacher_routes)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new()
        .nest("/api/exams", exam_routes)
        // Global Middleware (applied from outside in)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
