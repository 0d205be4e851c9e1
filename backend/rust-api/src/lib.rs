use axum::{
    extract::Request,
    http::{header, HeaderValue, Method},
    middleware::{self, Next},
    response::Response,
    routing::{get, post, put},
    Router,
};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

pub mod config;
pub mod extractors;
pub mod handlers;
pub mod metrics;
pub mod middlewares;
pub mod models;
pub mod services;
pub mod utils;

pub use config::Config;
pub use services::AppState;

/// CSP middleware adds Content-Security-Policy header to all responses
async fn csp_middleware(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    response.headers_mut().insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static(
            "default-src 'self'; \
             script-src 'self' 'unsafe-inline'; \
             style-src 'self' 'unsafe-inline'; \
             img-src 'self' data: https:; \
             connect-src 'self'",
        ),
    );
    response
}

pub fn create_router(app_state: std::sync::Arc<services::AppState>) -> Router {
    // CORS: exact origin from config when set, permissive otherwise (dev)
    let allow_origin = match app_state
        .config
        .cors_origin
        .as_deref()
        .and_then(|origin| origin.parse::<HeaderValue>().ok())
    {
        Some(origin) => AllowOrigin::exact(origin),
        None => AllowOrigin::any(),
    };
    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_origin(allow_origin);

    Router::new()
        // Public endpoints (no auth required)
        .route("/health", get(handlers::health_check))
        // Metrics endpoint with Basic Auth protection
        .route(
            "/metrics",
            get(handlers::metrics_handler)
                .layer(middleware::from_fn(handlers::metrics_auth_middleware)),
        )
        // Auth endpoints (mixed: some public, some protected)
        .nest("/api/auth", auth_routes(app_state.clone()))
        // Protected resource endpoints (require JWT)
        .nest("/api/users", protect(users_routes(), &app_state))
        .nest("/api/classes", protect(classes_routes(), &app_state))
        .nest("/api/questionbank", protect(questionbank_routes(), &app_state))
        .nest("/api/homework", protect(homework_routes(), &app_state))
        .nest("/api/flashcards", protect(flashcards_routes(), &app_state))
        .nest("/api/rankings", protect(rankings_routes(), &app_state))
        .nest("/api/bluebook", protect(bluebook_routes(), &app_state))
        .with_state(app_state)
        .layer(cors)
        .layer(middleware::from_fn(csp_middleware)) // Apply CSP to all responses
        .layer(middleware::from_fn(
            middlewares::metrics::metrics_middleware,
        ))
        .layer(middleware::from_fn(
            middlewares::trace::trace_context_middleware,
        ))
        .layer(TraceLayer::new_for_http())
}

/// JWT auth + general rate limiting for a resource router
fn protect(
    router: Router<std::sync::Arc<services::AppState>>,
    app_state: &std::sync::Arc<services::AppState>,
) -> Router<std::sync::Arc<services::AppState>> {
    router
        .layer(middleware::from_fn_with_state(
            app_state.clone(),
            middlewares::rate_limit::rate_limit_middleware,
        ))
        .layer(middleware::from_fn_with_state(
            app_state.clone(),
            middlewares::auth::auth_middleware,
        ))
}

fn users_routes() -> Router<std::sync::Arc<services::AppState>> {
    Router::new().route(
        "/me",
        get(handlers::users::me).patch(handlers::users::update_me),
    )
}

fn classes_routes() -> Router<std::sync::Arc<services::AppState>> {
    Router::new()
        .route(
            "/",
            get(handlers::classes::list_classes).post(handlers::classes::create_class),
        )
        .route(
            "/{id}",
            get(handlers::classes::get_class)
                .patch(handlers::classes::update_class)
                .delete(handlers::classes::delete_class),
        )
        .route("/{id}/students", post(handlers::classes::add_student))
        .route(
            "/{id}/students/{student_id}",
            axum::routing::delete(handlers::classes::remove_student),
        )
}

fn questionbank_routes() -> Router<std::sync::Arc<services::AppState>> {
    Router::new()
        .route(
            "/",
            get(handlers::questionbank::list_questions)
                .post(handlers::questionbank::create_question),
        )
        .route(
            "/{id}",
            get(handlers::questionbank::get_question)
                .patch(handlers::questionbank::update_question)
                .delete(handlers::questionbank::delete_question),
        )
}

fn homework_routes() -> Router<std::sync::Arc<services::AppState>> {
    Router::new()
        .route(
            "/",
            get(handlers::homework::list_homework).post(handlers::homework::create_homework),
        )
        .route(
            "/{id}",
            get(handlers::homework::get_homework)
                .patch(handlers::homework::update_homework)
                .delete(handlers::homework::delete_homework),
        )
        .route("/{id}/submit", post(handlers::homework::submit_homework))
        .route(
            "/{id}/submissions",
            get(handlers::homework::list_submissions),
        )
        .route(
            "/{id}/submissions/{sid}/grade",
            put(handlers::homework::grade_submission),
        )
}

fn flashcards_routes() -> Router<std::sync::Arc<services::AppState>> {
    Router::new()
        .route(
            "/",
            get(handlers::flashcards::list_flashcards).post(handlers::flashcards::create_flashcard),
        )
        // Static segment registered before the dynamic one
        .route("/review", get(handlers::flashcards::review_batch))
        .route(
            "/{id}",
            get(handlers::flashcards::get_flashcard)
                .patch(handlers::flashcards::update_flashcard)
                .delete(handlers::flashcards::delete_flashcard),
        )
        .route("/{id}/review", post(handlers::flashcards::review_flashcard))
}

fn rankings_routes() -> Router<std::sync::Arc<services::AppState>> {
    // The recalculation trigger is staff-only; everything else is
    // readable by any authenticated user
    let update_route = Router::new()
        .route("/update", post(handlers::rankings::recalculate))
        .route_layer(middleware::from_fn(
            middlewares::auth::staff_guard_middleware,
        ));

    Router::new()
        .route("/leaderboard", get(handlers::rankings::leaderboard))
        .route("/me", get(handlers::rankings::personal_ranking))
        .merge(update_route)
}

fn bluebook_routes() -> Router<std::sync::Arc<services::AppState>> {
    Router::new()
        .route("/exams", get(handlers::bluebook::list_exams))
        .route("/exams/{id}", get(handlers::bluebook::get_exam))
        .route(
            "/attempts",
            get(handlers::bluebook::list_attempts).post(handlers::bluebook::start_attempt),
        )
        .route("/attempts/{id}", get(handlers::bluebook::get_attempt))
        .route(
            "/attempts/{id}/answers",
            post(handlers::bluebook::record_answer),
        )
        .route(
            "/attempts/{id}/modules/{index}/submit",
            post(handlers::bluebook::submit_module),
        )
        .route("/attempts/{id}/stream", get(handlers::sse::attempt_stream))
}

fn auth_routes(
    app_state: std::sync::Arc<services::AppState>,
) -> Router<std::sync::Arc<services::AppState>> {
    // Public routes with rate limiting
    let register_route = Router::new()
        .route("/register", post(handlers::auth::register))
        .route_layer(middleware::from_fn_with_state(
            app_state.clone(),
            middlewares::rate_limit::register_rate_limit_middleware,
        ));

    let login_route = Router::new()
        .route("/login", post(handlers::auth::login))
        .route_layer(middleware::from_fn_with_state(
            app_state.clone(),
            middlewares::rate_limit::login_rate_limit_middleware,
        ));

    let refresh_route = Router::new().route("/refresh", post(handlers::auth::refresh_token));

    let public_routes = register_route.merge(login_route).merge(refresh_route);

    // Protected routes (require JWT auth)
    let protected_routes = Router::new()
        .route("/logout", post(handlers::auth::logout))
        .route("/change-password", post(handlers::auth::change_password))
        .route_layer(middleware::from_fn_with_state(
            app_state.clone(),
            middlewares::auth::auth_middleware,
        ));

    // Merge public and protected routes
    public_routes.merge(protected_routes)
}
