use axum::{
    routing::{delete, get, post, put},
    Router,
};

use crate::api::handlers::{self, AppState};

pub fn create_router() -> Router<AppState> {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Application discovery
        .route("/apps/:tenant", get(handlers::get_app_names))
        .route("/apps/:tenant/:app/versions", get(handlers::get_versions))
        .route(
            "/apps/:tenant/:app/:version/:status/:branch/branches",
            get(handlers::get_branches),
        )
        // Cube CRUD and search
        .route(
            "/apps/:tenant/:app/:version/:status/:branch/cubes",
            get(handlers::search_cubes),
        )
        .route(
            "/apps/:tenant/:app/:version/:status/:branch/cubes/:name",
            get(handlers::get_cube),
        )
        .route(
            "/apps/:tenant/:app/:version/:status/:branch/cubes/:name",
            put(handlers::put_cube),
        )
        .route(
            "/apps/:tenant/:app/:version/:status/:branch/cubes/:name",
            delete(handlers::delete_cube),
        )
        // Coordinate lookup
        .route(
            "/apps/:tenant/:app/:version/:status/:branch/cubes/:name/cell",
            post(handlers::get_cell),
        )
        // Branch lifecycle
        .route(
            "/apps/:tenant/:app/:version/:status/:branch/copy",
            post(handlers::copy_branch),
        )
        .route(
            "/apps/:tenant/:app/:version/:status/:branch",
            delete(handlers::delete_branch),
        )
        .route(
            "/apps/:tenant/:app/:version/:status/:branch/release",
            post(handlers::release_version),
        )
        // App lock
        .route(
            "/apps/:tenant/:app/:version/:status/:branch/lock",
            get(handlers::get_lock_holder),
        )
        .route(
            "/apps/:tenant/:app/:version/:status/:branch/lock",
            post(handlers::lock_app),
        )
        .route(
            "/apps/:tenant/:app/:version/:status/:branch/lock",
            delete(handlers::unlock_app),
        )
}
