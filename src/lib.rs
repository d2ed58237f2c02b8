use crate::api::ErrorResponse;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::error::Error;

pub mod api;
pub mod assets;
pub mod client;
pub mod config;
pub mod db;
pub mod error;
pub mod handler;
pub mod model;
pub mod routes;
pub mod session;
pub mod store;

pub fn server_error(msg: &str) -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, Json(ErrorResponse::new(msg))).into_response()
}

pub fn bad_request(msg: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(ErrorResponse::new(msg))).into_response()
}

pub fn unpack_error(err: &(dyn Error)) -> String {
    let mut parts = Vec::new();
    parts.push(err.to_string());
    let mut current = err.source();
    while let Some(source) = current {
        parts.push(source.to_string());
        current = source.source();
    }
    parts.join(": ")
}
