use axum::{
    body::Body,
    http::{Request, StatusCode, header},
    response::{IntoResponse, Response},
};
use rust_embed::Embed;

#[derive(Embed)]
#[folder = "web"]
pub struct Assets;

pub async fn serve_embedded(req: Request<Body>) -> Response {
    let path = req.uri().path().trim_start_matches('/');

    // SPA routing: anything without a file extension gets index.html
    let path = if path.is_empty() || !path.contains('.') {
        "index.html"
    } else {
        path
    };

    let Some(content) = Assets::get(path) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let mime = mime_guess::from_path(path).first_or_octet_stream();
    (
        [(header::CONTENT_TYPE, mime.as_ref().to_owned())],
        Body::from(content.data.into_owned()),
    )
        .into_response()
}
