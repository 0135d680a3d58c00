use axum::{
    Router,
    extract::{Path, Query, State, rejection::QueryRejection},
    http::{HeaderMap, Method, StatusCode, Uri, header},
    response::{Html, IntoResponse, Response},
    routing,
};
use rearch::Container;
use thiserror::Error;
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::{
    api::CreateParams,
    link_repo::StorageError,
    link_service::{CreateLinkError, CreateOutcome, link_service_capsule},
    serializer::{self, Rendered},
};

pub fn router(container: Container) -> Router {
    Router::new()
        .route("/api", routing::get(create_link))
        .route("/{id}/", routing::get(redirect_to_link))
        .fallback(route_not_found)
        .method_not_allowed_fallback(method_not_allowed)
        .with_state(container)
}

#[instrument(skip(container))]
async fn redirect_to_link(
    State(container): State<Container>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let location = container
        .read(link_service_capsule)
        .resolve(&id)
        .await?
        .unwrap_or_else(|| {
            info!(id, "Unknown short link; redirecting to root");
            "/".to_owned()
        });
    Ok((StatusCode::FOUND, [(header::LOCATION, location)]).into_response())
}

#[instrument(skip(container, headers))]
async fn create_link(
    State(container): State<Container>,
    headers: HeaderMap,
    uri: Uri,
    query: Result<Query<Vec<(String, String)>>, QueryRejection>,
) -> Result<Response, AppError> {
    let Query(pairs) = query?;
    let params: CreateParams = pairs.into_iter().collect();
    let base_url = request_base_url(&headers, &uri);

    let CreateOutcome { format, response } = container
        .read(link_service_capsule)
        .create(params, &base_url)
        .await?;

    let Rendered { content_type, body } = serializer::render(&response, format)?;
    Ok(([(header::CONTENT_TYPE, content_type)], body).into_response())
}

async fn route_not_found(method: Method, uri: Uri) -> AppError {
    AppError::RouteNotFound {
        method,
        path: uri.path().to_owned(),
    }
}

async fn method_not_allowed(method: Method, uri: Uri) -> AppError {
    AppError::MethodNotAllowed {
        method,
        path: uri.path().to_owned(),
    }
}

/// `<scheme>://<host>` the request was made against. The scheme is only known
/// when the request target is in absolute form; `http` otherwise.
fn request_base_url(headers: &HeaderMap, uri: &Uri) -> String {
    let scheme = uri.scheme_str().unwrap_or("http");
    format!("{scheme}://{}", request_host(headers, uri))
}

fn request_host<'a>(headers: &'a HeaderMap, uri: &'a Uri) -> &'a str {
    headers
        .get(header::HOST)
        .and_then(|host| host.to_str().ok())
        .or_else(|| uri.authority().map(|authority| authority.as_str()))
        .unwrap_or("localhost")
}

/// Every failure that is not a validation failure ends up here and is
/// rendered as a small HTML fragment.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    CreateLink(#[from] CreateLinkError),
    #[error(transparent)]
    Render(#[from] serde_json::Error),
    #[error(transparent)]
    Query(#[from] QueryRejection),
    #[error("No route found for \"{method} {path}\"")]
    RouteNotFound { method: Method, path: String },
    #[error("No route found for \"{method} {path}\": Method Not Allowed")]
    MethodNotAllowed { method: Method, path: String },
}

impl AppError {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Query(rejection) => rejection.status(),
            Self::RouteNotFound { .. } => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            Self::Storage(_) | Self::CreateLink(_) | Self::Render(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    #[must_use]
    pub const fn classification(&self) -> &'static str {
        match self {
            Self::Storage(_) | Self::CreateLink(CreateLinkError::Storage(_)) => "StorageError",
            Self::CreateLink(CreateLinkError::IdExhausted { .. }) => "IdExhaustedError",
            Self::Render(_) => "SerializationError",
            Self::Query(_) => "QueryRejection",
            Self::RouteNotFound { .. } => "RouteNotFound",
            Self::MethodNotAllowed { .. } => "MethodNotAllowed",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let err_uuid = Uuid::new_v4();
        if status.is_server_error() {
            error!(?err_uuid, error = ?self, "Encountered an error during a request");
        } else {
            info!(?err_uuid, error = %self, "Rejected a request");
        }

        let body = format!(
            "<p><strong>ERROR {code}</strong></p>\n<p>Exception: {class}</p>\n<p>{message}</p>\n",
            code = status.as_u16(),
            class = self.classification(),
            message = self,
        );
        (status, Html(body)).into_response()
    }
}
