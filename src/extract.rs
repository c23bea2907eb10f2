use crate::error::ApiError;
use crate::state::AppState;
use axum::body::Bytes;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use depot_library::Context;
use depot_upstream::InboundRequest;

/// A read request as the library sees it: the store authorized for the
/// caller, and the request snapshot used for upstream lookups and for
/// building absolute URLs.
pub struct Gateway {
    pub ctx: Context,
    pub request: InboundRequest,
}

impl FromRequestParts<AppState> for Gateway {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let invalid = || ApiError::BadRequest("invalid request URL".to_string());
        let root = state.root(&parts.headers).ok_or_else(invalid)?;
        let path_and_query = parts.uri.path_and_query().map_or("/", |pq| pq.as_str());
        let url = root.join(path_and_query.trim_start_matches('/')).map_err(|_| invalid())?;
        let request = InboundRequest {
            method: parts.method.clone(),
            url,
            root,
            headers: parts.headers.clone(),
            body: Bytes::new(),
        };
        Ok(Self { ctx: state.context(&parts.headers, false), request })
    }
}
