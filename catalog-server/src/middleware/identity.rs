//! Identity stage: trusts `X-Remote-User`/`X-Remote-Group` set by an
//! upstream proxy. No authentication happens here — that is the proxy's
//! job; this stage only parses what it was told.

use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;

use crate::request_context::Identity;

const USER_HEADER: &str = "x-remote-user";
const GROUP_HEADER: &str = "x-remote-group";

pub async fn identity_middleware(mut req: Request, next: Next) -> Response {
    let user = req
        .headers()
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    let groups = req
        .headers()
        .get_all(GROUP_HEADER)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .collect();

    req.extensions_mut().insert(Identity { user, groups });
    next.run(req).await
}
