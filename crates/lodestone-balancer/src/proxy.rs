//! Upstream forwarding leg of the request pipeline.
//!
//! The client request is buffered, hop-by-hop headers are stripped per
//! standard proxy hygiene, and the request is replayed against the selected
//! origin with `Host` rewritten. Upstream statuses of 500 and above are
//! classified as backend failures so the circuit breaker sees them; the
//! whole exchange races a fixed wall-clock deadline.

use http_body_util::{BodyExt, Full};
use hyper::body::{Body, Bytes};
use hyper::header::{HeaderMap, HeaderName, CONNECTION, HOST};
use hyper::{Request, Response};
use std::time::Duration;

use lodestone_common::error::{ErrorKind, LbError, Result};

use crate::backend::Backend;

/// Per-request upstream deadline.
pub const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(30);

/// Response type used across the data plane.
pub type ProxyResponse = Response<Full<Bytes>>;

/// Headers that are connection-scoped and never forwarded.
const HOP_BY_HOP_HEADERS: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Forwards a request to the backend origin and returns the buffered
/// upstream response.
pub(crate) async fn forward<B>(
    client: &reqwest::Client,
    backend: &Backend,
    req: Request<B>,
    timeout: Duration,
) -> Result<ProxyResponse>
where
    B: Body<Data = Bytes> + Send,
    B::Error: std::error::Error + Send + Sync + 'static,
{
    let (parts, body) = req.into_parts();

    let body = body
        .collect()
        .await
        .map_err(|e| LbError::wrap(ErrorKind::BackendError, "failed to read request body", e))?
        .to_bytes();

    let target = target_url(backend, parts.uri.path(), parts.uri.query());
    let method = parts.method;

    let mut headers = parts.headers;
    strip_hop_by_hop(&mut headers);
    // the client sets Host from the target URL
    headers.remove(HOST);

    let outcome = tokio::time::timeout(timeout, async {
        let response = client
            .request(method, target)
            .headers(headers)
            .body(body)
            .send()
            .await?;
        let status = response.status();
        let response_headers = response.headers().clone();
        let response_body = response.bytes().await?;
        Ok::<_, reqwest::Error>((status, response_headers, response_body))
    })
    .await;

    let (status, mut response_headers, response_body) = match outcome {
        Err(_) => return Err(LbError::new(ErrorKind::Timeout, "request timeout")),
        Ok(Err(e)) if e.is_timeout() => {
            return Err(LbError::wrap(ErrorKind::Timeout, "request timeout", e))
        }
        Ok(Err(e)) => {
            return Err(LbError::wrap(
                ErrorKind::BackendError,
                format!("upstream request to {} failed", backend.url),
                e,
            ))
        }
        Ok(Ok(parts)) => parts,
    };

    if status.as_u16() >= 500 {
        return Err(LbError::new(
            ErrorKind::BackendError,
            format!("backend error: {}", status.as_u16()),
        ));
    }

    strip_hop_by_hop(&mut response_headers);

    let mut response = Response::new(Full::new(response_body));
    *response.status_mut() = status;
    *response.headers_mut() = response_headers;
    Ok(response)
}

/// Joins the origin URL's path prefix with the request path and query.
fn target_url(backend: &Backend, path: &str, query: Option<&str>) -> reqwest::Url {
    let mut target = backend.url.clone();
    let prefix = target.path().trim_end_matches('/').to_string();
    target.set_path(&format!("{prefix}{path}"));
    target.set_query(query);
    target
}

/// Removes hop-by-hop headers, including any named by `Connection`.
fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let connection_named: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in connection_named {
        headers.remove(name);
    }
    for name in HOP_BY_HOP_HEADERS {
        headers.remove(name);
    }
}
