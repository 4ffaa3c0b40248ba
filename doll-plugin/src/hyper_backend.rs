use std::{net::IpAddr, sync::Arc};

use crate::HttpPlugin;
use doll_config::prelude::Security;
use http::StatusCode;
use hyper::{Body, Request, Response};
use tracing::{debug, error, instrument, warn};

const FORBIDDEN_MESSAGE: &str = "Access allowed only for registered users";

/// Answers one request from a configuration snapshot: authorization first,
/// then the plugins in order, then a 404.
#[derive(Clone)]
pub struct HyperService {
    security: Arc<Security>,
    backends: Arc<Vec<Arc<Box<dyn HttpPlugin>>>>,
}

impl HyperService {
    pub fn new(security: Security, plugins: Vec<Arc<Box<dyn HttpPlugin>>>) -> Self {
        Self {
            security: Arc::new(security),
            backends: Arc::new(plugins),
        }
    }

    #[instrument(skip_all, fields(http.uri = %req.uri(), http.method = %req.method()))]
    pub async fn process_plugins(
        &self,
        req: Request<Body>,
        client: Option<IpAddr>,
    ) -> Result<Response<Body>, anyhow::Error> {
        let uri = req.uri().clone();
        let method = req.method().clone();
        let headers = req.headers();

        if !crate::auth::authorize(&self.security, headers, client) {
            let client = client
                .map(|ip| ip.to_string())
                .unwrap_or_else(|| "unknown".to_owned());
            warn!("Authorization fail for {}, query: {}", client, uri);
            return Ok(Response::builder()
                .status(StatusCode::FORBIDDEN)
                .body(Body::from(FORBIDDEN_MESSAGE))?);
        }

        if self.backends.is_empty() {
            return not_found("No response in configuration".to_owned());
        }

        debug!("Incoming request");

        for backend in self.backends.iter() {
            if let Some(response) = backend.respond_to_request(&method, &uri, headers).await {
                return Ok(response.map(Body::from));
            }
        }

        debug!("No backend was configured to process request");

        not_found(format!("Not found response for query: {}", uri))
    }
}

fn not_found(message: String) -> Result<Response<Body>, anyhow::Error> {
    error!("{}", message);
    Ok(Response::builder()
        .status(StatusCode::NOT_FOUND)
        .body(Body::from(message))?)
}

#[cfg(test)]
async fn body_string(response: Response<Body>) -> String {
    let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
    String::from_utf8(body.to_vec()).unwrap()
}

#[tokio::test]
#[allow(clippy::box_default)]
async fn test_will_match_first() {
    let service = HyperService::new(
        Security::default(),
        vec![
            Arc::new(Box::new(crate::test_models::EmptyResponse::default())),
            Arc::new(Box::new(crate::test_models::ConstantResponse::default())),
        ],
    );
    let req = Request::builder().uri("/x").body(Body::empty()).unwrap();

    let response = service.process_plugins(req, None).await.unwrap();
    assert_eq!(StatusCode::OK, response.status());
    assert_eq!("const `/x`", body_string(response).await);
}

#[tokio::test]
#[allow(clippy::box_default)]
async fn test_no_match_is_not_found() {
    let service = HyperService::new(
        Security::default(),
        vec![Arc::new(Box::new(
            crate::test_models::EmptyResponse::default(),
        ))],
    );
    let req = Request::builder()
        .uri("/missing?a=1")
        .body(Body::empty())
        .unwrap();

    let response = service.process_plugins(req, None).await.unwrap();
    assert_eq!(StatusCode::NOT_FOUND, response.status());
    assert_eq!(
        "Not found response for query: /missing?a=1",
        body_string(response).await
    );
}

#[tokio::test]
async fn test_no_plugins() {
    let service = HyperService::new(Security::default(), Vec::new());
    let req = Request::builder().uri("/").body(Body::empty()).unwrap();

    let response = service.process_plugins(req, None).await.unwrap();
    assert_eq!(StatusCode::NOT_FOUND, response.status());
    assert_eq!("No response in configuration", body_string(response).await);
}

#[tokio::test]
#[allow(clippy::box_default)]
async fn test_forbidden_before_plugins() {
    let security = Security {
        username: Some("admin".to_owned()),
        ..Default::default()
    };
    let service = HyperService::new(
        security,
        vec![Arc::new(Box::new(
            crate::test_models::ConstantResponse::default(),
        ))],
    );
    let req = Request::builder().uri("/").body(Body::empty()).unwrap();

    let response = service
        .process_plugins(req, Some("127.0.0.1".parse().unwrap()))
        .await
        .unwrap();
    assert_eq!(StatusCode::FORBIDDEN, response.status());
    assert_eq!(FORBIDDEN_MESSAGE, body_string(response).await);
}
