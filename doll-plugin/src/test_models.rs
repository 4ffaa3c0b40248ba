use bytes::Bytes;
use http::{header::HeaderMap, Method, Response, Uri};

/// Never answers, so the next plugin gets the request.
#[derive(Debug, Default)]
pub struct EmptyResponse {}

#[async_trait::async_trait]
impl crate::HttpPlugin for EmptyResponse {
    async fn respond_to_request(
        &self,
        _method: &Method,
        _uri: &Uri,
        _headers: &HeaderMap,
    ) -> Option<Response<Bytes>> {
        None
    }
}

/// Answers every request with its own path.
#[derive(Debug, Default)]
pub struct ConstantResponse {}

#[async_trait::async_trait]
impl crate::HttpPlugin for ConstantResponse {
    async fn respond_to_request(
        &self,
        _method: &Method,
        uri: &Uri,
        _headers: &HeaderMap,
    ) -> Option<Response<Bytes>> {
        Some(Response::new(Bytes::from(format!("const `{}`", uri.path()))))
    }
}
