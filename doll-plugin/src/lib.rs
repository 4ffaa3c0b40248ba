use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, Method, Response, Uri};
pub use hyper_backend::HyperService;
use std::fmt::Debug;

pub mod auth;
mod hyper_backend;
#[cfg(test)]
mod test_models;

/// Something that may answer a request. Returning `None` lets the next
/// plugin try.
#[async_trait]
pub trait HttpPlugin: Debug + Sync + Send {
    async fn respond_to_request(
        &self,
        method: &Method,
        uri: &Uri,
        headers: &HeaderMap,
    ) -> Option<Response<Bytes>>;
}
