use clap::{ArgAction, Parser};
use std::{
    convert::Infallible,
    io,
    iter::once,
    net::{IpAddr, SocketAddr, TcpListener},
    path::PathBuf,
    sync::Arc,
};
use thiserror::Error;
use tracing::{error, info, instrument};

use doll_config::prelude::*;
use doll_plugin_http::RULE_HEADER;
use http::{
    header::{HeaderName, AUTHORIZATION},
    HeaderValue, Request, Response, StatusCode,
};
use hyper::{
    server::{conn::AddrStream, Server},
    service::{make_service_fn, service_fn},
    Body,
};
use tower::ServiceBuilder;
use tower_http::{
    propagate_header::PropagateHeaderLayer, sensitive_headers::SetSensitiveRequestHeadersLayer,
    set_header::SetResponseHeaderLayer, trace::TraceLayer,
};

use crate::config::apply_log_settings;

#[derive(Parser, Debug)]
pub struct ServerCommandConfig {
    #[clap(long = "config", short, env = "CFG_PATH", default_value = "config.json")]
    /// Location of the configuration file
    pub config_file: PathBuf,

    #[clap(long, short, env = "PORT")]
    /// Port to listen on, takes precedence over the configuration file
    pub port: Option<u16>,

    #[clap(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: IpAddr,

    #[clap(long, env = "DYNAMIC_MODE", default_value_t = true, action = ArgAction::Set)]
    /// Re-read the configuration file before every request
    pub dynamic: bool,
}

#[derive(Error, Debug)]
pub enum ListenError {
    #[error("Port {port} busy ({source})")]
    AddressInUse {
        port: u16,
        #[source]
        source: io::Error,
    },
    #[error("Server error: {0}")]
    Io(#[from] io::Error),
}

fn bind(addr: SocketAddr) -> Result<TcpListener, ListenError> {
    TcpListener::bind(addr).map_err(|source| match source.kind() {
        io::ErrorKind::AddrInUse => ListenError::AddressInUse {
            port: addr.port(),
            source,
        },
        _ => ListenError::Io(source),
    })
}

fn display_client(ip: IpAddr) -> String {
    if ip.is_loopback() {
        "localhost".to_owned()
    } else {
        ip.to_string()
    }
}

/// Shared by every connection.
struct ServerState {
    container: ConfigContainer,
    store: ConfigStore,
    dynamic: bool,
}

impl ServerState {
    #[instrument(skip_all, fields(request.id = %crate::unique_id()))]
    async fn handle(
        &self,
        req: Request<Body>,
        remote: SocketAddr,
    ) -> Result<Response<Body>, anyhow::Error> {
        info!("Request from {} to {}", display_client(remote.ip()), req.uri());

        if self.dynamic && self.store.reload(&self.container).await {
            apply_log_settings(&self.store.current().log);
        }

        let config = self.store.current();
        let service = crate::config::build_service(&config);
        match service.process_plugins(req, Some(remote.ip())).await {
            Ok(response) => Ok(response),
            Err(e) => {
                error!("{}", e);
                Ok(Response::builder()
                    .status(StatusCode::NOT_FOUND)
                    .body(Body::from(e.to_string()))?)
            }
        }
    }
}

impl ServerCommandConfig {
    pub async fn run_server(&self) -> Result<(), anyhow::Error> {
        let container = ConfigContainer::open(&self.config_file, self.port)?;
        info!("Read configuration from path: {}", container.path().display());

        let compiled = container.load().await?;
        let configuration = compiled.configuration;
        apply_log_settings(&configuration.log);

        info!("dynamic_mode - {}", self.dynamic);
        info!("log_time: {}", configuration.log.time);
        info!("Logs: {}", configuration.log.levels);

        let addr = SocketAddr::new(self.host, configuration.port);
        let state = Arc::new(ServerState {
            container,
            store: ConfigStore::new(configuration),
            dynamic: self.dynamic,
        });

        let listener = bind(addr)?;

        let make_service = make_service_fn(move |conn: &AddrStream| {
            let remote = conn.remote_addr();
            let state = state.clone();

            let real_service = service_fn(move |req: Request<Body>| {
                let state = state.clone();
                async move { state.handle(req, remote).await }
            });

            let service = ServiceBuilder::new()
                .layer(SetSensitiveRequestHeadersLayer::new(once(AUTHORIZATION)))
                // High level logging of requests and responses
                .layer(TraceLayer::new_for_http())
                .layer(SetResponseHeaderLayer::overriding(
                    HeaderName::from_static("x-doll"),
                    HeaderValue::from_static("true"),
                ))
                .layer(SetResponseHeaderLayer::if_not_present(
                    HeaderName::from_static(RULE_HEADER),
                    HeaderValue::from_static("null"),
                ))
                // Propagate `X-Request-Id`s from requests to responses
                .layer(PropagateHeaderLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .service(real_service);

            async move { Ok::<_, Infallible>(service) }
        });

        info!(target: CONSOLE_TARGET, "Server start on port: {}", addr.port());

        Server::from_tcp(listener)?.serve(make_service).await?;

        Ok(())
    }
}

#[test]
fn test_display_client() {
    assert_eq!("localhost", display_client("::1".parse().unwrap()));
    assert_eq!("localhost", display_client("127.0.0.1".parse().unwrap()));
    assert_eq!("10.2.3.4", display_client("10.2.3.4".parse().unwrap()));
}

#[test]
fn test_bind_busy_port() {
    let taken = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = taken.local_addr().unwrap();
    match bind(addr) {
        Err(ListenError::AddressInUse { port, .. }) => assert_eq!(addr.port(), port),
        other => panic!("expected a busy port, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn test_handle_reloads_in_dynamic_mode() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(&path, r#"[{"path":"/a","string":"first"}]"#).unwrap();

    let container = ConfigContainer::open(&path, None).unwrap();
    let configuration = container.load().await.unwrap().configuration;
    let state = ServerState {
        container,
        store: ConfigStore::new(configuration),
        dynamic: true,
    };
    let remote: SocketAddr = "127.0.0.1:5000".parse().unwrap();

    std::fs::write(&path, r#"[{"path":"/a","string":"second"}]"#).unwrap();
    let req = Request::builder().uri("/a").body(Body::empty()).unwrap();
    let response = state.handle(req, remote).await.unwrap();
    let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
    assert_eq!("second", String::from_utf8(body.to_vec()).unwrap());

    std::fs::write(&path, "{broken").unwrap();
    let req = Request::builder().uri("/a").body(Body::empty()).unwrap();
    let response = state.handle(req, remote).await.unwrap();
    let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
    assert_eq!("second", String::from_utf8(body.to_vec()).unwrap());
}
