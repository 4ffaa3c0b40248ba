//! Request authorization against the configured [`Security`] settings.

use base64::{
    alphabet,
    engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
    Engine,
};
use doll_config::prelude::Security;
use http::{header::AUTHORIZATION, HeaderMap};
use std::net::IpAddr;
use thiserror::Error;
use tracing::{debug, error};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum AuthError {
    #[error("Can't determine the IP of the request")]
    UnknownClientAddress,
    #[error("{0} is not an allowed address")]
    AddressNotAllowed(IpAddr),
    #[error("credentials do not match")]
    BadCredentials,
}

/// Clients are not required to pad the token.
const BASIC_TOKEN: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Credentials from an `Authorization: Basic` header. A missing or
/// malformed header yields empty credentials.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let header = headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();
        let token = header.split_whitespace().last().unwrap_or_default();

        let decoded = match BASIC_TOKEN.decode(token) {
            Ok(decoded) => String::from_utf8_lossy(&decoded).into_owned(),
            Err(_) => return Self::default(),
        };

        match decoded.split_once(':') {
            Some((username, password)) => Self {
                username: username.to_owned(),
                password: password.to_owned(),
            },
            None => Self {
                username: decoded,
                password: String::new(),
            },
        }
    }
}

/// IPv4-mapped IPv6 clients are compared as IPv4.
fn canonical_ip(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(ip),
        IpAddr::V4(_) => ip,
    }
}

pub fn check(
    security: &Security,
    headers: &HeaderMap,
    client: Option<IpAddr>,
) -> Result<(), AuthError> {
    if security.is_empty() {
        return Ok(());
    }

    if let Some(allowed) = &security.allowed_ips {
        let client = canonical_ip(client.ok_or(AuthError::UnknownClientAddress)?);
        if !client.is_loopback() {
            let permitted = match client {
                IpAddr::V4(v4) => allowed.contains(&v4),
                IpAddr::V6(_) => false,
            };
            if !permitted {
                return Err(AuthError::AddressNotAllowed(client));
            }
        }
    }

    if security.username.is_none() && security.password.is_none() {
        return Ok(());
    }

    let credentials = Credentials::from_headers(headers);
    if let Some(username) = &security.username {
        if *username != credentials.username {
            return Err(AuthError::BadCredentials);
        }
    }
    if let Some(password) = &security.password {
        if *password != credentials.password {
            return Err(AuthError::BadCredentials);
        }
    }

    Ok(())
}

/// `true` when the request may be served. Denials never propagate as errors.
pub fn authorize(security: &Security, headers: &HeaderMap, client: Option<IpAddr>) -> bool {
    match check(security, headers, client) {
        Ok(()) => true,
        Err(e @ AuthError::UnknownClientAddress) => {
            error!("Authorization: {}", e);
            false
        }
        Err(e) => {
            debug!("Authorization: {}", e);
            false
        }
    }
}

#[cfg(test)]
fn basic(user_pass: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    let value = format!(
        "Basic {}",
        base64::engine::general_purpose::STANDARD.encode(user_pass)
    );
    headers.insert(AUTHORIZATION, value.parse().unwrap());
    headers
}

#[cfg(test)]
fn ip_only(ips: &[&str]) -> Security {
    Security {
        allowed_ips: Some(ips.iter().map(|ip| ip.parse().unwrap()).collect()),
        ..Default::default()
    }
}

#[test]
fn test_empty_security_allows_everything() {
    assert!(authorize(&Security::default(), &HeaderMap::new(), None));
}

#[test]
fn test_ip_allow_list() {
    let security = ip_only(&["10.0.0.5"]);
    let headers = HeaderMap::new();
    assert!(authorize(&security, &headers, Some("10.0.0.5".parse().unwrap())));
    assert!(authorize(&security, &headers, Some("::ffff:10.0.0.5".parse().unwrap())));
    assert_eq!(
        Err(AuthError::AddressNotAllowed("10.0.0.55".parse().unwrap())),
        check(&security, &headers, Some("10.0.0.55".parse().unwrap()))
    );
    assert!(!authorize(&security, &headers, Some("192.168.1.1".parse().unwrap())));
}

#[test]
fn test_loopback_bypasses_ip_restriction() {
    let security = ip_only(&["10.0.0.5"]);
    let headers = HeaderMap::new();
    assert!(authorize(&security, &headers, Some("::1".parse().unwrap())));
    assert!(authorize(&security, &headers, Some("127.0.0.1".parse().unwrap())));
}

#[test]
fn test_unknown_client_with_ip_restriction() {
    let security = ip_only(&["10.0.0.5"]);
    assert_eq!(
        Err(AuthError::UnknownClientAddress),
        check(&security, &HeaderMap::new(), None)
    );
}

#[test]
fn test_basic_credentials() {
    let security = Security {
        username: Some("a".to_owned()),
        password: Some("b".to_owned()),
        ..Default::default()
    };
    let client = Some("10.1.1.1".parse().unwrap());
    assert!(authorize(&security, &basic("a:b"), client));
    assert!(!authorize(&security, &basic("a:x"), client));
    assert!(!authorize(&security, &HeaderMap::new(), client));
}

#[test]
fn test_password_with_colon() {
    let security = Security {
        password: Some("p:q".to_owned()),
        ..Default::default()
    };
    assert!(authorize(&security, &basic("anyone:p:q"), None));
}

#[test]
fn test_malformed_header_is_empty_credentials() {
    let mut headers = HeaderMap::new();
    headers.insert(AUTHORIZATION, "Basic %%%".parse().unwrap());
    assert_eq!(Credentials::default(), Credentials::from_headers(&headers));
    assert_eq!(
        Credentials {
            username: "user".to_owned(),
            password: String::new()
        },
        Credentials::from_headers(&basic("user"))
    );
}

#[test]
fn test_unpadded_token() {
    let security = Security {
        username: Some("a".to_owned()),
        password: Some("bc".to_owned()),
        ..Default::default()
    };
    let mut headers = HeaderMap::new();
    headers.insert(AUTHORIZATION, "Basic YTpiYw".parse().unwrap());
    assert_eq!(
        Credentials {
            username: "a".to_owned(),
            password: "bc".to_owned()
        },
        Credentials::from_headers(&headers)
    );
    assert!(authorize(&security, &headers, None));
    assert!(authorize(&security, &basic("a:bc"), None));
}
