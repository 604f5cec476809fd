//! Connection configuration types.
//!
//! A `ConnectionConfig` is immutable once a session connects (spec §3);
//! callers build a fresh one per `connect()` call rather than mutating
//! an existing connection's settings.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Protocol variant for the HTTP transport.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HttpProtocol {
    Http,
    Https,
}

/// HTTP-specific connection fields.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct HttpDetail {
    pub protocol: Option<HttpProtocol>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

/// FTP-specific connection fields.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct FtpDetail {
    pub username: String,
    pub password: String,
    #[serde(default = "default_true")]
    pub passive: bool,
    #[serde(default)]
    pub secure: bool,
}

fn default_true() -> bool {
    true
}

/// Transport-specific fields, tagged by `kind`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransportDetail {
    Http(HttpDetail),
    Ftp(FtpDetail),
    Tcp,
}

/// Full connection configuration for one transport instance.
///
/// `timeout_ms` is the default request timeout; individual operations may
/// override it when issuing a [`crate::Request`].
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub timeout_ms: u64,
    #[serde(flatten)]
    pub detail: TransportDetail,
}

impl ConnectionConfig {
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.timeout_ms)
    }

    pub fn transport_kind(&self) -> crate::TransportKind {
        match &self.detail {
            TransportDetail::Http(_) => crate::TransportKind::Http,
            TransportDetail::Ftp(_) => crate::TransportKind::Ftp,
            TransportDetail::Tcp => crate::TransportKind::Tcp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ftp_detail_defaults_passive_on() {
        let json = r#"{"username":"anon","password":""}"#;
        let detail: FtpDetail = serde_json::from_str(json).unwrap();
        assert!(detail.passive);
        assert!(!detail.secure);
    }

    #[test]
    fn connection_config_round_trips_through_json() {
        let cfg = ConnectionConfig {
            host: "files.example.com".to_string(),
            port: 21,
            timeout_ms: 30_000,
            detail: TransportDetail::Ftp(FtpDetail {
                username: "alice".to_string(),
                password: "hunter2".to_string(),
                passive: true,
                secure: false,
            }),
        };
        let encoded = serde_json::to_string(&cfg).unwrap();
        let decoded: ConnectionConfig = serde_json::from_str(&encoded).unwrap();
        assert_eq!(cfg, decoded);
        assert_eq!(decoded.transport_kind(), crate::TransportKind::Ftp);
    }
}
