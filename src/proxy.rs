//! CORS relay selection.
//!
//! Feed documents and article pages live on other origins, so every fetch is
//! routed through a relay. Which relay depends on where this deployment runs:
//! loopback hosts use a fixed public relay, anything else uses the
//! same-origin `/proxy` endpoint on the deployment's own host.

use std::net::IpAddr;

use crate::config::ProxyConfig;

pub const PUBLIC_HOST_ENV: &str = "NEWSDESK_PUBLIC_HOST";
pub const PUBLIC_PORT_ENV: &str = "NEWSDESK_PUBLIC_PORT";

/// The host and port this deployment is reached at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deployment {
    pub hostname: String,
    pub port: Option<u16>,
}

impl Deployment {
    pub fn new(hostname: &str, port: Option<u16>) -> Self {
        Self {
            hostname: hostname.to_string(),
            port,
        }
    }

    pub fn is_loopback(&self) -> bool {
        let host = self.hostname.trim_start_matches('[').trim_end_matches(']');
        if host.eq_ignore_ascii_case("localhost") {
            return true;
        }
        host.parse::<IpAddr>().map(|ip| ip.is_loopback()).unwrap_or(false)
    }
}

/// Base URL of the relay for the given deployment.
pub fn resolve_proxy_base(deployment: &Deployment, config: &ProxyConfig) -> String {
    if deployment.is_loopback() {
        return config.local_relay.trim_end_matches('/').to_string();
    }

    let port = deployment.port.unwrap_or(config.default_port);
    let path = config.path.trim_end_matches('/');
    let path = if path.is_empty() || path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    };

    format!("{}://{}:{}{}", config.scheme, deployment.hostname, port, path)
}

#[derive(Debug, Clone)]
pub struct ProxyResolver {
    config: ProxyConfig,
    fixed: Option<Deployment>,
}

impl ProxyResolver {
    pub fn new(config: ProxyConfig) -> Self {
        Self {
            config,
            fixed: None,
        }
    }

    /// Pin the deployment instead of reading it from the environment.
    pub fn with_deployment(config: ProxyConfig, deployment: Deployment) -> Self {
        Self {
            config,
            fixed: Some(deployment),
        }
    }

    /// Current deployment. Environment overrides are read on every call.
    pub fn current_deployment(&self) -> Deployment {
        if let Some(deployment) = &self.fixed {
            return deployment.clone();
        }

        let hostname = std::env::var(PUBLIC_HOST_ENV)
            .ok()
            .filter(|h| !h.trim().is_empty())
            .or_else(|| self.config.public_host.clone())
            .unwrap_or_else(|| "localhost".to_string());
        let port = std::env::var(PUBLIC_PORT_ENV)
            .ok()
            .and_then(|p| p.trim().parse().ok())
            .or(self.config.public_port);

        Deployment { hostname, port }
    }

    pub fn proxy_base(&self) -> String {
        resolve_proxy_base(&self.current_deployment(), &self.config)
    }

    /// Route `url` through the relay, or return it unchanged when relaying is
    /// disabled.
    pub fn wrap(&self, url: &str) -> String {
        if !self.config.enabled {
            return url.to_string();
        }
        format!("{}/{}", self.proxy_base(), url.trim_start_matches('/'))
    }
}
