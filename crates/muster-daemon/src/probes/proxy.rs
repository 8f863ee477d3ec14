//! Reverse-proxy route probe.
//!
//! The proxy exposes a Caddy-shaped admin API: a config tree of servers,
//! each holding an ordered route list with host matchers. Routes are read
//! as a flat list and deleted by server name + index.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ProbeError;

const HTTP_TIMEOUT: Duration = Duration::from_secs(5);

/// One route in the proxy config tree, addressable for deletion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyRoute {
    pub server: String,
    pub index: usize,
    pub hosts: Vec<String>,
}

/// Fetch the flattened route table from the admin API.
pub async fn routes(admin_url: &str) -> Result<Vec<ProxyRoute>, ProbeError> {
    let url = format!(
        "{}/config/apps/http/servers",
        admin_url.trim_end_matches('/')
    );
    tokio::task::spawn_blocking(move || {
        let client = reqwest::blocking::Client::new();
        let response = client
            .get(&url)
            .timeout(HTTP_TIMEOUT)
            .send()
            .map_err(|e| ProbeError::Unavailable {
                message: format!("proxy admin API unreachable: {e}"),
            })?;
        if !response.status().is_success() {
            return Err(ProbeError::command(format!(
                "proxy admin API returned {}",
                response.status()
            )));
        }
        let servers: BTreeMap<String, CaddyServer> = response
            .json()
            .map_err(|e| ProbeError::parse_with("proxy config JSON", e))?;
        Ok(flatten(servers))
    })
    .await
    .map_err(|e| ProbeError::command_with("proxy task join error", e))?
}

/// Delete one route by server + index.
pub async fn delete_route(admin_url: &str, route: &ProxyRoute) -> Result<(), ProbeError> {
    let url = format!(
        "{}/config/apps/http/servers/{}/routes/{}",
        admin_url.trim_end_matches('/'),
        route.server,
        route.index
    );
    tokio::task::spawn_blocking(move || {
        let client = reqwest::blocking::Client::new();
        let response = client
            .delete(&url)
            .timeout(HTTP_TIMEOUT)
            .send()
            .map_err(|e| ProbeError::Unavailable {
                message: format!("proxy admin API unreachable: {e}"),
            })?;
        if !response.status().is_success() {
            return Err(ProbeError::command(format!(
                "proxy route delete returned {}",
                response.status()
            )));
        }
        Ok(())
    })
    .await
    .map_err(|e| ProbeError::command_with("proxy task join error", e))?
}

/// Find the proxy host routed to an instance, matched by the host's first
/// DNS label (e.g. instance `muster` ⇒ `muster.localhost`).
pub fn host_for_instance(routes: &[ProxyRoute], instance_name: &str) -> Option<String> {
    routes
        .iter()
        .flat_map(|r| r.hosts.iter())
        .find(|host| {
            host.split('.').next() == Some(instance_name)
        })
        .cloned()
}

/// Find the route serving an instance, for deletion on instance removal.
pub fn route_for_instance<'a>(
    routes: &'a [ProxyRoute],
    instance_name: &str,
) -> Option<&'a ProxyRoute> {
    routes.iter().find(|r| {
        r.hosts
            .iter()
            .any(|host| host.split('.').next() == Some(instance_name))
    })
}

fn flatten(servers: BTreeMap<String, CaddyServer>) -> Vec<ProxyRoute> {
    let mut out = Vec::new();
    for (server, config) in servers {
        for (index, route) in config.routes.iter().enumerate() {
            let hosts: Vec<String> = route
                .matchers
                .iter()
                .flat_map(|m| m.host.iter().cloned())
                .collect();
            if hosts.is_empty() {
                continue;
            }
            out.push(ProxyRoute {
                server: server.clone(),
                index,
                hosts,
            });
        }
    }
    out
}

#[derive(Debug, Deserialize)]
struct CaddyServer {
    #[serde(default)]
    routes: Vec<CaddyRoute>,
}

#[derive(Debug, Deserialize)]
struct CaddyRoute {
    #[serde(default, rename = "match")]
    matchers: Vec<CaddyMatcher>,
}

#[derive(Debug, Deserialize)]
struct CaddyMatcher {
    #[serde(default)]
    host: Vec<String>,
}
