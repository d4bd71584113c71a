//! Prometheus HTTP service discovery entries
//!
//! Containers that advertise `prometheus.metrics.port` are published as
//! scrape targets so Prometheus can scrape their own metrics endpoints.

use crate::labels::{base_labels, reserved};
use crate::models::{DiscoveredContainer, RegistrationInfo, ScrapeTarget};
use std::net::Ipv6Addr;

/// Build the scrape target of a registered container, if it advertises one
///
/// A published `<port>/tcp` binding replaces the container port with the host
/// port, and supplies the host when no explicit host label is set. IPv4
/// bindings win over IPv6 ones.
pub fn scrape_target(
    container: &DiscoveredContainer,
    registration: &RegistrationInfo,
) -> Option<ScrapeTarget> {
    let hint = registration.scrape.as_ref()?;
    let mut port = hint.port.clone();
    let mut host = hint.host.clone();

    let binding = hint.port.parse::<u16>().ok().and_then(|private_port| {
        container
            .ports
            .iter()
            .filter(|p| {
                p.private_port == private_port && p.protocol == "tcp" && p.public_port.is_some()
            })
            .min_by_key(|p| p.host_ip.as_deref().is_some_and(is_ipv6))
    });

    if let Some(binding) = binding {
        if let Some(public_port) = binding.public_port {
            port = public_port.to_string();
        }
        if host.is_none() {
            host = binding.host_ip.clone();
        }
    }

    let host = host.filter(|h| !h.is_empty())?;
    if port.is_empty() {
        return None;
    }

    let mut labels = base_labels(registration);
    labels.insert(reserved::CONTAINER_NAME, container.target.name.clone());

    Some(ScrapeTarget {
        targets: vec![address(&host, &port)],
        labels,
    })
}

fn is_ipv6(host: &str) -> bool {
    host.parse::<Ipv6Addr>().is_ok()
}

fn address(host: &str, port: &str) -> String {
    if is_ipv6(host) {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}
