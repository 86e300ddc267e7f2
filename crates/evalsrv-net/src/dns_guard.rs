//! A [`reqwest::dns::Resolve`] implementation that rejects any hostname
//! whose resolved addresses include a blocked (private/loopback/link-local)
//! address — including when only *some* of several A/AAAA records are
//! blocked, which is the shape of a DNS-rebinding attempt.

use std::net::SocketAddr;
use std::sync::Arc;

use hickory_resolver::TokioResolver;
use hickory_resolver::config::ResolveHosts;
use reqwest::dns::{Addrs, Name, Resolve, Resolving};

use crate::address_guard::{BlockedAddress, is_blocked};

/// Wraps a `hickory-resolver` async resolver; every answer is checked
/// against the Address Guard before being handed back to `reqwest`.
#[derive(Clone)]
pub struct GuardedResolver {
    inner: Arc<TokioResolver>,
}

impl GuardedResolver {
    /// Build a resolver that consults the system's `/etc/hosts` and
    /// configured nameservers, same as the host OS would.
    pub fn new() -> anyhow::Result<Self> {
        let mut builder = TokioResolver::builder_tokio()?;
        builder.options_mut().use_hosts_file = ResolveHosts::Always;
        Ok(Self {
            inner: Arc::new(builder.build()),
        })
    }
}

impl Resolve for GuardedResolver {
    fn resolve(&self, name: Name) -> Resolving {
        let resolver = self.inner.clone();
        Box::pin(async move {
            let hostname = name.as_str().to_string();
            let lookup = resolver
                .lookup_ip(hostname.clone())
                .await
                .map_err(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>)?;

            let mut addrs = Vec::new();
            for ip in lookup.iter() {
                if is_blocked(ip) {
                    return Err(Box::new(BlockedAddress(hostname))
                        as Box<dyn std::error::Error + Send + Sync>);
                }
                addrs.push(SocketAddr::new(ip, 0));
            }

            Ok(Box::new(addrs.into_iter()) as Addrs)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructs_without_panicking() {
        // Building the resolver only parses system config; it does not
        // perform any lookups, so this is safe to run without network.
        assert!(GuardedResolver::new().is_ok());
    }
}
