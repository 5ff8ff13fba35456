//! IP allow/deny list middleware.

use crate::balancer::{Balancer, BalancerExtension};
use crate::config::AdmissionConfig;
use crate::frontend::admission::{Admission, ConnectionInfo, Middleware};
use futures::future::{self, BoxFuture, FutureExt};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use thiserror::Error;

/// Errors building an [`IpFilter`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AdmissionConfigError {
    #[error("invalid IP address '{0}'")]
    InvalidIpAddress(String),

    #[error("invalid CIDR '{0}': {1}")]
    InvalidCidr(String, String),
}

/// A single allow or deny entry.
#[derive(Debug, Clone, PartialEq, Eq)]
enum IpRule {
    Exact(IpAddr),
    V4Cidr { network: u32, mask: u32 },
}

impl IpRule {
    fn parse(entry: &str) -> Result<Self, AdmissionConfigError> {
        let Some((ip, prefix)) = entry.split_once('/') else {
            return entry
                .parse::<IpAddr>()
                .map(|ip| IpRule::Exact(ip.to_canonical()))
                .map_err(|_| AdmissionConfigError::InvalidIpAddress(entry.to_string()));
        };

        let ip: Ipv4Addr = ip.parse().map_err(|_| {
            AdmissionConfigError::InvalidCidr(entry.to_string(), "expected an IPv4 network".into())
        })?;
        let prefix: u8 = prefix.parse().map_err(|_| {
            AdmissionConfigError::InvalidCidr(entry.to_string(), "invalid prefix length".into())
        })?;
        if prefix > 32 {
            return Err(AdmissionConfigError::InvalidCidr(
                entry.to_string(),
                format!("prefix length must be 0-32, got {prefix}"),
            ));
        }

        let mask = if prefix == 0 { 0 } else { !0u32 << (32 - prefix) };
        Ok(IpRule::V4Cidr {
            network: u32::from(ip) & mask,
            mask,
        })
    }

    fn matches(&self, ip: IpAddr) -> bool {
        match (self, ip) {
            (IpRule::Exact(rule), ip) => *rule == ip,
            (IpRule::V4Cidr { network, mask }, IpAddr::V4(v4)) => u32::from(v4) & mask == *network,
            (IpRule::V4Cidr { .. }, IpAddr::V6(_)) => false,
        }
    }
}

/// Rejects connections by client IP.
///
/// Deny entries win over allow entries. With an empty allow list every
/// address not denied is admitted.
#[derive(Debug, Clone)]
pub struct IpFilter {
    allow: Arc<Vec<IpRule>>,
    deny: Arc<Vec<IpRule>>,
}

impl IpFilter {
    /// Build a filter from allow and deny entries (IP addresses or IPv4 CIDRs).
    pub fn new<S: AsRef<str>>(allow: &[S], deny: &[S]) -> Result<Self, AdmissionConfigError> {
        let parse = |entries: &[S]| {
            entries
                .iter()
                .map(|e| IpRule::parse(e.as_ref().trim()))
                .collect::<Result<Vec<_>, _>>()
        };
        Ok(Self {
            allow: Arc::new(parse(allow)?),
            deny: Arc::new(parse(deny)?),
        })
    }

    /// Build a filter from the `admission` configuration block.
    pub fn from_config(config: &AdmissionConfig) -> Result<Self, AdmissionConfigError> {
        Self::new(config.allow.as_slice(), config.deny.as_slice())
    }

    /// Decide for a single address.
    pub fn admit(&self, ip: IpAddr) -> Admission {
        let ip = ip.to_canonical();
        if self.deny.iter().any(|rule| rule.matches(ip)) {
            return Admission::reject(format!("{ip} is denied"));
        }
        if !self.allow.is_empty() && !self.allow.iter().any(|rule| rule.matches(ip)) {
            return Admission::reject(format!("{ip} is not allowed"));
        }
        Admission::Proceed
    }
}

impl Middleware for IpFilter {
    fn check(&self, conn: &ConnectionInfo) -> BoxFuture<'static, Admission> {
        future::ready(self.admit(conn.peer.ip())).boxed()
    }
}

impl BalancerExtension for IpFilter {
    fn attach(&self, balancer: &Balancer) {
        balancer.add_middleware(self.clone());
    }
}
