//! Node boundary contracts.
//!
//! Credential bootstrap, node registration, and lease renewal are
//! implemented outside this crate; only their contracts live here so
//! the reconciliation core and its callers agree on the seam.

use crate::worker::BoxFuture;
use std::time::Duration;
use thiserror::Error;

/// How long credential bootstrap waits for approval before giving up.
/// Expiry is fatal to process startup; without credentials the node has
/// no identity.
pub const BOOTSTRAP_TIMEOUT: Duration = Duration::from_secs(6 * 60);

/// Fraction of the lease duration at which renewal runs.
pub const LEASE_RENEW_FRACTION: f64 = 0.25;

/// Identity this node presents to the control plane.
#[derive(Clone, Debug)]
pub struct NodeIdentity {
    /// Node name, unique in the cluster.
    pub name: String,
    /// Labels advertised at registration.
    pub labels: Vec<(String, String)>,
}

/// Errors from the node boundary.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Bootstrap was not approved within [`BOOTSTRAP_TIMEOUT`]. The
    /// only error in this crate's scope that is fatal to startup.
    #[error("credential bootstrap timed out after {0:?}")]
    BootstrapTimeout(Duration),

    /// Registration or renewal failed and will be retried by the
    /// implementation.
    #[error("node operation failed: {0}")]
    Failed(String),
}

/// Obtains credentials for this node. Blocks (bounded by
/// [`BOOTSTRAP_TIMEOUT`]) until the control plane approves the request.
pub trait Bootstrap: Send + Sync {
    fn bootstrap<'a>(
        &'a self,
        token: &'a str,
        identity: &'a NodeIdentity,
        control_plane_endpoint: &'a str,
    ) -> BoxFuture<'a, Result<(), NodeError>>;
}

/// Registers this node with the control plane.
pub trait NodeRegistrar: Send + Sync {
    fn register<'a>(&'a self, identity: &'a NodeIdentity) -> BoxFuture<'a, Result<(), NodeError>>;
}

/// Renews this node's lease in the background.
pub trait LeaseRenewer: Send + Sync {
    /// Duration of the lease granted by the control plane.
    fn lease_duration(&self) -> Duration;

    /// Performs one renewal.
    fn renew<'a>(&'a self) -> BoxFuture<'a, Result<(), NodeError>>;
}

/// The interval between lease renewals for a given lease duration.
pub fn lease_renewal_interval(lease_duration: Duration) -> Duration {
    lease_duration.mul_f64(LEASE_RENEW_FRACTION)
}
