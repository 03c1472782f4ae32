//! Service discovery is an external collaborator, named but not
//! implemented here (spec §1: "the mDNS-like zero-configuration
//! advertising" layer). The broker's discovery loop (spec §4.3.5) only
//! depends on this trait; a real implementation would talk to whatever
//! zero-config advertising mechanism the deployment uses.

use async_trait::async_trait;

/// A candidate peer endpoint surfaced by discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerCandidate {
    pub node_id: String,
    pub endpoint: String,
}

#[async_trait]
pub trait PeerDiscovery: Send + Sync {
    async fn discover(&self) -> anyhow::Result<Vec<PeerCandidate>>;
}

/// A static peer list, configured once at startup. Stands in for a real
/// discovery mechanism until one is wired in; useful for fixed
/// deployments and tests alike.
#[derive(Debug, Clone, Default)]
pub struct StaticPeerList(pub Vec<PeerCandidate>);

impl StaticPeerList {
    pub fn new(peers: Vec<PeerCandidate>) -> Self {
        Self(peers)
    }
}

#[async_trait]
impl PeerDiscovery for StaticPeerList {
    async fn discover(&self) -> anyhow::Result<Vec<PeerCandidate>> {
        Ok(self.0.clone())
    }
}
