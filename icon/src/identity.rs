//! Identity (component C): node URL, network id, debug flag and optional
//! signing key, immutable once built.

use crate::Error;
use icon_signer::Keypair;
use std::fmt;

/// Resolve a network name alias to its numeric id. The table is pure;
/// environment overrides live at [`node_url_for`], one layer out.
pub fn resolve_network_id(name: &str) -> Option<u32> {
    match name {
        "mainnet" => Some(1),
        "lisbon" => Some(2),
        "berlin" => Some(7),
        "sejong" => Some(83),
        _ => None,
    }
}

fn default_node_url(network_id: u32) -> &'static str {
    match network_id {
        1 => "https://ctz.solidwallet.io",
        2 => "https://lisbon.net.solidwallet.io",
        7 => "https://berlin.net.solidwallet.io",
        83 => "https://sejong.net.solidwallet.io",
        _ => "http://localhost:9000",
    }
}

/// The node URL for `network_id`, honoring an `ICON_RPC_URL_<NETWORK_ID>`
/// override before falling back to the built-in per-network default. This
/// is the edge concern the pure `default_node_url` table stays free of.
pub fn node_url_for(network_id: u32) -> String {
    std::env::var(format!("ICON_RPC_URL_{network_id}")).unwrap_or_else(|_| default_node_url(network_id).to_string())
}

/// `debug`'s default, honoring `ICON_RPC_DEBUG` for local development
/// against a debug-enabled node.
pub fn default_debug() -> bool {
    std::env::var("ICON_RPC_DEBUG")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Node URL, network id, debug flag and optional signing key. Immutable
/// once built; freely shared across threads.
#[derive(Clone)]
pub struct Identity {
    node_url: String,
    network_id: u32,
    debug: bool,
    key: Option<Keypair>,
}

impl Identity {
    pub fn builder() -> IdentityBuilder {
        IdentityBuilder::default()
    }

    pub fn node_url(&self) -> &str {
        &self.node_url
    }

    pub fn network_id(&self) -> u32 {
        self.network_id
    }

    pub fn debug(&self) -> bool {
        self.debug
    }

    pub fn key(&self) -> Option<&Keypair> {
        self.key.as_ref()
    }

    /// The EOA address derived from the signing key, if one was provided.
    pub fn address(&self) -> Option<String> {
        self.key.as_ref().map(Keypair::account_id)
    }

    /// `<node_url>/api/v3` normally, `<node_url>/api/v3d` in debug mode.
    pub fn api_url(&self) -> String {
        format!("{}/api/v3{}", self.node_url, if self.debug { "d" } else { "" })
    }

    /// The WebSocket subscription endpoint for `source` (`"block"` or
    /// `"event"`).
    pub fn ws_url(&self, source: &str) -> Result<String, Error> {
        let url = url::Url::parse(&self.node_url).map_err(Error::InvalidUrl)?;
        let scheme = match url.scheme() {
            "https" => "wss",
            _ => "ws",
        };
        let host = url.host_str().ok_or_else(|| Error::InvalidRequest("node URL has no host".into()))?;
        let port = url.port().map(|p| format!(":{p}")).unwrap_or_default();
        Ok(format!("{scheme}://{host}{port}/api/v3/icon_dex/{source}"))
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("node_url", &self.node_url)
            .field("network_id", &self.network_id)
            .field("debug", &self.debug)
            .field("address", &self.address())
            .field("key", &self.key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identity({}, network={}", self.node_url, self.network_id)?;
        if let Some(address) = self.address() {
            write!(f, ", address={address}")?;
        }
        write!(f, ")")
    }
}

/// Builds an [`Identity`], resolving unset fields from the network-id
/// table and environment overrides.
#[derive(Default)]
pub struct IdentityBuilder {
    node_url: Option<String>,
    network_id: Option<u32>,
    debug: Option<bool>,
    key: Option<Keypair>,
}

impl IdentityBuilder {
    /// Set the network by numeric id.
    pub fn network_id(mut self, network_id: u32) -> Self {
        self.network_id = Some(network_id);
        self
    }

    /// Set the network by name (`"mainnet"`, `"lisbon"`, `"berlin"`,
    /// `"sejong"`).
    pub fn network(mut self, name: &str) -> Result<Self, Error> {
        let id = resolve_network_id(name).ok_or_else(|| Error::InvalidRequest(format!("unknown network {name}")))?;
        self.network_id = Some(id);
        Ok(self)
    }

    pub fn node_url(mut self, url: impl Into<String>) -> Self {
        self.node_url = Some(url.into());
        self
    }

    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = Some(debug);
        self
    }

    pub fn private_key(mut self, key: Keypair) -> Self {
        self.key = Some(key);
        self
    }

    pub fn build(self) -> Identity {
        let network_id = self.network_id.unwrap_or(1);
        let node_url = self.node_url.unwrap_or_else(|| node_url_for(network_id));
        let debug = self.debug.unwrap_or_else(default_debug);
        Identity {
            node_url,
            network_id,
            debug,
            key: self.key,
        }
    }
}
