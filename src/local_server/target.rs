use std::net::{IpAddr, Ipv4Addr};

pub(crate) const LOOPBACK_HOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// Address the browser is bounced between once the listener is bound.
#[derive(Debug, Clone)]
pub(super) struct LoopbackTarget {
    pub(super) host: IpAddr,
    pub(super) port: u16,
}

impl LoopbackTarget {
    pub(super) fn new(host: IpAddr, port: u16) -> Self {
        Self { host, port }
    }

    pub(super) fn base_url(&self) -> String {
        match self.host {
            IpAddr::V4(host) => format!("http://{host}:{}", self.port),
            IpAddr::V6(host) => format!("http://[{host}]:{}", self.port),
        }
    }

    pub(super) fn callback_uri(&self, nonce: &str) -> String {
        format!("{}/callback?nonce={nonce}", self.base_url())
    }

    pub(super) fn signin_url(&self, nonce: &str) -> String {
        format!("{}/signin?nonce={nonce}", self.base_url())
    }

    /// State parameter round-tripped through the provider. Binds the
    /// callback to both the bound port and this server's nonce.
    pub(super) fn derive_state(&self, nonce: &str) -> String {
        format!("port={};nonce={nonce}", self.port)
    }
}

/// Redirect URI registered for a flow bound to `host:port`. Must match byte
/// for byte between the authorization request and the code exchange.
pub(crate) fn callback_uri(host: IpAddr, port: u16, nonce: &str) -> String {
    LoopbackTarget::new(host, port).callback_uri(nonce)
}
