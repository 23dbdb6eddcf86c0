use std::fmt;

/// A `hostname:port` pair naming one virtual host in the proxy.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VirtualHostKey {
    pub hostname: String,
    pub port: u16,
}

impl VirtualHostKey {
    pub fn new(hostname: impl ToString, port: u16) -> Self {
        Self {
            hostname: hostname.to_string(),
            port,
        }
    }
}

impl fmt::Display for VirtualHostKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.hostname, self.port)
    }
}
