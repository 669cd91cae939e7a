use std::fmt;

/// Fully-qualified application name: virtual host plus application.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VHostAppName {
    pub vhost: String,
    pub app: String,
}

impl VHostAppName {
    pub fn new(vhost: impl ToString, app: impl ToString) -> Self {
        Self {
            vhost: vhost.to_string(),
            app: app.to_string(),
        }
    }
}

impl fmt::Display for VHostAppName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.vhost, self.app)
    }
}

/// Application identity as the router sees it. Output profiles, publisher
/// lists and access control live with their owning modules and stay opaque
/// here.
#[derive(Debug, Clone)]
pub struct ApplicationInfo {
    pub id: u32,
    pub name: VHostAppName,
}

impl ApplicationInfo {
    pub fn new(id: u32, name: VHostAppName) -> Self {
        Self { id, name }
    }
}
