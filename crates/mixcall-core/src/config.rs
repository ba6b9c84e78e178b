/// STUN server used when the builder is given no ICE entries.
pub const DEFAULT_STUN_URL: &str = "stun:61.152.239.47:3478";

/// One ICE/STUN entry handed to the conferencing layer at join time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IceServer {
    pub urls: Vec<String>,
}

impl IceServer {
    pub fn new(urls: Vec<String>) -> Self {
        Self { urls }
    }
}

/// Immutable session configuration.
///
/// Built once via [`SessionConfigBuilder`] and stored for the life of the
/// session; nothing here changes after `configure`.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    server_base: String,
    ice_servers: Vec<IceServer>,
    room: Option<String>,
    username: String,
    role: String,
}

impl SessionConfig {
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::default()
    }

    /// Signaling server base URL, always slash-terminated (or empty when
    /// never set — detected at token-request time).
    pub fn server_base(&self) -> &str {
        &self.server_base
    }

    pub fn ice_servers(&self) -> &[IceServer] {
        &self.ice_servers
    }

    /// Room identifier; `None` joins the server's default sample room.
    pub fn room(&self) -> Option<&str> {
        self.room.as_deref()
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn role(&self) -> &str {
        &self.role
    }
}

/// Builder for [`SessionConfig`].
#[derive(Debug, Clone)]
pub struct SessionConfigBuilder {
    server_base: String,
    ice_servers: Vec<IceServer>,
    room: Option<String>,
    username: String,
    role: String,
}

impl Default for SessionConfigBuilder {
    fn default() -> Self {
        Self {
            server_base: String::new(),
            ice_servers: Vec::new(),
            room: None,
            username: "user".to_string(),
            role: "presenter".to_string(),
        }
    }
}

impl SessionConfigBuilder {
    /// Set the signaling server base URL. A trailing slash is appended if
    /// missing since all wire paths are relative to it.
    pub fn server_base(mut self, base: impl Into<String>) -> Self {
        let mut base = base.into();
        if !base.is_empty() && !base.ends_with('/') {
            base.push('/');
        }
        self.server_base = base;
        self
    }

    pub fn ice_server(mut self, server: IceServer) -> Self {
        self.ice_servers.push(server);
        self
    }

    pub fn room(mut self, room: impl Into<String>) -> Self {
        self.room = Some(room.into());
        self
    }

    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = username.into();
        self
    }

    pub fn role(mut self, role: impl Into<String>) -> Self {
        self.role = role.into();
        self
    }

    pub fn build(self) -> SessionConfig {
        let ice_servers = if self.ice_servers.is_empty() {
            vec![IceServer::new(vec![DEFAULT_STUN_URL.to_string()])]
        } else {
            self.ice_servers
        };
        SessionConfig {
            server_base: self.server_base,
            ice_servers,
            room: self.room,
            username: self.username,
            role: self.role,
        }
    }
}
