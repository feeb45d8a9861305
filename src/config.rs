//! Session configuration
//!
//! Read-only capability configuration handed to the `SessionManager` at
//! construction. Optional features (auxiliary data channel, remote audio
//! level metering) are fixed here instead of being threaded through
//! individual constructors.

// ============================================================================
// ICE SERVER CONFIGURATION
// ============================================================================

/// One STUN/TURN server entry.
#[derive(Debug, Clone, Default)]
pub struct IceServerConfig {
    pub urls: Vec<String>,
    pub username: String,
    pub credential: String,
}

/// Default STUN server set (covers the large majority of NATs).
pub fn default_ice_servers() -> Vec<IceServerConfig> {
    vec![IceServerConfig {
        urls: vec![
            "stun:stun.l.google.com:19302".to_string(),
            "stun:stun1.l.google.com:19302".to_string(),
        ],
        ..Default::default()
    }]
}

// ============================================================================
// SESSION CONFIGURATION
// ============================================================================

/// Capability configuration for a session manager instance.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Open an auxiliary data channel on every peer connection.
    pub data_channel: bool,

    /// Meter remote audio and republish 0.0..=1.0 level events.
    pub audio_levels: bool,

    /// ICE servers used for every peer connection.
    pub ice_servers: Vec<IceServerConfig>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            data_channel: false,
            audio_levels: false,
            ice_servers: default_ice_servers(),
        }
    }
}

impl SessionConfig {
    pub fn with_data_channel(mut self) -> Self {
        self.data_channel = true;
        self
    }

    pub fn with_audio_levels(mut self) -> Self {
        self.audio_levels = true;
        self
    }

    /// Adds a TURN server with credentials.
    pub fn add_turn_server(&mut self, url: String, username: String, credential: String) {
        self.ice_servers.push(IceServerConfig {
            urls: vec![url],
            username,
            credential,
        });
    }
}
