//! Connection credential checks.
//!
//! Every connection presents credentials once, in the query string of its
//! WebSocket upgrade request. [`AuthGate::authenticate`] turns them into a
//! single [`Role`]; a connection without a role never reaches server state.

use std::fmt;
use thiserror::Error;

/// What kind of client a session belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Game-engine avatar client.
    Avatar,
    /// Depth-camera rig controller.
    Camera,
    /// MIDI controller bridge.
    Controller,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::Avatar => "avatar",
            Role::Camera => "camera",
            Role::Controller => "controller",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("no token supplied")]
    MissingToken,
    #[error("credentials do not match any role")]
    Rejected,
}

/// Secrets the deployment accepts, one set per role.
#[derive(Debug, Clone, Default)]
pub struct Secrets {
    pub unity_key: String,
    pub midi_key: String,
    pub midi_secret: String,
    pub cam_key: String,
    pub cam_secret: String,
}

/// Credentials as presented by a connecting client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub token: Option<String>,
    pub secret: Option<String>,
}

impl Credentials {
    /// Reads `token` and `secret` from a URL query string.
    pub fn from_query(query: Option<&str>) -> Self {
        let mut credentials = Self::default();
        if let Some(query) = query {
            for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
                match key.as_ref() {
                    "token" => credentials.token = Some(value.into_owned()),
                    "secret" => credentials.secret = Some(value.into_owned()),
                    _ => {}
                }
            }
        }
        credentials
    }
}

pub struct AuthGate {
    secrets: Secrets,
}

impl AuthGate {
    pub fn new(secrets: Secrets) -> Self {
        Self { secrets }
    }

    /// Resolves credentials to a role.
    ///
    /// Accepted shapes: the avatar token with no secret, or a controller or
    /// camera token+secret pair. Empty configured values never match.
    pub fn authenticate(&self, credentials: &Credentials) -> Result<Role, AuthError> {
        let token = credentials.token.as_deref().ok_or(AuthError::MissingToken)?;

        match credentials.secret.as_deref() {
            None if matches(token, &self.secrets.unity_key) => Ok(Role::Avatar),
            Some(secret)
                if matches(token, &self.secrets.midi_key)
                    && matches(secret, &self.secrets.midi_secret) =>
            {
                Ok(Role::Controller)
            }
            Some(secret)
                if matches(token, &self.secrets.cam_key)
                    && matches(secret, &self.secrets.cam_secret) =>
            {
                Ok(Role::Camera)
            }
            _ => Err(AuthError::Rejected),
        }
    }
}

fn matches(presented: &str, configured: &str) -> bool {
    !configured.is_empty() && presented == configured
}
