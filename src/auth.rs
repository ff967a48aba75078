use crate::protocol::{AuthMethod, AuthRequest};
use std::fmt;
use std::sync::Arc;

/// UserPass holds username/password credentials as dictated
/// server-side
#[derive(Clone, PartialEq, Eq)]
pub struct UserPass {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for UserPass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserPass")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Authenticator checks username/password sub-negotiations against the one
/// configured credential. Cloning shares the credential.
#[derive(Clone, Debug)]
pub struct Authenticator {
    credential: Arc<UserPass>,
}

impl Authenticator {
    pub fn new(credential: UserPass) -> Self {
        Self {
            credential: Arc::new(credential),
        }
    }

    /// verify compares the raw request bytes against the credential.
    /// The comparison is not constant-time.
    pub fn verify(&self, request: &AuthRequest) -> bool {
        request.username == self.credential.username.as_bytes()
            && request.password == self.credential.password.as_bytes()
    }
}

/// select_auth_method picks the method to answer a greeting with.
/// Username/password is the only method served.
pub fn select_auth_method(client_methods: &[u8]) -> AuthMethod {
    const PREFERRED_METHODS: &[AuthMethod] = &[AuthMethod::UserPass];

    // Iterate through preferences in order. If there's a match
    // return it
    for &preferred in PREFERRED_METHODS {
        if client_methods.contains(&(preferred as u8)) {
            return preferred;
        }
    }

    AuthMethod::NoAcceptable
}
