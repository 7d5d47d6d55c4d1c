//! Session gate: allowlist membership and session admission.
//!
//! The allowlist is the single source of truth for who may use the vault and
//! what name their letters are signed with.

use std::sync::Arc;

use tracing::{info, warn};

use crate::backend::Backend;
use crate::error::{Result, VaultError};
use crate::logging;
use crate::provider::ProviderIdentity;

/// An allowlisted identity and the name letters from it are signed with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub email: String,
    pub display_name: String,
}

/// The fixed set of identities permitted to use the vault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allowlist {
    members: Vec<Member>,
}

impl Default for Allowlist {
    fn default() -> Self {
        Self::new(vec![
            Member {
                email: "andreicatigan@gmail.com".to_string(),
                display_name: "Andrei".to_string(),
            },
            Member {
                email: "shantalclairesuening@gmail.com".to_string(),
                display_name: "Shantal".to_string(),
            },
        ])
    }
}

impl Allowlist {
    /// Build from explicit members. Emails are normalized; a later entry for
    /// the same address replaces an earlier one.
    pub fn new(members: Vec<Member>) -> Self {
        let mut out: Vec<Member> = Vec::with_capacity(members.len());
        for m in members {
            let email = normalize_email(&m.email);
            let member = Member {
                email,
                display_name: m.display_name.trim().to_string(),
            };
            match out.iter_mut().find(|e| e.email == member.email) {
                Some(existing) => *existing = member,
                None => out.push(member),
            }
        }
        Self { members: out }
    }

    /// Parse `email=Name` entries separated by commas, e.g.
    /// `a@example.com=Andrei,s@example.com=Shantal`.
    pub fn parse(list: &str) -> std::result::Result<Self, String> {
        let mut members = Vec::new();
        for entry in list.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            members.push(parse_member(entry)?);
        }
        if members.is_empty() {
            return Err("allowlist is empty".to_string());
        }
        Ok(Self::new(members))
    }

    pub fn members(&self) -> &[Member] {
        &self.members
    }

    pub fn member(&self, email: &str) -> Option<&Member> {
        let email = normalize_email(email);
        self.members.iter().find(|m| m.email == email)
    }

    /// Admission check: present and allowlisted.
    pub fn admits(&self, email: Option<&str>) -> bool {
        email.and_then(|e| self.member(e)).is_some()
    }

    /// Name letters written by `email` are signed with.
    pub fn sender_name(&self, email: &str) -> Option<&str> {
        self.member(email).map(|m| m.display_name.as_str())
    }
}

/// Parse a single `email=Name` entry.
pub fn parse_member(entry: &str) -> std::result::Result<Member, String> {
    let (email, name) = entry
        .split_once('=')
        .ok_or_else(|| format!("allowlist entry {entry:?} must look like email=Name"))?;
    let email = email.trim();
    let name = name.trim();
    if !email.contains('@') {
        return Err(format!("allowlist entry {entry:?} has no valid email"));
    }
    if name.is_empty() {
        return Err(format!("allowlist entry {entry:?} has no display name"));
    }
    Ok(Member {
        email: email.to_string(),
        display_name: name.to_string(),
    })
}

fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

/// An admitted caller: a live session whose identity is allowlisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub user_id: String,
    pub email: String,
    pub display_name: String,
}

impl Caller {
    /// Storage namespace for this caller's uploads.
    pub fn namespace(&self) -> String {
        self.user_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                    c.to_ascii_lowercase()
                } else {
                    '_'
                }
            })
            .collect()
    }
}

/// Result of a successful admission: the session token to hand to the
/// browser and who it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    pub token: String,
    pub caller: Caller,
}

pub struct SessionGate {
    allowlist: Arc<Allowlist>,
    backend: Arc<dyn Backend>,
}

impl SessionGate {
    pub fn new(allowlist: Arc<Allowlist>, backend: Arc<dyn Backend>) -> Self {
        Self { allowlist, backend }
    }

    pub fn allowlist(&self) -> &Allowlist {
        &self.allowlist
    }

    /// Complete a provider exchange: issue a session, then keep it only if
    /// the identity is allowlisted. Denied identities have their fresh
    /// session revoked before [`VaultError::Unauthorized`] is returned.
    pub async fn admit(&self, identity: &ProviderIdentity) -> Result<Admission> {
        let email = identity.verified_email();
        let token = self
            .backend
            .create_session(&identity.subject, email)
            .await?;

        match email.and_then(|e| self.caller_for(&identity.subject, e)) {
            Some(caller) => {
                info!(member = %logging::member(&caller.email), "admitted");
                Ok(Admission { token, caller })
            }
            None => {
                warn!(
                    email = email.unwrap_or("<none>"),
                    "identity is not on the allowlist; signing out"
                );
                if let Err(e) = self.backend.sign_out(&token).await {
                    warn!(error = %e, "failed to revoke denied session");
                }
                Err(VaultError::Unauthorized)
            }
        }
    }

    /// Resolve a session token into an admitted caller. The allowlist is
    /// re-applied on every call.
    pub async fn authorize(&self, token: &str) -> Result<Caller> {
        let user = self
            .backend
            .current_user(token)
            .await?
            .ok_or(VaultError::Unauthorized)?;
        user.email
            .as_deref()
            .and_then(|e| self.caller_for(&user.user_id, e))
            .ok_or(VaultError::Unauthorized)
    }

    /// Revoke a session. Unknown tokens are not an error.
    pub async fn sign_out(&self, token: &str) -> Result<()> {
        if self.backend.sign_out(token).await? {
            info!("signed out");
        }
        Ok(())
    }

    fn caller_for(&self, user_id: &str, email: &str) -> Option<Caller> {
        self.allowlist.member(email).map(|m| Caller {
            user_id: user_id.to_string(),
            email: m.email.clone(),
            display_name: m.display_name.clone(),
        })
    }
}
