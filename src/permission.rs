//! Narrow capability interface consumed by events and the log hub.
//!
//! Policy evaluation lives outside this crate. The core only asks two
//! questions: which contexts grant a principal a capability, and whether a
//! principal holds a capability within a set of contexts.

use std::fmt;

#[cfg(test)]
use mockall::automock;
use serde::Deserialize;
use serde::Serialize;

use crate::PermissionError;
use crate::Result;

pub const PERM_APP_READ_EVENTS: &str = "app.read.events";
pub const PERM_APP_READ_LOG: &str = "app.read.log";
pub const PERM_APP_UPDATE_LOG: &str = "app.update.log";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContextType {
    Global,
    App,
    Team,
    Pool,
    Service,
    ServiceInstance,
    User,
    Role,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PermissionContext {
    #[serde(rename = "ctxtype")]
    pub ctx_type: ContextType,
    pub value: String,
}

impl PermissionContext {
    pub fn new(
        ctx_type: ContextType,
        value: impl Into<String>,
    ) -> Self {
        Self {
            ctx_type,
            value: value.into(),
        }
    }

    pub fn global() -> Self {
        Self::new(ContextType::Global, "")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PrincipalKind {
    User,
    Token,
    Internal,
}

/// Identity of whoever initiated an operation or is reading its record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Principal {
    #[serde(rename = "type")]
    pub kind: PrincipalKind,
    pub name: String,
}

impl Principal {
    pub fn user(name: impl Into<String>) -> Self {
        Self {
            kind: PrincipalKind::User,
            name: name.into(),
        }
    }

    pub fn token(name: impl Into<String>) -> Self {
        Self {
            kind: PrincipalKind::Token,
            name: name.into(),
        }
    }

    pub fn internal(name: impl Into<String>) -> Self {
        Self {
            kind: PrincipalKind::Internal,
            name: name.into(),
        }
    }
}

impl fmt::Display for Principal {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let kind = match self.kind {
            PrincipalKind::User => "user",
            PrincipalKind::Token => "token",
            PrincipalKind::Internal => "internal",
        };
        write!(f, "{}:{}", kind, self.name)
    }
}

/// Allowed-context snapshot recorded on an event at creation time.
///
/// Audit visibility is always decided against this snapshot, never against a
/// fresh evaluation of the target's current contexts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allowed {
    pub scheme: String,
    pub contexts: Vec<PermissionContext>,
}

impl Allowed {
    pub fn new(
        scheme: impl Into<String>,
        contexts: Vec<PermissionContext>,
    ) -> Self {
        Self {
            scheme: scheme.into(),
            contexts,
        }
    }
}

#[cfg_attr(test, automock)]
pub trait PermissionChecker: Send + Sync + 'static {
    /// Contexts in which `principal` holds `capability`.
    fn contexts_for(
        &self,
        principal: &Principal,
        capability: &str,
    ) -> Vec<PermissionContext>;

    /// Whether `principal` holds `capability` in any of `contexts`.
    fn check(
        &self,
        principal: &Principal,
        capability: &str,
        contexts: &[PermissionContext],
    ) -> bool;

    /// Context matching rule used for audit visibility.
    fn context_matches(
        &self,
        viewer: &PermissionContext,
        recorded: &PermissionContext,
    ) -> bool {
        viewer.ctx_type == ContextType::Global || viewer == recorded
    }
}

/// Grants every capability to internal principals and nothing to anyone else.
///
/// Used by the daemon when no external policy evaluator is wired in.
#[derive(Debug, Clone, Copy, Default)]
pub struct InternalOnly;

impl PermissionChecker for InternalOnly {
    fn contexts_for(
        &self,
        principal: &Principal,
        _capability: &str,
    ) -> Vec<PermissionContext> {
        match principal.kind {
            PrincipalKind::Internal => vec![PermissionContext::global()],
            _ => vec![],
        }
    }

    fn check(
        &self,
        principal: &Principal,
        _capability: &str,
        _contexts: &[PermissionContext],
    ) -> bool {
        principal.kind == PrincipalKind::Internal
    }
}

/// Fails with [`PermissionError::Unauthorized`] unless `principal` holds
/// `capability` in one of `contexts`.
pub fn require(
    checker: &dyn PermissionChecker,
    principal: &Principal,
    capability: &str,
    contexts: &[PermissionContext],
) -> Result<()> {
    if checker.check(principal, capability, contexts) {
        return Ok(());
    }
    Err(PermissionError::Unauthorized {
        principal: principal.to_string(),
        capability: capability.to_string(),
    }
    .into())
}
