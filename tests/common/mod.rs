use std::collections::HashMap;
use std::sync::Arc;

use lockstep::constants::APPLOGS_TREE;
use lockstep::constants::EVENTS_TREE;
use lockstep::constants::LOCKS_TREE;
use lockstep::init_sled_db;
use lockstep::ContextType;
use lockstep::EventManager;
use lockstep::EventStore;
use lockstep::LockManager;
use lockstep::LogHub;
use lockstep::LogHubConfig;
use lockstep::PermissionChecker;
use lockstep::PermissionContext;
use lockstep::Principal;
use lockstep::SledStore;
use tempfile::TempDir;

/// Grants each principal its capabilities in a fixed set of contexts.
#[derive(Default)]
pub struct StaticPolicy {
    grants: HashMap<String, Vec<PermissionContext>>,
}

impl StaticPolicy {
    pub fn grant(
        mut self,
        principal: &str,
        context: PermissionContext,
    ) -> Self {
        self.grants.entry(principal.to_string()).or_default().push(context);
        self
    }
}

impl PermissionChecker for StaticPolicy {
    fn contexts_for(
        &self,
        principal: &Principal,
        _capability: &str,
    ) -> Vec<PermissionContext> {
        self.grants.get(&principal.name).cloned().unwrap_or_default()
    }

    fn check(
        &self,
        principal: &Principal,
        capability: &str,
        contexts: &[PermissionContext],
    ) -> bool {
        self.contexts_for(principal, capability).iter().any(|granted| {
            granted.ctx_type == ContextType::Global || contexts.contains(granted)
        })
    }
}

/// A control plane instance backed by a sled database in a temp dir.
pub struct Plane {
    pub events: EventManager,
    pub hub: LogHub,
    pub db: sled::Db,
    _dir: TempDir,
}

pub fn plane(policy: StaticPolicy) -> Plane {
    let dir = tempfile::tempdir().unwrap();
    let db = init_sled_db(dir.path().join("db")).unwrap();
    let events = manager_on(&db);
    let hub = LogHub::new(
        Arc::new(SledStore::open(&db, APPLOGS_TREE, false).unwrap()),
        Arc::new(policy),
        LogHubConfig::default(),
    );
    Plane {
        events,
        hub,
        db,
        _dir: dir,
    }
}

/// Independent manager over the same database handle, as used by a second
/// component of the same process.
#[allow(dead_code)]
pub fn manager_on(db: &sled::Db) -> EventManager {
    let locks = SledStore::open(db, LOCKS_TREE, false).unwrap();
    let events = SledStore::open(db, EVENTS_TREE, false).unwrap();
    EventManager::new(
        Arc::new(LockManager::new(Arc::new(locks), None)),
        Arc::new(EventStore::new(Arc::new(events))),
    )
}
