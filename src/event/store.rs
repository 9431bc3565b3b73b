use std::collections::HashMap;
use std::sync::Arc;

use chrono::DateTime;
use chrono::Utc;
use tracing::trace;

use super::EventRecord;
use crate::ContextType;
use crate::Error;
use crate::KvStore;
use crate::PermissionChecker;
use crate::PermissionContext;
use crate::PermissionError;
use crate::Principal;
use crate::Result;
use crate::TargetKind;

/// Target dimension of an [`EventFilter`]. A missing value matches every
/// target of the kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetFilter {
    pub kind: TargetKind,
    pub value: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub target: Option<TargetFilter>,
    /// Empty matches every kind
    pub kinds: Vec<String>,
    /// Owner name
    pub owner: Option<String>,
    pub running: Option<bool>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub error_only: bool,
    pub skip: usize,
    pub limit: Option<usize>,
}

impl EventFilter {
    fn matches(
        &self,
        record: &EventRecord,
    ) -> bool {
        if let Some(target) = &self.target {
            let hit = |t: &crate::Target| {
                t.kind == target.kind && target.value.as_deref().map_or(true, |v| v == t.value)
            };
            if !hit(&record.target) && !record.extra_targets.iter().any(|e| hit(&e.target)) {
                return false;
            }
        }
        if !self.kinds.is_empty() && !self.kinds.iter().any(|k| k == &record.kind) {
            return false;
        }
        if let Some(owner) = &self.owner {
            if &record.owner.name != owner {
                return false;
            }
        }
        if let Some(running) = self.running {
            if record.is_running() != running {
                return false;
            }
        }
        if let Some(since) = self.since {
            if record.start_time < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if record.start_time > until {
                return false;
            }
        }
        if self.error_only && record.error.is_none() {
            return false;
        }
        true
    }

    fn paginate(
        &self,
        records: impl Iterator<Item = EventRecord>,
    ) -> Vec<EventRecord> {
        let records = records.skip(self.skip);
        match self.limit {
            Some(limit) => records.take(limit).collect(),
            None => records.collect(),
        }
    }
}

/// Durable store of event records, keyed by event id.
pub struct EventStore {
    store: Arc<dyn KvStore>,
}

impl std::fmt::Debug for EventStore {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("EventStore").field("len", &self.store.len()).finish()
    }
}

impl EventStore {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Writes `record`, replacing any earlier version with the same id.
    pub fn append(
        &self,
        record: &EventRecord,
    ) -> Result<()> {
        let value = serde_json::to_vec(record)?;
        self.store.insert(record.id.as_bytes(), value)?;
        trace!(event_id = %record.id, running = record.is_running(), "event record written");
        Ok(())
    }

    pub fn get(
        &self,
        id: &str,
    ) -> Result<Option<EventRecord>> {
        match self.store.get(id.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Single record lookup on behalf of `viewer`.
    ///
    /// # Errors
    /// - `Error::NotFound` if no event has this id
    /// - `Error::Permission` if the record's snapshot does not admit the viewer
    pub fn get_visible(
        &self,
        id: &str,
        viewer: &Principal,
        checker: &dyn PermissionChecker,
    ) -> Result<EventRecord> {
        let record = self.get(id)?.ok_or_else(|| Error::NotFound(format!("event {id}")))?;
        let contexts = checker.contexts_for(viewer, &record.allowed.scheme);
        if !Self::is_visible_to(&record, &contexts, checker) {
            return Err(PermissionError::Unauthorized {
                principal: viewer.to_string(),
                capability: record.allowed.scheme.clone(),
            }
            .into());
        }
        Ok(record)
    }

    /// Records matching `filter`, newest first.
    pub fn query(
        &self,
        filter: &EventFilter,
    ) -> Result<Vec<EventRecord>> {
        Ok(filter.paginate(self.matching(filter)?.into_iter()))
    }

    /// Like [`query`](Self::query), restricted to records `viewer` may read.
    ///
    /// The viewer's contexts are computed once per permission scheme found in
    /// the result set and compared against each record's recorded snapshot.
    pub fn list_visible(
        &self,
        filter: &EventFilter,
        viewer: &Principal,
        checker: &dyn PermissionChecker,
    ) -> Result<Vec<EventRecord>> {
        let mut contexts_by_scheme: HashMap<String, Vec<PermissionContext>> = HashMap::new();
        let visible = self.matching(filter)?.into_iter().filter(|record| {
            let contexts = contexts_by_scheme
                .entry(record.allowed.scheme.clone())
                .or_insert_with(|| checker.contexts_for(viewer, &record.allowed.scheme));
            Self::is_visible_to(record, contexts, checker)
        });
        Ok(filter.paginate(visible))
    }

    /// Whether a viewer holding `viewer_contexts` may read `record`.
    ///
    /// Uses the allowed-context snapshot recorded when the event was created,
    /// so later permission changes never alter historical audit visibility.
    pub fn is_visible_to(
        record: &EventRecord,
        viewer_contexts: &[PermissionContext],
        checker: &dyn PermissionChecker,
    ) -> bool {
        viewer_contexts.iter().any(|viewer| {
            viewer.ctx_type == ContextType::Global
                || record.allowed.contexts.iter().any(|recorded| checker.context_matches(viewer, recorded))
        })
    }

    fn matching(
        &self,
        filter: &EventFilter,
    ) -> Result<Vec<EventRecord>> {
        let mut records = Vec::new();
        for (_, value) in self.store.scan_prefix(b"")? {
            let record: EventRecord = serde_json::from_slice(&value)?;
            if filter.matches(&record) {
                records.push(record);
            }
        }
        records.sort_by(|a, b| b.start_time.cmp(&a.start_time).then_with(|| a.id.cmp(&b.id)));
        Ok(records)
    }
}
