//! Programs and program-list refresh
//!
//! A program event carries the program `<id>` and any of: `<s>` run status,
//! `<r>` last run and `<f>` last finish times, `<on />` / `<off />`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::NaiveDateTime;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use xmltree::Element;

use isy_stream::xml::{find_element, require_value, value_from_xml};

use crate::error::{Result, StateError};
use crate::event::{keys, ChangeEvent, EntityId};
use crate::observable::Observable;

const TAG_ID: &str = "id";
const TAG_STATUS: &str = "s";
const TAG_LAST_RUN: &str = "r";
const TAG_LAST_FINISHED: &str = "f";
const TAG_ENABLED: &str = "on";
const TAG_DISABLED: &str = "off";
const TIMESTAMP_FORMAT: &str = "%y%m%d %H:%M:%S";

const STATUS_RAN_THEN: &str = "21";
const STATUS_RAN_ELSE: &str = "31";

/// Program ids are four hex digits, zero padded
pub fn normalize_id(id: &str) -> String {
    format!("{:0>4}", id.trim().to_ascii_uppercase())
}

/// Everything about a program besides its status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunState {
    pub last_run: Option<NaiveDateTime>,
    pub last_finished: Option<NaiveDateTime>,
    pub enabled: bool,
    pub run_at_startup: bool,
    pub running: bool,
    /// Times the `then` branch ran since startup
    pub ran_then: u32,
    /// Times the `else` branch ran since startup
    pub ran_else: u32,
}

/// A controller program.
#[derive(Debug)]
pub struct Program {
    id: String,
    name: String,
    /// `true` after the `then` branch ran, `false` after `else`
    pub status: Observable<bool>,
    run_state: RwLock<RunState>,
}

impl Program {
    pub fn new(id: &str, name: impl Into<String>, status: bool, run_state: RunState) -> Self {
        Self {
            id: normalize_id(id),
            name: name.into(),
            status: Observable::new(status),
            run_state: RwLock::new(run_state),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn run_state(&self) -> RunState {
        self.run_state.read().clone()
    }
}

type Refresher = Arc<dyn Fn() + Send + Sync>;

/// Collection of programs keyed by id.
pub struct ProgramManager {
    programs: RwLock<HashMap<String, Arc<Program>>>,
    refresh_count: AtomicU64,
    refresher: RwLock<Option<Refresher>>,
}

impl ProgramManager {
    pub fn new() -> Self {
        Self {
            programs: RwLock::new(HashMap::new()),
            refresh_count: AtomicU64::new(0),
            refresher: RwLock::new(None),
        }
    }

    pub fn insert(&self, program: Program) -> Arc<Program> {
        let program = Arc::new(program);
        self.programs.write().insert(program.id().to_string(), Arc::clone(&program));
        program
    }

    /// Look up by id; unpadded ids are accepted
    pub fn get(&self, id: &str) -> Option<Arc<Program>> {
        self.programs.read().get(&normalize_id(id)).cloned()
    }

    pub fn len(&self) -> usize {
        self.programs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.programs.read().is_empty()
    }

    /// Install the callback that reloads the program list
    pub fn set_refresher<F>(&self, refresher: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *self.refresher.write() = Some(Arc::new(refresher));
    }

    /// Number of refresh requests seen
    pub fn refresh_count(&self) -> u64 {
        self.refresh_count.load(Ordering::SeqCst)
    }

    /// Something changed in the program list without saying what.
    pub fn request_refresh(&self) -> ChangeEvent {
        let count = self.refresh_count.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!(count, "Program list refresh requested");

        let refresher = self.refresher.read().clone();
        if let Some(refresher) = refresher {
            refresher();
        }
        ChangeEvent::new(EntityId::ProgramList, keys::REFRESH)
    }

    /// Apply a program event.
    ///
    /// Status `21` counts a `then` run and sets the status; `31` counts an
    /// `else` run. Any other event, including one without `<s>`, leaves the
    /// status false.
    pub fn update_received(&self, doc: &Element) -> Result<Vec<ChangeEvent>> {
        let id = normalize_id(&require_value(doc, TAG_ID)?);
        let program = self.get(&id).ok_or_else(|| StateError::unknown("program", id.clone()))?;

        let status_code = value_from_xml(doc, TAG_STATUS);
        let last_run = parse_time(doc, TAG_LAST_RUN)?;
        let last_finished = parse_time(doc, TAG_LAST_FINISHED)?;
        let enabled = if find_element(doc, TAG_ENABLED).is_some() {
            Some(true)
        } else if find_element(doc, TAG_DISABLED).is_some() {
            Some(false)
        } else {
            None
        };

        let run_state_changed = {
            let mut state = program.run_state.write();
            let before = state.clone();
            match status_code.as_deref() {
                Some(STATUS_RAN_THEN) => state.ran_then += 1,
                Some(STATUS_RAN_ELSE) => state.ran_else += 1,
                _ => {}
            }
            if last_run.is_some() {
                state.last_run = last_run;
            }
            if last_finished.is_some() {
                state.last_finished = last_finished;
            }
            if let Some(enabled) = enabled {
                state.enabled = enabled;
            }
            *state != before
        };

        let entity = EntityId::Program(id.clone());
        let mut changes = Vec::new();
        if program.status.set(status_code.as_deref() == Some(STATUS_RAN_THEN)) {
            changes.push(ChangeEvent::new(entity.clone(), keys::STATUS));
        }
        if run_state_changed {
            changes.push(ChangeEvent::new(entity, keys::RUN_STATE));
        }

        tracing::debug!(program = %id, status = ?status_code, changes = changes.len(), "Program updated");
        Ok(changes)
    }
}

impl Default for ProgramManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ProgramManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgramManager")
            .field("programs", &self.len())
            .field("refresh_count", &self.refresh_count())
            .finish()
    }
}

fn parse_time(doc: &Element, tag: &'static str) -> Result<Option<NaiveDateTime>> {
    match value_from_xml(doc, tag) {
        Some(raw) => NaiveDateTime::parse_from_str(raw.trim(), TIMESTAMP_FORMAT)
            .map(Some)
            .map_err(|_| StateError::invalid(tag, raw)),
        None => Ok(None),
    }
}
