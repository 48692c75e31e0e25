//! Local override cache.
//!
//! The receiver confirms commands only indirectly: a `set` goes out, and some
//! later telegram or poll reports the new value. In between, polls still
//! report the old value, and exposing that would make the hub UI flicker
//! back and forth. The cache keeps each locally-set value visible until the
//! device either confirms it or reports something the user did not ask for.

use crate::types::{DeviceState, ZoneId};
use std::collections::HashMap;

/// A field the cache can track, addressed independently of the state graph
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldPath {
    ZonePower(ZoneId),
    ZoneMute(ZoneId),
    ZoneVolume(ZoneId),
    ZoneInput(ZoneId),
    InputLabel(String),
    InputHidden(String),
}

/// A small copyable value record; no state-graph snapshots are taken
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Bool(bool),
    /// Volume steps, pre-rounded to the 0.1 grid
    Steps(f64),
    Key(Option<String>),
    Text(String),
}

#[derive(Debug, Clone)]
struct OverrideEntry {
    /// Value the user just set
    set: FieldValue,
    /// Canonical value observed immediately before the set
    prior: FieldValue,
}

/// Per-device override cache; see module docs for the reconciliation rules.
#[derive(Debug, Default)]
pub struct OverrideCache {
    entries: HashMap<FieldPath, OverrideEntry>,
}

impl OverrideCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a local set(). Captures the canonical value as it was at
    /// set-time; a second set on the same path supersedes the first but
    /// keeps the original pre-set value so a late echo of it is still
    /// recognized.
    pub fn note_set(&mut self, path: FieldPath, set: FieldValue, canonical: FieldValue) {
        let prior = self
            .entries
            .remove(&path)
            .map(|e| e.prior)
            .unwrap_or(canonical);
        self.entries.insert(path, OverrideEntry { set, prior });
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Three-way test for one field against a fresh canonical value.
    /// Returns the value to expose.
    pub fn reconcile(&mut self, path: &FieldPath, canonical: &FieldValue) -> FieldValue {
        let Some(entry) = self.entries.get(path) else {
            return canonical.clone();
        };
        if *canonical == entry.prior {
            // Device has not caught up; suppress the apparent revert.
            return entry.set.clone();
        }
        // Either confirmed (canonical == set) or an external actor changed
        // the value; in both cases canonical wins from here on.
        self.entries.remove(path);
        canonical.clone()
    }

    /// Run the three-way test for every tracked field against a fresh
    /// canonical state, dropping resolved entries. Runs on each applied
    /// update, so a confirmation is observed when it arrives; otherwise an
    /// external change back to the pre-set value afterwards would be
    /// mistaken for a stale echo and masked.
    pub fn resolve(&mut self, canonical: &DeviceState) {
        let paths: Vec<FieldPath> = self.entries.keys().cloned().collect();
        for path in paths {
            if let Some(value) = field_value(canonical, &path) {
                let _ = self.reconcile(&path, &value);
            }
        }
    }

    /// Produce the exposed view of a canonical state: every tracked field is
    /// run through the three-way test, resolved entries are dropped.
    pub fn overlay(&mut self, canonical: &DeviceState) -> DeviceState {
        let mut exposed = canonical.clone();

        for zone in &mut exposed.zones {
            let index = zone.index;
            if let FieldValue::Bool(v) =
                self.reconcile(&FieldPath::ZonePower(index), &FieldValue::Bool(zone.power))
            {
                zone.power = v;
            }
            if let FieldValue::Bool(v) =
                self.reconcile(&FieldPath::ZoneMute(index), &FieldValue::Bool(zone.mute))
            {
                zone.mute = v;
            }
            if let FieldValue::Steps(v) = self.reconcile(
                &FieldPath::ZoneVolume(index),
                &FieldValue::Steps(zone.volume),
            ) {
                zone.volume = v;
                zone.volume_db = crate::telegram::steps_to_db(v);
            }
            if let FieldValue::Key(v) = self.reconcile(
                &FieldPath::ZoneInput(index),
                &FieldValue::Key(zone.input.clone()),
            ) {
                zone.input = v;
            }
        }

        for input in &mut exposed.inputs {
            if let FieldValue::Text(v) = self.reconcile(
                &FieldPath::InputLabel(input.key.clone()),
                &FieldValue::Text(input.label.clone()),
            ) {
                input.label = v;
            }
            if let FieldValue::Bool(v) = self.reconcile(
                &FieldPath::InputHidden(input.key.clone()),
                &FieldValue::Bool(input.hidden),
            ) {
                input.hidden = v;
            }
        }

        exposed
    }
}

/// Current canonical value of one tracked field, if the field still exists.
fn field_value(state: &DeviceState, path: &FieldPath) -> Option<FieldValue> {
    match path {
        FieldPath::ZonePower(z) => state.zone(*z).map(|z| FieldValue::Bool(z.power)),
        FieldPath::ZoneMute(z) => state.zone(*z).map(|z| FieldValue::Bool(z.mute)),
        FieldPath::ZoneVolume(z) => state.zone(*z).map(|z| FieldValue::Steps(z.volume)),
        FieldPath::ZoneInput(z) => state.zone(*z).map(|z| FieldValue::Key(z.input.clone())),
        FieldPath::InputLabel(k) => state.input(k).map(|i| FieldValue::Text(i.label.clone())),
        FieldPath::InputHidden(k) => state.input(k).map(|i| FieldValue::Bool(i.hidden)),
    }
}
