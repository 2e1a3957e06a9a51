// src/broadcast.rs

//! Runtime overrides of task settings, scoped by cycle point and namespace.

use std::collections::BTreeMap;

use tracing::info;

use crate::cycling::{CyclePoint, CyclingContext, parse_duration_list};
use crate::errors::{CyclerunError, Result};
use crate::taskdef::{TaskDef, TaskRuntime};

/// Matches every cycle point.
pub const ALL_POINTS: &str = "*";

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct BroadcastRow {
    pub point: String,
    pub namespace: String,
    pub key: String,
    pub value: String,
}

/// point pattern => namespace => key => value.
type Settings = BTreeMap<String, BTreeMap<String, BTreeMap<String, String>>>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Broadcasts {
    settings: Settings,
}

fn validate_setting(key: &str, value: &str) -> Result<()> {
    match key {
        "script" | "platform" => Ok(()),
        "execution_retry_delays" | "submission_retry_delays" => parse_duration_list(value).map(|_| ()),
        k if k.strip_prefix("env.").is_some_and(|n| !n.is_empty()) => Ok(()),
        other => Err(CyclerunError::config(format!("unsupported broadcast setting '{other}'"))),
    }
}

impl Broadcasts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Canonical form of a point pattern (`*` or a parsed point).
    pub fn normalize_point(pattern: &str, cycling: &CyclingContext) -> Result<String> {
        let pattern = pattern.trim();
        if pattern == ALL_POINTS {
            return Ok(ALL_POINTS.to_string());
        }
        Ok(cycling.parse_point(pattern)?.to_string())
    }

    /// Store `settings` for every (point, namespace). All settings are
    /// checked before anything is stored.
    pub fn put(
        &mut self,
        points: &[String],
        namespaces: &[String],
        settings: &BTreeMap<String, String>,
        cycling: &CyclingContext,
    ) -> Result<usize> {
        for (key, value) in settings {
            validate_setting(key, value)?;
        }
        let points: Vec<String> = points
            .iter()
            .map(|p| Self::normalize_point(p, cycling))
            .collect::<Result<_>>()?;

        let mut count = 0;
        for point in &points {
            for ns in namespaces {
                let slot = self
                    .settings
                    .entry(point.clone())
                    .or_default()
                    .entry(ns.clone())
                    .or_default();
                for (key, value) in settings {
                    slot.insert(key.clone(), value.clone());
                    count += 1;
                }
            }
        }
        info!(?points, ?namespaces, ?settings, "broadcast set");
        Ok(count)
    }

    /// Clear broadcasts matching the given points and namespaces; `None`
    /// matches everything. Returns how many settings were removed.
    pub fn clear(
        &mut self,
        points: Option<&[String]>,
        namespaces: Option<&[String]>,
        cycling: &CyclingContext,
    ) -> Result<usize> {
        let points: Option<Vec<String>> = points
            .map(|ps| ps.iter().map(|p| Self::normalize_point(p, cycling)).collect::<Result<_>>())
            .transpose()?;
        let mut removed = 0;
        for (point, by_ns) in self.settings.iter_mut() {
            if points.as_ref().is_some_and(|ps| !ps.contains(point)) {
                continue;
            }
            by_ns.retain(|ns, keys| {
                let hit = namespaces.is_none_or(|nss| nss.contains(ns));
                if hit {
                    removed += keys.len();
                }
                !hit
            });
        }
        self.settings.retain(|_, by_ns| !by_ns.is_empty());
        if removed > 0 {
            info!(removed, "broadcast cleared");
        }
        Ok(removed)
    }

    /// Drop point-specific broadcasts older than `oldest`.
    pub fn expire(&mut self, oldest: &CyclePoint, cycling: &CyclingContext) -> usize {
        let before = self.settings.len();
        self.settings.retain(|point, _| {
            point == ALL_POINTS
                || cycling
                    .parse_point(point)
                    .map_or(true, |p| p >= *oldest)
        });
        before - self.settings.len()
    }

    /// Runtime for `def` at `point` with broadcasts applied: `*` before the
    /// specific point, and `root` before families before the task.
    pub fn effective_runtime(&self, def: &TaskDef, point: &CyclePoint) -> Result<TaskRuntime> {
        let mut runtime = def.runtime.clone();
        let point = point.to_string();
        for pattern in [ALL_POINTS, point.as_str()] {
            let Some(by_ns) = self.settings.get(pattern) else {
                continue;
            };
            for ns in def.namespaces.iter().rev() {
                let Some(keys) = by_ns.get(ns) else {
                    continue;
                };
                for (key, value) in keys {
                    apply_setting(&mut runtime, key, value)?;
                }
            }
        }
        Ok(runtime)
    }

    pub fn rows(&self) -> Vec<BroadcastRow> {
        let mut rows = Vec::new();
        for (point, by_ns) in &self.settings {
            for (ns, keys) in by_ns {
                for (key, value) in keys {
                    rows.push(BroadcastRow {
                        point: point.clone(),
                        namespace: ns.clone(),
                        key: key.clone(),
                        value: value.clone(),
                    });
                }
            }
        }
        rows
    }

    pub fn restore(&mut self, rows: impl IntoIterator<Item = BroadcastRow>) {
        for row in rows {
            self.settings
                .entry(row.point)
                .or_default()
                .entry(row.namespace)
                .or_default()
                .insert(row.key, row.value);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.settings.is_empty()
    }
}

fn apply_setting(runtime: &mut TaskRuntime, key: &str, value: &str) -> Result<()> {
    match key {
        "script" => runtime.script = value.to_string(),
        "platform" => runtime.platform = value.to_string(),
        "execution_retry_delays" => runtime.execution_retry_delays = parse_duration_list(value)?,
        "submission_retry_delays" => runtime.submission_retry_delays = parse_duration_list(value)?,
        other => {
            if let Some(name) = other.strip_prefix("env.") {
                runtime.env.insert(name.to_string(), value.to_string());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkflowConfig;
    use crate::config::model::RawWorkflowConfig;

    fn config() -> WorkflowConfig {
        let raw: RawWorkflowConfig = toml::from_str(
            r#"
            [scheduling]
            cycling_mode = "integer"
            initial_cycle_point = "1"
            [scheduling.graph."P1"]
            foo = ""
            [runtime.FAM]
            script = "fam"
            [runtime.foo]
            inherit = ["FAM"]
            "#,
        )
        .unwrap();
        WorkflowConfig::try_from(raw).unwrap()
    }

    fn settings(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn specific_point_and_namespace_win() {
        let cfg = config();
        let foo = cfg.defs.get("foo").unwrap();
        let mut b = Broadcasts::new();
        b.put(&["*".into()], &["root".into()], &settings(&[("script", "all")]), &cfg.cycling)
            .unwrap();
        b.put(&["2".into()], &["FAM".into()], &settings(&[("script", "two"), ("env.X", "1")]), &cfg.cycling)
            .unwrap();

        let at1 = b.effective_runtime(foo, &CyclePoint::Integer(1)).unwrap();
        assert_eq!(at1.script, "all");
        let at2 = b.effective_runtime(foo, &CyclePoint::Integer(2)).unwrap();
        assert_eq!(at2.script, "two");
        assert_eq!(at2.env.get("X").map(String::as_str), Some("1"));
    }

    #[test]
    fn rejects_unknown_settings_without_partial_writes() {
        let cfg = config();
        let mut b = Broadcasts::new();
        let err = b.put(
            &["*".into()],
            &["root".into()],
            &settings(&[("script", "x"), ("bogus", "y")]),
            &cfg.cycling,
        );
        assert!(err.is_err());
        assert!(b.is_empty());
    }

    #[test]
    fn clear_and_expire() {
        let cfg = config();
        let mut b = Broadcasts::new();
        for p in ["1", "5", "*"] {
            b.put(&[p.into()], &["foo".into()], &settings(&[("script", p)]), &cfg.cycling)
                .unwrap();
        }
        assert_eq!(b.expire(&CyclePoint::Integer(3), &cfg.cycling), 1);
        assert_eq!(b.clear(Some(&["5".into()]), None, &cfg.cycling).unwrap(), 1);
        assert_eq!(b.rows().len(), 1);
        assert_eq!(b.rows()[0].point, "*");
    }
}
