// src/retry/xtrigger.rs

//! External triggers.
//!
//! An xtrigger gates a proxy's readiness like a prerequisite. Wall-clock
//! triggers are decided inline. Function triggers run off the loop: the
//! manager hands out [`XtriggerCall`]s, the shell runs them and posts the
//! [`XtriggerOutcome`] back. Results are shared by signature, so identical
//! calls from different proxies are evaluated once.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::config::model::XtriggerSection;
use crate::cycling::{CyclePoint, CyclingContext, IsoDuration};
use crate::errors::{CyclerunError, Result};
use crate::pool::ProxyKey;
use crate::task::TaskProxy;
use crate::types::CyclingMode;

pub const WALL_CLOCK: &str = "wall_clock";

/// Call interval for xtriggers that do not set one.
pub const DEFAULT_INTERVAL_SECS: i64 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XtriggerDef {
    pub label: String,
    pub function: String,
    pub args: Vec<String>,
    pub kwargs: BTreeMap<String, String>,
    /// Minimum time between calls while unsatisfied.
    pub interval: IsoDuration,
    /// Wall-clock offset from the cycle point.
    pub clock_offset: Option<IsoDuration>,
}

impl XtriggerDef {
    pub fn from_section(label: &str, section: &XtriggerSection, cycling: &CyclingContext) -> Result<Self> {
        if section.function.trim().is_empty() {
            return Err(CyclerunError::config(format!("xtrigger '{label}' has no function")));
        }
        let interval = section
            .interval
            .as_deref()
            .map(IsoDuration::parse)
            .transpose()?
            .unwrap_or_else(|| IsoDuration::from_seconds(DEFAULT_INTERVAL_SECS));

        let clock_offset = if section.function == WALL_CLOCK {
            if cycling.mode != CyclingMode::DateTime {
                return Err(CyclerunError::config(format!(
                    "xtrigger '{label}': wall_clock needs date-time cycling"
                )));
            }
            let offset = section
                .kwargs
                .get("offset")
                .or_else(|| section.args.first())
                .map(|s| IsoDuration::parse(s))
                .transpose()?;
            Some(offset.unwrap_or_default())
        } else {
            None
        };

        Ok(Self {
            label: label.to_string(),
            function: section.function.clone(),
            args: section.args.clone(),
            kwargs: section.kwargs.clone(),
            interval,
            clock_offset,
        })
    }

    pub fn is_wall_clock(&self) -> bool {
        self.clock_offset.is_some()
    }

    /// Arguments with `%(point)s`-style placeholders filled in for `proxy`.
    pub fn call_for(&self, proxy: &TaskProxy, workflow: &str) -> XtriggerCall {
        let point = proxy.point().to_string();
        let id = proxy.id.to_string();
        let fill = |s: &str| {
            s.replace("%(point)s", &point)
                .replace("%(name)s", proxy.name())
                .replace("%(id)s", &id)
                .replace("%(workflow)s", workflow)
        };
        let args: Vec<String> = self.args.iter().map(|a| fill(a)).collect();
        let kwargs: BTreeMap<String, String> = self
            .kwargs
            .iter()
            .map(|(k, v)| (k.clone(), fill(v)))
            .collect();

        let mut parts = args.clone();
        parts.extend(kwargs.iter().map(|(k, v)| format!("{k}={v}")));
        let signature = format!("{}({})", self.function, parts.join(", "));

        XtriggerCall {
            signature,
            function: self.function.clone(),
            args,
            kwargs,
        }
    }

    fn wall_clock_due(&self, point: &CyclePoint, now: DateTime<Utc>) -> bool {
        let (Some(offset), Some(dt)) = (self.clock_offset, point.as_datetime()) else {
            return false;
        };
        offset
            .add_to(dt)
            .is_some_and(|trigger_time| now >= trigger_time.with_timezone(&Utc))
    }
}

/// A function call to run off the loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XtriggerCall {
    pub signature: String,
    pub function: String,
    pub args: Vec<String>,
    pub kwargs: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XtriggerOutcome {
    /// Condition met; the returned values are kept with the result.
    Satisfied(BTreeMap<String, String>),
    NotSatisfied,
    Failed(String),
}

/// A custom xtrigger function. Runs on a blocking thread.
pub trait XtriggerFunction: Send + Sync {
    /// `Ok(Some(results))` when satisfied, `Ok(None)` when not yet.
    fn call(&self, args: &[String], kwargs: &BTreeMap<String, String>) -> anyhow::Result<Option<BTreeMap<String, String>>>;
}

/// `echo`: satisfied when `succeed=true`; returns its keyword arguments.
struct Echo;

impl XtriggerFunction for Echo {
    fn call(&self, args: &[String], kwargs: &BTreeMap<String, String>) -> anyhow::Result<Option<BTreeMap<String, String>>> {
        info!(?args, ?kwargs, "echo xtrigger");
        let succeed = kwargs
            .get("succeed")
            .is_some_and(|v| v.eq_ignore_ascii_case("true"));
        Ok(succeed.then(|| kwargs.clone()))
    }
}

/// `file_exists(path)`.
struct FileExists;

impl XtriggerFunction for FileExists {
    fn call(&self, args: &[String], kwargs: &BTreeMap<String, String>) -> anyhow::Result<Option<BTreeMap<String, String>>> {
        let path = kwargs
            .get("path")
            .or_else(|| args.first())
            .ok_or_else(|| anyhow::anyhow!("file_exists needs a path"))?;
        if Path::new(path).exists() {
            Ok(Some(BTreeMap::from([("path".to_string(), path.clone())])))
        } else {
            Ok(None)
        }
    }
}

/// Xtrigger functions by name. Cheap to clone and shared with the shell.
#[derive(Clone)]
pub struct XtriggerRegistry {
    functions: HashMap<String, Arc<dyn XtriggerFunction>>,
}

impl std::fmt::Debug for XtriggerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.functions.keys().collect();
        names.sort();
        f.debug_struct("XtriggerRegistry").field("functions", &names).finish()
    }
}

impl Default for XtriggerRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl XtriggerRegistry {
    pub fn with_builtins() -> Self {
        let mut functions: HashMap<String, Arc<dyn XtriggerFunction>> = HashMap::new();
        functions.insert("echo".to_string(), Arc::new(Echo));
        functions.insert("file_exists".to_string(), Arc::new(FileExists));
        Self { functions }
    }

    pub fn register(&mut self, name: impl Into<String>, function: Arc<dyn XtriggerFunction>) {
        self.functions.insert(name.into(), function);
    }

    pub fn call(&self, call: &XtriggerCall) -> XtriggerOutcome {
        let Some(function) = self.functions.get(&call.function) else {
            return XtriggerOutcome::Failed(format!("unknown xtrigger function '{}'", call.function));
        };
        match function.call(&call.args, &call.kwargs) {
            Ok(Some(results)) => XtriggerOutcome::Satisfied(results),
            Ok(None) => XtriggerOutcome::NotSatisfied,
            Err(e) => XtriggerOutcome::Failed(format!("{e:#}")),
        }
    }
}

/// Result of one evaluation pass.
#[derive(Debug, Default)]
pub struct XtriggerPass {
    /// `(proxy, label)` pairs now satisfied.
    pub satisfied: Vec<(ProxyKey, String)>,
    /// Calls the shell must run.
    pub calls: Vec<XtriggerCall>,
}

#[derive(Debug, Default)]
pub struct XtriggerManager {
    defs: BTreeMap<String, XtriggerDef>,
    workflow: String,
    /// Signature => results of satisfied calls.
    satisfied: BTreeMap<String, BTreeMap<String, String>>,
    in_flight: HashSet<String>,
    last_call: HashMap<String, DateTime<Utc>>,
    /// Newly satisfied signatures not yet persisted.
    dirty: Vec<(String, BTreeMap<String, String>)>,
    /// Signatures housekept since the last persist.
    removed: Vec<String>,
}

impl XtriggerManager {
    pub fn new(defs: BTreeMap<String, XtriggerDef>, workflow: impl Into<String>) -> Self {
        Self {
            defs,
            workflow: workflow.into(),
            ..Self::default()
        }
    }

    pub fn set_defs(&mut self, defs: BTreeMap<String, XtriggerDef>) {
        self.defs = defs;
    }

    pub fn restore(&mut self, satisfied: impl IntoIterator<Item = (String, BTreeMap<String, String>)>) {
        self.satisfied.extend(satisfied);
    }

    pub fn has_in_flight(&self) -> bool {
        !self.in_flight.is_empty()
    }

    /// Check every waiting proxy's unsatisfied xtriggers.
    pub fn evaluate<'a>(
        &mut self,
        proxies: impl Iterator<Item = (ProxyKey, &'a TaskProxy)>,
        now: DateTime<Utc>,
    ) -> XtriggerPass {
        let mut pass = XtriggerPass::default();
        for (key, proxy) in proxies {
            if proxy.is_runahead || proxy.is_final() || proxy.is_active() {
                continue;
            }
            for (label, _) in proxy.xtriggers.iter().filter(|(_, ok)| !**ok) {
                let Some(def) = self.defs.get(label) else {
                    continue;
                };
                if def.is_wall_clock() {
                    if def.wall_clock_due(proxy.point(), now) {
                        pass.satisfied.push((key, label.clone()));
                    }
                    continue;
                }

                let call = def.call_for(proxy, &self.workflow);
                if self.satisfied.contains_key(&call.signature) {
                    pass.satisfied.push((key, label.clone()));
                    continue;
                }
                if self.in_flight.contains(&call.signature) {
                    continue;
                }
                let waited_enough = self
                    .last_call
                    .get(&call.signature)
                    .is_none_or(|last| now >= *last + def.interval.to_time_delta());
                if !waited_enough {
                    continue;
                }
                debug!(signature = %call.signature, task = %proxy.id, "calling xtrigger");
                self.in_flight.insert(call.signature.clone());
                self.last_call.insert(call.signature.clone(), now);
                pass.calls.push(call);
            }
        }
        pass
    }

    pub fn on_result(&mut self, signature: &str, outcome: XtriggerOutcome) {
        self.in_flight.remove(signature);
        match outcome {
            XtriggerOutcome::Satisfied(results) => {
                info!(signature = %signature, "xtrigger satisfied");
                self.satisfied.insert(signature.to_string(), results.clone());
                self.dirty.push((signature.to_string(), results));
            }
            XtriggerOutcome::NotSatisfied => {
                debug!(signature = %signature, "xtrigger not satisfied yet");
            }
            XtriggerOutcome::Failed(reason) => {
                warn!(signature = %signature, %reason, "xtrigger function failed; will retry");
            }
        }
    }

    /// Drop cached results no waiting proxy can still use.
    pub fn housekeep<'a>(&mut self, proxies: impl Iterator<Item = &'a TaskProxy>) {
        let mut wanted: HashSet<String> = HashSet::new();
        for proxy in proxies {
            for label in proxy.xtriggers.keys() {
                if let Some(def) = self.defs.get(label).filter(|d| !d.is_wall_clock()) {
                    wanted.insert(def.call_for(proxy, &self.workflow).signature);
                }
            }
        }
        let stale: Vec<String> = self
            .satisfied
            .keys()
            .filter(|sig| !wanted.contains(*sig))
            .cloned()
            .collect();
        for sig in stale {
            self.satisfied.remove(&sig);
            self.last_call.remove(&sig);
            self.removed.push(sig);
        }
        self.last_call.retain(|sig, _| wanted.contains(sig));
    }

    /// `(upserts, deletes)` since the last call.
    pub fn take_dirty(&mut self) -> (Vec<(String, BTreeMap<String, String>)>, Vec<String>) {
        (std::mem::take(&mut self.dirty), std::mem::take(&mut self.removed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkflowConfig;
    use crate::config::model::RawWorkflowConfig;
    use crate::task::FlowNums;
    use chrono::TimeZone;

    fn config(xtriggers: &str, trigger: &str) -> WorkflowConfig {
        let raw: RawWorkflowConfig = toml::from_str(&format!(
            r#"
            [scheduling]
            initial_cycle_point = "2020"
            [scheduling.xtriggers]
            {xtriggers}
            [scheduling.graph."P1D"]
            foo = "{trigger}"
            "#
        ))
        .unwrap();
        WorkflowConfig::try_from(raw).unwrap()
    }

    fn proxy(cfg: &WorkflowConfig) -> TaskProxy {
        let mut p = TaskProxy::new(
            cfg.defs.get("foo").unwrap().clone(),
            cfg.cycling.initial.clone(),
            FlowNums::single(1),
            &cfg.cycling.initial,
        );
        p.is_runahead = false;
        p
    }

    #[test]
    fn wall_clock_is_decided_inline() {
        let cfg = config(r#"clock = { function = "wall_clock", kwargs = { offset = "PT1H" } }"#, "@clock");
        let p = proxy(&cfg);
        let mut mgr = XtriggerManager::new(cfg.xtriggers.clone(), "wf");
        let before = Utc.with_ymd_and_hms(2020, 1, 1, 0, 30, 0).unwrap();
        assert!(mgr.evaluate([(ProxyKey(1), &p)].into_iter(), before).satisfied.is_empty());
        let after = Utc.with_ymd_and_hms(2020, 1, 1, 1, 0, 0).unwrap();
        let pass = mgr.evaluate([(ProxyKey(1), &p)].into_iter(), after);
        assert_eq!(pass.satisfied, vec![(ProxyKey(1), "clock".to_string())]);
        assert!(pass.calls.is_empty());
    }

    #[test]
    fn function_calls_are_deduplicated_and_cached() {
        let cfg = config(
            r#"ready = { function = "echo", args = ["%(point)s"], kwargs = { succeed = "true" } }"#,
            "@ready",
        );
        let p = proxy(&cfg);
        let mut mgr = XtriggerManager::new(cfg.xtriggers.clone(), "wf");
        let now = Utc::now();
        let pass = mgr.evaluate([(ProxyKey(1), &p), (ProxyKey(2), &p)].into_iter(), now);
        assert_eq!(pass.calls.len(), 1);
        assert_eq!(pass.calls[0].signature, "echo(20200101T0000Z, succeed=true)");

        let outcome = XtriggerRegistry::with_builtins().call(&pass.calls[0]);
        assert!(matches!(outcome, XtriggerOutcome::Satisfied(_)));
        mgr.on_result(&pass.calls[0].signature, outcome);

        let pass = mgr.evaluate([(ProxyKey(1), &p)].into_iter(), now);
        assert_eq!(pass.satisfied.len(), 1);
        assert_eq!(mgr.take_dirty().0.len(), 1);
    }

    #[test]
    fn unsatisfied_calls_wait_for_the_default_interval() {
        let cfg = config(r#"ready = { function = "file_exists", args = ["/no/such/%(point)s"] }"#, "@ready");
        assert_eq!(cfg.xtriggers["ready"].interval.exact_seconds(), Some(DEFAULT_INTERVAL_SECS));
        let p = proxy(&cfg);
        let mut mgr = XtriggerManager::new(cfg.xtriggers.clone(), "wf");
        let t0 = Utc::now();

        let mut calls = 0;
        for _ in 0..6 {
            let pass = mgr.evaluate([(ProxyKey(1), &p)].into_iter(), t0);
            for call in &pass.calls {
                calls += 1;
                mgr.on_result(&call.signature, XtriggerOutcome::NotSatisfied);
            }
        }
        assert_eq!(calls, 1);

        let later = t0 + chrono::TimeDelta::seconds(DEFAULT_INTERVAL_SECS);
        assert_eq!(mgr.evaluate([(ProxyKey(1), &p)].into_iter(), later).calls.len(), 1);
    }

    #[test]
    fn failures_are_retried_after_the_interval() {
        let cfg = config(r#"gone = { function = "nope", interval = "PT10S" }"#, "@gone");
        let p = proxy(&cfg);
        let mut mgr = XtriggerManager::new(cfg.xtriggers.clone(), "wf");
        let t0 = Utc::now();
        let pass = mgr.evaluate([(ProxyKey(1), &p)].into_iter(), t0);
        let outcome = XtriggerRegistry::default().call(&pass.calls[0]);
        assert!(matches!(outcome, XtriggerOutcome::Failed(_)));
        mgr.on_result(&pass.calls[0].signature, outcome);

        let soon = t0 + chrono::TimeDelta::seconds(5);
        assert!(mgr.evaluate([(ProxyKey(1), &p)].into_iter(), soon).calls.is_empty());
        let later = t0 + chrono::TimeDelta::seconds(10);
        assert_eq!(mgr.evaluate([(ProxyKey(1), &p)].into_iter(), later).calls.len(), 1);
    }

    #[test]
    fn wall_clock_needs_datetime_cycling() {
        let raw: RawWorkflowConfig = toml::from_str(
            r#"
            [scheduling]
            cycling_mode = "integer"
            initial_cycle_point = "1"
            [scheduling.xtriggers]
            clock = { function = "wall_clock" }
            [scheduling.graph."P1"]
            foo = "@clock"
            "#,
        )
        .unwrap();
        assert!(WorkflowConfig::try_from(raw).is_err());
    }
}
