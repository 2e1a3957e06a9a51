// src/task/prerequisite.rs

//! Prerequisites: boolean expressions over upstream outputs.
//!
//! A prerequisite holds keys `(task, point, output)`, never references to
//! other proxies, so it stays valid when the upstream proxy is pruned.

use std::fmt;

use crate::cycling::CyclePoint;

/// The upstream output a condition waits for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConditionKey {
    pub task: String,
    pub point: CyclePoint,
    pub output: String,
}

impl fmt::Display for ConditionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.point, self.task, self.output)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Satisfaction {
    Unsatisfied,
    /// The upstream output was recorded.
    Naturally,
    /// Satisfied by a manual trigger.
    Forced,
    /// Refers to a point before the initial cycle point.
    PreInitial,
}

impl Satisfaction {
    pub fn is_satisfied(self) -> bool {
        !matches!(self, Satisfaction::Unsatisfied)
    }

    pub fn as_db_str(self) -> &'static str {
        match self {
            Satisfaction::Unsatisfied => "unsatisfied",
            Satisfaction::Naturally => "satisfied naturally",
            Satisfaction::Forced => "force satisfied",
            Satisfaction::PreInitial => "pre-initial",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "unsatisfied" => Some(Satisfaction::Unsatisfied),
            "satisfied naturally" => Some(Satisfaction::Naturally),
            "force satisfied" => Some(Satisfaction::Forced),
            "pre-initial" => Some(Satisfaction::PreInitial),
            _ => None,
        }
    }
}

/// Expression tree whose leaves index into the condition list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrereqExpr {
    Cond(usize),
    All(Vec<PrereqExpr>),
    Any(Vec<PrereqExpr>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prerequisite {
    conditions: Vec<(ConditionKey, Satisfaction)>,
    expr: PrereqExpr,
}

impl Prerequisite {
    pub fn new(conditions: Vec<(ConditionKey, Satisfaction)>, expr: PrereqExpr) -> Self {
        Self { conditions, expr }
    }

    pub fn is_satisfied(&self) -> bool {
        self.eval(&self.expr)
    }

    fn eval(&self, expr: &PrereqExpr) -> bool {
        match expr {
            PrereqExpr::Cond(i) => self
                .conditions
                .get(*i)
                .is_some_and(|(_, s)| s.is_satisfied()),
            PrereqExpr::All(terms) => terms.iter().all(|t| self.eval(t)),
            PrereqExpr::Any(terms) => terms.iter().any(|t| self.eval(t)),
        }
    }

    /// Mark `key` satisfied. Returns true if anything changed.
    pub fn satisfy(&mut self, key: &ConditionKey) -> bool {
        let mut changed = false;
        for (k, state) in self.conditions.iter_mut() {
            if k == key && *state == Satisfaction::Unsatisfied {
                *state = Satisfaction::Naturally;
                changed = true;
            }
        }
        changed
    }

    /// Manual trigger: every outstanding condition becomes force-satisfied.
    pub fn force_satisfy(&mut self) {
        for (_, state) in self.conditions.iter_mut() {
            if *state == Satisfaction::Unsatisfied {
                *state = Satisfaction::Forced;
            }
        }
    }

    /// Overlay a previously recorded state (restart, reload).
    pub fn restore_state(&mut self, key: &ConditionKey, state: Satisfaction) {
        for (k, s) in self.conditions.iter_mut() {
            if k == key {
                *s = state;
            }
        }
    }

    pub fn conditions(&self) -> impl Iterator<Item = (&ConditionKey, Satisfaction)> {
        self.conditions.iter().map(|(k, s)| (k, *s))
    }

    pub fn unsatisfied(&self) -> impl Iterator<Item = &ConditionKey> {
        self.conditions
            .iter()
            .filter(|(_, s)| !s.is_satisfied())
            .map(|(k, _)| k)
    }

    pub fn references(&self, task: &str, point: &CyclePoint) -> bool {
        self.conditions
            .iter()
            .any(|(k, _)| k.task == task && k.point == *point)
    }

    fn render(&self, expr: &PrereqExpr, out: &mut String, nested: bool) {
        match expr {
            PrereqExpr::Cond(i) => {
                if let Some((k, _)) = self.conditions.get(*i) {
                    out.push_str(&k.to_string());
                }
            }
            PrereqExpr::All(terms) | PrereqExpr::Any(terms) => {
                let sep = if matches!(expr, PrereqExpr::All(_)) { " & " } else { " | " };
                if nested {
                    out.push('(');
                }
                for (i, t) in terms.iter().enumerate() {
                    if i > 0 {
                        out.push_str(sep);
                    }
                    self.render(t, out, true);
                }
                if nested {
                    out.push(')');
                }
            }
        }
    }
}

impl fmt::Display for Prerequisite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        self.render(&self.expr, &mut out, false);
        f.write_str(&out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(task: &str, point: i64) -> ConditionKey {
        ConditionKey {
            task: task.to_string(),
            point: CyclePoint::Integer(point),
            output: "succeeded".to_string(),
        }
    }

    fn a_or_b_and_c() -> Prerequisite {
        Prerequisite::new(
            vec![
                (key("a", 1), Satisfaction::Unsatisfied),
                (key("b", 1), Satisfaction::Unsatisfied),
                (key("c", 1), Satisfaction::Unsatisfied),
            ],
            PrereqExpr::Any(vec![
                PrereqExpr::Cond(0),
                PrereqExpr::All(vec![PrereqExpr::Cond(1), PrereqExpr::Cond(2)]),
            ]),
        )
    }

    #[test]
    fn evaluates_and_or_expressions() {
        let mut p = a_or_b_and_c();
        assert!(!p.is_satisfied());
        assert!(p.satisfy(&key("b", 1)));
        assert!(!p.is_satisfied());
        p.satisfy(&key("c", 1));
        assert!(p.is_satisfied());
        assert_eq!(p.to_string(), "1/a:succeeded | (1/b:succeeded & 1/c:succeeded)");
    }

    #[test]
    fn satisfaction_is_monotonic() {
        let mut p = a_or_b_and_c();
        p.satisfy(&key("a", 1));
        assert!(!p.satisfy(&key("a", 1)));
        p.force_satisfy();
        let states: Vec<_> = p.conditions().map(|(_, s)| s).collect();
        assert_eq!(
            states,
            vec![Satisfaction::Naturally, Satisfaction::Forced, Satisfaction::Forced]
        );
    }

    #[test]
    fn db_strings_round_trip() {
        for s in [
            Satisfaction::Unsatisfied,
            Satisfaction::Naturally,
            Satisfaction::Forced,
            Satisfaction::PreInitial,
        ] {
            assert_eq!(Satisfaction::from_db_str(s.as_db_str()), Some(s));
        }
    }
}
