#![forbid(unsafe_code)]

//! Routing of externally supplied errors onto the control tree.
//!
//! Callers report errors against flat paths (`"users[2].email"`), typically
//! straight from a server response. [`CustomErrorMatcher`] walks those paths
//! against the static [`ControlConfig`] tree and produces [`CustomError`]s
//! whose `path` is the list of child keys from the root to the target.
//!
//! # Matching
//!
//! At each container the head of the remaining path must be one of the
//! container's child keys, written either bare (`email`) or bracketed
//! (`[email]`), and followed by `.`, `[` or the end of the path. Object keys
//! are the declared field names, tried in declaration order, so field names
//! that themselves contain `.` or `[` still resolve. Array keys are decimal
//! indices.
//!
//! # Failure Modes
//!
//! Errors whose path leaves the config tree are dropped and logged at
//! `trace` level. Nothing is surfaced to the caller.

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::config::ControlConfig;
use crate::error::{ControlError, FormError, Result};

/// Error addressed by a flat path string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlatError {
    pub path: String,
    pub error: ControlError,
}

impl FlatError {
    #[must_use]
    pub fn new(path: impl Into<String>, error: ControlError) -> Self {
        Self {
            path: path.into(),
            error,
        }
    }
}

/// Error addressed by child keys relative to the control receiving it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomError {
    pub path: Vec<String>,
    pub error: ControlError,
}

impl CustomError {
    /// Error targeting the receiving control itself.
    #[must_use]
    pub fn here(error: ControlError) -> Self {
        Self {
            path: Vec::new(),
            error,
        }
    }

    /// Whether the error targets the receiving control.
    #[inline]
    #[must_use]
    pub fn is_here(&self) -> bool {
        self.path.is_empty()
    }
}

/// First error in `errors` that targets the receiving control.
#[must_use]
pub fn own_error(errors: &[CustomError]) -> Option<&ControlError> {
    errors.iter().find(|e| e.is_here()).map(|e| &e.error)
}

/// Split `errors` into per-child lists keyed by their first path segment.
///
/// Errors targeting the receiving control are skipped; child keys appear in
/// first-seen order.
#[must_use]
pub fn split_by_child(errors: &[CustomError]) -> Vec<(String, Vec<CustomError>)> {
    let mut result: Vec<(String, Vec<CustomError>)> = Vec::new();
    for error in errors {
        let Some((head, rest)) = error.path.split_first() else {
            continue;
        };
        let child = CustomError {
            path: rest.to_vec(),
            error: error.error.clone(),
        };
        match result.iter_mut().find(|(key, _)| key == head) {
            Some((_, list)) => list.push(child),
            None => result.push((head.clone(), vec![child])),
        }
    }
    result
}

// ─── Path heads ──────────────────────────────────────────────────────────────

/// Match the head of `rest` against the children of `config`.
///
/// Returns the child key and the path left for that child. A trailing `[`
/// stays on the remainder; a trailing `.` is consumed.
#[must_use]
pub fn split_child<'p>(config: &ControlConfig, rest: &'p str) -> Option<(String, &'p str)> {
    match config {
        ControlConfig::Basic(_) => None,
        ControlConfig::Object(object) => {
            let names = || object.fields().map(|(name, _)| name);
            names()
                .find_map(|name| match_bare(rest, name).map(|tail| (name.to_owned(), tail)))
                .or_else(|| {
                    names().find_map(|name| match_bracketed(rest, name).map(|tail| (name.to_owned(), tail)))
                })
        }
        ControlConfig::Array(_) => {
            let digits = leading_digits(rest);
            if let Some(tail) = (!digits.is_empty()).then(|| match_bare(rest, digits)).flatten() {
                return Some((digits.to_owned(), tail));
            }
            let inner = rest.strip_prefix('[')?;
            let digits = leading_digits(inner);
            if digits.is_empty() {
                return None;
            }
            match_bracketed(rest, digits).map(|tail| (digits.to_owned(), tail))
        }
    }
}

fn leading_digits(s: &str) -> &str {
    let end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    &s[..end]
}

fn match_bare<'p>(rest: &'p str, name: &str) -> Option<&'p str> {
    finish(rest.strip_prefix(name)?)
}

fn match_bracketed<'p>(rest: &'p str, name: &str) -> Option<&'p str> {
    let tail = rest.strip_prefix('[')?.strip_prefix(name)?.strip_prefix(']')?;
    finish(tail)
}

fn finish(tail: &str) -> Option<&str> {
    if tail.is_empty() || tail.starts_with('[') {
        Some(tail)
    } else {
        tail.strip_prefix('.')
    }
}

// ─── Path walking ────────────────────────────────────────────────────────────

/// Tree node addressable by flat paths.
pub trait PathNode: Sized {
    fn config(&self) -> &ControlConfig;

    /// Child under `key` (a field name or a decimal index). `at` is the path
    /// of `self`.
    fn child(&self, key: &str, at: &str) -> Result<Self>;
}

impl<'c> PathNode for &'c ControlConfig {
    fn config(&self) -> &ControlConfig {
        self
    }

    fn child(&self, key: &str, at: &str) -> Result<Self> {
        let config: &'c ControlConfig = *self;
        match config {
            ControlConfig::Object(object) => object.field(key).ok_or_else(|| FormError::unknown_field(at, key)),
            ControlConfig::Array(array) => Ok(&array.item),
            ControlConfig::Basic(_) => Err(FormError::not_a_container(at)),
        }
    }
}

/// Follow `path` from `root`, one [`split_child`] segment at a time.
pub fn walk<N: PathNode>(root: N, path: &str) -> Result<N> {
    let mut node = root;
    let mut rest = path;
    while !rest.is_empty() {
        let at = path[..path.len() - rest.len()].trim_end_matches('.');
        let Some((key, tail)) = split_child(node.config(), rest) else {
            return Err(match node.config() {
                ControlConfig::Basic(_) => FormError::not_a_container(at),
                ControlConfig::Object(_) => FormError::unknown_field(at, rest),
                ControlConfig::Array(_) => FormError::InvalidIndex {
                    path: path.to_owned(),
                    segment: rest.to_owned(),
                },
            });
        };
        node = node.child(&key, at)?;
        rest = tail;
    }
    Ok(node)
}

/// Resolve `path` to the config it addresses under `root`.
pub fn lookup<'c>(root: &'c ControlConfig, path: &str) -> Result<&'c ControlConfig> {
    walk(root, path)
}

// ─── Matcher ─────────────────────────────────────────────────────────────────

/// Maps flat error paths onto a config tree.
#[derive(Debug, Clone)]
pub struct CustomErrorMatcher {
    root: ControlConfig,
}

impl CustomErrorMatcher {
    #[must_use]
    pub fn new(root: ControlConfig) -> Self {
        Self { root }
    }

    /// Resolve every routable error; unroutable ones are dropped.
    ///
    /// Output order follows a depth-first walk where siblings appear in the
    /// order their first error was seen.
    #[must_use]
    pub fn resolve(&self, flat: &[FlatError]) -> Vec<CustomError> {
        let mut result = Vec::new();
        let pending: Vec<(&str, &FlatError)> = flat.iter().map(|e| (e.path.as_str(), e)).collect();
        let mut path = Vec::new();
        Self::fill(&mut result, pending, &self.root, &mut path);
        result
    }

    fn fill<'a>(
        result: &mut Vec<CustomError>,
        errors: Vec<(&'a str, &'a FlatError)>,
        config: &ControlConfig,
        path: &mut Vec<String>,
    ) {
        let mut by_child: Vec<(String, Vec<(&'a str, &'a FlatError)>)> = Vec::new();
        for (rest, flat) in errors {
            if rest.is_empty() {
                result.push(CustomError {
                    path: path.clone(),
                    error: flat.error.clone(),
                });
                continue;
            }
            let Some((key, tail)) = split_child(config, rest) else {
                trace!(path = %flat.path, remaining = rest, "custom error dropped");
                continue;
            };
            match by_child.iter_mut().find(|(k, _)| *k == key) {
                Some((_, list)) => list.push((tail, flat)),
                None => by_child.push((key, vec![(tail, flat)])),
            }
        }

        for (key, errors) in by_child {
            let child = match config {
                ControlConfig::Object(object) => object.field(&key),
                ControlConfig::Array(array) => Some(&array.item),
                ControlConfig::Basic(_) => None,
            };
            let Some(child) = child else {
                continue;
            };
            path.push(key);
            Self::fill(result, errors, child, path);
            path.pop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn err(msg: &str) -> ControlError {
        ControlError::new(msg)
    }

    fn config() -> ControlConfig {
        let user = ControlConfig::object()
            .field("email", ControlConfig::basic().build())
            .field("tags", ControlConfig::array(ControlConfig::basic().build()).build())
            .build();
        ControlConfig::object()
            .field("title", ControlConfig::basic().build())
            .field("users", ControlConfig::array(user).build())
            .field("baz[1]inga", ControlConfig::basic().build())
            .field("baz.in.ga", ControlConfig::basic().build())
            .build()
    }

    fn paths(errors: &[CustomError]) -> Vec<(Vec<&str>, &str)> {
        errors
            .iter()
            .map(|e| (e.path.iter().map(String::as_str).collect(), e.error.message.as_str()))
            .collect()
    }

    #[test]
    fn routes_nested_paths() {
        let matcher = CustomErrorMatcher::new(config());
        let out = matcher.resolve(&[
            FlatError::new("users[2].email", err("taken")),
            FlatError::new("title", err("short")),
            FlatError::new("users.0.tags[1]", err("dup")),
        ]);
        assert_eq!(
            paths(&out),
            vec![
                (vec!["users", "2", "email"], "taken"),
                (vec!["users", "0", "tags", "1"], "dup"),
                (vec!["title"], "short"),
            ]
        );
    }

    #[test]
    fn empty_path_targets_root() {
        let out = CustomErrorMatcher::new(config()).resolve(&[FlatError::new("", err("form"))]);
        assert_eq!(paths(&out), vec![(vec![], "form")]);
    }

    #[test]
    fn bracketed_object_keys_and_container_errors() {
        let out = CustomErrorMatcher::new(config()).resolve(&[
            FlatError::new("[users][0]", err("bad user")),
            FlatError::new("users", err("bad list")),
        ]);
        assert_eq!(
            paths(&out),
            vec![(vec!["users"], "bad list"), (vec!["users", "0"], "bad user")]
        );
    }

    #[test]
    fn field_names_with_separators() {
        let out = CustomErrorMatcher::new(config()).resolve(&[
            FlatError::new("baz[1]inga", err("a")),
            FlatError::new("baz.in.ga", err("b")),
        ]);
        assert_eq!(paths(&out), vec![(vec!["baz[1]inga"], "a"), (vec!["baz.in.ga"], "b")]);
    }

    #[test]
    fn unroutable_paths_are_dropped() {
        let out = CustomErrorMatcher::new(config()).resolve(&[
            FlatError::new("nope", err("x")),
            FlatError::new("title.sub", err("x")),
            FlatError::new("users[x]", err("x")),
            FlatError::new("users[1]x", err("x")),
            FlatError::new("titles", err("x")),
        ]);
        assert!(out.is_empty());
    }

    #[test]
    fn split_child_keeps_bracket_and_drops_dot() {
        let config = config();
        assert_eq!(split_child(&config, "users[3].email"), Some(("users".into(), "[3].email")));
        assert_eq!(split_child(&config, "title"), Some(("title".into(), "")));
        let users = config.field_config("users").unwrap();
        assert_eq!(split_child(users, "[3].email"), Some(("3".into(), "email")));
        assert_eq!(split_child(users, "12"), Some(("12".into(), "")));
        assert_eq!(split_child(users, "[]"), None);
    }

    #[test]
    fn lookup_reports_failures() {
        let config = config();
        assert!(lookup(&config, "users[0].tags[4]").is_ok());
        assert_eq!(
            lookup(&config, "users[0].phone"),
            Err(FormError::unknown_field("users[0]", "phone"))
        );
        assert_eq!(lookup(&config, "title.x"), Err(FormError::not_a_container("title")));
        assert!(matches!(lookup(&config, "users.first"), Err(FormError::InvalidIndex { .. })));
    }

    #[test]
    fn own_error_and_split() {
        let errors = vec![
            CustomError {
                path: vec!["a".into(), "b".into()],
                error: err("deep"),
            },
            CustomError::here(err("first")),
            CustomError::here(err("second")),
            CustomError {
                path: vec!["a".into()],
                error: err("shallow"),
            },
        ];
        assert_eq!(own_error(&errors), Some(&err("first")));
        let split = split_by_child(&errors);
        assert_eq!(split.len(), 1);
        assert_eq!(split[0].0, "a");
        assert_eq!(split[0].1.len(), 2);
        assert!(split[0].1[1].is_here());
    }
}
