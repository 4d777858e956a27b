//! Command dispatch for the simulated controller.
//!
//! A [`DispatchTable`] is an ordered list of ([`CommandMatcher`],
//! [`Responder`]) pairs. The first entry whose matcher accepts the incoming
//! line produces the reply; if nothing matches, the table's fallback reply
//! (`Unknown command#` by default) is sent instead.
//!
//! The table is immutable once built and is shared read-only between all
//! sessions of a server. Mutable device state lives in the per-connection
//! [`DeviceSimState`].

use std::fmt;
use std::sync::Arc;

use mountlink_core::line::UNKNOWN_COMMAND_RESPONSE;

use crate::sim::DeviceSimState;

/// How an incoming line is matched.
///
/// Matching is case-sensitive and runs on the line with surrounding
/// whitespace removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandMatcher {
    /// The whole line equals this text.
    Exact(String),
    /// The line starts with this text.
    Prefix(String),
    /// Glob pattern: `*` matches any run of characters, `?` exactly one.
    Wildcard(String),
}

impl CommandMatcher {
    /// Build a matcher from pattern text.
    ///
    /// Text without `*` or `?` is an exact match. A single trailing `*` is a
    /// prefix match. Anything else is a wildcard.
    pub fn parse(pattern: &str) -> Self {
        let is_glob = |c: char| c == '*' || c == '?';
        match pattern.strip_suffix('*') {
            Some(prefix) if !prefix.contains(is_glob) => {
                CommandMatcher::Prefix(prefix.to_string())
            }
            _ if pattern.contains(is_glob) => CommandMatcher::Wildcard(pattern.to_string()),
            _ => CommandMatcher::Exact(pattern.to_string()),
        }
    }

    pub fn matches(&self, line: &str) -> bool {
        match self {
            CommandMatcher::Exact(text) => line == text,
            CommandMatcher::Prefix(prefix) => line.starts_with(prefix.as_str()),
            CommandMatcher::Wildcard(pattern) => glob_match(pattern, line),
        }
    }
}

impl fmt::Display for CommandMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandMatcher::Exact(text) => f.write_str(text),
            CommandMatcher::Prefix(prefix) => write!(f, "{prefix}*"),
            CommandMatcher::Wildcard(pattern) => f.write_str(pattern),
        }
    }
}

/// Iterative glob match with single-star backtracking.
fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();

    let (mut pi, mut ti) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ti));
            pi += 1;
        } else if let Some((sp, st)) = star {
            pi = sp + 1;
            ti = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }

    p[pi..].iter().all(|&c| c == '*')
}

/// One received command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    line: String,
}

impl Request {
    pub fn new(line: impl Into<String>) -> Self {
        Self {
            line: line.into().trim().to_string(),
        }
    }

    /// The full line.
    pub fn line(&self) -> &str {
        &self.line
    }

    /// The first whitespace-separated word.
    pub fn command(&self) -> &str {
        self.line.split_whitespace().next().unwrap_or_default()
    }

    /// Everything after the first word, trimmed.
    pub fn args(&self) -> &str {
        self.line
            .split_once(char::is_whitespace)
            .map(|(_, rest)| rest.trim())
            .unwrap_or_default()
    }
}

/// Response builder signature for [`Responder::Computed`].
///
/// Returning `None` sends nothing for this request.
pub type ComputeFn = dyn Fn(&Request, &mut DeviceSimState) -> Option<String> + Send + Sync;

/// How a matched entry produces its reply.
#[derive(Clone)]
pub enum Responder {
    /// Always the same line.
    Static(String),
    /// A line computed from the request and the session's device state.
    Computed(Arc<ComputeFn>),
    /// No reply at all; the client will time out.
    Silent,
}

impl Responder {
    fn respond(&self, request: &Request, state: &mut DeviceSimState) -> Option<String> {
        match self {
            Responder::Static(text) => Some(text.clone()),
            Responder::Computed(f) => f(request, state),
            Responder::Silent => None,
        }
    }
}

impl fmt::Debug for Responder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Responder::Static(text) => f.debug_tuple("Static").field(text).finish(),
            Responder::Computed(_) => f.write_str("Computed(..)"),
            Responder::Silent => f.write_str("Silent"),
        }
    }
}

/// A matcher and the responder it selects.
#[derive(Debug, Clone)]
pub struct DispatchEntry {
    pub matcher: CommandMatcher,
    pub responder: Responder,
}

/// Ordered dispatch table. First match wins.
#[derive(Debug, Clone)]
pub struct DispatchTable {
    entries: Vec<DispatchEntry>,
    fallback: String,
}

impl Default for DispatchTable {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatchTable {
    /// An empty table that answers everything with the fallback.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            fallback: UNKNOWN_COMMAND_RESPONSE.to_string(),
        }
    }

    /// Reply to `pattern` with a fixed line.
    pub fn on(self, pattern: &str, response: impl Into<String>) -> Self {
        self.entry(CommandMatcher::parse(pattern), Responder::Static(response.into()))
    }

    /// Reply to `pattern` with a line computed from the request and state.
    pub fn on_computed<F>(self, pattern: &str, f: F) -> Self
    where
        F: Fn(&Request, &mut DeviceSimState) -> Option<String> + Send + Sync + 'static,
    {
        self.entry(CommandMatcher::parse(pattern), Responder::Computed(Arc::new(f)))
    }

    /// Never reply to `pattern`.
    pub fn on_silent(self, pattern: &str) -> Self {
        self.entry(CommandMatcher::parse(pattern), Responder::Silent)
    }

    pub fn entry(mut self, matcher: CommandMatcher, responder: Responder) -> Self {
        self.entries.push(DispatchEntry { matcher, responder });
        self
    }

    /// Reply used when no entry matches.
    pub fn with_fallback(mut self, fallback: impl Into<String>) -> Self {
        self.fallback = fallback.into();
        self
    }

    pub fn entries(&self) -> &[DispatchEntry] {
        &self.entries
    }

    pub fn fallback(&self) -> &str {
        &self.fallback
    }

    /// Produce the reply for one received line, or `None` for no reply.
    pub fn dispatch(&self, line: &str, state: &mut DeviceSimState) -> Option<String> {
        let request = Request::new(line);
        state.record_command();

        match self
            .entries
            .iter()
            .find(|e| e.matcher.matches(request.line()))
        {
            Some(entry) => {
                tracing::trace!(line = %request.line(), matcher = %entry.matcher, "Dispatch matched");
                entry.responder.respond(&request, state)
            }
            None => {
                tracing::debug!(line = %request.line(), "Unknown command");
                Some(self.fallback.clone())
            }
        }
    }
}
