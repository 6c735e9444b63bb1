use super::Route;
use std::sync::Arc;

/// Parameters extracted from a matched path, in capture order.
///
/// Lookup scans from the most recent entry backwards, so when the same name
/// appears more than once (e.g. merged across nested matches), the later
/// entry wins.
#[derive(Debug, Clone, Default)]
pub struct Params(Vec<(Arc<str>, ParamValue)>);

#[derive(Debug, Clone, PartialEq, Eq)]
/// A single extracted parameter value.
pub enum ParamValue {
    /// A plain parameter: one decoded string.
    Single(String),
    /// A repeating parameter, split on the router's configured delimiter.
    Repeated(Vec<String>),
}

impl Params {
    pub(crate) fn push(&mut self, name: Arc<str>, value: ParamValue) {
        self.0.push((name, value));
    }

    /// Retrieves the named parameter as a string.  For a repeating
    /// parameter, this is its first element.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .rev()
            .find(|(n, _)| &**n == name)
            .and_then(|(_, v)| match v {
                ParamValue::Single(s) => Some(s.as_str()),
                ParamValue::Repeated(r) => r.first().map(String::as_str),
            })
    }

    /// Retrieves all values of the named repeating parameter.  A plain
    /// parameter yields a one-element slice.
    pub fn get_all(&self, name: &str) -> Option<&[String]> {
        self.0
            .iter()
            .rev()
            .find(|(n, _)| &**n == name)
            .map(|(_, v)| match v {
                ParamValue::Single(s) => std::slice::from_ref(s),
                ParamValue::Repeated(r) => &r[..],
            })
    }

    /// Iterates over `(name, value)` entries in capture order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.0.iter().map(|(n, v)| (&**n, v))
    }

    /// The number of captured parameters.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no parameters were captured.  A pattern without named
    /// captures produces an empty set, never an absent one.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// One active match on the [`RouteContext`] stack: the path segment the
/// match consumed, the parameters it extracted, and the route it resolved
/// to.
#[derive(Debug, Clone)]
pub struct MatchFrame {
    consumed: String,
    params: Params,
    route: Arc<Route>,
}

impl MatchFrame {
    pub(crate) fn new(consumed: String, params: Params, route: Arc<Route>) -> Self {
        MatchFrame {
            consumed,
            params,
            route,
        }
    }

    /// The path segment this match consumed from the front of the pending
    /// path.
    pub fn consumed(&self) -> &str {
        &self.consumed
    }

    /// The parameters this match extracted.
    pub fn params(&self) -> &Params {
        &self.params
    }

    /// The pattern string of the route this match resolved to.
    pub fn route_path(&self) -> &str {
        self.route.path()
    }
}

/// Per-request routing state: the not-yet-consumed remainder of the
/// original path, and the stack of currently active matches.
///
/// Mount points and routers consume prefixes off the front of the pending
/// path as they recurse, and restore them as they unwind.  The governing
/// invariant: at any depth, the pending path equals the original path with
/// exactly the concatenation of all pushed frames' consumed segments
/// removed from the front, so [`RouteContext::push`] and
/// [`RouteContext::pop`] are exact inverses.
#[derive(Debug, Clone)]
pub struct RouteContext {
    pending: String,
    stack: Vec<MatchFrame>,
}

impl RouteContext {
    pub(crate) fn new(path: impl Into<String>) -> Self {
        RouteContext {
            pending: path.into(),
            stack: vec![],
        }
    }

    /// The not-yet-consumed remainder of the request path.
    pub fn pending_path(&self) -> &str {
        &self.pending
    }

    pub(crate) fn set_pending_path(&mut self, path: impl Into<String>) {
        self.pending = path.into();
    }

    /// How many matches are currently active.
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Pushes a match, consuming its segment off the front of the pending
    /// path.
    pub(crate) fn push(&mut self, frame: MatchFrame) {
        debug_assert!(
            self.pending.starts_with(&frame.consumed),
            "match consumed {:?}, but the pending path is {:?}",
            frame.consumed,
            self.pending
        );
        self.pending = self.pending[frame.consumed.len()..].to_string();
        self.stack.push(frame);
    }

    /// Pops the innermost match, restoring exactly the prefix it consumed.
    pub(crate) fn pop(&mut self) -> Option<MatchFrame> {
        let frame = self.stack.pop()?;
        let mut restored = String::with_capacity(frame.consumed.len() + self.pending.len());
        restored.push_str(&frame.consumed);
        restored.push_str(&self.pending);
        self.pending = restored;
        Some(frame)
    }

    /// Looks the named parameter up across the active matches, innermost
    /// first.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.stack
            .iter()
            .rev()
            .find_map(|frame| frame.params.get(name))
    }

    /// Like [`RouteContext::param`], but yielding every value of a
    /// repeating parameter.
    pub fn param_all(&self, name: &str) -> Option<&[String]> {
        self.stack
            .iter()
            .rev()
            .find_map(|frame| frame.params.get_all(name))
    }

    /// The innermost active match, if any.
    pub fn current(&self) -> Option<&MatchFrame> {
        self.stack.last()
    }
}
