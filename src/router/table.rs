use super::context::{ParamValue, Params};
use super::pattern::{percent_decode, Pattern};
use super::RouterOptions;
use crate::{Middleware, TrellisError};
use std::collections::HashMap;
use std::sync::Arc;

/// A path pattern supplied at registration.
///
/// A plain path is inspected for `:name`/`*` tokens and stored either in
/// the exact-match table or as a compiled matcher; a regex pattern is
/// always a matcher, used exactly as supplied.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PathPattern {
    /// A literal or `:name`-parameterized path.
    Path(String),
    /// A raw regular expression.
    Regex(String),
}

impl PathPattern {
    /// Creates a regular-expression pattern.
    pub fn regex(raw: impl Into<String>) -> Self {
        PathPattern::Regex(raw.into())
    }
}

impl<T: Into<String>> From<T> for PathPattern {
    fn from(path: T) -> Self {
        PathPattern::Path(path.into())
    }
}

/// One registered route: a method (or any-method), the handler, and the
/// parameter keys its pattern extracts, in capture order.
pub(crate) struct Route {
    path: String,
    method: Option<http::Method>,
    handler: Arc<dyn Middleware>,
    param_keys: Arc<[Arc<str>]>,
}

impl Route {
    /// The pattern string this route was registered under.
    pub(crate) fn path(&self) -> &str {
        &self.path
    }

    pub(crate) fn handler(&self) -> &Arc<dyn Middleware> {
        &self.handler
    }

    pub(crate) fn method(&self) -> Option<&http::Method> {
        self.method.as_ref()
    }

    pub(crate) fn param_keys(&self) -> &[Arc<str>] {
        &self.param_keys
    }

    #[cfg(test)]
    pub(crate) fn stub(path: &str) -> Arc<Route> {
        Arc::new(Route {
            path: path.to_string(),
            method: None,
            handler: Arc::new(|cx: crate::Context, next: crate::Next| next.apply(cx)),
            param_keys: Arc::from([]),
        })
    }
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("path", &self.path)
            .field("method", &self.method)
            .field("param_keys", &self.param_keys)
            .finish_non_exhaustive()
    }
}

/// All methods registered for one path pattern.
#[derive(Debug, Default)]
struct Descriptor {
    methods: HashMap<http::Method, Arc<Route>>,
    any: Option<Arc<Route>>,
}

impl Descriptor {
    // Last registration for the same (pattern, method) silently wins.
    fn insert(&mut self, route: Arc<Route>) {
        match route.method.clone() {
            Some(method) => {
                self.methods.insert(method, route);
            }
            None => self.any = Some(route),
        }
    }

    // exact method -> HEAD falls back to GET -> any-method handler.
    fn resolve(&self, method: &http::Method) -> Option<&Arc<Route>> {
        if let Some(route) = self.methods.get(method) {
            return Some(route);
        }
        if *method == http::Method::HEAD {
            if let Some(route) = self.methods.get(&http::Method::GET) {
                return Some(route);
            }
        }
        self.any.as_ref()
    }
}

/// A successful table lookup: the resolved route, its decoded parameters,
/// and how many bytes of the looked-up path the match consumed.
#[derive(Debug)]
pub(crate) struct TableMatch {
    pub(crate) route: Arc<Route>,
    pub(crate) params: Params,
    pub(crate) consumed: usize,
}

/// The storage behind a router: an exact-match table for literal paths and
/// an ordered matcher list for everything else.  Built during setup,
/// read-only once serving begins.
#[derive(Debug)]
pub(crate) struct RouteTable {
    options: RouterOptions,
    exact: HashMap<String, Descriptor>,
    patterns: Vec<PatternEntry>,
}

#[derive(Debug)]
struct PatternEntry {
    pattern: Pattern,
    descriptor: Descriptor,
}

impl RouteTable {
    pub(crate) fn new(options: RouterOptions) -> Self {
        RouteTable {
            options,
            exact: HashMap::new(),
            patterns: Vec::new(),
        }
    }

    /// Registers a handler.  `method: None` responds to any method.
    pub(crate) fn define(
        &mut self,
        pattern: PathPattern,
        method: Option<http::Method>,
        handler: Arc<dyn Middleware>,
    ) {
        // a literal is only an exact-map candidate when the router consumes
        // the full pending path; a prefix-consuming router needs the matcher
        // to report consumed length
        let compiled = match &pattern {
            PathPattern::Path(path) if self.options.anchored && Pattern::is_literal(path) => None,
            PathPattern::Path(path) => Some(Pattern::compile(path, &self.options)),
            PathPattern::Regex(raw) => Some(Pattern::from_regex(raw, &self.options)),
        };

        match compiled {
            None => {
                let path = match &pattern {
                    PathPattern::Path(path) => path,
                    PathPattern::Regex(_) => unreachable!(),
                };
                let route = Arc::new(Route {
                    path: path.clone(),
                    method,
                    handler,
                    param_keys: Arc::from([]),
                });
                self.exact
                    .entry(normalize(path, &self.options))
                    .or_default()
                    .insert(route);
            }
            Some(compiled) => {
                let param_keys = compiled
                    .keys()
                    .iter()
                    .filter_map(|key| key.name.clone())
                    .collect::<Arc<[_]>>();
                let route = Arc::new(Route {
                    path: compiled.source().to_string(),
                    method,
                    handler,
                    param_keys,
                });
                let source = compiled.source();
                match self
                    .patterns
                    .iter_mut()
                    .find(|entry| entry.pattern.source() == source)
                {
                    Some(entry) => entry.descriptor.insert(route),
                    None => {
                        let mut descriptor = Descriptor::default();
                        descriptor.insert(route);
                        self.patterns.push(PatternEntry {
                            pattern: compiled,
                            descriptor,
                        });
                    }
                }
            }
        }
    }

    /// Looks a path and method up.  `Ok(None)` is an ordinary routing miss
    /// that the caller falls through on; `Err` is a client error (malformed
    /// parameter encoding).
    pub(crate) fn lookup(
        &self,
        path: &str,
        method: &http::Method,
    ) -> Result<Option<TableMatch>, TrellisError> {
        if let Some(descriptor) = self.exact.get(&normalize(path, &self.options)) {
            return Ok(descriptor.resolve(method).map(|route| TableMatch {
                route: route.clone(),
                params: Params::default(),
                consumed: path.len(),
            }));
        }

        for entry in &self.patterns {
            let matched = match entry.pattern.matches(path) {
                Some(matched) => matched,
                None => continue,
            };
            // a prefix match must end on a segment boundary
            let rest = &path[matched.consumed..];
            if !rest.is_empty() && !rest.starts_with('/') {
                continue;
            }
            let route = match entry.descriptor.resolve(method) {
                Some(route) => route.clone(),
                None => return Ok(None),
            };

            let mut params = Params::default();
            for (key, capture) in entry.pattern.keys().iter().zip(matched.captures.iter()) {
                let (name, raw) = match (&key.name, capture) {
                    (Some(name), Some(raw)) if !raw.is_empty() => (name, raw),
                    _ => continue,
                };
                let decoded = percent_decode(name, raw)?;
                let value = if key.repeating {
                    ParamValue::Repeated(
                        decoded
                            .split(self.options.repeat_delimiter)
                            .map(str::to_string)
                            .collect(),
                    )
                } else {
                    ParamValue::Single(decoded)
                };
                params.push(name.clone(), value);
            }

            return Ok(Some(TableMatch {
                route,
                params,
                consumed: matched.consumed,
            }));
        }

        Ok(None)
    }

    pub(crate) fn routes(&self) -> impl Iterator<Item = &Arc<Route>> {
        let exact = self
            .exact
            .values()
            .flat_map(|d| d.methods.values().chain(d.any.iter()));
        let patterns = self
            .patterns
            .iter()
            .flat_map(|e| e.descriptor.methods.values().chain(e.descriptor.any.iter()));
        exact.chain(patterns)
    }
}

fn normalize(path: &str, options: &RouterOptions) -> String {
    let mut normalized = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    };
    if !options.strict_trailing_slash && normalized.len() > 1 && normalized.ends_with('/') {
        normalized.pop();
    }
    if !options.case_sensitive {
        normalized = normalized.to_ascii_lowercase();
    }
    normalized
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{Context, Next};

    fn noop() -> Arc<dyn Middleware> {
        Arc::new(|cx: Context, next: Next| next.apply(cx))
    }

    fn table() -> RouteTable {
        RouteTable::new(RouterOptions::default())
    }

    #[test]
    fn test_exact_literal_no_prefix_bleed() {
        let mut table = table();
        table.define("/hello".into(), Some(http::Method::GET), noop());
        table.define("/hello-object".into(), Some(http::Method::GET), noop());

        let matched = table.lookup("/hello", &http::Method::GET).unwrap().unwrap();
        assert_eq!(matched.route.path(), "/hello");
        assert_eq!(matched.consumed, "/hello".len());

        let matched = table
            .lookup("/hello-object", &http::Method::GET)
            .unwrap()
            .unwrap();
        assert_eq!(matched.route.path(), "/hello-object");
    }

    #[test]
    fn test_method_miss_is_no_match() {
        let mut table = table();
        table.define("/hello".into(), Some(http::Method::GET), noop());
        assert!(table.lookup("/hello", &http::Method::POST).unwrap().is_none());
        assert!(table.lookup("/nothing", &http::Method::GET).unwrap().is_none());
    }

    #[test]
    fn test_head_falls_back_to_get() {
        let mut table = table();
        table.define("/hello".into(), Some(http::Method::GET), noop());
        let matched = table.lookup("/hello", &http::Method::HEAD).unwrap().unwrap();
        assert_eq!(matched.route.method(), Some(&http::Method::GET));
    }

    #[test]
    fn test_any_method_handler() {
        let mut table = table();
        table.define("/anything".into(), None, noop());
        for method in [http::Method::GET, http::Method::DELETE, http::Method::PATCH] {
            assert!(table.lookup("/anything", &method).unwrap().is_some());
        }
    }

    #[test]
    fn test_duplicate_registration_last_wins() {
        let mut table = table();
        table.define("/dup".into(), Some(http::Method::GET), noop());
        table.define("/dup".into(), Some(http::Method::GET), noop());
        let matched = table.lookup("/dup", &http::Method::GET).unwrap().unwrap();
        // the descriptor holds exactly one GET route, the later one
        assert_eq!(matched.route.path(), "/dup");
        assert_eq!(table.routes().count(), 1);
    }

    #[test]
    fn test_param_extraction_decodes() {
        let mut table = table();
        table.define("/users/:id".into(), Some(http::Method::GET), noop());
        let matched = table
            .lookup("/users/42%20x", &http::Method::GET)
            .unwrap()
            .unwrap();
        assert_eq!(matched.params.get("id"), Some("42 x"));
        assert_eq!(matched.route.param_keys().len(), 1);
    }

    #[test]
    fn test_malformed_encoding_is_client_error() {
        let mut table = table();
        table.define("/users/:id".into(), Some(http::Method::GET), noop());
        let result = table.lookup("/users/%", &http::Method::GET);
        assert!(matches!(
            result,
            Err(TrellisError::MalformedParameter(_))
        ));
    }

    #[test]
    fn test_repeating_param_splits() {
        let mut table = table();
        table.define("/filter/:tags+".into(), Some(http::Method::GET), noop());
        let matched = table
            .lookup("/filter/red,green,blue", &http::Method::GET)
            .unwrap()
            .unwrap();
        assert_eq!(
            matched.params.get_all("tags").unwrap(),
            &["red", "green", "blue"]
        );
    }

    #[test]
    fn test_patterns_match_in_registration_order() {
        let mut table = table();
        table.define("/users/:id".into(), Some(http::Method::GET), noop());
        table.define(
            PathPattern::regex("^/users/(?P<rest>.+)$"),
            Some(http::Method::GET),
            noop(),
        );
        let matched = table
            .lookup("/users/anything", &http::Method::GET)
            .unwrap()
            .unwrap();
        assert_eq!(matched.route.path(), "/users/:id");
    }

    #[test]
    fn test_regex_without_names_yields_empty_params() {
        let mut table = table();
        table.define(
            PathPattern::regex("^/raw/(.+)$"),
            Some(http::Method::GET),
            noop(),
        );
        let matched = table.lookup("/raw/x", &http::Method::GET).unwrap().unwrap();
        assert!(matched.params.is_empty());
    }

    #[test]
    fn test_prefix_consuming_literal_route() {
        let mut table = RouteTable::new(RouterOptions {
            anchored: false,
            ..RouterOptions::default()
        });
        table.define("/api".into(), Some(http::Method::GET), noop());

        let matched = table
            .lookup("/api/users", &http::Method::GET)
            .unwrap()
            .unwrap();
        assert_eq!(matched.route.path(), "/api");
        assert_eq!(matched.consumed, "/api".len());
        // the prefix must still end on a segment boundary
        assert!(table.lookup("/apiary", &http::Method::GET).unwrap().is_none());
    }

    #[test]
    fn test_options_normalize_exact_lookup() {
        let mut table = RouteTable::new(RouterOptions {
            case_sensitive: false,
            strict_trailing_slash: false,
            ..RouterOptions::default()
        });
        table.define("/Hello".into(), Some(http::Method::GET), noop());
        assert!(table.lookup("/hello/", &http::Method::GET).unwrap().is_some());
    }
}
