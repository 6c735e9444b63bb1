use super::RouterOptions;
use crate::TrellisError;
use std::sync::Arc;

#[derive(Clone, Debug)]
/// The matcher actually used to test a path pattern against a request
/// path.  This contains both the compiled regular expression and, in
/// capture order, the parameter key behind each capture group.
pub(crate) struct Pattern {
    regex: regex::Regex,
    keys: Arc<[ParamKey]>,
    source: String,
}

#[derive(Clone, Debug)]
pub(crate) struct ParamKey {
    pub(crate) name: Option<Arc<str>>,
    pub(crate) repeating: bool,
}

lazy_static::lazy_static! {
    static ref TOKEN: regex::Regex =
        regex::Regex::new(":(?P<name>[A-Za-z_][A-Za-z0-9_]*)(?P<rep>\\+)?|\\*").unwrap();
}

impl Pattern {
    /// Compiles a `:name` path pattern.  `:name` matches one path segment,
    /// `:name+` marks the parameter as repeating (split on the router's
    /// delimiter after decoding), and a trailing `*` matches the rest of
    /// the path without extracting anything.
    ///
    /// A malformed pattern is a configuration error and panics at
    /// registration time, never during request handling.
    pub(crate) fn compile(path: &str, options: &RouterOptions) -> Self {
        let mut keys = Vec::new();
        let mut buffer = String::with_capacity(path.len() + 8);
        if !options.case_sensitive {
            buffer.push_str("(?i)");
        }
        buffer.push('^');

        let mut start = 0;
        for capture in TOKEN.captures_iter(path) {
            let token = match capture.get(0) {
                Some(token) => token,
                None => continue,
            };
            buffer.push_str(&regex::escape(&path[start..token.start()]));
            start = token.end();
            match capture.name("name") {
                Some(name) => {
                    let repeating = capture.name("rep").is_some();
                    buffer.push_str("(?P<");
                    buffer.push_str(name.as_str());
                    buffer.push_str(">[^/]+)");
                    keys.push(ParamKey {
                        name: Some(Arc::from(name.as_str())),
                        repeating,
                    });
                }
                None => {
                    buffer.push_str("(.*)");
                    keys.push(ParamKey {
                        name: None,
                        repeating: false,
                    });
                }
            }
        }
        buffer.push_str(&regex::escape(&path[start..]));

        if !options.strict_trailing_slash && !buffer.ends_with('/') {
            buffer.push_str("/?");
        }
        if options.anchored {
            buffer.push('$');
        }

        let regex = match regex::Regex::new(&buffer) {
            Ok(regex) => regex,
            Err(error) => panic!("invalid route pattern {:?}: {}", path, error),
        };
        Pattern {
            regex,
            keys: keys.into(),
            source: path.to_string(),
        }
    }

    /// Wraps a caller-supplied regular expression, used exactly as given.
    /// Parameter names come from its named capture groups, in order.
    pub(crate) fn from_regex(raw: &str, _options: &RouterOptions) -> Self {
        let regex = match regex::Regex::new(raw) {
            Ok(regex) => regex,
            Err(error) => panic!("invalid route pattern {:?}: {}", raw, error),
        };
        let keys = regex
            .capture_names()
            .skip(1)
            .map(|name| ParamKey {
                name: name.map(Arc::from),
                repeating: false,
            })
            .collect::<Arc<[_]>>();
        Pattern {
            regex,
            keys,
            source: raw.to_string(),
        }
    }

    /// Whether a path pattern is a plain literal, eligible for the router's
    /// exact-match table.
    pub(crate) fn is_literal(path: &str) -> bool {
        !TOKEN.is_match(path)
    }

    /// Tests the pattern against a path.  The match must start at the first
    /// byte, since routing always consumes from the front of the pending
    /// path; `consumed` is how many bytes of the path it covered.
    pub(crate) fn matches(&self, path: &str) -> Option<PatternMatch> {
        let captures = self.regex.captures(path)?;
        let overall = captures.get(0)?;
        if overall.start() != 0 {
            return None;
        }
        let captures = captures
            .iter()
            .skip(1)
            .map(|group| group.map(|g| g.as_str().to_string()))
            .collect();
        Some(PatternMatch {
            consumed: overall.end(),
            captures,
        })
    }

    pub(crate) fn keys(&self) -> &[ParamKey] {
        &self.keys
    }

    pub(crate) fn source(&self) -> &str {
        &self.source
    }
}

#[derive(Debug)]
pub(crate) struct PatternMatch {
    pub(crate) consumed: usize,
    pub(crate) captures: Vec<Option<String>>,
}

/// Strictly percent-decodes one captured parameter.  A `%` not followed by
/// two hex digits, or a decode that is not valid UTF-8, is a client error,
/// never a panic.
pub(crate) fn percent_decode(name: &str, raw: &str) -> Result<String, TrellisError> {
    let bytes = raw.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = bytes
                .get(i + 1..i + 3)
                .and_then(|pair| std::str::from_utf8(pair).ok())
                .and_then(|pair| u8::from_str_radix(pair, 16).ok());
            match hex {
                Some(byte) => {
                    decoded.push(byte);
                    i += 3;
                }
                None => return Err(TrellisError::MalformedParameter(name.to_string())),
            }
        } else {
            decoded.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(decoded).map_err(|_| TrellisError::MalformedParameter(name.to_string()))
}
