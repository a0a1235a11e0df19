//! Absolute and relative JSON pointers, resolved against any parent-linked tree.
//!
//! - Absolute: `""`, `#`, `#/a/b` or `/a/b`; resolved from the tree root.
//! - Relative: `N` or `N/a/b`; climbs `N` parents (0 = the node itself) and
//!   then descends.
//!
//! Tokens use RFC 6901 escaping (`~0` for `~`, `~1` for `/`). Schema trees
//! accept `*` as "the item schema of this array"; data trees accept indices.
use std::fmt;

use crate::error::PointerError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pointer {
    Absolute(Vec<String>),
    Relative { up: usize, tokens: Vec<String> },
}

/// Minimal navigation surface shared by the schema and data arenas.
pub trait Tree {
    type Id: Copy + Eq;
    fn root(&self) -> Self::Id;
    fn parent(&self, id: Self::Id) -> Option<Self::Id>;
    fn child(&self, id: Self::Id, token: &str) -> Option<Self::Id>;
}

impl Pointer {
    pub fn parse(source: &str) -> Result<Self, PointerError> {
        let malformed = |reason: &str| PointerError::Malformed {
            pointer: source.to_string(),
            reason: reason.to_string(),
        };
        if source.is_empty() {
            return Ok(Pointer::Absolute(Vec::new()));
        }
        if let Some(rest) = source.strip_prefix('#') {
            return match rest {
                "" => Ok(Pointer::Absolute(Vec::new())),
                _ if rest.starts_with('/') => Ok(Pointer::Absolute(split_tokens(rest))),
                _ => Err(malformed("`#` must be followed by `/`")),
            };
        }
        if source.starts_with('/') {
            return Ok(Pointer::Absolute(split_tokens(source)));
        }
        let digits_len = source.bytes().take_while(u8::is_ascii_digit).count();
        if digits_len == 0 {
            return Err(malformed("expected `/`, `#` or an ancestor count"));
        }
        let (digits, rest) = source.split_at(digits_len);
        let up = digits
            .parse::<usize>()
            .map_err(|_| malformed("ancestor count out of range"))?;
        match rest {
            "" => Ok(Pointer::Relative { up, tokens: Vec::new() }),
            _ if rest.starts_with('/') => Ok(Pointer::Relative { up, tokens: split_tokens(rest) }),
            _ => Err(malformed("ancestor count must be followed by `/`")),
        }
    }

    pub fn is_absolute(&self) -> bool {
        matches!(self, Pointer::Absolute(_))
    }

    pub fn tokens(&self) -> &[String] {
        match self {
            Pointer::Absolute(tokens) | Pointer::Relative { tokens, .. } => tokens,
        }
    }

    /// Parse and insist on an absolute pointer.
    pub fn parse_absolute(source: &str) -> Result<Vec<String>, PointerError> {
        match Self::parse(source)? {
            Pointer::Absolute(tokens) => Ok(tokens),
            Pointer::Relative { .. } => Err(PointerError::NotAbsolute(source.to_string())),
        }
    }

    /// Resolve against `tree` starting from `from` (ignored for absolute pointers).
    ///
    /// `Ok(None)` means "not found"; climbing past the root is an error.
    pub fn resolve<T: Tree>(&self, tree: &T, from: T::Id) -> Result<Option<T::Id>, PointerError> {
        let (mut at, tokens) = match self {
            Pointer::Absolute(tokens) => (tree.root(), tokens),
            Pointer::Relative { up, tokens } => {
                let mut at = from;
                for climbed in 0..*up {
                    at = tree.parent(at).ok_or_else(|| PointerError::AncestorOverflow {
                        pointer: self.to_string(),
                        requested: *up,
                        available: climbed,
                    })?;
                }
                (at, tokens)
            }
        };
        for token in tokens {
            match tree.child(at, token) {
                Some(next) => at = next,
                None => return Ok(None),
            }
        }
        Ok(Some(at))
    }
}

impl fmt::Display for Pointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pointer::Absolute(tokens) => write!(f, "{}", join(tokens)),
            Pointer::Relative { up, tokens } => write!(f, "{}{}", up, join(tokens)),
        }
    }
}

/// Convenience: parse and resolve in one go.
pub fn resolve<T: Tree>(tree: &T, from: T::Id, source: &str) -> Result<Option<T::Id>, PointerError> {
    Pointer::parse(source)?.resolve(tree, from)
}

/// Absolute pointer string of `id`, built by walking the parent chain.
pub fn path_of<T, F>(tree: &T, id: T::Id, mut token_of: F) -> String
where
    T: Tree,
    F: FnMut(T::Id) -> Option<String>,
{
    let mut tokens = Vec::new();
    let mut at = id;
    while let Some(parent) = tree.parent(at) {
        if let Some(token) = token_of(at) {
            tokens.push(token);
        }
        at = parent;
    }
    tokens.reverse();
    join(&tokens)
}

pub fn join<S: AsRef<str>>(tokens: &[S]) -> String {
    let mut out = String::new();
    for token in tokens {
        out.push('/');
        out.push_str(&escape(token.as_ref()));
    }
    out
}

pub fn escape(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}

pub fn unescape(token: &str) -> String {
    token.replace("~1", "/").replace("~0", "~")
}

fn split_tokens(rest: &str) -> Vec<String> {
    rest.split('/').skip(1).map(unescape).collect()
}

// ------------------------------- Tests ------------------------------------ //
