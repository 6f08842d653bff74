//! Resource addresses
//!
//! Provides [`Address`] for identifying live resource instances and
//! [`AddressPattern`] for declaring resource types and transformation rules.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// Instance name that matches any instance when declaring a resource type
pub const WILDCARD: &str = "*";

/// One `(type key, instance name)` pair of an address
///
/// In a declaration the value may be [`WILDCARD`]; in a live address it never is.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PathElement {
    key: String,
    value: String,
}

impl PathElement {
    /// Create element with a concrete instance name
    #[inline]
    #[must_use]
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Create wildcard element (`key=*`)
    #[inline]
    #[must_use]
    pub fn wildcard(key: impl Into<String>) -> Self {
        Self::new(key, WILDCARD)
    }

    /// Resource type key
    #[inline]
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Instance name (or `*`)
    #[inline]
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Check if this element is a wildcard
    #[inline]
    #[must_use]
    pub fn is_wildcard(&self) -> bool {
        self.value == WILDCARD
    }

    /// Check if this (declared) element accepts the concrete element
    #[inline]
    #[must_use]
    pub fn matches(&self, other: &PathElement) -> bool {
        self.key == other.key && (self.is_wildcard() || self.value == other.value)
    }

    fn parse(segment: &str) -> Result<Self, AddressError> {
        let (key, value) = segment
            .split_once('=')
            .ok_or_else(|| AddressError::InvalidSegment(segment.to_string()))?;
        validate_token(key, segment)?;
        if value != WILDCARD {
            validate_token(value, segment)?;
        }
        Ok(Self::new(key, value))
    }
}

impl Display for PathElement {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

fn validate_token(token: &str, segment: &str) -> Result<(), AddressError> {
    if token.is_empty() {
        return Err(AddressError::EmptySegment);
    }
    if token.contains(|c: char| !c.is_alphanumeric() && !matches!(c, '-' | '_' | '.')) {
        return Err(AddressError::InvalidSegment(segment.to_string()));
    }
    Ok(())
}

fn parse_elements(s: &str) -> Result<Vec<PathElement>, AddressError> {
    let trimmed = s.trim();
    if trimmed.is_empty() || trimmed == "/" {
        return Ok(Vec::new());
    }
    trimmed
        .strip_prefix('/')
        .unwrap_or(trimmed)
        .split('/')
        .map(|segment| {
            if segment.is_empty() {
                Err(AddressError::EmptySegment)
            } else {
                PathElement::parse(segment)
            }
        })
        .collect()
}

fn write_elements(f: &mut Formatter<'_>, elements: &[PathElement]) -> fmt::Result {
    if elements.is_empty() {
        return f.write_str("/");
    }
    for element in elements {
        write!(f, "/{element}")?;
    }
    Ok(())
}

/// Address of a live resource instance
///
/// Ordered `(type key, instance name)` pairs from the tree root.
/// Never contains wildcards.
///
/// # Examples
/// - `/` is the root resource
/// - `/container=bar/cache=foo` is cache `foo` of container `bar`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(Vec<PathElement>);

impl Address {
    /// Create address from elements
    ///
    /// # Errors
    /// Returns error if any element is a wildcard
    pub fn new(elements: Vec<PathElement>) -> Result<Self, AddressError> {
        if let Some(wild) = elements.iter().find(|e| e.is_wildcard()) {
            return Err(AddressError::WildcardInInstance(wild.to_string()));
        }
        Ok(Self(elements))
    }

    /// The root address
    #[inline]
    #[must_use]
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Address elements
    #[inline]
    #[must_use]
    pub fn elements(&self) -> &[PathElement] {
        &self.0
    }

    /// Number of elements
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if this is the root address
    #[inline]
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Parent address (if not root)
    #[inline]
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.0.is_empty() {
            None
        } else {
            Some(Self(self.0[..self.0.len() - 1].to_vec()))
        }
    }

    /// Last element (if not root)
    #[inline]
    #[must_use]
    pub fn last(&self) -> Option<&PathElement> {
        self.0.last()
    }

    /// Append a concrete element, returning the child address
    ///
    /// A wildcard value is not a valid instance name; callers building
    /// addresses from user input go through [`Address::from_str`].
    #[inline]
    #[must_use]
    pub fn child(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut new = self.clone();
        new.0.push(PathElement::new(key, value));
        new
    }

    /// Append an element built from untrusted input, returning the child
    /// address
    ///
    /// # Errors
    /// Returns error if the value is a wildcard or either token is malformed
    pub fn try_child(&self, key: &str, value: &str) -> Result<Self, AddressError> {
        let segment = format!("{key}={value}");
        if value == WILDCARD {
            return Err(AddressError::WildcardInInstance(segment));
        }
        validate_token(key, &segment)?;
        validate_token(value, &segment)?;
        Ok(self.child(key, value))
    }

    /// Check if this address is a prefix of another (or equal)
    #[inline]
    #[must_use]
    pub fn is_prefix_of(&self, other: &Self) -> bool {
        if self.0.len() > other.0.len() {
            return false;
        }
        self.0 == other.0[..self.0.len()]
    }

    /// Check if this address is a strict ancestor of another
    #[inline]
    #[must_use]
    pub fn is_ancestor_of(&self, other: &Self) -> bool {
        self.0.len() < other.0.len() && self.is_prefix_of(other)
    }

    /// Check if the two addresses share a lineage (equal, ancestor or descendant)
    #[inline]
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.is_prefix_of(other) || other.is_prefix_of(self)
    }

    /// Common prefix of two addresses
    #[must_use]
    pub fn common_prefix(&self, other: &Self) -> Self {
        let common = self
            .0
            .iter()
            .zip(&other.0)
            .take_while(|(a, b)| a == b)
            .map(|(a, _)| a.clone())
            .collect();
        Self(common)
    }

    /// Elements of `self` below `ancestor`
    ///
    /// # Errors
    /// Returns error if `self` is not a descendant of `ancestor`
    pub fn relative_to(&self, ancestor: &Self) -> Result<&[PathElement], AddressError> {
        if !ancestor.is_prefix_of(self) {
            return Err(AddressError::NotDescendant {
                address: self.to_string(),
                ancestor: ancestor.to_string(),
            });
        }
        Ok(&self.0[ancestor.0.len()..])
    }

    /// Iterator over elements from root to leaf
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &PathElement> {
        self.0.iter()
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write_elements(f, &self.0)
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(parse_elements(s)?)
    }
}

impl TryFrom<String> for Address {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.to_string()
    }
}

/// Declared address that may contain wildcards
///
/// Used for registering resource types and keying transformation rules.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AddressPattern(Vec<PathElement>);

impl AddressPattern {
    /// Create pattern from elements
    #[inline]
    #[must_use]
    pub fn new(elements: Vec<PathElement>) -> Self {
        Self(elements)
    }

    /// Pattern matching only the root
    #[inline]
    #[must_use]
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Append an element
    #[inline]
    #[must_use]
    pub fn child(&self, element: PathElement) -> Self {
        let mut new = self.clone();
        new.0.push(element);
        new
    }

    /// Pattern elements
    #[inline]
    #[must_use]
    pub fn elements(&self) -> &[PathElement] {
        &self.0
    }

    /// Check if a live address matches this pattern exactly (same depth)
    #[must_use]
    pub fn matches(&self, address: &Address) -> bool {
        self.0.len() == address.len()
            && self
                .0
                .iter()
                .zip(address.iter())
                .all(|(declared, concrete)| declared.matches(concrete))
    }
}

impl Display for AddressPattern {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write_elements(f, &self.0)
    }
}

impl FromStr for AddressPattern {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(parse_elements(s)?))
    }
}

impl TryFrom<String> for AddressPattern {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AddressPattern> for String {
    fn from(pattern: AddressPattern) -> Self {
        pattern.to_string()
    }
}

impl From<&Address> for AddressPattern {
    fn from(address: &Address) -> Self {
        Self(address.0.clone())
    }
}

/// Errors related to addresses
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    /// Empty segment in address
    #[error("address contains empty segment")]
    EmptySegment,

    /// Segment is not `key=value` or uses invalid characters
    #[error("invalid segment: {0} (expected key=value of alphanumerics, '-', '_' or '.')")]
    InvalidSegment(String),

    /// Wildcard used in a live instance address
    #[error("wildcard not allowed in instance address: {0}")]
    WildcardInInstance(String),

    /// Not a descendant address
    #[error("address '{address}' is not a descendant of '{ancestor}'")]
    NotDescendant { address: String, ancestor: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn addr(s: &str) -> Address {
        s.parse().unwrap()
    }

    #[test]
    fn address_root() {
        let root = Address::root();
        assert!(root.is_root());
        assert_eq!(root.len(), 0);
        assert_eq!(root.to_string(), "/");
        assert!(root.parent().is_none());
    }

    #[test]
    fn address_parse_and_display() {
        let a = addr("/container=bar/cache=foo");
        assert_eq!(a.len(), 2);
        assert_eq!(a.last().unwrap().key(), "cache");
        assert_eq!(a.last().unwrap().value(), "foo");
        assert_eq!(a.to_string(), "/container=bar/cache=foo");
    }

    #[test]
    fn address_parse_without_leading_slash() {
        assert_eq!(addr("container=bar"), addr("/container=bar"));
    }

    #[test]
    fn address_rejects_wildcard() {
        let result: Result<Address, _> = "/container=*".parse();
        assert!(matches!(result, Err(AddressError::WildcardInInstance(_))));
    }

    #[test]
    fn address_rejects_empty_segment() {
        let result: Result<Address, _> = "/container=bar//cache=foo".parse();
        assert!(matches!(result, Err(AddressError::EmptySegment)));
    }

    #[test]
    fn address_rejects_missing_value() {
        let result: Result<Address, _> = "/container".parse();
        assert!(matches!(result, Err(AddressError::InvalidSegment(_))));
    }

    #[test]
    fn address_parent_and_child() {
        let parent = addr("/container=bar");
        let child = parent.child("cache", "foo");
        assert_eq!(child, addr("/container=bar/cache=foo"));
        assert_eq!(child.parent().unwrap(), parent);
    }

    #[test]
    fn address_lineage() {
        let container = addr("/container=bar");
        let cache = addr("/container=bar/cache=foo");
        let other = addr("/container=baz");

        assert!(container.is_ancestor_of(&cache));
        assert!(!cache.is_ancestor_of(&container));
        assert!(!container.is_ancestor_of(&container));
        assert!(container.overlaps(&cache));
        assert!(cache.overlaps(&container));
        assert!(!container.overlaps(&other));
        assert!(Address::root().overlaps(&cache));
    }

    #[test]
    fn address_common_prefix_and_relative() {
        let a = addr("/container=bar/cache=foo");
        let b = addr("/container=bar/cache=qux");
        assert_eq!(a.common_prefix(&b), addr("/container=bar"));

        let rel = a.relative_to(&addr("/container=bar")).unwrap();
        assert_eq!(rel, &[PathElement::new("cache", "foo")]);
        assert!(matches!(
            a.relative_to(&addr("/container=baz")),
            Err(AddressError::NotDescendant { .. })
        ));
    }

    #[test]
    fn pattern_matches_wildcards() {
        let pattern: AddressPattern = "/container=*/cache=*".parse().unwrap();
        assert!(pattern.matches(&addr("/container=bar/cache=foo")));
        assert!(!pattern.matches(&addr("/container=bar")));

        let fixed: AddressPattern = "/container=*/transport=jgroups".parse().unwrap();
        assert!(fixed.matches(&addr("/container=bar/transport=jgroups")));
        assert!(!fixed.matches(&addr("/container=bar/transport=tcp")));
    }

    #[test]
    fn address_serde_as_string() {
        let a = addr("/container=bar/cache=foo");
        let json = serde_json::to_string(&a).unwrap();
        assert_eq!(json, "\"/container=bar/cache=foo\"");
        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(back, a);
    }

    proptest! {
        #[test]
        fn prop_display_parse_round_trip(
            segments in proptest::collection::vec(("[a-z][a-z0-9-]{0,8}", "[a-z0-9][a-z0-9_.]{0,8}"), 0..5)
        ) {
            let elements = segments
                .into_iter()
                .map(|(k, v)| PathElement::new(k, v))
                .collect();
            let address = Address::new(elements).unwrap();
            let parsed: Address = address.to_string().parse().unwrap();
            prop_assert_eq!(parsed, address);
        }
    }
}
