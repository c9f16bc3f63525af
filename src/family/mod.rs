//! Page-group registry.
//!
//! A [`PageFamily`] is an ordered set of [`PageGroup`]s. Each group names a
//! class of URLs on one host (full-match path pattern), carries an ordered
//! list of canonicalizers that rewrite a matching URL into its storable form,
//! and optionally points at a parent group. The parent linkage is what the
//! crawl engine uses to decide which discovered links to follow: a link is
//! kept only when its group is a direct child of the current page's group.
//!
//! Groups are declared through [`PageFamilyBuilder`]; parent references are
//! given by name and resolved into indices in a second pass. Group identity
//! is the `(host, name)` pair so a rebuilt registry keeps matching the
//! `group_name` strings already persisted in lookup rows.

pub mod manaba;

use std::collections::HashSet;

use regex::Regex;
use thiserror::Error;
use tracing::debug;
use url::Url;

#[derive(Error, Debug)]
pub enum FamilyError {
    #[error("duplicate page group name: {0}")]
    DuplicateGroup(String),
    #[error("unknown parent group {parent:?} for group {group:?}")]
    UnknownParent { group: String, parent: String },
    #[error("invalid path pattern for group {group:?}: {source}")]
    InvalidPattern {
        group: String,
        #[source]
        source: regex::Error,
    },
}

/// A canonicalized URL paired with the name of the group that matched it.
///
/// Equality and hashing are by `url` alone: two URLs that canonicalize to
/// the same string are the same page, whatever group produced them.
#[derive(Debug, Clone, Eq)]
pub struct GroupedUrl {
    pub url: String,
    pub group_name: String,
}

impl PartialEq for GroupedUrl {
    fn eq(&self, other: &Self) -> bool {
        self.url == other.url
    }
}

impl std::hash::Hash for GroupedUrl {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.url.hash(state);
    }
}

/// Result of one canonicalization step: either rewritten components, or a
/// raw string that gets re-parsed before the next step.
pub enum Canonicalized {
    Components(Url),
    Text(String),
}

/// A pure rewrite applied to a matching URL before it is stored.
pub type Canonicalizer = fn(&Url) -> Canonicalized;

/// Declarative record handed to the builder; parents are referenced by name.
pub struct GroupSpec {
    pub name: &'static str,
    pub host: &'static str,
    pub path_pattern: &'static str,
    pub canonicalizers: Vec<Canonicalizer>,
    pub parent: Option<&'static str>,
}

pub struct PageGroup {
    name: String,
    host: String,
    path_pattern: Regex,
    canonicalizers: Vec<Canonicalizer>,
    parent: Option<usize>,
}

impl PageGroup {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Group identity: `(host, name)`.
    fn key(&self) -> (&str, &str) {
        (&self.host, &self.name)
    }

    fn matches(&self, url: &Url) -> bool {
        if url.host_str() != Some(self.host.as_str()) && !(url.host_str().is_none() && self.host.is_empty()) {
            return false;
        }
        self.path_pattern.is_match(url.path())
    }

    /// Apply every canonicalizer in order and yield the grouped URL.
    fn map(&self, source: &Url) -> Option<GroupedUrl> {
        let mut url = source.clone();
        for canonicalizer in &self.canonicalizers {
            url = match canonicalizer(&url) {
                Canonicalized::Components(next) => next,
                Canonicalized::Text(text) => match Url::parse(&text) {
                    Ok(next) => next,
                    Err(e) => {
                        debug!(url = %text, error = %e, "canonicalizer produced an unparseable URL");
                        return None;
                    }
                },
            };
        }
        Some(GroupedUrl {
            url: url.to_string(),
            group_name: self.name.clone(),
        })
    }
}

impl PartialEq for PageGroup {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

pub struct PageFamily {
    groups: Vec<PageGroup>,
}

impl PageFamily {
    pub fn builder() -> PageFamilyBuilder {
        PageFamilyBuilder { specs: Vec::new() }
    }

    pub fn groups(&self) -> impl Iterator<Item = &PageGroup> {
        self.groups.iter()
    }

    pub fn group_by_name(&self, name: &str) -> Option<&PageGroup> {
        self.groups.iter().find(|g| g.name == name)
    }

    /// Classify a URL: first group (in declaration order) whose host matches
    /// exactly and whose path pattern fully matches wins; its canonicalizers
    /// are then applied. Unclassified URLs yield `None`.
    pub fn classify(&self, url: &str) -> Option<GroupedUrl> {
        let parsed = match Url::parse(url) {
            Ok(parsed) => parsed,
            Err(e) => {
                debug!(url, error = %e, "grouper DENIED (unparseable)");
                return None;
            }
        };
        for group in &self.groups {
            if group.matches(&parsed) {
                let mapped = group.map(&parsed);
                if let Some(mapped) = &mapped {
                    debug!(url, mapped = %mapped.url, group = %mapped.group_name, "grouper ACCEPTED");
                }
                return mapped;
            }
        }
        debug!(url, "grouper DENIED");
        None
    }

    /// Child-edge rule: `child` survives iff its group's declared parent is
    /// `parent`'s group, compared by `(host, name)`. Either side unresolved
    /// means `false`.
    pub fn is_child_of(&self, child: &GroupedUrl, parent: &GroupedUrl) -> bool {
        let Some(child_group) = self.group_by_name(&child.group_name) else {
            return false;
        };
        let Some(parent_group) = self.group_by_name(&parent.group_name) else {
            return false;
        };
        match child_group.parent {
            Some(index) => self.groups[index] == *parent_group,
            None => false,
        }
    }
}

pub struct PageFamilyBuilder {
    specs: Vec<GroupSpec>,
}

impl PageFamilyBuilder {
    pub fn group(mut self, spec: GroupSpec) -> Self {
        self.specs.push(spec);
        self
    }

    /// Compile the patterns and resolve parent names into indices.
    ///
    /// A group may name itself as its parent; forward references are allowed.
    pub fn build(self) -> Result<PageFamily, FamilyError> {
        let mut seen = HashSet::new();
        for spec in &self.specs {
            if !seen.insert(spec.name) {
                return Err(FamilyError::DuplicateGroup(spec.name.to_string()));
            }
        }

        let find = |name: &str| self.specs.iter().position(|s| s.name == name);

        let mut groups = Vec::with_capacity(self.specs.len());
        for spec in &self.specs {
            let parent = match spec.parent {
                Some(parent_name) => Some(find(parent_name).ok_or_else(|| {
                    FamilyError::UnknownParent {
                        group: spec.name.to_string(),
                        parent: parent_name.to_string(),
                    }
                })?),
                None => None,
            };
            let path_pattern = Regex::new(&format!("^(?:{})$", spec.path_pattern)).map_err(|e| {
                FamilyError::InvalidPattern {
                    group: spec.name.to_string(),
                    source: e,
                }
            })?;
            groups.push(PageGroup {
                name: spec.name.to_string(),
                host: spec.host.to_string(),
                path_pattern,
                canonicalizers: spec.canonicalizers.clone(),
                parent,
            });
        }
        Ok(PageFamily { groups })
    }
}

/// Decoded query pairs with duplicate keys collapsed (last value wins,
/// first-occurrence order kept). Shared by the query canonicalizers.
pub(crate) fn query_map(url: &Url) -> Vec<(String, String)> {
    let mut pairs: Vec<(String, String)> = Vec::new();
    for (key, value) in url.query_pairs() {
        match pairs.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value.into_owned(),
            None => pairs.push((key.into_owned(), value.into_owned())),
        }
    }
    pairs
}

/// Set (or append) a query parameter in a decoded pair list.
pub(crate) fn set_query_param(pairs: &mut Vec<(String, String)>, key: &str, value: &str) {
    match pairs.iter_mut().find(|(k, _)| k.as_str() == key) {
        Some(entry) => entry.1 = value.to_string(),
        None => pairs.push((key.to_string(), value.to_string())),
    }
}

/// Rebuild a URL with the given decoded query pairs.
pub(crate) fn with_query(url: &Url, pairs: &[(String, String)]) -> Url {
    let mut rebuilt = url.clone();
    if pairs.is_empty() {
        rebuilt.set_query(None);
    } else {
        rebuilt
            .query_pairs_mut()
            .clear()
            .extend_pairs(pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    }
    rebuilt
}
