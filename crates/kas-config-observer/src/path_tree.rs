//! Nested key-path configuration document
//!
//! A [`PathTree`] holds both the committed ("existing") configuration and
//! the fragments produced by observers. Leaves are scalars or ordered
//! string sequences; sequence order is significant because each element
//! becomes a repeated command-line argument.

use crate::error::{ObserveError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A key-path into a [`PathTree`], e.g. `["apiServerArguments", "oidc-client-id"]`
pub type StaticPath = &'static [&'static str];

/// Render a path the way it appears in logs and errors
pub fn display_path(path: &[&str]) -> String {
    path.join(".")
}

/// Scalar leaf value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Scalar::String(value.to_string())
    }
}

/// A node of the tree: a sequence leaf, a scalar leaf or a nested tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Node {
    List(Vec<String>),
    Scalar(Scalar),
    Tree(PathTree),
}

impl Node {
    /// Build a sequence leaf
    pub fn list<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Node::List(values.into_iter().map(Into::into).collect())
    }

    /// Borrow the sequence if this node is one
    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            Node::List(values) => Some(values),
            _ => None,
        }
    }

    fn is_empty_container(&self) -> bool {
        match self {
            Node::List(values) => values.is_empty(),
            Node::Tree(tree) => tree.is_empty(),
            Node::Scalar(_) => false,
        }
    }
}

/// Nested key-path document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PathTree {
    entries: BTreeMap<String, Node>,
}

impl PathTree {
    /// Create an empty tree
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over the top-level entries
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Node)> {
        self.entries.iter()
    }

    /// Look up the node at `path`
    ///
    /// Returns `None` when any segment is missing or an intermediate
    /// segment is a leaf.
    pub fn get(&self, path: &[&str]) -> Option<&Node> {
        let (last, parents) = path.split_last()?;
        let mut tree = self;
        for segment in parents {
            match tree.entries.get(*segment)? {
                Node::Tree(child) => tree = child,
                _ => return None,
            }
        }
        tree.entries.get(*last)
    }

    /// Look up the sequence at `path`
    ///
    /// Absent paths yield `Ok(None)`; a node of another shape on the way
    /// (or at the end) is an error.
    pub fn get_list(&self, path: &[&str]) -> Result<Option<&[String]>> {
        let Some((last, parents)) = path.split_last() else {
            return Ok(None);
        };
        let mut tree = self;
        for (depth, segment) in parents.iter().enumerate() {
            match tree.entries.get(*segment) {
                None => return Ok(None),
                Some(Node::Tree(child)) => tree = child,
                Some(_) => {
                    return Err(ObserveError::PathTypeMismatch {
                        path: display_path(&path[..=depth]),
                        expected: "map",
                    })
                }
            }
        }
        match tree.entries.get(*last) {
            None => Ok(None),
            Some(Node::List(values)) => Ok(Some(values)),
            Some(_) => Err(ObserveError::PathTypeMismatch {
                path: display_path(path),
                expected: "list",
            }),
        }
    }

    /// Set the node at `path`, creating intermediate maps as needed
    pub fn set(&mut self, path: &[&str], node: Node) -> Result<()> {
        let Some((last, parents)) = path.split_last() else {
            return Err(ObserveError::InvalidConfig("empty path".to_string()));
        };
        let mut tree = self;
        for (depth, segment) in parents.iter().enumerate() {
            let child = tree
                .entries
                .entry((*segment).to_string())
                .or_insert_with(|| Node::Tree(PathTree::new()));
            match child {
                Node::Tree(child) => tree = child,
                _ => {
                    return Err(ObserveError::PathTypeMismatch {
                        path: display_path(&path[..=depth]),
                        expected: "map",
                    })
                }
            }
        }
        tree.entries.insert((*last).to_string(), node);
        Ok(())
    }

    /// Set a sequence leaf at `path`
    pub fn set_list<I, S>(&mut self, path: &[&str], values: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.set(path, Node::list(values))
    }

    /// Remove the node at `path`, dropping any maps left empty by the removal
    pub fn remove(&mut self, path: &[&str]) -> Option<Node> {
        let (first, rest) = path.split_first()?;
        if rest.is_empty() {
            return self.entries.remove(*first);
        }
        let removed = match self.entries.get_mut(*first)? {
            Node::Tree(child) => child.remove(rest)?,
            _ => return None,
        };
        if matches!(self.entries.get(*first), Some(Node::Tree(child)) if child.is_empty()) {
            self.entries.remove(*first);
        }
        Some(removed)
    }

    /// Remove empty sequences and empty maps, recursively
    pub fn prune(&mut self) {
        self.entries.retain(|_, node| {
            if let Node::Tree(child) = node {
                child.prune();
            }
            !node.is_empty_container()
        });
    }

    /// Consume and return the pruned tree
    pub fn pruned(mut self) -> Self {
        self.prune();
        self
    }

    /// Copy only the listed paths into a new, pruned tree
    pub fn pruned_to(&self, paths: &[&[&str]]) -> Result<PathTree> {
        let mut out = PathTree::new();
        for path in paths {
            if let Some(node) = self.get(path) {
                out.set(path, node.clone())?;
            }
        }
        Ok(out.pruned())
    }

    /// Deep-merge `other` into this tree; leaves from `other` win
    pub fn merge_from(&mut self, other: &PathTree) {
        for (key, incoming) in &other.entries {
            match (self.entries.get_mut(key), incoming) {
                (Some(Node::Tree(mine)), Node::Tree(theirs)) => mine.merge_from(theirs),
                _ => {
                    self.entries.insert(key.clone(), incoming.clone());
                }
            }
        }
    }

    /// Whether any of `paths` holds a sequence in this tree
    pub fn contains_any_list(&self, paths: &[&[&str]]) -> Result<bool> {
        for path in paths {
            if self.get_list(path)?.is_some() {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

impl From<BTreeMap<String, Node>> for PathTree {
    fn from(entries: BTreeMap<String, Node>) -> Self {
        Self { entries }
    }
}

impl fmt::Display for PathTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_yaml::to_string(self) {
            Ok(yaml) => f.write_str(&yaml),
            Err(_) => write!(f, "{:?}", self.entries),
        }
    }
}
