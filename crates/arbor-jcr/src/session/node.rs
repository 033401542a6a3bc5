//! The node façade.

use std::fmt;
use std::sync::Arc;

use arbor_core::lexicon::{JCR_VERSION_HISTORY, MIX_VERSIONABLE};
use arbor_core::{Name, NodeDefinition, NodeKey, Path, PropertyType, Segment, Value};
use arbor_storage::{Query, StorageError};

use crate::error::{RepositoryError, Result};
use crate::repository::lock_store;
use crate::session::pattern::NamePattern;
use crate::session::property::Property;
use crate::session::{Session, SessionCache};

/// Identifies a node independently of the workspace it lives in: the
/// nearest referenceable ancestor (or the node itself) plus the relative
/// path down to the node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrespondenceId {
    pub referenceable: NodeKey,
    pub relative: Path,
}

impl fmt::Display for CorrespondenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.relative.depth() == 0 {
            write!(f, "{}", self.referenceable)
        } else {
            write!(f, "{}/{}", self.referenceable, self.relative)
        }
    }
}

pub(crate) fn correspondence_of(cache: &mut SessionCache, key: &NodeKey) -> Result<CorrespondenceId> {
    for candidate in cache.lineage(key)? {
        if cache.is_referenceable(&candidate)? {
            let relative = if candidate == *key {
                Path::relative(Vec::new())
            } else {
                let own = cache.path_of(key)?;
                let anchor = cache.path_of(&candidate)?;
                own.relative_to(&anchor).ok_or_else(|| {
                    RepositoryError::InvalidItemState(format!("{} is not below {}", own, anchor))
                })?
            };
            return Ok(CorrespondenceId {
                referenceable: candidate,
                relative,
            });
        }
    }
    Err(RepositoryError::InvalidItemState(format!(
        "node {} has no referenceable ancestor",
        key
    )))
}

/// A node as seen through one session.
#[derive(Clone, Copy)]
pub struct Node<'s> {
    session: &'s Session,
    key: NodeKey,
}

impl<'s> Node<'s> {
    pub(crate) fn new(session: &'s Session, key: NodeKey) -> Self {
        Node { session, key }
    }

    pub fn session(&self) -> &'s Session {
        self.session
    }

    pub fn key(&self) -> NodeKey {
        self.key
    }

    pub fn identifier(&self) -> String {
        self.key.to_string()
    }

    pub fn path(&self) -> Result<Path> {
        self.session.ensure_live()?;
        self.session.cache().path_of(&self.key)
    }

    pub fn name(&self) -> Result<Name> {
        self.session.ensure_live()?;
        Ok(self.session.cache().node(&self.key)?.name.clone())
    }

    /// Same-name-sibling index, 1-based.
    pub fn index(&self) -> Result<u32> {
        Ok(self
            .path()?
            .last_segment()
            .map(Segment::index)
            .unwrap_or(1))
    }

    pub fn depth(&self) -> Result<usize> {
        Ok(self.path()?.depth())
    }

    pub fn parent(&self) -> Result<Node<'s>> {
        self.session.ensure_live()?;
        let parent = self.session.cache().node(&self.key)?.parent;
        parent
            .map(|key| Node::new(self.session, key))
            .ok_or_else(|| RepositoryError::ItemNotFound("the root node has no parent".to_string()))
    }

    // -------------------------------------------------------------------
    // Child nodes
    // -------------------------------------------------------------------

    /// The node at `rel_path` relative to this one.
    pub fn node(&self, rel_path: &str) -> Result<Node<'s>> {
        self.session.ensure_live()?;
        let path = Path::parse(rel_path)?;
        let key = self.session.cache().resolve(&self.key, &path)?;
        Ok(Node::new(self.session, key))
    }

    pub fn has_node(&self, rel_path: &str) -> Result<bool> {
        match self.node(rel_path) {
            Ok(_) => Ok(true),
            Err(RepositoryError::PathNotFound(_)) | Err(RepositoryError::ItemNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn has_nodes(&self) -> Result<bool> {
        self.session.ensure_live()?;
        Ok(!self.session.cache().node(&self.key)?.children.is_empty())
    }

    /// Children in document order.
    pub fn nodes(&self) -> Result<Vec<Node<'s>>> {
        self.session.ensure_live()?;
        let children = self.session.cache().children(&self.key)?;
        Ok(children
            .into_iter()
            .map(|c| Node::new(self.session, c.key))
            .collect())
    }

    /// Children whose name matches `pattern`, e.g. `"foo*|bar"`. Whitespace
    /// around each `|`-separated clause is ignored.
    pub fn nodes_matching(&self, pattern: &str) -> Result<Vec<Node<'s>>> {
        let pattern = NamePattern::parse(pattern)?;
        self.session.ensure_live()?;
        let children = self.session.cache().children(&self.key)?;
        Ok(children
            .into_iter()
            .filter(|c| pattern.matches(c.name.as_str()))
            .map(|c| Node::new(self.session, c.key))
            .collect())
    }

    /// Adds a child at `rel_path` using the default primary type of the
    /// governing child definition.
    pub fn add_node(&self, rel_path: &str) -> Result<Node<'s>> {
        self.add_child(rel_path, None)
    }

    pub fn add_node_typed(&self, rel_path: &str, primary_type: &str) -> Result<Node<'s>> {
        let primary = Name::parse(primary_type)?;
        self.add_child(rel_path, Some(primary))
    }

    fn add_child(&self, rel_path: &str, primary: Option<Name>) -> Result<Node<'s>> {
        self.session.ensure_live()?;
        if rel_path.trim_end().ends_with(']') {
            return Err(RepositoryError::InvalidPath(format!(
                "{} may not end with an index",
                rel_path
            )));
        }
        let path = Path::parse(rel_path)?;
        if path.is_absolute() {
            return Err(RepositoryError::InvalidPath(format!(
                "expected a relative path, got {}",
                rel_path
            )));
        }
        let (parent_path, name) = match (path.parent(), path.name()) {
            (Some(parent), Some(name)) => (parent, name.clone()),
            _ => return Err(RepositoryError::InvalidPath(rel_path.to_string())),
        };
        let name = Name::parse(name.as_str())?;

        let mut cache = self.session.cache();
        let parent = match cache.resolve(&self.key, &parent_path) {
            Ok(parent) => parent,
            Err(RepositoryError::PathNotFound(_)) => {
                if names_property(&mut cache, &self.key, &parent_path) {
                    return Err(RepositoryError::ConstraintViolation(format!(
                        "{} names a property, not a node",
                        parent_path
                    )));
                }
                return Err(RepositoryError::PathNotFound(path.to_string()));
            }
            Err(e) => return Err(e),
        };
        self.session.check_lock_with(&mut cache, &parent)?;
        let key = cache.editor(&parent)?.create_child(name, None, primary)?;
        Ok(Node::new(self.session, key))
    }

    /// Moves child `src` immediately before sibling `dest` (last when `None`).
    pub fn order_before(&self, src: &str, dest: Option<&str>) -> Result<()> {
        self.session.ensure_live()?;
        let src = Segment::parse(src)?;
        let dest = dest.map(Segment::parse).transpose()?;
        let mut cache = self.session.cache();
        self.session.check_lock_with(&mut cache, &self.key)?;
        cache.editor(&self.key)?.order_child_before(&src, dest.as_ref())
    }

    /// Removes this node and its subtree.
    pub fn remove(&self) -> Result<()> {
        self.session.ensure_live()?;
        let mut cache = self.session.cache();
        let parent = cache.node(&self.key)?.parent.ok_or_else(|| {
            RepositoryError::ConstraintViolation("the root node cannot be removed".to_string())
        })?;
        self.session.check_lock_with(&mut cache, &parent)?;
        if let Some(def) = cache.node_definition(&self.key)? {
            if def.protected {
                return Err(RepositoryError::ConstraintViolation(format!(
                    "node {} is protected",
                    cache.path_of(&self.key)?
                )));
            }
        }
        cache.editor(&parent)?.destroy_child(&self.key)?;
        Ok(())
    }

    // -------------------------------------------------------------------
    // Properties
    // -------------------------------------------------------------------

    /// The property at `rel_path` relative to this node.
    pub fn property(&self, rel_path: &str) -> Result<Property<'s>> {
        self.session.ensure_live()?;
        let path = Path::parse(rel_path)?;
        let (owner_path, name) = match (path.parent(), path.name()) {
            (Some(parent), Some(name)) => (parent, name.clone()),
            _ => return Err(RepositoryError::InvalidPath(rel_path.to_string())),
        };
        let mut cache = self.session.cache();
        let owner = cache.resolve(&self.key, &owner_path)?;
        if cache.node(&owner)?.property(name.as_str()).is_none() {
            return Err(RepositoryError::PathNotFound(format!(
                "{}/{}",
                cache.path_of(&owner)?,
                name
            )));
        }
        Ok(Property::new(self.session, owner, name))
    }

    pub fn has_property(&self, rel_path: &str) -> Result<bool> {
        match self.property(rel_path) {
            Ok(_) => Ok(true),
            Err(RepositoryError::PathNotFound(_)) | Err(RepositoryError::ItemNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn has_properties(&self) -> Result<bool> {
        self.session.ensure_live()?;
        Ok(!self.session.cache().node(&self.key)?.properties.is_empty())
    }

    pub fn properties(&self) -> Result<Vec<Property<'s>>> {
        self.session.ensure_live()?;
        let names: Vec<Name> = self
            .session
            .cache()
            .node(&self.key)?
            .properties
            .keys()
            .cloned()
            .collect();
        Ok(names
            .into_iter()
            .map(|name| Property::new(self.session, self.key, name))
            .collect())
    }

    /// Properties whose name matches `pattern`, with the same clause rules
    /// as [`Node::nodes_matching`].
    pub fn properties_matching(&self, pattern: &str) -> Result<Vec<Property<'s>>> {
        let pattern = NamePattern::parse(pattern)?;
        Ok(self
            .properties()?
            .into_iter()
            .filter(|p| pattern.matches(p.name().as_str()))
            .collect())
    }

    /// Sets a single-valued property, typed by the value unless the
    /// property's definition requires otherwise.
    pub fn set_property(&self, name: &str, value: impl Into<Value>) -> Result<Property<'s>> {
        self.write_property(name, vec![value.into()], None, false)
    }

    /// Sets a single-valued property after converting `value` to `ty`.
    pub fn set_property_as(
        &self,
        name: &str,
        value: impl Into<Value>,
        ty: PropertyType,
    ) -> Result<Property<'s>> {
        self.write_property(name, vec![value.into()], Some(ty), false)
    }

    pub fn set_property_values(&self, name: &str, values: Vec<Value>) -> Result<Property<'s>> {
        self.write_property(name, values, None, true)
    }

    pub(crate) fn write_property(
        &self,
        name: &str,
        values: Vec<Value>,
        ty: Option<PropertyType>,
        multiple: bool,
    ) -> Result<Property<'s>> {
        self.session.ensure_live()?;
        let name = Name::parse(name)?;
        let mut cache = self.session.cache();
        self.session.check_lock_with(&mut cache, &self.key)?;
        let written = cache
            .editor(&self.key)?
            .set_property(name, values, ty, multiple)?;
        Ok(Property::new(self.session, self.key, written.name))
    }

    // -------------------------------------------------------------------
    // Types and mixins
    // -------------------------------------------------------------------

    pub fn primary_type(&self) -> Result<Name> {
        self.session.ensure_live()?;
        self.session.cache().primary_type(&self.key)
    }

    pub fn mixin_types(&self) -> Result<Vec<Name>> {
        self.session.ensure_live()?;
        self.session.cache().mixin_types(&self.key)
    }

    /// True if the primary type, a mixin, or one of their supertypes is
    /// `node_type`.
    pub fn is_node_type(&self, node_type: &str) -> Result<bool> {
        self.session.ensure_live()?;
        self.session.cache().is_node_type(&self.key, node_type)
    }

    /// The definition this node was created under; `None` for the root.
    pub fn definition(&self) -> Result<Option<NodeDefinition>> {
        self.session.ensure_live()?;
        self.session.cache().node_definition(&self.key)
    }

    /// Whether [`add_mixin`](Self::add_mixin) would succeed. Unknown mixin
    /// names are an error rather than `false`.
    pub fn can_add_mixin(&self, mixin: &str) -> Result<bool> {
        self.session.ensure_live()?;
        let mixin = Name::parse(mixin)?;
        let mut cache = self.session.cache();
        match self.session.check_lock_with(&mut cache, &self.key) {
            Ok(()) => {}
            Err(RepositoryError::Lock(_)) => return Ok(false),
            Err(e) => return Err(e),
        }
        if !cache.is_checked_out(&self.key)? {
            return Ok(false);
        }
        Ok(cache.internal_editor(&self.key)?.mixin_conflict(&mixin)?.is_none())
    }

    pub fn add_mixin(&self, mixin: &str) -> Result<()> {
        self.session.ensure_live()?;
        let mixin = Name::parse(mixin)?;
        let mut cache = self.session.cache();
        self.session.check_lock_with(&mut cache, &self.key)?;
        cache.editor(&self.key)?.add_mixin(&mixin)
    }

    /// Removes `mixin`. A versionable node that already has a version
    /// history keeps `mix:versionable`.
    pub fn remove_mixin(&self, mixin: &str) -> Result<()> {
        self.session.ensure_live()?;
        let mixin = Name::parse(mixin)?;
        let mut cache = self.session.cache();
        self.session.check_lock_with(&mut cache, &self.key)?;
        if mixin.as_str() == MIX_VERSIONABLE && !cache.is_new(&self.key) {
            let versioned = cache
                .node(&self.key)?
                .property(JCR_VERSION_HISTORY)
                .is_some();
            if versioned {
                return Err(RepositoryError::ConstraintViolation(format!(
                    "{} has been versioned; {} cannot be removed",
                    cache.path_of(&self.key)?,
                    MIX_VERSIONABLE
                )));
            }
        }
        if let Some(def) = cache.node_definition(&self.key)? {
            if def.protected {
                return Err(RepositoryError::ConstraintViolation(format!(
                    "node {} is protected",
                    cache.path_of(&self.key)?
                )));
            }
        }
        cache.editor(&self.key)?.remove_mixin(&mixin)
    }

    // -------------------------------------------------------------------
    // Identity
    // -------------------------------------------------------------------

    /// True if both handles denote the same node of the same workspace of
    /// the same repository.
    pub fn is_same(&self, other: &Node<'_>) -> Result<bool> {
        if !Arc::ptr_eq(self.session.repository(), other.session.repository())
            || self.session.workspace_name() != other.session.workspace_name()
        {
            return Ok(false);
        }
        if self.key == other.key {
            return Ok(true);
        }
        Ok(self.correspondence_id()? == other.correspondence_id()?)
    }

    pub fn correspondence_id(&self) -> Result<CorrespondenceId> {
        self.session.ensure_live()?;
        correspondence_of(&mut self.session.cache(), &self.key)
    }

    /// Path of the node corresponding to this one in `workspace`.
    pub fn corresponding_node_path(&self, workspace: &str) -> Result<Path> {
        self.session.ensure_live()?;
        if !self.session.repository().has_workspace(workspace)? {
            return Err(RepositoryError::NoSuchWorkspace(workspace.to_string()));
        }
        let id = self.correspondence_id()?;
        let own_root = self.session.cache().root_key();
        let missing = || {
            RepositoryError::ItemNotFound(format!(
                "no node corresponds to {} in workspace {}",
                id, workspace
            ))
        };
        let guard = lock_store(self.session.repository().store());
        let anchor = if id.referenceable == own_root {
            Path::root()
        } else {
            match guard.path_of(workspace, &id.referenceable) {
                Ok(path) => path,
                Err(StorageError::NodeNotFound { .. }) => return Err(missing()),
                Err(e) => return Err(e.into()),
            }
        };
        let path = anchor.resolve(&id.relative)?;
        match guard.find_by_path(workspace, &path)? {
            Some(_) => Ok(path),
            None => Err(missing()),
        }
    }

    /// Properties, saved or pending, holding a strong reference to this node.
    pub fn references(&self) -> Result<Vec<Property<'s>>> {
        self.session.ensure_live()?;
        let rows = lock_store(self.session.repository().store()).query(
            self.session.workspace_name(),
            &Query::referrers_of([self.key]).strong_only().build(),
        )?;
        let mut cache = self.session.cache();
        let mut out: Vec<(NodeKey, Name)> = Vec::new();
        for row in rows {
            let Some(name) = row.property else { continue };
            if !cache.is_visible(&row.node)? {
                continue;
            }
            let still_refers = cache
                .node(&row.node)?
                .property(name.as_str())
                .map(|p| p.strong_references().any(|k| k == self.key))
                .unwrap_or(false);
            if still_refers && !out.contains(&(row.node, name.clone())) {
                out.push((row.node, name));
            }
        }
        Ok(out
            .into_iter()
            .map(|(node, name)| Property::new(self.session, node, name))
            .collect())
    }

    // -------------------------------------------------------------------
    // State
    // -------------------------------------------------------------------

    pub fn is_new(&self) -> Result<bool> {
        self.session.ensure_live()?;
        Ok(self.session.cache().is_new(&self.key))
    }

    pub fn is_modified(&self) -> Result<bool> {
        self.session.ensure_live()?;
        Ok(self.session.cache().is_modified(&self.key))
    }

    pub fn is_checked_out(&self) -> Result<bool> {
        self.session.ensure_live()?;
        self.session.cache().is_checked_out(&self.key)
    }

    /// Discards pending changes to this node only: its properties, mixins
    /// and child list go back to their saved state. Pending edits of its
    /// descendants are kept.
    pub fn refresh(&self) -> Result<()> {
        self.session.ensure_live()?;
        self.session.cache().refresh_node(&self.key)
    }
}

impl fmt::Debug for Node<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("key", &self.key)
            .field("workspace", &self.session.workspace_name())
            .finish()
    }
}

/// True if the last segment of `missing` names a property on the node its
/// parent path resolves to. Lookup failures count as `false`.
fn names_property(cache: &mut SessionCache, from: &NodeKey, missing: &Path) -> bool {
    let (Some(owner_path), Some(name)) = (missing.parent(), missing.name()) else {
        return false;
    };
    let Ok(owner) = cache.resolve(from, &owner_path) else {
        return false;
    };
    cache
        .node(&owner)
        .map(|doc| doc.property(name.as_str()).is_some())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RepositoryConfig;
    use crate::repository::Repository;
    use arbor_storage::InMemoryStore;

    fn session() -> Session {
        let repo = Repository::open(RepositoryConfig::default(), InMemoryStore::new()).unwrap();
        repo.login("alice", None).unwrap()
    }

    #[test]
    fn test_add_node_rejects_index() {
        let session = session();
        let root = session.root_node().unwrap();
        assert!(matches!(root.add_node("a[1]"), Err(RepositoryError::InvalidPath(_))));
    }

    #[test]
    fn test_add_node_under_property_is_constraint_violation() {
        let session = session();
        let root = session.root_node().unwrap();
        let a = root.add_node("a").unwrap();
        a.set_property("p", "value").unwrap();
        assert!(matches!(
            root.add_node("a/p/child"),
            Err(RepositoryError::ConstraintViolation(_))
        ));
        assert!(matches!(
            root.add_node("a/missing/child"),
            Err(RepositoryError::PathNotFound(_))
        ));
    }

    #[test]
    fn test_correspondence_id_of_non_referenceable_node() {
        let session = session();
        let root = session.root_node().unwrap();
        let a = root.add_node("a").unwrap();
        a.add_mixin("mix:referenceable").unwrap();
        let c = a.add_node("b").unwrap().add_node("c").unwrap();
        let id = c.correspondence_id().unwrap();
        assert_eq!(id.referenceable, a.key());
        assert_eq!(id.relative.to_string(), "b/c");
        assert_eq!(id, c.correspondence_id().unwrap());
        assert_eq!(id.to_string(), format!("{}/b/c", a.key()));
    }

    #[test]
    fn test_is_same() {
        let session = session();
        let root = session.root_node().unwrap();
        let a = root.add_node("a").unwrap();
        let b = root.add_node("b").unwrap();
        assert!(a.is_same(&a).unwrap());
        assert!(a.is_same(&session.node("/a").unwrap()).unwrap());
        assert!(!a.is_same(&b).unwrap());
    }

    #[test]
    fn test_nodes_matching_pattern() {
        let session = session();
        let root = session.root_node().unwrap();
        for name in ["foo", "foobar", "bar", "baz"] {
            root.add_node(name).unwrap();
        }
        let names: Vec<String> = root
            .nodes_matching("foo*|bar")
            .unwrap()
            .iter()
            .map(|n| n.name().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["foo", "foobar", "bar"]);
        assert!(matches!(
            root.nodes_matching("a/b"),
            Err(RepositoryError::InvalidNamePattern { .. })
        ));
    }

    #[test]
    fn test_order_before() {
        let session = session();
        let root = session.root_node().unwrap();
        for name in ["a", "b", "c"] {
            root.add_node(name).unwrap();
        }
        root.order_before("c", Some("a")).unwrap();
        let names: Vec<String> = root
            .nodes()
            .unwrap()
            .iter()
            .map(|n| n.name().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_root_cannot_be_removed() {
        let session = session();
        assert!(matches!(
            session.root_node().unwrap().remove(),
            Err(RepositoryError::ConstraintViolation(_))
        ));
    }

    #[test]
    fn test_references_reflect_saved_referrers() {
        let session = session();
        let root = session.root_node().unwrap();
        let target = root.add_node("target").unwrap();
        target.add_mixin("mix:referenceable").unwrap();
        let source = root.add_node("source").unwrap();
        source.set_property("link", target.key()).unwrap();
        session.save().unwrap();
        let refs = target.references().unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].path().unwrap().to_string(), "/source/link");
    }
}
