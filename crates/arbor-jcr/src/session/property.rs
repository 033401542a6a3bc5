//! The property façade.

use std::fmt;
use std::sync::Arc;

use arbor_core::{Name, NodeKey, Path, PropertyData, PropertyDefinition, PropertyType, Value};

use crate::error::{RepositoryError, Result};
use crate::session::cache::NodeStatus;
use crate::session::node::Node;
use crate::session::Session;

/// A property as seen through one session. The handle stores only the
/// owning node and the name; values are read from the session on demand.
#[derive(Clone)]
pub struct Property<'s> {
    session: &'s Session,
    node: NodeKey,
    name: Name,
}

impl<'s> Property<'s> {
    pub(crate) fn new(session: &'s Session, node: NodeKey, name: Name) -> Self {
        Property {
            session,
            node,
            name,
        }
    }

    pub fn name(&self) -> &Name {
        &self.name
    }

    pub fn parent(&self) -> Node<'s> {
        Node::new(self.session, self.node)
    }

    pub fn path(&self) -> Result<Path> {
        Ok(self.parent().path()?.child_named(self.name.clone()))
    }

    /// Current state of the property.
    pub fn data(&self) -> Result<PropertyData> {
        self.session.ensure_live()?;
        let mut cache = self.session.cache();
        let doc = cache.node(&self.node)?;
        doc.property(self.name.as_str()).cloned().ok_or_else(|| {
            RepositoryError::ItemNotFound(format!("property {} on node {}", self.name, self.node))
        })
    }

    pub fn is_multiple(&self) -> Result<bool> {
        Ok(self.data()?.multiple)
    }

    pub fn property_type(&self) -> Result<PropertyType> {
        Ok(self.data()?.ty)
    }

    /// The value of a single-valued property.
    pub fn value(&self) -> Result<Value> {
        let data = self.data()?;
        if data.multiple {
            return Err(RepositoryError::ValueFormat(format!(
                "property {} is multi-valued",
                self.name
            )));
        }
        data.values.into_iter().next().ok_or_else(|| {
            RepositoryError::ValueFormat(format!("property {} has no value", self.name))
        })
    }

    pub fn values(&self) -> Result<Vec<Value>> {
        let data = self.data()?;
        if !data.multiple {
            return Err(RepositoryError::ValueFormat(format!(
                "property {} is single-valued",
                self.name
            )));
        }
        Ok(data.values)
    }

    pub fn string(&self) -> Result<String> {
        match self.value()?.convert(PropertyType::String)? {
            Value::String(s) => Ok(s),
            other => Err(RepositoryError::ValueFormat(format!(
                "cannot read {:?} as a string",
                other
            ))),
        }
    }

    pub fn long(&self) -> Result<i64> {
        let value = self.value()?.convert(PropertyType::Long)?;
        value
            .as_long()
            .ok_or_else(|| RepositoryError::ValueFormat(format!("cannot read {:?} as a long", value)))
    }

    pub fn boolean(&self) -> Result<bool> {
        let value = self.value()?.convert(PropertyType::Boolean)?;
        value
            .as_bool()
            .ok_or_else(|| RepositoryError::ValueFormat(format!("cannot read {:?} as a boolean", value)))
    }

    /// Milliseconds since the epoch.
    pub fn date(&self) -> Result<i64> {
        match self.value()?.convert(PropertyType::Date)? {
            Value::Date(millis) => Ok(millis),
            other => Err(RepositoryError::ValueFormat(format!(
                "cannot read {:?} as a date",
                other
            ))),
        }
    }

    /// The node a reference or path property points at.
    pub fn node(&self) -> Result<Node<'s>> {
        match self.value()? {
            Value::Reference(key) | Value::WeakReference(key) => {
                self.session.node_by_identifier(&key.to_string())
            }
            Value::Path(path) => {
                if path.is_absolute() {
                    self.session.node(&path.to_string())
                } else {
                    self.parent().node(&path.to_string())
                }
            }
            other => Err(RepositoryError::ValueFormat(format!(
                "property {} holds {:?}, not a reference",
                self.name, other
            ))),
        }
    }

    /// Replaces the value of a single-valued property.
    pub fn set_value(&self, value: impl Into<Value>) -> Result<()> {
        self.parent()
            .write_property(self.name.as_str(), vec![value.into()], None, false)?;
        Ok(())
    }

    pub fn set_values(&self, values: Vec<Value>) -> Result<()> {
        self.parent()
            .write_property(self.name.as_str(), values, None, true)?;
        Ok(())
    }

    pub fn remove(&self) -> Result<()> {
        self.session.ensure_live()?;
        let mut cache = self.session.cache();
        self.session.check_lock_with(&mut cache, &self.node)?;
        let removed = cache.editor(&self.node)?.remove_property(&self.name)?;
        if !removed {
            return Err(RepositoryError::ItemNotFound(format!(
                "property {} on node {}",
                self.name, self.node
            )));
        }
        Ok(())
    }

    pub fn definition(&self) -> Result<Option<PropertyDefinition>> {
        let data = self.data()?;
        self.session.cache().property_definition(&self.node, &data)
    }

    pub fn is_same(&self, other: &Property<'_>) -> Result<bool> {
        Ok(self.name == other.name
            && Arc::ptr_eq(self.session.repository(), other.session.repository())
            && self.parent().is_same(&other.parent())?)
    }

    pub fn is_new(&self) -> Result<bool> {
        self.session.ensure_live()?;
        Ok(self.session.cache().property_status(&self.node, self.name.as_str()) == NodeStatus::New)
    }

    pub fn is_modified(&self) -> Result<bool> {
        self.session.ensure_live()?;
        Ok(self.session.cache().property_status(&self.node, self.name.as_str())
            == NodeStatus::Changed)
    }
}

impl fmt::Debug for Property<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Property")
            .field("node", &self.node)
            .field("name", &self.name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::config::RepositoryConfig;
    use crate::error::RepositoryError;
    use crate::repository::Repository;
    use arbor_core::{PropertyType, Value};
    use arbor_storage::InMemoryStore;

    #[test]
    fn test_typed_reads() {
        let repo = Repository::open(RepositoryConfig::default(), InMemoryStore::new()).unwrap();
        let session = repo.login("alice", None).unwrap();
        let node = session.root_node().unwrap().add_node("n").unwrap();
        node.set_property("count", 42i64).unwrap();
        node.set_property("flag", true).unwrap();
        node.set_property_as("numeric", "17", PropertyType::Long).unwrap();
        node.set_property_values("tags", vec![Value::from("a"), Value::from("b")])
            .unwrap();

        assert_eq!(node.property("count").unwrap().long().unwrap(), 42);
        assert_eq!(node.property("count").unwrap().string().unwrap(), "42");
        assert!(node.property("flag").unwrap().boolean().unwrap());
        assert_eq!(node.property("numeric").unwrap().property_type().unwrap(), PropertyType::Long);
        let tags = node.property("tags").unwrap();
        assert!(tags.is_multiple().unwrap());
        assert_eq!(tags.values().unwrap().len(), 2);
        assert!(matches!(tags.value(), Err(RepositoryError::ValueFormat(_))));
    }

    #[test]
    fn test_status_follows_save() {
        let repo = Repository::open(RepositoryConfig::default(), InMemoryStore::new()).unwrap();
        let session = repo.login("alice", None).unwrap();
        let node = session.root_node().unwrap().add_node("n").unwrap();
        let title = node.set_property("title", "one").unwrap();
        assert!(title.is_new().unwrap());
        session.save().unwrap();
        assert!(!title.is_new().unwrap());
        assert!(!title.is_modified().unwrap());
        title.set_value("two").unwrap();
        assert!(title.is_modified().unwrap());
        title.remove().unwrap();
        assert!(!node.has_property("title").unwrap());
    }

    #[test]
    fn test_reference_dereference() {
        let repo = Repository::open(RepositoryConfig::default(), InMemoryStore::new()).unwrap();
        let session = repo.login("alice", None).unwrap();
        let root = session.root_node().unwrap();
        let target = root.add_node("target").unwrap();
        target.add_mixin("mix:referenceable").unwrap();
        let link = root.add_node("source").unwrap().set_property("link", target.key()).unwrap();
        assert_eq!(link.node().unwrap().key(), target.key());
    }
}
