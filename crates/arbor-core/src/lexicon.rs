//! Well-known item and node type names.

// Properties
pub const JCR_PRIMARY_TYPE: &str = "jcr:primaryType";
pub const JCR_MIXIN_TYPES: &str = "jcr:mixinTypes";
pub const JCR_UUID: &str = "jcr:uuid";
pub const JCR_CREATED: &str = "jcr:created";
pub const JCR_CREATED_BY: &str = "jcr:createdBy";
pub const JCR_LAST_MODIFIED: &str = "jcr:lastModified";
pub const JCR_LAST_MODIFIED_BY: &str = "jcr:lastModifiedBy";
pub const JCR_TITLE: &str = "jcr:title";
pub const JCR_DESCRIPTION: &str = "jcr:description";
pub const JCR_DATA: &str = "jcr:data";
pub const JCR_MIMETYPE: &str = "jcr:mimeType";
pub const JCR_ENCODING: &str = "jcr:encoding";
pub const JCR_CONTENT: &str = "jcr:content";

// Versioning
pub const JCR_IS_CHECKED_OUT: &str = "jcr:isCheckedOut";
pub const JCR_VERSION_HISTORY: &str = "jcr:versionHistory";
pub const JCR_BASE_VERSION: &str = "jcr:baseVersion";
pub const JCR_PREDECESSORS: &str = "jcr:predecessors";
pub const JCR_SUCCESSORS: &str = "jcr:successors";
pub const JCR_MERGE_FAILED: &str = "jcr:mergeFailed";
pub const JCR_ROOT_VERSION: &str = "jcr:rootVersion";
pub const JCR_VERSION_LABELS: &str = "jcr:versionLabels";
pub const JCR_VERSIONABLE_UUID: &str = "jcr:versionableUuid";
pub const JCR_FROZEN_NODE: &str = "jcr:frozenNode";
pub const JCR_FROZEN_PRIMARY_TYPE: &str = "jcr:frozenPrimaryType";
pub const JCR_FROZEN_MIXIN_TYPES: &str = "jcr:frozenMixinTypes";
pub const JCR_FROZEN_UUID: &str = "jcr:frozenUuid";
pub const JCR_CHILD_VERSION_HISTORY: &str = "jcr:childVersionHistory";
pub const JCR_SYSTEM: &str = "jcr:system";
pub const JCR_VERSION_STORAGE: &str = "jcr:versionStorage";

// Locking
pub const JCR_LOCK_OWNER: &str = "jcr:lockOwner";
pub const JCR_LOCK_IS_DEEP: &str = "jcr:lockIsDeep";

// Node types
pub const NT_BASE: &str = "nt:base";
pub const NT_UNSTRUCTURED: &str = "nt:unstructured";
pub const NT_HIERARCHY_NODE: &str = "nt:hierarchyNode";
pub const NT_FOLDER: &str = "nt:folder";
pub const NT_FILE: &str = "nt:file";
pub const NT_RESOURCE: &str = "nt:resource";
pub const NT_VERSION_HISTORY: &str = "nt:versionHistory";
pub const NT_VERSION: &str = "nt:version";
pub const NT_FROZEN_NODE: &str = "nt:frozenNode";
pub const NT_VERSIONED_CHILD: &str = "nt:versionedChild";
pub const NT_VERSION_LABELS: &str = "nt:versionLabels";
pub const MIX_REFERENCEABLE: &str = "mix:referenceable";
pub const MIX_SIMPLE_VERSIONABLE: &str = "mix:simpleVersionable";
pub const MIX_VERSIONABLE: &str = "mix:versionable";
pub const MIX_LOCKABLE: &str = "mix:lockable";
pub const MIX_CREATED: &str = "mix:created";
pub const MIX_LAST_MODIFIED: &str = "mix:lastModified";
pub const MIX_TITLE: &str = "mix:title";
pub const ARBOR_ROOT: &str = "arbor:root";
pub const ARBOR_SYSTEM: &str = "arbor:system";
pub const ARBOR_VERSION_STORAGE: &str = "arbor:versionStorage";
pub const ARBOR_HISTORY_FOLDER: &str = "arbor:versionHistoryFolder";

/// Name of residual (catch-all) item definitions.
pub const RESIDUAL: &str = "*";
