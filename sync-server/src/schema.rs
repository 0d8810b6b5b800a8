//! Per-type schemas and request hooks.
//!
//! A [`TypeSchema`] declares a record type's indexes and attaches hooks
//! that run before and after each method. The [`SchemaRegistry`] is built
//! once at startup and shared read-only by every request.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use sync_types::{ConnectionId, Method, Model, Packet, SyncError};

use crate::config::TypeConfig;

/// What a hook decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flow {
    /// Run the next hook, then the operation.
    Continue,
    /// Stop here; the request fails with [`SyncError::Aborted`].
    Halt(String),
}

/// When a hook runs relative to the operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Before the operation; may rewrite the request.
    Pre,
    /// After the operation; sees its outcome.
    Post,
}

/// What hooks see and may change.
#[derive(Debug, Clone)]
pub struct HookContext {
    /// Connection the request came from, if any.
    pub connection: Option<ConnectionId>,
    /// The request's method.
    pub method: Method,
    /// The request. Pre-hooks may rewrite it.
    pub packet: Packet,
    /// The operation's result; set for post-hooks.
    pub outcome: Option<Model>,
}

/// A step in a method's hook chain.
#[async_trait]
pub trait Hook: Send + Sync {
    /// Inspect or modify the request and decide whether it proceeds.
    async fn call(&self, ctx: &mut HookContext) -> Result<Flow, SyncError>;
}

/// Run hooks in order until one halts or fails.
pub async fn run_chain(hooks: &[Arc<dyn Hook>], ctx: &mut HookContext) -> Result<(), SyncError> {
    for hook in hooks {
        match hook.call(ctx).await? {
            Flow::Continue => {}
            Flow::Halt(reason) => return Err(SyncError::Aborted(reason)),
        }
    }
    Ok(())
}

/// Indexes and hooks of one record type.
#[derive(Clone, Default)]
pub struct TypeSchema {
    name: String,
    index_props: Vec<String>,
    ext_keys: Vec<String>,
    text_props: Vec<String>,
    hooks: HashMap<(Stage, Method), Vec<Arc<dyn Hook>>>,
}

impl std::fmt::Debug for TypeSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeSchema")
            .field("name", &self.name)
            .field("index_props", &self.index_props)
            .field("ext_keys", &self.ext_keys)
            .field("text_props", &self.text_props)
            .field("hooks", &self.hooks.values().map(Vec::len).sum::<usize>())
            .finish()
    }
}

impl TypeSchema {
    /// An empty schema for `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// A schema from a `[types.<name>]` config section.
    pub fn from_config(name: &str, config: &TypeConfig) -> Self {
        Self::new(name)
            .with_index_props(config.index_props.iter().cloned())
            .with_ext_keys(config.ext_keys.iter().cloned())
            .with_text_props(config.text_props.iter().cloned())
    }

    /// Declare sort-indexed properties.
    pub fn with_index_props(mut self, props: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.index_props.extend(props.into_iter().map(Into::into));
        self
    }

    /// Declare external-key properties.
    pub fn with_ext_keys(mut self, keys: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.ext_keys.extend(keys.into_iter().map(Into::into));
        self
    }

    /// Declare properties that sort as text.
    pub fn with_text_props(mut self, props: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.text_props.extend(props.into_iter().map(Into::into));
        self
    }

    /// Append a hook to `method`'s chain at `stage`.
    pub fn hook(mut self, stage: Stage, method: Method, hook: impl Hook + 'static) -> Self {
        self.hooks
            .entry((stage, method))
            .or_default()
            .push(Arc::new(hook));
        self
    }

    /// Type name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared sort-indexed properties.
    pub fn index_props(&self) -> &[String] {
        &self.index_props
    }

    /// Declared external-key properties.
    pub fn ext_keys(&self) -> &[String] {
        &self.ext_keys
    }

    /// Whether `prop` sorts as text.
    pub fn is_text(&self, prop: &str) -> bool {
        self.text_props.iter().any(|p| p == prop)
    }

    /// The hook chain for `method` at `stage`.
    pub fn hooks(&self, stage: Stage, method: Method) -> &[Arc<dyn Hook>] {
        self.hooks
            .get(&(stage, method))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Read-only map from record type to schema.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<String, Arc<TypeSchema>>,
}

impl SchemaRegistry {
    /// Start building a registry.
    pub fn builder() -> SchemaRegistryBuilder {
        SchemaRegistryBuilder::default()
    }

    /// A registry with no schemas.
    pub fn empty() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The schema for `record_type`, if registered.
    pub fn get(&self, record_type: &str) -> Option<&Arc<TypeSchema>> {
        self.schemas.get(record_type)
    }

    /// Registered type names, sorted.
    pub fn types(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.schemas.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Number of registered types.
    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    /// Whether no type is registered.
    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}

/// Collects schemas, then freezes them into a [`SchemaRegistry`].
#[derive(Debug, Default)]
pub struct SchemaRegistryBuilder {
    schemas: HashMap<String, TypeSchema>,
}

impl SchemaRegistryBuilder {
    /// Register a schema, replacing any previous one of the same name.
    pub fn register(mut self, schema: TypeSchema) -> Self {
        self.schemas.insert(schema.name.clone(), schema);
        self
    }

    /// Register a schema for every `[types.<name>]` section.
    pub fn with_config_types(mut self, types: &BTreeMap<String, TypeConfig>) -> Self {
        for (name, config) in types {
            self.schemas
                .insert(name.clone(), TypeSchema::from_config(name, config));
        }
        self
    }

    /// Freeze the registry.
    pub fn build(self) -> Arc<SchemaRegistry> {
        Arc::new(SchemaRegistry {
            schemas: self
                .schemas
                .into_iter()
                .map(|(name, schema)| (name, Arc::new(schema)))
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sync_types::Options;

    struct Tag(&'static str);

    #[async_trait]
    impl Hook for Tag {
        async fn call(&self, ctx: &mut HookContext) -> Result<Flow, SyncError> {
            if let Model::One(record) = &mut ctx.packet.model {
                let trail = record
                    .get("trail")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                record.insert("trail", format!("{trail}{}", self.0));
            }
            Ok(Flow::Continue)
        }
    }

    struct Deny;

    #[async_trait]
    impl Hook for Deny {
        async fn call(&self, _ctx: &mut HookContext) -> Result<Flow, SyncError> {
            Ok(Flow::Halt("read only".into()))
        }
    }

    fn context(method: Method) -> HookContext {
        HookContext {
            connection: None,
            method,
            packet: Packet::new(Default::default(), Options::with_method(method.as_str())),
            outcome: None,
        }
    }

    #[tokio::test]
    async fn hooks_run_in_registration_order() {
        let schema = TypeSchema::new("todo")
            .hook(Stage::Pre, Method::Create, Tag("a"))
            .hook(Stage::Pre, Method::Create, Tag("b"));

        let mut ctx = context(Method::Create);
        run_chain(schema.hooks(Stage::Pre, Method::Create), &mut ctx)
            .await
            .unwrap();

        let record = ctx.packet.model.as_record().unwrap();
        assert_eq!(record.get("trail").unwrap(), "ab");
        assert!(schema.hooks(Stage::Post, Method::Create).is_empty());
        assert!(schema.hooks(Stage::Pre, Method::Update).is_empty());
    }

    #[tokio::test]
    async fn halt_stops_the_chain() {
        let schema = TypeSchema::new("todo")
            .hook(Stage::Pre, Method::Delete, Deny)
            .hook(Stage::Pre, Method::Delete, Tag("never"));

        let mut ctx = context(Method::Delete);
        let err = run_chain(schema.hooks(Stage::Pre, Method::Delete), &mut ctx)
            .await
            .unwrap_err();

        assert_eq!(err, SyncError::Aborted("read only".into()));
        assert!(ctx.packet.model.as_record().unwrap().get("trail").is_none());
    }

    #[test]
    fn registry_from_config() {
        let mut types = BTreeMap::new();
        types.insert(
            "todo".to_string(),
            TypeConfig {
                index_props: vec!["done".into()],
                ext_keys: vec!["owner".into()],
                text_props: vec!["content".into()],
            },
        );

        let registry = SchemaRegistry::builder()
            .with_config_types(&types)
            .register(TypeSchema::new("note"))
            .build();

        assert_eq!(registry.types(), vec!["note", "todo"]);
        let todo = registry.get("todo").unwrap();
        assert_eq!(todo.index_props(), ["done"]);
        assert_eq!(todo.ext_keys(), ["owner"]);
        assert!(todo.is_text("content"));
        assert!(!todo.is_text("done"));
        assert!(registry.get("missing").is_none());
    }
}
