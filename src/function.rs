//! Callable model for trackable functions
//!
//! A [`Function`] is a named callable declared by a module. A
//! [`Namespace`] is an owning context (a class, a module object) holding
//! functions in named slots; callers that go through the namespace see
//! whatever currently occupies the slot, which is how a wrapper becomes
//! visible without the calling code changing.

use crate::sync::{read, write};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// Shared callable behind a [`Function`]
pub type Callable = Arc<dyn Fn(&CallArgs) -> anyhow::Result<Value> + Send + Sync>;

static NEXT_FUNCTION_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_NAMESPACE_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a function instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FunctionId(u64);

impl FunctionId {
    fn next() -> Self {
        Self(NEXT_FUNCTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

/// Identity of a namespace instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NamespaceId(u64);

impl NamespaceId {
    fn next() -> Self {
        Self(NEXT_NAMESPACE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Positional and keyword arguments of a call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallArgs {
    pub args: Vec<Value>,
    pub kwargs: Map<String, Value>,
}

impl CallArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn positional<I, T>(args: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Value>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
            kwargs: Map::new(),
        }
    }

    pub fn with_arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    pub fn with_kwarg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(key.into(), value.into());
        self
    }

    pub fn arg(&self, index: usize) -> Option<&Value> {
        self.args.get(index)
    }

    pub fn kwarg(&self, key: &str) -> Option<&Value> {
        self.kwargs.get(key)
    }
}

/// Named callable declared by a module
#[derive(Clone)]
pub struct Function {
    id: FunctionId,
    name: Arc<str>,
    module: Arc<str>,
    callable: Callable,
}

impl Function {
    pub fn new<F>(module: &str, name: &str, f: F) -> Self
    where
        F: Fn(&CallArgs) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self {
            id: FunctionId::next(),
            name: Arc::from(name),
            module: Arc::from(module),
            callable: Arc::new(f),
        }
    }

    /// New function with the same name and module but another body
    pub(crate) fn derive<F>(&self, f: F) -> Self
    where
        F: Fn(&CallArgs) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self {
            id: FunctionId::next(),
            name: Arc::clone(&self.name),
            module: Arc::clone(&self.module),
            callable: Arc::new(f),
        }
    }

    pub fn id(&self) -> FunctionId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Module that declared the function
    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn call(&self, args: &CallArgs) -> anyhow::Result<Value> {
        (self.callable)(args)
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function")
            .field("id", &self.id)
            .field("module", &self.module)
            .field("name", &self.name)
            .finish()
    }
}

/// Owning context that holds functions in named slots
pub struct Namespace {
    id: NamespaceId,
    path: String,
    slots: RwLock<HashMap<String, Function>>,
}

impl Namespace {
    pub fn new(path: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            id: NamespaceId::next(),
            path: path.into(),
            slots: RwLock::new(HashMap::new()),
        })
    }

    pub fn id(&self) -> NamespaceId {
        self.id
    }

    /// Qualified path of the namespace (e.g. `sklearn.tree.DecisionTreeClassifier`)
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Place a function in the slot named after it
    pub fn define(&self, function: Function) -> Option<Function> {
        write(&self.slots).insert(function.name().to_string(), function)
    }

    pub fn get(&self, name: &str) -> Option<Function> {
        read(&self.slots).get(name).cloned()
    }

    pub fn defines(&self, name: &str) -> bool {
        read(&self.slots).contains_key(name)
    }

    /// Call whatever currently occupies the slot `name`
    pub fn call(&self, name: &str, args: &CallArgs) -> anyhow::Result<Value> {
        let function = self
            .get(name)
            .ok_or_else(|| anyhow::anyhow!("{} has no function '{}'", self.path, name))?;
        function.call(args)
    }

    pub(crate) fn replace(&self, name: &str, function: Function) -> Option<Function> {
        write(&self.slots).insert(name.to_string(), function)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = read(&self.slots).keys().cloned().collect();
        names.sort();
        names
    }
}

impl fmt::Debug for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Namespace")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("slots", &self.names())
            .finish()
    }
}
