//! Wrapping policies applied to one operation or to a named set of them.
//!
//! # Responsibilities
//! - Type-erase an async function `A -> Result<T, E>` into a named [`Operation`]
//! - Apply a [`Policy`] (throttle, retry) to a single operation
//! - Apply a policy to every callable member of a [`FunctionSet`], leaving
//!   plain values untouched
//!
//! # Design Decisions
//! - Members of one set share a signature; heterogeneous registries use
//!   several sets or JSON arguments
//! - Wrapped members are renamed `owner.member` for diagnostics only
//! - The adapter holds no state; shared state lives in the policy

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;

type CallFn<A, T, E> = dyn Fn(A) -> BoxFuture<'static, Result<T, E>> + Send + Sync;

/// A named, cloneable async operation.
pub struct Operation<A, T, E> {
    name: Arc<str>,
    call: Arc<CallFn<A, T, E>>,
}

impl<A, T, E> Clone for Operation<A, T, E> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            call: Arc::clone(&self.call),
        }
    }
}

impl<A, T, E> fmt::Debug for Operation<A, T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation").field("name", &self.name).finish()
    }
}

impl<A, T, E> Operation<A, T, E>
where
    A: Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    /// Wrap an async function under a diagnostic name.
    pub fn new<F, Fut>(name: impl Into<Arc<str>>, f: F) -> Self
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        Self {
            name: name.into(),
            call: Arc::new(move |args| f(args).boxed()),
        }
    }

    /// Invoke the operation. The returned future resolves exactly once.
    pub fn call(&self, args: A) -> BoxFuture<'static, Result<T, E>> {
        (self.call)(args)
    }

    /// The same operation under another diagnostic name.
    pub fn renamed(&self, name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            call: Arc::clone(&self.call),
        }
    }
}

impl<A, T, E> Operation<A, T, E> {
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// A wrapping policy that can be applied to any operation.
pub trait Policy {
    /// Return `op` wrapped by this policy, keeping its calling convention and name.
    fn wrap<A, T, E>(&self, op: Operation<A, T, E>) -> Operation<A, T, E>
    where
        A: Clone + Send + Sync + 'static,
        T: Send + 'static,
        E: fmt::Display + Send + 'static;
}

/// A member of a function set.
pub enum Member<A, T, E> {
    /// A callable member; replaced by its wrapped form.
    Call(Operation<A, T, E>),
    /// Any other value; passed through unchanged.
    Value(serde_json::Value),
}

impl<A, T, E> Clone for Member<A, T, E> {
    fn clone(&self) -> Self {
        match self {
            Member::Call(op) => Member::Call(op.clone()),
            Member::Value(v) => Member::Value(v.clone()),
        }
    }
}

impl<A, T, E> fmt::Debug for Member<A, T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Member::Call(op) => f.debug_tuple("Call").field(&op.name()).finish(),
            Member::Value(v) => f.debug_tuple("Value").field(v).finish(),
        }
    }
}

/// A named collection of operations and values owned by one component.
pub struct FunctionSet<A, T, E> {
    owner: String,
    members: BTreeMap<String, Member<A, T, E>>,
}

impl<A, T, E> Clone for FunctionSet<A, T, E> {
    fn clone(&self) -> Self {
        Self {
            owner: self.owner.clone(),
            members: self.members.clone(),
        }
    }
}

impl<A, T, E> fmt::Debug for FunctionSet<A, T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionSet")
            .field("owner", &self.owner)
            .field("members", &self.members)
            .finish()
    }
}

impl<A, T, E> FunctionSet<A, T, E>
where
    A: Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            members: BTreeMap::new(),
        }
    }

    /// Add a callable member named `name`.
    pub fn with_operation<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let name = name.into();
        let op = Operation::new(name.as_str(), f);
        self.members.insert(name, Member::Call(op));
        self
    }

    /// Add a non-callable member.
    pub fn with_value(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.members.insert(name.into(), Member::Value(value));
        self
    }

    /// Same-shaped set with every callable wrapped by `policy`.
    pub fn wrap<P>(&self, policy: &P) -> Self
    where
        P: Policy,
        A: Clone + Sync,
        E: fmt::Display,
    {
        let members = self
            .members
            .iter()
            .map(|(name, member)| {
                let wrapped = match member {
                    Member::Call(op) => {
                        let qualified = format!("{}.{}", self.owner, name);
                        Member::Call(policy.wrap(op.renamed(qualified)))
                    }
                    Member::Value(v) => Member::Value(v.clone()),
                };
                (name.clone(), wrapped)
            })
            .collect();

        Self {
            owner: self.owner.clone(),
            members,
        }
    }
}

impl<A, T, E> FunctionSet<A, T, E> {
    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn get(&self, name: &str) -> Option<&Member<A, T, E>> {
        self.members.get(name)
    }

    /// The callable member `name`, if there is one.
    pub fn operation(&self, name: &str) -> Option<&Operation<A, T, E>> {
        match self.members.get(name) {
            Some(Member::Call(op)) => Some(op),
            _ => None,
        }
    }

    /// The value member `name`, if there is one.
    pub fn value(&self, name: &str) -> Option<&serde_json::Value> {
        match self.members.get(name) {
            Some(Member::Value(v)) => Some(v),
            _ => None,
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.members.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}
