//! Environment frames: a string-keyed binding table plus a shared link to the
//! enclosing frame.
//!
//! `Environment` is a handle; cloning it with `Clone` yields another handle to the
//! same frame. [`Environment::clone_frame`] is the shallow copy used to hand a
//! procedure call its own bindings while still sharing the lexical parent.

use crate::Error;
use crate::ast::Expr;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

struct Frame {
    bindings: HashMap<String, Expr>,
    parent: Option<Environment>,
}

/// Handle to one scope frame in a chain
#[derive(Clone)]
pub struct Environment(Arc<RwLock<Frame>>);

impl Environment {
    pub fn new() -> Self {
        Self::from_frame(Frame {
            bindings: HashMap::new(),
            parent: None,
        })
    }

    pub fn with_parent(parent: Environment) -> Self {
        Self::from_frame(Frame {
            bindings: HashMap::new(),
            parent: Some(parent),
        })
    }

    fn from_frame(frame: Frame) -> Self {
        Environment(Arc::new(RwLock::new(frame)))
    }

    fn read(&self) -> RwLockReadGuard<'_, Frame> {
        self.0.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Frame> {
        self.0.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether both handles point at the same frame
    pub fn same_frame(&self, other: &Environment) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn parent(&self) -> Option<Environment> {
        self.read().parent.clone()
    }

    /// Search this frame, then the parent chain
    pub fn get(&self, name: &str) -> Option<Expr> {
        let mut env = self.clone();
        loop {
            let parent = {
                let frame = env.read();
                if let Some(value) = frame.bindings.get(name) {
                    return Some(value.clone());
                }
                frame.parent.clone()
            };
            env = parent?;
        }
    }

    /// Like [`Environment::get`], but an unbound name yields the not-found sentinel
    pub fn lookup(&self, name: &str) -> Expr {
        self.get(name).unwrap_or_else(Expr::not_found)
    }

    /// Bind `name` in this frame unless it is already bound here.
    /// Bindings in parent frames may be shadowed.
    pub fn define(&self, name: impl Into<String>, value: Expr) -> bool {
        let mut frame = self.write();
        match frame.bindings.entry(name.into()) {
            std::collections::hash_map::Entry::Occupied(_) => false,
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(value);
                true
            }
        }
    }

    /// Rebind `name` in the innermost frame that already holds it.
    /// Returns false when the name is bound nowhere in the chain.
    pub fn set(&self, name: &str, value: Expr) -> bool {
        let mut env = self.clone();
        loop {
            let parent = {
                let mut frame = env.write();
                if let Some(slot) = frame.bindings.get_mut(name) {
                    *slot = value;
                    return true;
                }
                frame.parent.clone()
            };
            match parent {
                Some(parent) => env = parent,
                None => return false,
            }
        }
    }

    /// New child frame binding each parameter symbol to the argument at the same
    /// position. A parameter list consisting of a single Null means "no parameters".
    pub fn extend(&self, params: &[Expr], args: &[Expr]) -> Result<Environment, Error> {
        let params: &[Expr] = match params {
            [only] if only.is_null() => &[],
            _ => params,
        };
        if params.len() != args.len() {
            return Err(Error::arity_error(params.len(), args.len()));
        }

        let child = Environment::with_parent(self.clone());
        {
            let mut frame = child.write();
            for (param, arg) in params.iter().zip(args) {
                let Some(name) = param.as_symbol() else {
                    return Err(Error::TypeError(format!(
                        "Parameter must be a symbol, got {}",
                        param.type_name()
                    )));
                };
                frame.bindings.insert(name.to_owned(), arg.clone());
            }
        }
        Ok(child)
    }

    /// Shallow copy: the local bindings are copied, the parent is shared
    pub fn clone_frame(&self) -> Environment {
        let frame = self.read();
        Self::from_frame(Frame {
            bindings: frame.bindings.clone(),
            parent: frame.parent.clone(),
        })
    }

    /// Names bound directly in this frame, sorted
    pub fn local_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.read().bindings.keys().cloned().collect();
        names.sort();
        names
    }

    /// Get all bindings in this environment and its parents
    /// Returns a Vec of (name, value) pairs sorted by name
    pub fn get_all_bindings(&self) -> Vec<(String, Expr)> {
        let mut bindings = HashMap::new();

        // Start with parent bindings (so they can be overridden by local bindings)
        if let Some(parent) = self.parent() {
            for (name, value) in parent.get_all_bindings() {
                bindings.insert(name, value);
            }
        }

        for (name, value) in &self.read().bindings {
            bindings.insert(name.clone(), value.clone());
        }

        let mut result: Vec<_> = bindings.into_iter().collect();
        result.sort_by(|a, b| a.0.cmp(&b.0));
        result
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let frame = self.read();
        write!(
            f,
            "Environment({} bindings, parent: {})",
            frame.bindings.len(),
            frame.parent.is_some()
        )
    }
}
