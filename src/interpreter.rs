//! The interpreter context a host program drives.
//!
//! An [`Interpreter`] owns the id source, the output port, the configuration,
//! the global environment and the [`Forest`] of loaded trees. Reading and
//! evaluation take `&self`, so one interpreter can be shared between threads;
//! editing the forest takes `&mut self`.

use crate::Error;
use crate::ast::{Expr, IdGen, SENTINEL_UID, Uid};
use crate::builtinops::{BuiltinOp, PrimitiveTable};
use crate::config::Config;
use crate::editor::Forest;
use crate::evaluator::{self, Environment, EvalContext};
use crate::port::{Port, StdoutPort};
use crate::scheme;
use std::sync::Arc;

pub struct Interpreter {
    ids: Arc<IdGen>,
    port: Arc<dyn Port>,
    config: Config,
    global: Environment,
    forest: Forest,
}

impl Interpreter {
    /// Standard primitives, default configuration, output on stdout
    pub fn new() -> Self {
        Self::with_port(Arc::new(StdoutPort))
    }

    pub fn with_port(port: Arc<dyn Port>) -> Self {
        Self::with_config(port, Config::default())
    }

    pub fn with_config(port: Arc<dyn Port>, config: Config) -> Self {
        Self::with_primitives(port, config, &PrimitiveTable::standard())
    }

    /// Seed the global environment from a custom primitive table
    pub fn with_primitives(port: Arc<dyn Port>, config: Config, table: &PrimitiveTable) -> Self {
        let ids = Arc::new(IdGen::new());
        let global = Environment::new();
        table.install(&global, &ids);
        Interpreter {
            forest: Forest::new(Arc::clone(&ids)),
            ids,
            port,
            config,
            global,
        }
    }

    /// Bind a host primitive in the global environment, replacing any binding
    /// of the same name
    pub fn register_primitive(&self, op: BuiltinOp) {
        let name = op.name.clone();
        let value = Expr::primitive(&self.ids, Arc::new(op));
        if !self.global.define(name.clone(), value.clone()) {
            self.global.set(&name, value);
        }
        tracing::debug!(name = %name, "registered primitive");
    }

    pub fn global(&self) -> &Environment {
        &self.global
    }

    pub fn ids(&self) -> &Arc<IdGen> {
        &self.ids
    }

    pub fn port(&self) -> &Arc<dyn Port> {
        &self.port
    }

    pub fn config(&self) -> Config {
        self.config
    }

    fn context(&self) -> EvalContext<'_> {
        EvalContext::new(&self.ids, self.port.as_ref(), self.config.eval)
    }

    fn report(&self, err: &Error, id: Uid) {
        tracing::warn!(id, %err, "interpreter error");
        self.port.write_error(&err.to_string(), id);
    }

    //
    // Reading
    //

    pub fn try_read_one(&self, text: &str) -> Result<Expr, Error> {
        scheme::try_read_one_with_config(text, &self.ids, self.config.parse)
    }

    pub fn try_read_all(&self, text: &str) -> Result<Vec<Expr>, Error> {
        scheme::try_read_all_with_config(text, &self.ids, self.config.parse)
    }

    /// Read one expression. A failure is reported and gives the not-found sentinel.
    pub fn read_one(&self, text: &str) -> Expr {
        self.try_read_one(text).unwrap_or_else(|err| {
            self.report(&err, SENTINEL_UID);
            Expr::not_found()
        })
    }

    /// Read every expression. A failure is reported and gives nothing.
    pub fn read_all(&self, text: &str) -> Vec<Expr> {
        self.try_read_all(text).unwrap_or_else(|err| {
            self.report(&err, SENTINEL_UID);
            Vec::new()
        })
    }

    //
    // Evaluation
    //

    /// Evaluate in the global environment; every error ends up as `null`
    pub fn evaluate(&self, expr: &Expr) -> Expr {
        evaluator::evaluate(expr, &self.global, &self.context())
    }

    pub fn try_evaluate(&self, expr: &Expr) -> Result<Expr, Error> {
        evaluator::try_evaluate(expr, &self.global, &self.context())
    }

    /// Read and evaluate every expression in `text`, returning the last value
    /// (`null` for empty input). Stops at the first fatal error.
    pub fn eval_str(&self, text: &str) -> Result<Expr, Error> {
        let mut last = Expr::null(&self.ids);
        for expr in self.try_read_all(text)? {
            last = self.try_evaluate(&expr)?;
        }
        Ok(last)
    }

    //
    // Loaded trees
    //

    /// Read `text` into the forest without evaluating it, returning the root ids
    pub fn load(&mut self, text: &str) -> Result<Vec<Uid>, Error> {
        let exprs = self.try_read_all(text)?;
        Ok(exprs.iter().map(|expr| self.forest.add_tree(expr)).collect())
    }

    /// Evaluate the current state of a loaded node
    pub fn eval_by_id(&self, id: Uid) -> Result<Expr, Error> {
        let (_, target) = self.forest.find_by_id(id);
        let target = target.ok_or_else(|| Error::EditError(format!("No node with id {id}")))?;
        Ok(self.evaluate(&target))
    }

    /// Evaluate every loaded tree in order
    pub fn run(&self) -> Vec<Expr> {
        self.forest
            .trees()
            .iter()
            .map(|tree| self.evaluate(tree))
            .collect()
    }

    pub fn forest(&self) -> &Forest {
        &self.forest
    }

    pub fn trees(&self) -> Vec<Expr> {
        self.forest.trees()
    }

    /// The node with `id` and the cell holding it
    pub fn find_by_id(&self, id: Uid) -> (Option<Expr>, Option<Expr>) {
        self.forest.find_by_id(id)
    }

    pub fn remove_by_id(&mut self, id: Uid) -> Option<Expr> {
        self.forest.remove_by_id(id)
    }

    pub fn insert_after_id(&mut self, id: Uid, after: Uid) -> Result<(), Error> {
        self.forest.insert_after_id(id, after)
    }

    /// Replace the node with `id` by the expression read from `text`
    pub fn overwrite_by_id(&mut self, id: Uid, text: &str) -> Result<(), Error> {
        let replacement = self.try_read_one(text)?;
        self.forest.overwrite_by_id(id, &replacement)
    }

    /// Pretty-printed source of every loaded tree, one blank line apart
    pub fn export(&self) -> String {
        self.forest
            .trees()
            .iter()
            .map(|tree| tree.pretty("  "))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}
