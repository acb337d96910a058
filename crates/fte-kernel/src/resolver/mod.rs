//! Resolver
//!
//! Walks a fact's dependency closure with an explicit frame stack. Each frame
//! moves through [`ResolutionState`]: a cache hit finishes a frame at once;
//! otherwise its context is validated, its dependencies are resolved in
//! declared order (each on its own frame), and its logic is executed and
//! committed through the instance cache.

pub mod state;

use fte_context::{Context, Fingerprint, Normalizer, Value};
use fte_logic::{evaluate_expression, parse_expression, NoPrimitives};
use regex::{Captures, Regex};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{debug, error, info};

use crate::cache::{CacheOutcome, InstanceCache};
use crate::error::EngineError;
use crate::journal::{Journal, Record};
use crate::registry::{Registry, VersionHandle};
use crate::sandbox::Sandbox;
use crate::types::{FactId, FactInstance, InstanceKey, Provenance, VersionKey};
pub use state::{allowed_transitions, validate_transition, ResolutionState, StateError};

/// Result of a successful resolution
#[derive(Debug, Clone)]
pub struct Resolution {
    pub instance: Arc<FactInstance>,
    /// How the root instance was obtained
    pub outcome: CacheOutcome,
}

impl Resolution {
    #[must_use]
    pub fn value(&self) -> &Value {
        &self.instance.value
    }

    #[must_use]
    pub fn version(&self) -> &VersionKey {
        &self.instance.version
    }

    #[must_use]
    pub fn fingerprint(&self) -> Fingerprint {
        self.instance.fingerprint
    }

    #[must_use]
    pub fn provenance(&self) -> Provenance {
        self.instance.provenance()
    }
}

struct Frame {
    fact: FactId,
    handle: VersionHandle,
    context: Context,
    key: InstanceKey,
    state: ResolutionState,
    next_dep: usize,
    deps: Vec<Arc<FactInstance>>,
}

enum Opened {
    Hit(Arc<FactInstance>),
    Frame(Box<Frame>),
}

/// Borrowed view of the engine parts a resolution needs
pub(crate) struct Resolver<'e> {
    pub(crate) registry: &'e Registry,
    pub(crate) cache: &'e InstanceCache,
    pub(crate) sandbox: &'e Sandbox,
    pub(crate) journal: &'e Journal,
    pub(crate) normalizer: &'e Normalizer,
    pub(crate) default_timeout: Duration,
    pub(crate) max_depth: usize,
}

fn advance(fact: &FactId, state: &mut ResolutionState, to: ResolutionState) {
    match validate_transition(*state, to) {
        Ok(()) => debug!(fact = %fact, from = %state, to = %to, "state transition"),
        Err(e) => error!(fact = %fact, error = %e, "resolver state machine violated"),
    }
    *state = to;
}

impl Resolver<'_> {
    #[tracing::instrument(skip_all, fields(fact = %fact))]
    pub(crate) async fn resolve(
        &self,
        fact: &FactId,
        context: Context,
    ) -> Result<Resolution, EngineError> {
        let result = self.walk(fact, context).await;
        match &result {
            Ok(resolution) => info!(
                version = %resolution.instance.version,
                outcome = resolution.outcome.as_str(),
                "resolved"
            ),
            Err(e) => {
                debug!(error = %e, "resolution failed");
                self.journal.append(Record {
                    fact: fact.clone(),
                    version: self.registry.active_version_number(fact),
                    fingerprint: None,
                    outcome: e.kind().to_string(),
                    detail: Some(e.to_string()),
                });
            }
        }
        result
    }

    async fn walk(&self, root: &FactId, context: Context) -> Result<Resolution, EngineError> {
        let frame = match self.open(root, context).await? {
            Opened::Hit(instance) => {
                return Ok(Resolution {
                    instance,
                    outcome: CacheOutcome::Hit,
                })
            }
            Opened::Frame(frame) => frame,
        };
        let mut on_stack: HashSet<FactId> = HashSet::from([root.clone()]);
        let mut stack: Vec<Box<Frame>> = vec![frame];

        let outcome = self.drive(&mut stack, &mut on_stack).await;
        if outcome.is_err() {
            for frame in &mut stack {
                advance(&frame.fact, &mut frame.state, ResolutionState::Error);
            }
        }
        outcome
    }

    async fn drive(
        &self,
        stack: &mut Vec<Box<Frame>>,
        on_stack: &mut HashSet<FactId>,
    ) -> Result<Resolution, EngineError> {
        loop {
            let Some(top) = stack.last_mut() else {
                return Err(EngineError::Isolation("resolution stack emptied early".into()));
            };
            let version = Arc::clone(&top.handle.version);
            if let Some(spec) = version.dependencies.get(top.next_dep) {
                top.next_dep += 1;
                let sub_context = derive_context(&top.context, &spec.with);
                if on_stack.contains(&spec.fact) {
                    let at = stack.iter().position(|f| f.fact == spec.fact).unwrap_or(0);
                    let mut path: Vec<FactId> = stack[at..].iter().map(|f| f.fact.clone()).collect();
                    path.push(spec.fact.clone());
                    return Err(EngineError::cycle(path));
                }
                if stack.len() >= self.max_depth {
                    return Err(EngineError::ResolutionDepthExceeded {
                        limit: self.max_depth,
                    });
                }
                match self.open(&spec.fact, sub_context).await? {
                    Opened::Hit(instance) => {
                        if let Some(top) = stack.last_mut() {
                            top.deps.push(instance);
                        }
                    }
                    Opened::Frame(frame) => {
                        on_stack.insert(frame.fact.clone());
                        stack.push(frame);
                    }
                }
                continue;
            }

            let Some(mut frame) = stack.pop() else {
                continue;
            };
            on_stack.remove(&frame.fact);
            let (instance, outcome) = match self.complete(&mut frame).await {
                Ok(done) => done,
                Err(e) => {
                    advance(&frame.fact, &mut frame.state, ResolutionState::Error);
                    return Err(e);
                }
            };
            match stack.last_mut() {
                Some(parent) => parent.deps.push(instance),
                None => return Ok(Resolution { instance, outcome }),
            }
        }
    }

    /// Look up, fingerprint, check the cache and validate
    async fn open(&self, fact: &FactId, context: Context) -> Result<Opened, EngineError> {
        let mut state = ResolutionState::Pending;
        let (handle, lineage) = self.registry.active_with_lineage(fact)?;
        let fingerprint = self.normalizer.fingerprint(&context)?;
        let key = InstanceKey::new(handle.version.key(), fingerprint, lineage);

        if let Some(instance) = self.cache.get(&key).await {
            advance(fact, &mut state, ResolutionState::Done);
            self.record(&key, CacheOutcome::Hit);
            return Ok(Opened::Hit(instance));
        }

        advance(fact, &mut state, ResolutionState::Validating);
        if let Err(e) = handle.schema.validate(&context) {
            advance(fact, &mut state, ResolutionState::Error);
            return Err(e);
        }
        advance(fact, &mut state, ResolutionState::ResolvingDependencies);

        Ok(Opened::Frame(Box::new(Frame {
            fact: fact.clone(),
            handle,
            context,
            key,
            state,
            next_dep: 0,
            deps: Vec::new(),
        })))
    }

    /// Execute a frame whose dependencies are resolved and commit the result
    async fn complete(
        &self,
        frame: &mut Frame,
    ) -> Result<(Arc<FactInstance>, CacheOutcome), EngineError> {
        advance(&frame.fact, &mut frame.state, ResolutionState::Executing);
        let version = Arc::clone(&frame.handle.version);
        let key = frame.key.clone();
        let inputs = self.inputs(frame).await?;
        let timeout = version
            .timeout_ms
            .map_or(self.default_timeout, Duration::from_millis);
        let deps = std::mem::take(&mut frame.deps);
        let instance_key = key.clone();

        let (instance, outcome) = self
            .cache
            .get_or_compute(&key, || async move {
                let value = self
                    .sandbox
                    .execute(&version.fact, &version.logic_kind, &version.logic, inputs, timeout)
                    .await?;
                Ok::<_, EngineError>(FactInstance::new(instance_key, value, deps))
            })
            .await?;

        advance(&frame.fact, &mut frame.state, ResolutionState::Cached);
        advance(&frame.fact, &mut frame.state, ResolutionState::Done);
        self.record(&key, outcome);
        Ok((instance, outcome))
    }

    /// Context fields, dependency values under their aliases, bindings, and
    /// the `ctx` and `deps` mappings
    async fn inputs(&self, frame: &Frame) -> Result<BTreeMap<String, Value>, EngineError> {
        let version = &frame.handle.version;
        let mut inputs = frame.context.fields().clone();
        let mut deps = BTreeMap::new();
        for (spec, instance) in version.dependencies.iter().zip(&frame.deps) {
            inputs.insert(spec.fact.alias(), instance.value.clone());
            deps.insert(spec.fact.to_string(), instance.value.clone());
        }
        let limits = self.sandbox.limits();
        for binding in &version.bindings {
            let mut args = Vec::with_capacity(binding.args.len());
            for source in &binding.args {
                let expr = parse_expression(source)
                    .map_err(|e| EngineError::execution_failed(&frame.fact, e))?;
                let arg = evaluate_expression(
                    &expr,
                    frame.context.fields(),
                    limits,
                    &mut NoPrimitives,
                    None,
                )
                .map_err(|e| EngineError::execution_failed(&frame.fact, e))?;
                args.push(arg);
            }
            debug!(fact = %frame.fact, binding = %binding.name, primitive = %binding.primitive, "fetching binding");
            let value = self
                .sandbox
                .store()
                .call(&binding.primitive, args)
                .await
                .map_err(|e| EngineError::execution_failed(&frame.fact, e))?;
            inputs.insert(binding.name.clone(), value);
        }
        inputs.insert("ctx".to_string(), frame.context.to_value());
        inputs.insert("deps".to_string(), Value::Map(deps));
        Ok(inputs)
    }

    fn record(&self, key: &InstanceKey, outcome: CacheOutcome) {
        self.journal.append(Record {
            fact: key.version.fact.clone(),
            version: Some(key.version.version),
            fingerprint: Some(key.fingerprint),
            outcome: outcome.as_str().to_string(),
            detail: None,
        });
    }
}

fn placeholder() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{\s*([A-Za-z0-9_.]+)\s*\}\}").ok())
        .as_ref()
}

/// Sub-context for one dependency
///
/// An empty mapping passes the parent through; otherwise the mapped keys are
/// overlaid on the parent.
#[must_use]
pub fn derive_context(parent: &Context, with: &BTreeMap<String, serde_json::Value>) -> Context {
    if with.is_empty() {
        return parent.clone();
    }
    let overlay = with
        .iter()
        .map(|(key, template)| (key.clone(), render(parent, template)))
        .collect();
    parent.overlaid(overlay)
}

fn render(parent: &Context, template: &serde_json::Value) -> Value {
    let Some(text) = template.as_str() else {
        return Value::from_json(template);
    };
    let Some(re) = placeholder() else {
        return Value::Text(text.to_string());
    };
    if let Some(caps) = re.captures(text.trim()) {
        if caps.get(0).is_some_and(|m| m.as_str() == text.trim()) {
            return parent.get_path(&caps[1]).cloned().unwrap_or(Value::Null);
        }
    }
    if !re.is_match(text) {
        return Value::Text(text.to_string());
    }
    let rendered = re.replace_all(text, |caps: &Captures<'_>| match parent.get_path(&caps[1]) {
        None | Some(Value::Null) => String::new(),
        Some(Value::Text(s)) => s.clone(),
        Some(other) => other.to_string(),
    });
    Value::Text(rendered.into_owned())
}
