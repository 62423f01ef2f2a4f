//! Ordered extension points between pipeline stages.
//!
//! External collaborators observe or transform pipeline state without
//! the core depending on them. Plugin references from config are
//! resolved at daemon construction against a [`PluginSet`] of
//! programmatically registered factories; an unresolved reference is
//! fatal at startup.

use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::error::IngestError;
use crate::models::{Event, RawRecord, Session};

/// Mutable state threaded through the pipeline stages for one source's
/// batch. `derived` carries collaborator-owned artifacts the core never
/// interprets.
#[derive(Debug, Default)]
pub struct PipelineContext {
    pub records: Vec<RawRecord>,
    pub events: Vec<Event>,
    pub sessions: Vec<Session>,
    pub derived: Map<String, Value>,
}

pub type HookFn = Box<dyn Fn(PipelineContext) -> PipelineContext + Send + Sync>;

/// Ordered callbacks per pipeline stage.
#[derive(Default)]
pub struct HookRegistry {
    pub pre_normalize: Vec<HookFn>,
    pub post_normalize: Vec<HookFn>,
    pub post_sessionize: Vec<HookFn>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn run(hooks: &[HookFn], mut ctx: PipelineContext) -> PipelineContext {
        for hook in hooks {
            ctx = hook(ctx);
        }
        ctx
    }
}

/// A factory that installs callbacks on a registry.
pub type PluginFn = Box<dyn Fn(&mut HookRegistry) + Send + Sync>;

/// Named plugin factories, registered by the embedding application
/// before the daemon is built. The daemon never discovers plugins on
/// its own.
#[derive(Default)]
pub struct PluginSet {
    factories: HashMap<String, PluginFn>,
}

impl PluginSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under a `registry_key:entry` style reference.
    pub fn register(&mut self, reference: &str, factory: PluginFn) {
        self.factories.insert(reference.to_string(), factory);
    }

    /// Resolve config plugin references and install their callbacks.
    pub fn load(&self, references: &[String], registry: &mut HookRegistry) -> Result<(), IngestError> {
        for reference in references {
            let (module, symbol) = reference.split_once(':').ok_or_else(|| {
                IngestError::PluginResolution(format!(
                    "invalid plugin '{reference}': expected format registry_key:entry"
                ))
            })?;
            if module.is_empty() || symbol.is_empty() {
                return Err(IngestError::PluginResolution(format!(
                    "invalid plugin '{reference}': expected format registry_key:entry"
                )));
            }
            let factory = self.factories.get(reference).ok_or_else(|| {
                IngestError::PluginResolution(format!("plugin not found: {reference}"))
            })?;
            factory(registry);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hooks_run_in_registration_order() {
        let mut registry = HookRegistry::new();
        registry.post_normalize.push(Box::new(|mut ctx| {
            ctx.derived
                .insert("order".to_string(), Value::String("first".to_string()));
            ctx
        }));
        registry.post_normalize.push(Box::new(|mut ctx| {
            ctx.derived
                .insert("order".to_string(), Value::String("second".to_string()));
            ctx
        }));

        let ctx = HookRegistry::run(&registry.post_normalize, PipelineContext::default());
        assert_eq!(
            ctx.derived.get("order").unwrap().as_str().unwrap(),
            "second"
        );
    }

    #[test]
    fn plugin_set_resolves_registered_references() {
        let mut plugins = PluginSet::new();
        plugins.register(
            "audit:install",
            Box::new(|registry: &mut HookRegistry| {
                registry.pre_normalize.push(Box::new(|ctx| ctx));
            }),
        );

        let mut registry = HookRegistry::new();
        plugins
            .load(&["audit:install".to_string()], &mut registry)
            .unwrap();
        assert_eq!(registry.pre_normalize.len(), 1);
    }

    #[test]
    fn unknown_plugin_reference_is_fatal() {
        let plugins = PluginSet::new();
        let mut registry = HookRegistry::new();
        let err = plugins
            .load(&["ghost:install".to_string()], &mut registry)
            .unwrap_err();
        assert!(matches!(err, IngestError::PluginResolution(_)));
    }

    #[test]
    fn malformed_reference_is_rejected() {
        let plugins = PluginSet::new();
        let mut registry = HookRegistry::new();
        for bad in ["no-colon", ":entry", "module:"] {
            let err = plugins
                .load(&[bad.to_string()], &mut registry)
                .unwrap_err();
            assert!(matches!(err, IngestError::PluginResolution(_)));
        }
    }
}
