//! Extension modules observing and steering the pipeline. Modules are
//! registered up front and receive the six events in registration order;
//! loading a module from a path (dynamic libraries, embedded interpreters)
//! is the entry point's concern.

use std::path::Path;

use crate::build::BuildControl;
use crate::recipe::Recipe;
use crate::{Error, Result};

/// One extension module. Every handler defaults to a no-op; a handler error
/// aborts the pipeline. `post_parse` is the only point where the recipe may
/// be mutated; afterwards the model is read-only.
pub trait Hooks: Send + Sync {
    /// Stable name used in diagnostics when a handler fails.
    fn name(&self) -> &str;

    fn post_parse(&self, _control: &mut BuildControl, _recipe: &mut Recipe) -> anyhow::Result<()> {
        Ok(())
    }

    fn post_fetch_sources(
        &self,
        _control: &mut BuildControl,
        _recipe: &Recipe,
        _src_dir: &Path,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    fn post_prepare(
        &self,
        _control: &mut BuildControl,
        _recipe: &Recipe,
        _src_dir: &Path,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    fn post_build(
        &self,
        _control: &mut BuildControl,
        _recipe: &Recipe,
        _src_dir: &Path,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    fn post_package(
        &self,
        _control: &mut BuildControl,
        _recipe: &Recipe,
        _src_dir: &Path,
        _pkg_dir: &Path,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    fn post_archive(
        &self,
        _control: &mut BuildControl,
        _recipe: &Recipe,
        _artifact: &Path,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Ordered collection of registered modules. Populated once before any
/// pipeline runs, read-only afterwards.
#[derive(Default)]
pub struct HookRegistry {
    modules: Vec<Box<dyn Hooks>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, module: Box<dyn Hooks>) {
        self.modules.push(module);
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    fn fire<F>(&self, event: &str, mut handler: F) -> Result<()>
    where
        F: FnMut(&dyn Hooks) -> anyhow::Result<()>,
    {
        for module in &self.modules {
            handler(module.as_ref()).map_err(|cause| Error::Hook {
                event: event.to_owned(),
                module: module.name().to_owned(),
                cause,
            })?;
        }
        Ok(())
    }

    pub fn post_parse(&self, control: &mut BuildControl, recipe: &mut Recipe) -> Result<()> {
        self.fire("post_parse", |m| m.post_parse(control, recipe))
    }

    pub fn post_fetch_sources(
        &self,
        control: &mut BuildControl,
        recipe: &Recipe,
        src_dir: &Path,
    ) -> Result<()> {
        self.fire("post_fetch_sources", |m| {
            m.post_fetch_sources(control, recipe, src_dir)
        })
    }

    pub fn post_prepare(
        &self,
        control: &mut BuildControl,
        recipe: &Recipe,
        src_dir: &Path,
    ) -> Result<()> {
        self.fire("post_prepare", |m| m.post_prepare(control, recipe, src_dir))
    }

    pub fn post_build(
        &self,
        control: &mut BuildControl,
        recipe: &Recipe,
        src_dir: &Path,
    ) -> Result<()> {
        self.fire("post_build", |m| m.post_build(control, recipe, src_dir))
    }

    pub fn post_package(
        &self,
        control: &mut BuildControl,
        recipe: &Recipe,
        src_dir: &Path,
        pkg_dir: &Path,
    ) -> Result<()> {
        self.fire("post_package", |m| {
            m.post_package(control, recipe, src_dir, pkg_dir)
        })
    }

    pub fn post_archive(
        &self,
        control: &mut BuildControl,
        recipe: &Recipe,
        artifact: &Path,
    ) -> Result<()> {
        self.fire("post_archive", |m| m.post_archive(control, recipe, artifact))
    }
}
