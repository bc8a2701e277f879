//! The build pipeline: a sequential state machine driving one recipe
//! through parse, fetch, prepare, build, package and archive, with hook
//! dispatch between phases. A failure aborts the current architecture;
//! work directories are left behind for postmortem.

pub mod deps;
pub mod scripts;

pub use scripts::{CONTAINER_PKG_DIR, CONTAINER_SRC_DIR};

use std::fmt::{self, Display, Formatter};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{info, info_span, warn, Instrument};

use crate::hook::HookRegistry;
use crate::recipe::{BuildRecipe, Package, Recipe};
use crate::runtime::{ExecOpts, Executor};
use crate::source::{self, Fetch};
use crate::{timestamp, Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Parse,
    Fetch,
    Prepare,
    Build,
    Package,
    Archive,
}

impl Phase {
    fn function_name(self) -> &'static str {
        match self {
            Phase::Prepare => "prepare",
            Phase::Build => "build",
            Phase::Package => "package",
            Phase::Parse | Phase::Fetch | Phase::Archive => "",
        }
    }
}

impl Display for Phase {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Parse => "parse",
            Phase::Fetch => "fetch",
            Phase::Prepare => "prepare",
            Phase::Build => "build",
            Phase::Package => "package",
            Phase::Archive => "archive",
        };
        f.write_str(name)
    }
}

/// Capability handed to hooks. Deliberately narrow: hooks steer later
/// phases through it instead of reaching into pipeline internals.
#[derive(Debug, Default)]
pub struct BuildControl {
    image: Option<String>,
    cleanups: Vec<PathBuf>,
}

impl BuildControl {
    /// Replaces the container image used by the remaining phases.
    pub fn override_image(&mut self, image: impl Into<String>) {
        self.image = Some(image.into());
    }

    pub fn image_override(&self) -> Option<&str> {
        self.image.as_deref()
    }

    /// Schedules a path for removal once the pipeline reaches DONE.
    pub fn schedule_cleanup(&mut self, path: impl Into<PathBuf>) {
        self.cleanups.push(path.into());
    }

    fn take_cleanups(&mut self) -> Vec<PathBuf> {
        std::mem::take(&mut self.cleanups)
    }
}

/// Groups the capabilities and directories needed to build recipes. One
/// builder is created per run by the entry point and drives one recipe at a
/// time.
pub struct Builder {
    executor: Arc<dyn Executor>,
    fetcher: Arc<dyn Fetch>,
    hooks: HookRegistry,
    work_dir: PathBuf,
    dist_dir: PathBuf,
    default_image: String,
    is_running: Arc<AtomicBool>,
}

impl Builder {
    pub fn new(
        executor: Arc<dyn Executor>,
        fetcher: Arc<dyn Fetch>,
        work_dir: impl Into<PathBuf>,
        dist_dir: impl Into<PathBuf>,
    ) -> Self {
        Builder {
            executor,
            fetcher,
            hooks: HookRegistry::new(),
            work_dir: work_dir.into(),
            dist_dir: dist_dir.into(),
            default_image: String::new(),
            is_running: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn hooks(mut self, hooks: HookRegistry) -> Self {
        self.hooks = hooks;
        self
    }

    /// Image used when a recipe declares none of its own.
    pub fn default_image(mut self, image: impl Into<String>) -> Self {
        self.default_image = image.into();
        self
    }

    /// Shares the cancellation flag; clearing it stops the pipeline at the
    /// next phase boundary and kills any running executor script.
    pub fn cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.is_running = flag;
        self
    }

    pub fn cancel_token(&self) -> Arc<AtomicBool> {
        self.is_running.clone()
    }

    fn check_canceled(&self) -> Result<()> {
        if self.is_running.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::Canceled)
        }
    }

    /// Builds every architecture variant of the recipe in `recipe_dir` and
    /// returns the emitted ipk paths, in `archs` then `pkgnames` order.
    pub async fn build(&self, recipe_dir: &Path) -> Result<Vec<PathBuf>> {
        self.check_canceled()?;
        let mut recipe = Recipe::load(recipe_dir).await?;
        info!(recipe = %recipe.name, "parsed recipe");

        let mut control = BuildControl::default();
        self.hooks.post_parse(&mut control, &mut recipe)?;

        let mut artifacts = Vec::new();
        for arch in recipe.archs.clone() {
            artifacts.extend(self.build_variant(&recipe, &arch, &mut control).await?);
        }

        for path in control.take_cleanups() {
            let result = if path.is_dir() {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };
            if let Err(e) = result {
                warn!(path = %path.display(), "scheduled cleanup failed: {e}");
            }
        }

        Ok(artifacts)
    }

    /// Drives one architecture variant from FETCH through ARCHIVE.
    pub async fn build_variant(
        &self,
        recipe: &Recipe,
        arch: &str,
        control: &mut BuildControl,
    ) -> Result<Vec<PathBuf>> {
        let span = info_span!("build", recipe = %recipe.name, arch);
        async move {
            self.check_canceled()?;
            let variant = recipe.variants.get(arch).ok_or_else(|| {
                Error::recipe_parse(&recipe.name, format!("unknown architecture `{arch}`"))
            })?;

            let arch_dir = self.work_dir.join(&recipe.name).join(arch);
            let src_dir = arch_dir.join("src");

            info!("fetching sources");
            source::acquire(recipe, variant, self.fetcher.as_ref(), &src_dir).await?;
            self.hooks.post_fetch_sources(control, recipe, &src_dir)?;
            self.check_canceled()?;

            let image = control
                .image_override()
                .or_else(|| (!variant.image.is_empty()).then_some(variant.image.as_str()))
                .unwrap_or(&self.default_image)
                .to_owned();

            if let Some(body) = &variant.prepare {
                info!("running prepare step");
                self.run_function(Phase::Prepare, &image, body, recipe, variant, &src_dir, None)
                    .await?;
            }
            self.hooks.post_prepare(control, recipe, &src_dir)?;
            self.check_canceled()?;

            timestamp::pin_mtimes(&src_dir, recipe.timestamp)?;
            if let Some(body) = &variant.build {
                if let Some(script) = deps::install_script(&variant.makedepends) {
                    info!("installing build dependencies");
                    self.run_raw(Phase::Build, &image, script, recipe, variant, &src_dir, None)
                        .await?;
                }
                info!("running build step");
                self.run_function(Phase::Build, &image, body, recipe, variant, &src_dir, None)
                    .await?;
            }
            self.hooks.post_build(control, recipe, &src_dir)?;

            let out_dir = self.dist_dir.join(arch);
            let mut artifacts = Vec::new();
            for package in &variant.packages {
                self.check_canceled()?;

                let pkg_dir = arch_dir.join("pkg").join(&package.name);
                if pkg_dir.exists() {
                    fs::remove_dir_all(&pkg_dir)?;
                }
                fs::create_dir_all(&pkg_dir)?;

                info!(package = %package.name, "running package step");
                let script = scripts::function_script("package", &package.package);
                let opts = self
                    .exec_opts(&image, script, recipe, variant, Some(package), &src_dir, Some(&pkg_dir));
                let output = self.executor.run(&opts).await?;
                if !output.success() {
                    return Err(Error::BuildScript {
                        phase: Phase::Package.to_string(),
                        status: output.exit_code,
                    });
                }
                self.hooks.post_package(control, recipe, &src_dir, &pkg_dir)?;

                let artifact = crate::archive::write_ipk(recipe, variant, package, &pkg_dir, &out_dir)?;
                info!(artifact = %artifact.display(), "archived package");
                self.hooks.post_archive(control, recipe, &artifact)?;
                artifacts.push(artifact);
            }

            Ok(artifacts)
        }
        .instrument(span)
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_function(
        &self,
        phase: Phase,
        image: &str,
        body: &str,
        recipe: &Recipe,
        variant: &BuildRecipe,
        src_dir: &Path,
        pkg_dir: Option<&Path>,
    ) -> Result<()> {
        let script = scripts::function_script(phase.function_name(), body);
        self.run_raw(phase, image, script, recipe, variant, src_dir, pkg_dir)
            .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_raw(
        &self,
        phase: Phase,
        image: &str,
        script: String,
        recipe: &Recipe,
        variant: &BuildRecipe,
        src_dir: &Path,
        pkg_dir: Option<&Path>,
    ) -> Result<()> {
        let opts = self.exec_opts(image, script, recipe, variant, None, src_dir, pkg_dir);
        let output = self.executor.run(&opts).await?;
        if output.success() {
            Ok(())
        } else {
            Err(Error::BuildScript {
                phase: phase.to_string(),
                status: output.exit_code,
            })
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn exec_opts(
        &self,
        image: &str,
        script: String,
        recipe: &Recipe,
        variant: &BuildRecipe,
        package: Option<&Package>,
        src_dir: &Path,
        pkg_dir: Option<&Path>,
    ) -> ExecOpts {
        let mut opts = ExecOpts::new(image)
            .script(script)
            .env(scripts::phase_env(recipe, variant, package))
            .mount(src_dir, CONTAINER_SRC_DIR);
        match pkg_dir {
            Some(pkg_dir) => {
                opts = opts.mount(pkg_dir, CONTAINER_PKG_DIR).working_dir(CONTAINER_PKG_DIR);
            }
            None => {
                opts = opts.working_dir(CONTAINER_SRC_DIR);
            }
        }
        opts
    }
}
