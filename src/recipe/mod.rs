mod deps;
mod shell;
mod symbols;
mod version;

pub use deps::{partition, Dependency, DependencyKind};
pub use shell::Evaluator;
pub use symbols::{Symbol, SymbolTable};
pub use version::Version;

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::{Error, Result};

/// Name of the recipe script inside a recipe directory.
pub const RECIPE_FILE: &str = "package";

/// Default architecture tag assigned when a recipe declares none.
pub const DEFAULT_ARCH: &str = "rmall";

/// A source checksum: either a pinned SHA-256 digest or the explicit opt-out
/// sentinel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Checksum {
    Skip,
    Sha256(String),
}

impl Checksum {
    pub fn parse(value: &str) -> std::result::Result<Self, String> {
        if value == "SKIP" {
            return Ok(Checksum::Skip);
        }
        if value.len() == 64
            && value
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
        {
            Ok(Checksum::Sha256(value.to_owned()))
        } else {
            Err(format!(
                "checksum `{value}` is neither SKIP nor 64 lowercase hex digits"
            ))
        }
    }
}

/// Parsed, pre-specialization recipe. One `BuildRecipe` variant exists per
/// declared architecture; hooks may mutate the model between parse and
/// fetch, after which it is read-only.
#[derive(Clone, Debug)]
pub struct Recipe {
    pub name: String,
    pub recipe_dir: PathBuf,
    pub timestamp: DateTime<Utc>,
    pub maintainer: String,
    pub url: String,
    pub license: String,
    pub sources: Vec<String>,
    pub checksums: Vec<Checksum>,
    pub noextract: Vec<String>,
    pub archs: Vec<String>,
    pub variants: BTreeMap<String, BuildRecipe>,
}

/// Per-architecture specialization of a recipe. Carries the specialized view
/// of every recipe-level symbol, so the source list of one architecture may
/// differ from another's.
#[derive(Clone, Debug)]
pub struct BuildRecipe {
    pub arch: String,
    pub image: String,
    pub flags: Vec<String>,
    pub makedepends: Vec<Dependency>,
    pub sources: Vec<String>,
    pub checksums: Vec<Checksum>,
    pub noextract: Vec<String>,
    pub prepare: Option<String>,
    pub build: Option<String>,
    pub packages: Vec<Package>,
}

/// One installable output of a build.
#[derive(Clone, Debug)]
pub struct Package {
    pub name: String,
    pub version: Version,
    pub description: String,
    pub section: String,
    pub installdepends: Vec<String>,
    pub conflicts: Vec<String>,
    pub replaces: Vec<String>,
    pub conffiles: Vec<String>,
    pub package: String,
    pub scriptlets: Scriptlets,
}

/// Optional recipe functions that become maintainer scripts in the archive.
#[derive(Clone, Debug, Default)]
pub struct Scriptlets {
    pub configure: Option<String>,
    pub preinstall: Option<String>,
    pub postinstall: Option<String>,
    pub preremove: Option<String>,
    pub postremove: Option<String>,
    pub preupgrade: Option<String>,
    pub postupgrade: Option<String>,
}

impl Recipe {
    /// Loads and validates the recipe in `recipe_dir`, evaluating the script
    /// once for the shared table and once per entry of a split `pkgnames`.
    pub async fn load(recipe_dir: &Path) -> Result<Recipe> {
        let name = recipe_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| Error::recipe_parse("?", "recipe directory has no name"))?;
        let recipe_file = recipe_dir.join(RECIPE_FILE);

        let evaluator = Evaluator::new();
        let table = evaluator.evaluate(&name, &recipe_file, None).await?;
        debug!(recipe = %name, "evaluated recipe script");

        let pkgnames = array_field(&name, &table, "pkgnames")?;
        if pkgnames.is_empty() {
            return Err(Error::recipe_parse(&name, "pkgnames must not be empty"));
        }
        let mut seen = BTreeSet::new();
        for pkgname in &pkgnames {
            if !is_valid_package_name(pkgname) {
                return Err(Error::recipe_parse(
                    &name,
                    format!("invalid package name `{pkgname}`"),
                ));
            }
            if !seen.insert(pkgname.clone()) {
                return Err(Error::recipe_parse(
                    &name,
                    format!("duplicate package name `{pkgname}`"),
                ));
            }
        }

        // Split recipes re-run the evaluator once per package with the
        // package's function invoked after sourcing; the resulting table is
        // the recipe-level one with that package's overrides applied.
        let mut package_tables: Vec<(String, SymbolTable)> = Vec::new();
        if pkgnames.len() == 1 {
            package_tables.push((pkgnames[0].clone(), table.clone()));
        } else {
            for pkgname in &pkgnames {
                if table.function(pkgname).is_none() {
                    return Err(Error::recipe_parse(
                        &name,
                        format!("split package `{pkgname}` has no defining function"),
                    ));
                }
                let pkg_table = evaluator
                    .evaluate(&name, &recipe_file, Some(pkgname))
                    .await?;
                package_tables.push((pkgname.clone(), pkg_table));
            }
        }

        let timestamp = required_scalar(&name, &table, "timestamp")?;
        let timestamp = DateTime::parse_from_rfc3339(&timestamp)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| {
                Error::recipe_parse(&name, format!("invalid timestamp `{timestamp}`: {e}"))
            })?;

        let archs = match table.get("archs") {
            None => vec![DEFAULT_ARCH.to_owned()],
            Some(_) => {
                let archs = array_field(&name, &table, "archs")?;
                if archs.is_empty() {
                    return Err(Error::recipe_parse(&name, "archs must not be empty"));
                }
                archs
            }
        };

        let sources = array_field(&name, &table, "source")?;
        let checksums = checksum_field(&name, &table, &sources)?;

        let mut variants = BTreeMap::new();
        for arch in &archs {
            let specialized = specialize(&name, &table, arch, &archs)?;
            let mut packages = Vec::new();
            for (pkgname, pkg_table) in &package_tables {
                let pkg_specialized = specialize(&name, pkg_table, arch, &archs)?;
                packages.push(Package::from_symbols(&name, pkgname, &pkg_specialized)?);
            }
            let variant = BuildRecipe::from_symbols(&name, arch, &specialized, packages)?;
            variants.insert(arch.clone(), variant);
        }

        Ok(Recipe {
            maintainer: required_scalar(&name, &table, "maintainer")?,
            url: scalar_field(&name, &table, "url")?.unwrap_or_default(),
            license: required_scalar(&name, &table, "license")?,
            noextract: array_field(&name, &table, "noextract")?,
            sources,
            checksums,
            archs,
            variants,
            timestamp,
            recipe_dir: recipe_dir.to_path_buf(),
            name,
        })
    }
}

impl BuildRecipe {
    fn from_symbols(
        recipe: &str,
        arch: &str,
        table: &SymbolTable,
        packages: Vec<Package>,
    ) -> Result<BuildRecipe> {
        let prepare = function_field(recipe, table, "prepare")?;
        let build = function_field(recipe, table, "build")?;

        let sources = array_field(recipe, table, "source")?;
        let checksums = checksum_field(recipe, table, &sources)?;

        Ok(BuildRecipe {
            arch: arch.to_owned(),
            image: scalar_field(recipe, table, "image")?.unwrap_or_default(),
            flags: array_field(recipe, table, "flags")?,
            makedepends: array_field(recipe, table, "makedepends")?
                .iter()
                .map(|d| Dependency::parse(d))
                .collect(),
            noextract: array_field(recipe, table, "noextract")?,
            sources,
            checksums,
            prepare,
            build,
            packages,
        })
    }
}

impl Package {
    fn from_symbols(recipe: &str, pkgname: &str, table: &SymbolTable) -> Result<Package> {
        let version = required_scalar(recipe, table, "pkgver")?;
        let version = Version::parse(&version)
            .map_err(|reason| Error::recipe_parse(recipe, format!("package `{pkgname}`: {reason}")))?;

        let package = function_field(recipe, table, "package")?.ok_or_else(|| {
            Error::recipe_parse(
                recipe,
                format!("package `{pkgname}` has no package() function"),
            )
        })?;

        Ok(Package {
            name: pkgname.to_owned(),
            description: required_scalar(recipe, table, "pkgdesc")?,
            section: required_scalar(recipe, table, "section")?,
            installdepends: array_field(recipe, table, "installdepends")?,
            conflicts: array_field(recipe, table, "conflicts")?,
            replaces: array_field(recipe, table, "replaces")?,
            conffiles: array_field(recipe, table, "conffiles")?,
            scriptlets: Scriptlets {
                configure: function_field(recipe, table, "configure")?,
                preinstall: function_field(recipe, table, "preinstall")?,
                postinstall: function_field(recipe, table, "postinstall")?,
                preremove: function_field(recipe, table, "preremove")?,
                postremove: function_field(recipe, table, "postremove")?,
                preupgrade: function_field(recipe, table, "preupgrade")?,
                postupgrade: function_field(recipe, table, "postupgrade")?,
            },
            version,
            package,
        })
    }
}

/// Folds architecture-suffixed symbols into the base table for one arch.
/// `<base>_<arch>` replaces a scalar or function base and appends to an
/// array base; suffixes naming another declared arch are discarded. The fold
/// visits symbols in lexical name order, the order the dump carries.
fn specialize(
    recipe: &str,
    table: &SymbolTable,
    arch: &str,
    archs: &[String],
) -> Result<SymbolTable> {
    let mut out = SymbolTable::default();

    for (name, symbol) in table.iter() {
        match arch_suffix(name, archs) {
            Some(_) => {}
            None => out.insert(name.clone(), symbol.clone()),
        }
    }

    for (name, symbol) in table.iter() {
        let Some((base, suffix)) = arch_suffix(name, archs) else {
            continue;
        };
        if suffix != arch {
            continue;
        }

        let existing = out.get(base).cloned();
        match (existing, symbol) {
            (Some(Symbol::Assoc(_)), _) | (_, Symbol::Assoc(_)) => {
                return Err(Error::recipe_parse(
                    recipe,
                    format!("`{name}`: associative arrays have no specialization rule"),
                ));
            }
            (Some(Symbol::Array(mut merged)), Symbol::Array(suffixed)) => {
                merged.extend(suffixed.iter().cloned());
                out.insert(base.to_owned(), Symbol::Array(merged));
            }
            (Some(Symbol::Array(_)), other) => {
                return Err(Error::recipe_parse(
                    recipe,
                    format!("`{name}` is a {} but `{base}` is an array", other.kind()),
                ));
            }
            (Some(other), Symbol::Array(_)) => {
                return Err(Error::recipe_parse(
                    recipe,
                    format!("`{name}` is an array but `{base}` is a {}", other.kind()),
                ));
            }
            (_, symbol) => out.insert(base.to_owned(), symbol.clone()),
        }
    }

    Ok(out)
}

/// If `name` carries an `_<arch>` suffix for a declared arch, returns the
/// base name and the suffix.
fn arch_suffix<'a>(name: &'a str, archs: &[String]) -> Option<(&'a str, &'a str)> {
    let (base, suffix) = name.rsplit_once('_')?;
    if !base.is_empty() && archs.iter().any(|a| a == suffix) {
        Some((base, suffix))
    } else {
        None
    }
}

pub fn is_valid_package_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some('a'..='z'))
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

fn scalar_field(recipe: &str, table: &SymbolTable, name: &str) -> Result<Option<String>> {
    match table.get(name) {
        None => Ok(None),
        Some(Symbol::Scalar(value)) => Ok(Some(value.clone())),
        Some(other) => Err(Error::recipe_parse(
            recipe,
            format!("field `{name}` must be a scalar, found {}", other.kind()),
        )),
    }
}

fn required_scalar(recipe: &str, table: &SymbolTable, name: &str) -> Result<String> {
    scalar_field(recipe, table, name)?
        .ok_or_else(|| Error::recipe_parse(recipe, format!("missing required field `{name}`")))
}

fn array_field(recipe: &str, table: &SymbolTable, name: &str) -> Result<Vec<String>> {
    match table.get(name) {
        None => Ok(Vec::new()),
        Some(Symbol::Array(values)) => Ok(values.clone()),
        Some(other) => Err(Error::recipe_parse(
            recipe,
            format!("field `{name}` must be an array, found {}", other.kind()),
        )),
    }
}

fn function_field(recipe: &str, table: &SymbolTable, name: &str) -> Result<Option<String>> {
    match table.get(name) {
        None => Ok(None),
        Some(Symbol::Function(body)) => Ok(Some(body.clone())),
        Some(other) => Err(Error::recipe_parse(
            recipe,
            format!("field `{name}` must be a function, found {}", other.kind()),
        )),
    }
}

/// Reads and validates `sha256sums` against the source list: same length,
/// every entry SKIP or a lowercase SHA-256 digest.
fn checksum_field(
    recipe: &str,
    table: &SymbolTable,
    sources: &[String],
) -> Result<Vec<Checksum>> {
    let raw = array_field(recipe, table, "sha256sums")?;
    if raw.len() != sources.len() {
        return Err(Error::recipe_parse(
            recipe,
            format!(
                "source has {} entries but sha256sums has {}",
                sources.len(),
                raw.len()
            ),
        ));
    }
    raw.iter()
        .map(|value| {
            Checksum::parse(value).map_err(|reason| Error::recipe_parse(recipe, reason))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;

    const MINIMAL: &str = r#"
pkgnames=(foo)
timestamp=2023-06-01T12:00:00Z
maintainer="Jane Doe <jane@example.org>"
license=MIT
url=https://example.org/foo
pkgdesc="A test package"
pkgver=0.0.1-1
section=utils
archs=(rmall)
image=base:v1
source=(foo.c)
sha256sums=(SKIP)
build() {
    cp foo.c foo
}
package() {
    install -D -m 755 "$srcdir"/foo "$pkgdir"/opt/bin/foo
}
"#;

    async fn load(content: &str) -> Result<Recipe> {
        let dir = tempfile::tempdir().unwrap();
        let recipe_dir = dir.path().join("foo");
        fs::create_dir(&recipe_dir).unwrap();
        fs::write(recipe_dir.join(RECIPE_FILE), content).unwrap();
        Recipe::load(&recipe_dir).await
    }

    #[tokio::test]
    async fn parses_minimal_recipe() {
        let recipe = load(MINIMAL).await.unwrap();

        assert_eq!(recipe.name, "foo");
        assert_eq!(recipe.maintainer, "Jane Doe <jane@example.org>");
        assert_eq!(recipe.license, "MIT");
        assert_eq!(recipe.timestamp.timestamp(), 1685620800);
        assert_eq!(recipe.archs, ["rmall"]);
        assert_eq!(recipe.sources, ["foo.c"]);
        assert_eq!(recipe.checksums, [Checksum::Skip]);

        let variant = &recipe.variants["rmall"];
        assert_eq!(variant.image, "base:v1");
        assert_eq!(variant.packages.len(), 1);

        let pkg = &variant.packages[0];
        assert_eq!(pkg.name, "foo");
        assert_eq!(pkg.version.to_string(), "0.0.1-1");
        assert_eq!(pkg.description, "A test package");
        assert_eq!(pkg.section, "utils");
        assert!(pkg.package.contains("install -D"));
    }

    #[tokio::test]
    async fn specializes_per_arch() {
        let recipe = load(
            r#"
pkgnames=(foo)
timestamp=2023-06-01T12:00:00Z
maintainer=m
license=MIT
pkgdesc=d
pkgver=1.0-1
section=utils
archs=(rm1 rm2)
image=base:v1
image_rm2=base:v2
source=(common.c)
sha256sums=(SKIP)
source_rm2=(extra.c)
sha256sums_rm2=(SKIP)
build() {
    :
}
package() {
    :
}
"#,
        )
        .await
        .unwrap();

        let rm1 = &recipe.variants["rm1"];
        assert_eq!(rm1.image, "base:v1");
        assert_eq!(rm1.sources, ["common.c"]);

        let rm2 = &recipe.variants["rm2"];
        assert_eq!(rm2.image, "base:v2");
        assert_eq!(rm2.sources, ["common.c", "extra.c"]);
        assert_eq!(rm2.checksums, [Checksum::Skip, Checksum::Skip]);
    }

    #[tokio::test]
    async fn splits_packages() {
        let recipe = load(
            r#"
pkgnames=(alpha beta)
timestamp=2023-06-01T12:00:00Z
maintainer=m
license=MIT
pkgver=1.0-1
section=utils
alpha() {
    pkgdesc="first"
    package() {
        touch "$pkgdir"/alpha
    }
}
beta() {
    pkgdesc="second"
    pkgver=2.0-4
    package() {
        touch "$pkgdir"/beta
    }
}
"#,
        )
        .await
        .unwrap();

        let packages = &recipe.variants[DEFAULT_ARCH].packages;
        assert_eq!(packages.len(), 2);
        assert_eq!(packages[0].name, "alpha");
        assert_eq!(packages[0].description, "first");
        assert_eq!(packages[0].version.to_string(), "1.0-1");
        assert_eq!(packages[1].name, "beta");
        assert_eq!(packages[1].description, "second");
        assert_eq!(packages[1].version.to_string(), "2.0-4");
        assert!(packages[1].package.contains("beta"));
    }

    #[tokio::test]
    async fn rejects_checksum_count_mismatch() {
        let err = load(
            r#"
pkgnames=(foo)
timestamp=2023-06-01T12:00:00Z
maintainer=m
license=MIT
pkgdesc=d
pkgver=1.0-1
section=utils
source=(a.c b.c)
sha256sums=(SKIP)
package() {
    :
}
"#,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::RecipeParse { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn rejects_bad_checksum_and_names() {
        for (field, value) in [
            ("sha256sums=(abc)", "source=(a.c)"),
            ("pkgnames=(Foo)", ""),
            ("pkgnames=(foo foo)", ""),
        ] {
            let content = format!(
                r#"
pkgnames=(foo)
timestamp=2023-06-01T12:00:00Z
maintainer=m
license=MIT
pkgdesc=d
pkgver=1.0-1
section=utils
{value}
{field}
package() {{
    :
}}
"#
            );
            assert!(load(&content).await.is_err(), "{field}");
        }
    }

    #[tokio::test]
    async fn rejects_assoc_specialization() {
        let err = load(
            r#"
pkgnames=(foo)
timestamp=2023-06-01T12:00:00Z
maintainer=m
license=MIT
pkgdesc=d
pkgver=1.0-1
section=utils
archs=(rm2)
declare -A extras=([k]=v)
declare -A extras_rm2=([k]=w)
package() {
    :
}
"#,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::RecipeParse { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn missing_required_field_is_named() {
        let err = load(
            r#"
pkgnames=(foo)
timestamp=2023-06-01T12:00:00Z
license=MIT
pkgdesc=d
pkgver=1.0-1
section=utils
package() {
    :
}
"#,
        )
        .await
        .unwrap_err();
        match err {
            Error::RecipeParse { reason, .. } => assert!(reason.contains("maintainer"), "{reason}"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn checksum_alphabet() {
        assert_eq!(Checksum::parse("SKIP"), Ok(Checksum::Skip));
        let digest = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";
        assert_eq!(
            Checksum::parse(digest),
            Ok(Checksum::Sha256(digest.to_owned()))
        );
        for bad in ["skip", "abc", &digest.to_uppercase(), &digest[..63]] {
            assert!(Checksum::parse(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn package_name_alphabet() {
        assert!(is_valid_package_name("foo"));
        assert!(is_valid_package_name("foo-bar2"));
        assert!(!is_valid_package_name("Foo"));
        assert!(!is_valid_package_name("2foo"));
        assert!(!is_valid_package_name("-foo"));
        assert!(!is_valid_package_name(""));
    }
}
