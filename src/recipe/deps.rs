use std::fmt::{self, Display, Formatter};

/// Where a build-time dependency gets installed: the build container itself,
/// or the cross sysroot of the target device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DependencyKind {
    Build,
    Host,
}

/// One `makedepends` entry. A `host:` prefix marks a target-host dependency
/// installed with the target package manager; a `build:` prefix (or none)
/// marks a build-host dependency installed with the image's package manager.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Dependency {
    pub kind: DependencyKind,
    pub name: String,
}

impl Dependency {
    pub fn parse(entry: &str) -> Self {
        if let Some(name) = entry.strip_prefix("host:") {
            Dependency {
                kind: DependencyKind::Host,
                name: name.to_owned(),
            }
        } else {
            Dependency {
                kind: DependencyKind::Build,
                name: entry.strip_prefix("build:").unwrap_or(entry).to_owned(),
            }
        }
    }
}

impl Display for Dependency {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.kind {
            DependencyKind::Build => write!(f, "build:{}", self.name),
            DependencyKind::Host => write!(f, "host:{}", self.name),
        }
    }
}

/// Splits a dependency list into build-host and target-host names, both in
/// declaration order.
pub fn partition(deps: &[Dependency]) -> (Vec<&str>, Vec<&str>) {
    let mut build = Vec::new();
    let mut host = Vec::new();
    for dep in deps {
        match dep.kind {
            DependencyKind::Build => build.push(dep.name.as_str()),
            DependencyKind::Host => host.push(dep.name.as_str()),
        }
    }
    (build, host)
}
