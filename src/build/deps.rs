//! Install commands for `makedepends`. Build-host dependencies go through
//! the image's system package manager, target-host dependencies through the
//! target's package manager available inside the build image.

use crate::recipe::{partition, Dependency};

/// Shell snippet installing every make dependency, or `None` when the list
/// is empty. Names keep their declaration order.
pub fn install_script(makedepends: &[Dependency]) -> Option<String> {
    let (build, host) = partition(makedepends);
    if build.is_empty() && host.is_empty() {
        return None;
    }

    let mut lines = vec!["set -euo pipefail".to_owned()];
    if !build.is_empty() {
        lines.push("export DEBIAN_FRONTEND=noninteractive".to_owned());
        lines.push("apt-get update -qq".to_owned());
        lines.push(format!(
            "apt-get install -qq --no-install-recommends {}",
            build.join(" ")
        ));
    }
    if !host.is_empty() {
        lines.push("opkg update".to_owned());
        lines.push(format!("opkg install {}", host.join(" ")));
    }
    lines.push(String::new());

    Some(lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn no_deps_no_script() {
        assert_eq!(install_script(&[]), None);
    }

    #[test]
    fn splits_managers() {
        let deps: Vec<_> = ["make", "host:zlib", "gcc"]
            .iter()
            .map(|d| Dependency::parse(d))
            .collect();
        let script = install_script(&deps).unwrap();

        assert!(script.contains("apt-get install -qq --no-install-recommends make gcc"));
        assert!(script.contains("opkg install zlib"));
    }
}
