//! Control metadata rendering: the RFC-822-style control block and the
//! maintainer scripts generated from recipe scriptlets.

use crate::recipe::{BuildRecipe, Package, Recipe};

/// Renders the control file. Key order is fixed; dependency lists keep
/// declaration order and are omitted when empty.
pub fn render_control(recipe: &Recipe, variant: &BuildRecipe, package: &Package) -> String {
    let mut out = String::new();
    field(&mut out, "Package", &package.name);
    field(&mut out, "Description", &package.description);
    if !recipe.url.is_empty() {
        field(&mut out, "Homepage", &recipe.url);
    }
    field(&mut out, "Version", &package.version.to_string());
    field(&mut out, "Section", &package.section);
    field(&mut out, "Maintainer", &recipe.maintainer);
    field(&mut out, "License", &recipe.license);
    field(&mut out, "Architecture", &variant.arch);
    list_field(&mut out, "Depends", &package.installdepends);
    list_field(&mut out, "Conflicts", &package.conflicts);
    list_field(&mut out, "Replaces", &package.replaces);
    field(&mut out, "Source", &recipe.name);
    out
}

fn field(out: &mut String, key: &str, value: &str) {
    out.push_str(key);
    out.push_str(": ");
    out.push_str(value);
    out.push('\n');
}

fn list_field(out: &mut String, key: &str, values: &[String]) {
    if !values.is_empty() {
        field(out, key, &values.join(", "));
    }
}

/// Body of the `./conffiles` member: one path per line.
pub fn render_conffiles(package: &Package) -> String {
    let mut out = String::new();
    for path in &package.conffiles {
        out.push_str(path);
        out.push('\n');
    }
    out
}

/// Maintainer scripts derived from the declared scriptlets, in the member
/// order they take inside `control.tar.gz`. Each script defines the backing
/// recipe functions verbatim and dispatches on the package manager's
/// argument convention.
pub fn maintainer_scripts(package: &Package) -> Vec<(&'static str, String)> {
    let s = &package.scriptlets;
    let mut scripts = Vec::new();

    if s.preinstall.is_some() || s.preupgrade.is_some() {
        let mut arms = Vec::new();
        if s.preinstall.is_some() {
            arms.push(("install)", vec!["preinstall".to_owned()]));
        }
        if s.preupgrade.is_some() {
            arms.push(("upgrade)", vec!["preupgrade \"$2\"".to_owned()]));
        }
        scripts.push((
            "preinst",
            render_script(
                package,
                &[("preinstall", &s.preinstall), ("preupgrade", &s.preupgrade)],
                &arms,
            ),
        ));
    }

    if s.postinstall.is_some() || s.postupgrade.is_some() || s.configure.is_some() {
        let mut body = Vec::new();
        match (&s.postinstall, &s.postupgrade) {
            (Some(_), Some(_)) => {
                body.push("if [ -n \"${2:-}\" ]; then".to_owned());
                body.push("    postupgrade \"$2\"".to_owned());
                body.push("else".to_owned());
                body.push("    postinstall".to_owned());
                body.push("fi".to_owned());
            }
            (Some(_), None) => body.push("postinstall".to_owned()),
            (None, Some(_)) => {
                body.push("if [ -n \"${2:-}\" ]; then postupgrade \"$2\"; fi".to_owned())
            }
            (None, None) => {}
        }
        if s.configure.is_some() {
            body.push("configure".to_owned());
        }
        scripts.push((
            "postinst",
            render_script(
                package,
                &[
                    ("configure", &s.configure),
                    ("postinstall", &s.postinstall),
                    ("postupgrade", &s.postupgrade),
                ],
                &[("configure)", body)],
            ),
        ));
    }

    if s.preremove.is_some() {
        scripts.push((
            "prerm",
            render_script(
                package,
                &[("preremove", &s.preremove)],
                &[("remove)", vec!["preremove".to_owned()])],
            ),
        ));
    }

    if s.postremove.is_some() {
        scripts.push((
            "postrm",
            render_script(
                package,
                &[("postremove", &s.postremove)],
                &[("remove)", vec!["postremove".to_owned()])],
            ),
        ));
    }

    scripts
}

fn render_script(
    package: &Package,
    functions: &[(&str, &Option<String>)],
    arms: &[(&str, Vec<String>)],
) -> String {
    let mut lines = vec![
        "#!/bin/sh".to_owned(),
        "set -e".to_owned(),
        format!("pkgname={}", package.name),
        format!("pkgver={}", package.version),
    ];

    for (name, body) in functions {
        if let Some(body) = body {
            lines.push(format!("{name}() {{"));
            lines.push(body.clone());
            lines.push("}".to_owned());
        }
    }

    lines.push("case \"$1\" in".to_owned());
    for (pattern, body) in arms {
        lines.push(format!("{pattern}"));
        for line in body {
            lines.push(format!("    {line}"));
        }
        lines.push("    ;;".to_owned());
    }
    lines.push("esac".to_owned());
    lines.push("exit 0".to_owned());
    lines.push(String::new());

    lines.join("\n")
}
