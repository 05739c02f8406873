//! Architecture enforcement lint - room components never reference each other.
//!
//! The panel, cloud connector and routing matrix are owned by the orchestrator,
//! and every cross-component effect is decided there. This test parses each
//! component module and flags any `crate::<module>` reference to a sibling
//! component or to the orchestrator.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use syn::visit::Visit;
use syn::{ItemUse, UseTree};

/// (component file, crate modules it must not reference)
const RULES: &[(&str, &[&str])] = &[
    ("panel.rs", &["cloud", "routing", "orchestrator"]),
    ("cloud.rs", &["panel", "routing", "orchestrator"]),
    ("routing.rs", &["panel", "cloud", "orchestrator", "bus"]),
    ("bus/mod.rs", &["panel", "cloud", "routing", "orchestrator"]),
];

/// Collects the first module segment of every `crate::...` path
#[derive(Default)]
struct CrateModuleVisitor {
    modules: BTreeSet<String>,
}

impl CrateModuleVisitor {
    fn collect_use(&mut self, tree: &UseTree, after_crate: bool) {
        match tree {
            UseTree::Path(path) if path.ident == "crate" && !after_crate => {
                self.collect_use(&path.tree, true);
            }
            UseTree::Path(path) if after_crate => {
                self.modules.insert(path.ident.to_string());
            }
            UseTree::Name(name) if after_crate => {
                self.modules.insert(name.ident.to_string());
            }
            UseTree::Rename(rename) if after_crate => {
                self.modules.insert(rename.ident.to_string());
            }
            UseTree::Group(group) => {
                for item in &group.items {
                    self.collect_use(item, after_crate);
                }
            }
            _ => {}
        }
    }
}

impl<'ast> Visit<'ast> for CrateModuleVisitor {
    fn visit_item_use(&mut self, item: &'ast ItemUse) {
        self.collect_use(&item.tree, false);
    }

    fn visit_path(&mut self, path: &'ast syn::Path) {
        let mut segments = path.segments.iter();
        if let (Some(first), Some(second)) = (segments.next(), segments.next()) {
            if first.ident == "crate" {
                self.modules.insert(second.ident.to_string());
            }
        }
        syn::visit::visit_path(self, path);
    }
}

fn referenced_modules(path: &Path) -> BTreeSet<String> {
    let content = fs::read_to_string(path)
        .unwrap_or_else(|e| panic!("cannot read {}: {}", path.display(), e));
    let syntax = syn::parse_file(&content)
        .unwrap_or_else(|e| panic!("cannot parse {}: {}", path.display(), e));

    let mut visitor = CrateModuleVisitor::default();
    visitor.visit_file(&syntax);
    visitor.modules
}

#[test]
fn components_do_not_reference_each_other() {
    let src_dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("src");
    let mut violations = Vec::new();

    for (file, forbidden) in RULES {
        let modules = referenced_modules(&src_dir.join(file));
        for module in *forbidden {
            if modules.contains(*module) {
                violations.push(format!("  - src/{} references crate::{}", file, module));
            }
        }
    }

    if !violations.is_empty() {
        panic!(
            "\n\nRoom components must only talk through the orchestrator.\n\
             Emit a RoomEvent or expose a command method instead.\n\n\
             Violations:\n{}\n",
            violations.join("\n")
        );
    }
}

#[test]
fn visitor_sees_grouped_imports() {
    let syntax: syn::File = syn::parse_str(
        "use crate::{bus::RoomEvent, cloud as remote}; fn f() { crate::routing::RoutingMatrix::build(); }",
    )
    .unwrap();
    let mut visitor = CrateModuleVisitor::default();
    visitor.visit_file(&syntax);

    assert!(visitor.modules.contains("bus"));
    assert!(visitor.modules.contains("cloud"));
    assert!(visitor.modules.contains("routing"));
}
