//! Ownership conflicts across template, helper and command namespaces.

mod common;

use std::sync::Arc;

use common::{CallLog, TestPlugin, builtin_tree, loader_with, test_config};
use serde_json::{Value, json};
use stencil_plugins::{
    CommandSpec, HelperTable, HostContext, Owner, PluginDeclaration, PluginError, PluginExport,
    PluginId, PluginLoader, StaticModuleLoader, TemplateMetadata, helper_fn,
};

fn host() -> HostContext {
    HostContext::new("/work/project")
}

fn decls(refs: &[&str]) -> Vec<PluginDeclaration> {
    refs.iter().copied().map(PluginDeclaration::new).collect()
}

#[tokio::test]
async fn second_plugin_claiming_template_and_helper_is_rejected() {
    let log = Arc::new(CallLog::default());
    let mut modules = StaticModuleLoader::new();
    modules
        .link(
            "plugin-a",
            PluginExport::Instance(
                TestPlugin::new("a", &log)
                    .template("alpha")
                    .helper("toUpperSafe")
                    .build(),
            ),
        )
        .link(
            "plugin-b",
            PluginExport::Instance(
                TestPlugin::new("b", &log)
                    .template("alpha")
                    .helper("toUpperSafe")
                    .build(),
            ),
        );
    let mut loader = loader_with(modules);

    let report = loader
        .load_plugins_from_config(&decls(&["plugin-a", "plugin-b"]), &host(), &mut builtin_tree())
        .await
        .unwrap();

    assert_eq!(report.loaded, vec![PluginId::from_static("a")]);
    assert_eq!(report.summary(), "1/2 plugins loaded");

    let failure = &report.failures[0];
    assert_eq!(failure.reference, "plugin-b");
    match &failure.error {
        PluginError::TemplateConflict {
            template_type,
            requested_by,
            owner,
        } => {
            assert_eq!(template_type, "alpha");
            assert_eq!(requested_by, "b");
            assert_eq!(owner, "a");
        },
        other => panic!("unexpected error: {other}"),
    }

    // First owner is intact and b's hooks never ran.
    let a = Owner::Plugin(PluginId::from_static("a"));
    assert_eq!(loader.registry().template_owner("alpha"), Some(&a));
    assert_eq!(loader.registry().helper_owner("toUpperSafe"), Some(&a));
    assert_eq!(
        loader.helpers().call("toUpperSafe", &[]).unwrap(),
        Value::String("from a".into())
    );
    assert_eq!(log.count("initialize:b"), 0);
}

#[tokio::test]
async fn helper_conflict_alone_names_both_plugins() {
    let log = Arc::new(CallLog::default());
    let mut modules = StaticModuleLoader::new();
    modules
        .link("a", PluginExport::Instance(TestPlugin::new("a", &log).helper("fmt").build()))
        .link(
            "b",
            PluginExport::Instance(
                TestPlugin::new("b", &log)
                    .template("beta")
                    .helper("fmt")
                    .build(),
            ),
        );
    let mut loader = loader_with(modules);

    let report = loader
        .load_plugins_from_config(&decls(&["a", "b"]), &host(), &mut builtin_tree())
        .await
        .unwrap();

    let message = report.failures[0].error.to_string();
    assert!(message.contains("helper 'fmt'"), "{message}");
    assert!(message.contains("'b'"));
    assert!(message.contains("'a'"));
    // Atomic: b's template did not land either.
    assert!(!loader.registry().has_template("beta"));
}

#[tokio::test]
async fn builtin_helper_and_template_are_protected() {
    let log = Arc::new(CallLog::default());
    let mut modules = StaticModuleLoader::new();
    modules
        .link(
            "h",
            PluginExport::Instance(TestPlugin::new("h", &log).helper("json:stringify").build()),
        )
        .link(
            "t",
            PluginExport::Instance(TestPlugin::new("t", &log).template("json-object").build()),
        );

    let table = HelperTable::new()
        .with_builtin("json:stringify", helper_fn(|args| Ok(json!(args.len()))))
        .unwrap();
    let mut loader = PluginLoader::new(test_config())
        .unwrap()
        .with_module_loader(modules)
        .with_helper_table(table)
        .with_builtin_template(TemplateMetadata::new(
            "json-object",
            "JSON object",
            "1.0.0",
            "object.json",
        ))
        .unwrap();

    let report = loader
        .load_plugins_from_config(&decls(&["h", "t"]), &host(), &mut builtin_tree())
        .await
        .unwrap();

    assert!(report.loaded.is_empty());
    for failure in &report.failures {
        assert!(failure.error.is_conflict());
        assert!(failure.error.to_string().contains("'built-in'"));
    }
    assert_eq!(loader.helpers().get("json:stringify").unwrap().owner, Owner::BuiltIn);
}

#[tokio::test]
async fn plugin_command_named_like_builtin_is_rejected() {
    let log = Arc::new(CallLog::default());
    let mut modules = StaticModuleLoader::new();
    modules.link(
        "linter",
        PluginExport::Instance(
            TestPlugin::new("linter", &log)
                .command(CommandSpec::new("validate", "Lint templates").handler(|_| Ok(())))
                .build(),
        ),
    );
    let mut loader = loader_with(modules);
    let mut tree = builtin_tree();

    let report = loader
        .load_plugins_from_config(&decls(&["linter"]), &host(), &mut tree)
        .await
        .unwrap();

    assert!(report.loaded.is_empty());
    match &report.failures[0].error {
        PluginError::CommandConflict {
            kind,
            name,
            requested_by,
            owner,
        } => {
            assert_eq!(*kind, "command");
            assert_eq!(name, "validate");
            assert_eq!(requested_by, "linter");
            assert_eq!(owner, "built-in");
        },
        other => panic!("unexpected error: {other}"),
    }
    // The built-in keeps the name and the tree is back to the built-ins.
    assert_eq!(tree.len(), 3);
    assert_eq!(loader.commands().owner_of("validate"), Some(&Owner::BuiltIn));
    assert!(tree.find("validate").unwrap().handler.is_none());
}

#[tokio::test]
async fn plugin_commands_are_attached_and_owned() {
    let log = Arc::new(CallLog::default());
    let mut modules = StaticModuleLoader::new();
    modules
        .link(
            "deployer",
            PluginExport::Instance(
                TestPlugin::new("deployer", &log)
                    .command(CommandSpec::new("deploy", "Deploy").alias("ship").handler(|_| Ok(())))
                    .build(),
            ),
        )
        .link(
            "shipper",
            PluginExport::Instance(
                TestPlugin::new("shipper", &log)
                    .command(CommandSpec::new("ship", "Ship it").handler(|_| Ok(())))
                    .build(),
            ),
        );
    let mut loader = loader_with(modules);
    let mut tree = builtin_tree();

    let report = loader
        .load_plugins_from_config(&decls(&["deployer", "shipper"]), &host(), &mut tree)
        .await
        .unwrap();

    assert_eq!(report.loaded, vec![PluginId::from_static("deployer")]);
    assert!(matches!(
        report.failures[0].error,
        PluginError::CommandConflict { kind: "command", ref owner, .. } if owner == "deployer"
    ));
    assert_eq!(tree.len(), 4);
    assert!(tree.find("ship").unwrap().run(&[]).is_ok());
}

#[tokio::test]
async fn repeated_reads_are_identical() {
    let log = Arc::new(CallLog::default());
    let mut modules = StaticModuleLoader::new();
    modules
        .link(
            "a",
            PluginExport::Instance(
                TestPlugin::new("a", &log)
                    .template("zeta")
                    .template("alpha")
                    .helper("h1")
                    .build(),
            ),
        )
        .link("b", PluginExport::Instance(TestPlugin::new("b", &log).template("mid").build()));
    let mut loader = loader_with(modules);
    loader
        .load_plugins_from_config(&decls(&["a", "b"]), &host(), &mut builtin_tree())
        .await
        .unwrap();

    let first: Vec<_> = loader
        .all_templates()
        .iter()
        .map(|t| (t.metadata.clone(), t.owner.clone()))
        .collect();
    let second: Vec<_> = loader
        .all_templates()
        .iter()
        .map(|t| (t.metadata.clone(), t.owner.clone()))
        .collect();
    assert_eq!(first, second);
    assert_eq!(
        first.iter().map(|(m, _)| m.template_type.as_str()).collect::<Vec<_>>(),
        vec!["alpha", "mid", "zeta"]
    );

    let helpers_a: Vec<_> = loader.all_helpers().iter().map(|h| h.name.clone()).collect();
    let helpers_b: Vec<_> = loader.all_helpers().iter().map(|h| h.name.clone()).collect();
    assert_eq!(helpers_a, helpers_b);
    assert_eq!(helpers_a, vec!["h1"]);
}
