//! End-to-end tests for repository scopes: visibility across declared
//! dependencies and private element access.

use m3::{DiagnosticKind, Error, Runtime, RuntimeConfig, ScopeDescriptor};

fn scoped_runtime() -> Runtime {
    let config = RuntimeConfig::from_json(
        r#"{
            "scopes": [
                {"name": "core", "pattern": "core(::.*)?"},
                {"name": "app", "pattern": "app(::.*)?", "dependencies": ["core"]}
            ]
        }"#,
    )
    .unwrap();
    Runtime::with_config(&config).unwrap()
}

#[test]
fn test_dependent_scope_sees_its_dependency() {
    let runtime = scoped_runtime();
    runtime.create_source("/core.pure", "Class core::Base { id: Integer[1]; }").unwrap();
    runtime.create_source("/app.pure", "Class app::User extends core::Base { name: String[1]; }").unwrap();
    runtime.compile().unwrap();
    assert!(runtime.subtype_of("app::User", "core::Base").unwrap());
}

#[test]
fn test_dependency_cannot_see_dependent_scope() {
    let runtime = scoped_runtime();
    runtime.create_source("/app.pure", "Class app::User {}").unwrap();
    runtime.create_source("/core.pure", "Class core::Base { user: app::User[0..1]; }").unwrap();
    let err = runtime.compile().unwrap_err();
    assert!(matches!(err, Error::ScopeVisibility(_)));
    let d = err.diagnostic().unwrap();
    assert_eq!(d.kind, DiagnosticKind::ScopeVisibility);
    assert_eq!(d.message, "app::User is not visible in the scope 'core'");
    assert_eq!(d.source_id(), "/core.pure");
}

#[test]
fn test_private_elements_stay_in_their_scope() {
    let runtime = scoped_runtime();
    runtime
        .create_source(
            "/core.pure",
            "Class <<access.private>> core::Secret {}\nClass core::Vault { secret: core::Secret[1]; }",
        )
        .unwrap();
    runtime.compile().unwrap();

    runtime.create_source("/app.pure", "Class app::Thief { loot: core::Secret[1]; }").unwrap();
    let err = runtime.compile().unwrap_err();
    assert_eq!(
        err.diagnostic().unwrap().message,
        "core::Secret is private and not accessible from app::Thief"
    );
}

#[test]
fn test_calls_respect_scope_visibility() {
    let runtime = scoped_runtime();
    runtime.create_source("/app.pure", "function app::secret(): Integer[1] { 42 }").unwrap();
    runtime.compile().unwrap();

    runtime
        .create_source("/core.pure", "function core::leak(): Integer[1] {\n  app::secret()\n}")
        .unwrap();
    let err = runtime.compile().unwrap_err();
    assert!(matches!(err, Error::ScopeVisibility(_)));
    let d = err.diagnostic().unwrap();
    assert_eq!(d.message, "app::secret is not visible in the scope 'core'");
    assert_eq!((d.source_id(), d.start_line()), ("/core.pure", 2));
    assert!(runtime.get_element("core").is_none());
}

#[test]
fn test_private_functions_stay_in_their_scope() {
    let runtime = scoped_runtime();
    runtime
        .create_source(
            "/core.pure",
            "function <<access.private>> core::hidden(): Integer[1] { 1 }\n\
             function core::open(): Integer[1] { core::hidden() + 1 }",
        )
        .unwrap();
    runtime.compile().unwrap();

    runtime.create_source("/app.pure", "function app::use(): Integer[1] { core::hidden() }").unwrap();
    let err = runtime.compile().unwrap_err();
    assert_eq!(err.diagnostic().unwrap().kind, DiagnosticKind::ScopeVisibility);
    assert_eq!(err.diagnostic().unwrap().message, "core::hidden is private and not accessible from app::use");

    runtime.modify_source("/app.pure", "function app::use(): Integer[1] { core::open() }").unwrap();
    runtime.compile().unwrap();
}

#[test]
fn test_unscoped_packages_are_visible_everywhere() {
    let runtime = scoped_runtime();
    runtime.create_source("/shared.pure", "Class shared::Money { amount: Float[1]; }").unwrap();
    runtime.create_source("/core.pure", "Class core::Account { balance: shared::Money[1]; }").unwrap();
    runtime.compile().unwrap();
}

#[test]
fn test_invalid_scope_configuration() {
    let config = RuntimeConfig::default().with_scope(ScopeDescriptor::new("app", "app(::.*)?", &["missing"]));
    let err = Runtime::with_config(&config).unwrap_err();
    assert!(matches!(err, Error::ScopeConfig(_)));
    assert!(err.to_string().contains("The scope 'app' depends on the unknown scope 'missing'"));
}
