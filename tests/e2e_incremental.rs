//! End-to-end tests for incremental recompilation: source lifecycle,
//! affected closure, rollback on failure, package pruning and idempotence.

use m3::{Error, Runtime};
use pretty_assertions::assert_eq;

const BASE: &str = "\
Class base::Person
{
  name: String[1];
}

function base::names(people: base::Person[*]): String[*] { $people->map(p|$p.name) }
";

fn baseline() -> Runtime {
    let runtime = Runtime::new().unwrap();
    runtime.create_source("/base.pure", BASE).unwrap();
    runtime.compile().unwrap();
    runtime
}

// ============================================================================
// 1. Idempotence
// ============================================================================

#[test]
fn test_add_delete_cycles_restore_the_graph() {
    let runtime = baseline();
    let before = runtime.serialize().unwrap();

    for round in 0..10 {
        runtime
            .create_source(
                "/extra.pure",
                "import base::*;\n\
                 Class extra::deep::Employee extends Person { salary: Integer[1]; }\n\
                 Class base::Team { members: Person[*]; }\n\
                 function extra::pay(e: extra::deep::Employee[1]): Integer[1] { $e.salary + 1 }",
            )
            .unwrap();
        runtime.compile().unwrap();
        assert!(runtime.get_element("extra::deep::Employee").is_some(), "round {round}");

        runtime.delete_source("/extra.pure").unwrap();
        runtime.compile().unwrap();
        let after = runtime.serialize().unwrap();
        assert_eq!(after.len(), before.len(), "round {round}");
        assert_eq!(after, before, "round {round}");
    }
    assert!(runtime.get_element("extra").is_none());
    runtime.validate().unwrap();
}

#[test]
fn test_compile_without_changes_changes_nothing() {
    let runtime = baseline();
    let before = runtime.serialize().unwrap();
    let report = runtime.compile().unwrap();
    assert_eq!(report.elements_validated, 0);
    assert_eq!(runtime.serialize().unwrap(), before);

    runtime.modify_source("/base.pure", BASE).unwrap();
    assert!(!runtime.has_pending());
}

// ============================================================================
// 2. Affected closure
// ============================================================================

#[test]
fn test_unrelated_source_only_checks_its_own_elements() {
    let runtime = baseline();
    runtime.create_source("/other.pure", "Class other::Thing {}").unwrap();
    let report = runtime.compile().unwrap();
    // import group + class
    assert_eq!(report.elements_validated, 2);
}

#[test]
fn test_modifying_a_class_rechecks_functions_using_it() {
    let runtime = baseline();
    runtime
        .modify_source("/base.pure", &BASE.replace("name: String[1];", "label: String[1];"))
        .unwrap();
    let err = runtime.compile().unwrap_err();
    assert_eq!(err.diagnostic().unwrap().message, "Can't find the property 'name' in the class Person");
    assert!(runtime.has_pending());

    runtime.add_or_update_source("/base.pure", BASE).unwrap();
    assert!(!runtime.has_pending());
    runtime.validate().unwrap();
}

#[test]
fn test_dependent_source_is_revalidated_on_change() {
    let runtime = baseline();
    runtime
        .create_source("/user.pure", "function app::greeting(p: base::Person[1]): String[1] { 'hi ' + $p.name }")
        .unwrap();
    runtime.compile().unwrap();

    runtime
        .modify_source("/base.pure", &BASE.replace("name: String[1];", "name: Integer[1];").replace("String[*]", "Integer[*]"))
        .unwrap();
    let err = runtime.compile().unwrap_err();
    let d = err.diagnostic().unwrap();
    assert_eq!(d.source_id(), "/user.pure");
    assert_eq!(d.message, "The system can't find a match for the function: plus(_:String[1], _:Integer[1])");
}

// ============================================================================
// 3. Deletion
// ============================================================================

#[test]
fn test_deleting_a_source_prunes_its_packages() {
    let runtime = Runtime::new().unwrap();
    runtime.create_source("/c.pure", "Class a::b::C {}").unwrap();
    runtime.compile().unwrap();
    assert!(runtime.get_element("a::b").is_some());

    runtime.delete_source("/c.pure").unwrap();
    runtime.compile().unwrap();
    assert!(runtime.get_element("a::b::C").is_none());
    assert!(runtime.get_element("a::b").is_none());
    assert!(runtime.get_element("a").is_none());
}

#[test]
fn test_deleting_a_referenced_element_fails() {
    let runtime = Runtime::new().unwrap();
    runtime.create_source("/c.pure", "Class a::b::C {}").unwrap();
    runtime.create_source("/user.pure", "Class z::User { c: a::b::C[1]; }").unwrap();
    runtime.compile().unwrap();
    let before = runtime.serialize().unwrap();

    runtime.delete_source("/c.pure").unwrap();
    let err = runtime.compile().unwrap_err();
    assert!(matches!(err, Error::ReferentialIntegrity(_)));
    assert_eq!(err.diagnostic().unwrap().message, "a::b::C has not been defined!");
    assert_eq!(runtime.serialize().unwrap(), before);
    assert!(runtime.get_element("a::b").is_some());

    runtime.delete_source("/user.pure").unwrap();
    runtime.compile().unwrap();
    assert!(runtime.get_element("a").is_none());
    assert!(runtime.get_element("z").is_none());
}

#[test]
fn test_deleting_an_imported_package_fails() {
    let runtime = Runtime::new().unwrap();
    runtime.create_source("/c.pure", "Class a::b::C {}").unwrap();
    runtime.create_source("/u.pure", "import a::b::*;\nClass z::User {}").unwrap();
    runtime.compile().unwrap();
    let before = runtime.serialize().unwrap();

    runtime.delete_source("/c.pure").unwrap();
    let err = runtime.compile().unwrap_err();
    assert!(matches!(err, Error::ReferentialIntegrity(_)));
    let d = err.diagnostic().unwrap();
    assert_eq!(d.message, "a::b has not been defined!");
    assert_eq!(d.source_id(), "/u.pure");
    assert_eq!((d.start_line(), d.start_column()), (1, 1));
    assert!(runtime.get_element("a::b").is_some());
    assert_eq!(runtime.serialize().unwrap(), before);

    runtime.modify_source("/u.pure", "Class z::User {}").unwrap();
    runtime.compile().unwrap();
    assert!(runtime.get_element("a").is_none());
    runtime.validate().unwrap();
}

#[test]
fn test_import_of_a_missing_package_fails() {
    let runtime = Runtime::new().unwrap();
    runtime.create_source("/u.pure", "import no::such::*;\nClass z::User {}").unwrap();
    let err = runtime.compile().unwrap_err();
    assert_eq!(err.diagnostic().unwrap().message, "no::such has not been defined!");
    assert!(runtime.get_element("z").is_none());
}

#[test]
fn test_package_used_as_a_value() {
    let runtime = Runtime::new().unwrap();
    runtime.create_source("/c.pure", "Class a::b::C {}").unwrap();
    runtime.create_source("/f.pure", "function z::f(): Any[1] { a::b }").unwrap();
    runtime.compile().unwrap();
    runtime.validate().unwrap();

    runtime.create_source("/t.pure", "Class z::T { p: a::b[1]; }").unwrap();
    let err = runtime.compile().unwrap_err();
    assert_eq!(err.diagnostic().unwrap().message, "a::b has not been defined!");
}

#[test]
fn test_source_registry_misuse() {
    let runtime = baseline();
    assert!(matches!(runtime.create_source("/base.pure", ""), Err(Error::Source(_))));
    assert!(matches!(runtime.modify_source("/missing.pure", ""), Err(Error::Source(_))));
    assert_eq!(
        runtime.delete_source("/platform/math.pure").unwrap_err().to_string(),
        "Source error: Source '/platform/math.pure' is immutable"
    );
    assert_eq!(runtime.source_text("/base.pure").as_deref(), Some(BASE));
}
