use common::{ORDERS_PROTO, USERS_PROTO, orders_service, users_service, write_file};
use gqlrpc_core::discovery::{DiscoveryConfig, DiscoveryError, discover_services};
use std::path::Path;

mod common;

fn discover(root: &Path) -> Result<Vec<gqlrpc_core::discovery::DiscoveredService>, DiscoveryError> {
    discover_services(&DiscoveryConfig {
        services_dir: root.to_path_buf(),
    })
}

#[test]
fn test_discovers_services_sorted_by_directory() {
    let root = tempfile::tempdir().unwrap();
    users_service(root.path());
    orders_service(root.path());

    let services = discover(root.path()).unwrap();

    let names: Vec<&str> = services.iter().map(|s| s.full_name.as_str()).collect();
    assert_eq!(names, vec!["orders.v1.OrderService", "users.v1.UserService"]);

    let users = &services[1];
    assert_eq!(users.package, "users.v1");
    assert_eq!(users.service_name, "UserService");
    assert_eq!(users.service_dir, root.path().join("users"));
    assert_eq!(users.proto_files, vec![root.path().join("users/users.proto")]);
    assert_eq!(
        users.operation_files,
        vec![
            root.path().join("users/GetUser.graphql"),
            root.path().join("users/ListUsers.graphql"),
        ]
    );
}

#[test]
fn test_finds_nested_services_and_nested_operations() {
    let root = tempfile::tempdir().unwrap();
    write_file(root.path(), "team/a/users/users.proto", USERS_PROTO);
    write_file(
        root.path(),
        "team/a/users/queries/GetUser.gql",
        "query GetUser { user { id } }",
    );

    let services = discover(root.path()).unwrap();

    assert_eq!(services.len(), 1);
    assert_eq!(services[0].service_dir, root.path().join("team/a/users"));
    assert_eq!(
        services[0].operation_files,
        vec![root.path().join("team/a/users/queries/GetUser.gql")]
    );
}

#[test]
fn test_service_without_operations_is_still_discovered() {
    let root = tempfile::tempdir().unwrap();
    write_file(root.path(), "orders/orders.proto", ORDERS_PROTO);

    let services = discover(root.path()).unwrap();

    assert_eq!(services.len(), 1);
    assert!(services[0].operation_files.is_empty());
}

#[test]
fn test_protos_in_the_root_and_hidden_directories_are_ignored() {
    let root = tempfile::tempdir().unwrap();
    write_file(root.path(), "root.proto", USERS_PROTO);
    write_file(root.path(), ".cache/orders.proto", ORDERS_PROTO);

    let err = discover(root.path()).unwrap_err();

    assert!(matches!(err, DiscoveryError::NoServices(_)));
    assert!(err.to_string().contains("no services found"));
}

#[test]
fn test_missing_root_is_reported() {
    let root = tempfile::tempdir().unwrap();
    let missing = root.path().join("nope");

    let err = discover(&missing).unwrap_err();

    assert!(matches!(err, DiscoveryError::RootNotFound(_)));
    assert!(err.to_string().contains("does not exist"));
}

#[test]
fn test_root_must_be_a_directory() {
    let root = tempfile::tempdir().unwrap();
    write_file(root.path(), "file.txt", "");

    let err = discover(&root.path().join("file.txt")).unwrap_err();

    assert!(matches!(err, DiscoveryError::RootNotADirectory(_)));
}

#[test]
fn test_multiple_protos_in_one_directory_is_an_error() {
    let root = tempfile::tempdir().unwrap();
    write_file(root.path(), "mixed/users.proto", USERS_PROTO);
    write_file(root.path(), "mixed/orders.proto", ORDERS_PROTO);

    let err = discover(root.path()).unwrap_err();

    assert!(matches!(err, DiscoveryError::MultipleProtoFiles { .. }));
    assert!(err.to_string().contains("only one proto file is allowed per directory"));
}

#[test]
fn test_multiple_protos_below_a_grouping_directory_is_an_error() {
    let root = tempfile::tempdir().unwrap();
    write_file(root.path(), "company/x/a.proto", USERS_PROTO);
    write_file(root.path(), "company/x/b.proto", ORDERS_PROTO);

    match discover(root.path()).unwrap_err() {
        DiscoveryError::MultipleProtoFiles { dir, files } => {
            assert_eq!(dir, root.path().join("company/x"));
            assert_eq!(files.len(), 2);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_duplicate_service_names_are_rejected() {
    let root = tempfile::tempdir().unwrap();
    write_file(root.path(), "a/users.proto", USERS_PROTO);
    write_file(root.path(), "b/users.proto", USERS_PROTO);

    let err = discover(root.path()).unwrap_err();

    match &err {
        DiscoveryError::DuplicateService {
            full_name,
            first,
            second,
        } => {
            assert_eq!(full_name, "users.v1.UserService");
            assert_eq!(first, &root.path().join("a"));
            assert_eq!(second, &root.path().join("b"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.to_string().contains("duplicate service 'users.v1.UserService'"));
}

#[test]
fn test_proto_without_package_or_service_is_rejected() {
    let root = tempfile::tempdir().unwrap();
    write_file(
        root.path(),
        "nopkg/a.proto",
        "syntax = \"proto3\";\nservice A {}\n",
    );

    assert!(matches!(
        discover(root.path()).unwrap_err(),
        DiscoveryError::MissingPackage(_)
    ));

    let root = tempfile::tempdir().unwrap();
    write_file(
        root.path(),
        "nosvc/a.proto",
        "syntax = \"proto3\";\npackage a.v1;\nmessage A {}\n",
    );

    assert!(matches!(
        discover(root.path()).unwrap_err(),
        DiscoveryError::MissingService(_)
    ));
}
