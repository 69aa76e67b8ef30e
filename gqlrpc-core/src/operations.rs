//! # Operation Registry
//!
//! Loads the GraphQL operation files of each service and keeps them in an immutable,
//! service-scoped map.
//!
//! An RPC method is dispatched to the operation whose name is exactly the method name, and
//! only operations of the method's own service are candidates. The registry is built once per
//! load (or reload) and never mutated afterwards, so it can be shared across request tasks
//! without locks.
use graphql_parser::query::{Definition, Document, OperationDefinition, parse_query};
use std::{
    collections::HashMap,
    fmt,
    path::{Path, PathBuf},
};

#[derive(Debug, thiserror::Error)]
pub enum OperationError {
    #[error("service name cannot be empty")]
    EmptyServiceName,
    #[error("failed to read '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse '{path}': {message}")]
    Parse { path: PathBuf, message: String },
    #[error("'{path}' must contain exactly one operation, found {count}")]
    OperationCount { path: PathBuf, count: usize },
    #[error("subscriptions are not supported: '{0}'")]
    Subscription(PathBuf),
    #[error("no operations could be loaded for service '{service}' ({failed} files failed)")]
    AllFilesFailed { service: String, failed: usize },
}

/// Kind of a GraphQL operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Query,
    Mutation,
    Subscription,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Query => write!(f, "query"),
            OperationKind::Mutation => write!(f, "mutation"),
            OperationKind::Subscription => write!(f, "subscription"),
        }
    }
}

/// A parsed GraphQL operation, ready to be sent upstream.
#[derive(Debug, Clone)]
pub struct GraphQLOperation {
    pub name: String,
    pub file_path: PathBuf,
    pub kind: OperationKind,
    /// The file content, sent verbatim as the GraphQL `query`.
    pub operation: String,
    pub document: Document<'static, String>,
}

/// Parses a single operation file.
pub fn parse_operation_file(path: &Path) -> Result<GraphQLOperation, OperationError> {
    let text = std::fs::read_to_string(path).map_err(|source| OperationError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    parse_operation(path, text)
}

/// Parses operation text that was read from `path`.
pub fn parse_operation(path: &Path, text: String) -> Result<GraphQLOperation, OperationError> {
    let document = parse_query::<String>(&text)
        .map_err(|e| OperationError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?
        .into_static();

    let operations: Vec<&OperationDefinition<'static, String>> = document
        .definitions
        .iter()
        .filter_map(|definition| match definition {
            Definition::Operation(op) => Some(op),
            Definition::Fragment(_) => None,
        })
        .collect();

    if operations.len() != 1 {
        return Err(OperationError::OperationCount {
            path: path.to_path_buf(),
            count: operations.len(),
        });
    }

    let (kind, name) = match operations[0] {
        OperationDefinition::SelectionSet(_) => (OperationKind::Query, None),
        OperationDefinition::Query(q) => (OperationKind::Query, q.name.clone()),
        OperationDefinition::Mutation(m) => (OperationKind::Mutation, m.name.clone()),
        OperationDefinition::Subscription(_) => {
            return Err(OperationError::Subscription(path.to_path_buf()));
        }
    };

    let name = match name {
        Some(name) => name,
        None => path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default(),
    };

    Ok(GraphQLOperation {
        name,
        file_path: path.to_path_buf(),
        kind,
        operation: text,
        document,
    })
}

/// Loads the operations of one service.
///
/// Files that fail to load are logged and skipped; the call only fails when files were given
/// and none of them could be loaded. When two files declare the same operation name the last
/// one wins.
pub fn load_operations_for_service(
    service_name: &str,
    files: &[PathBuf],
) -> Result<HashMap<String, GraphQLOperation>, OperationError> {
    if service_name.is_empty() {
        return Err(OperationError::EmptyServiceName);
    }

    let mut operations: HashMap<String, GraphQLOperation> = HashMap::new();
    let mut failed = 0;

    for file in files {
        let operation = match parse_operation_file(file) {
            Ok(op) => op,
            Err(err) => {
                tracing::error!(service = service_name, error = %err, "Failed to load operation");
                failed += 1;
                continue;
            }
        };

        if let Some(previous) = operations.get(&operation.name) {
            tracing::warn!(
                service = service_name,
                operation = %operation.name,
                previous = %previous.file_path.display(),
                current = %operation.file_path.display(),
                "Duplicate operation name, the last file wins"
            );
        }

        operations.insert(operation.name.clone(), operation);
    }

    if !files.is_empty() && operations.is_empty() {
        return Err(OperationError::AllFilesFailed {
            service: service_name.to_string(),
            failed,
        });
    }

    tracing::debug!(
        service = service_name,
        count = operations.len(),
        "Loaded operations"
    );

    Ok(operations)
}

/// Immutable `service -> operation name -> operation` map.
#[derive(Debug, Clone, Default)]
pub struct OperationRegistry {
    operations: HashMap<String, HashMap<String, GraphQLOperation>>,
}

impl OperationRegistry {
    pub fn new(operations: HashMap<String, HashMap<String, GraphQLOperation>>) -> Self {
        Self { operations }
    }

    pub fn get_operation_for_service(
        &self,
        service: &str,
        name: &str,
    ) -> Option<&GraphQLOperation> {
        self.operations.get(service)?.get(name)
    }

    pub fn has_operation_for_service(&self, service: &str, name: &str) -> bool {
        self.get_operation_for_service(service, name).is_some()
    }

    /// Operations of a service sorted by name; empty for an unknown service.
    pub fn get_all_operations_for_service(&self, service: &str) -> Vec<&GraphQLOperation> {
        let mut ops: Vec<_> = self
            .operations
            .get(service)
            .map(|ops| ops.values().collect())
            .unwrap_or_default();

        ops.sort_by(|a, b| a.name.cmp(&b.name));
        ops
    }

    pub fn service_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.operations.keys().cloned().collect();
        names.sort();
        names
    }

    /// Total number of operations across services.
    pub fn count(&self) -> usize {
        self.operations.values().map(HashMap::len).sum()
    }

    pub fn count_for_service(&self, service: &str) -> usize {
        self.operations.get(service).map_or(0, HashMap::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(name: &str, text: &str) -> Result<GraphQLOperation, OperationError> {
        parse_operation(Path::new(name), text.to_string())
    }

    #[test]
    fn named_query_keeps_its_name_and_text() {
        let text = "query GetEmployee($id: ID!) { employee(id: $id) { id } }";
        let op = parse("ops/get.graphql", text).unwrap();

        assert_eq!(op.name, "GetEmployee");
        assert_eq!(op.kind, OperationKind::Query);
        assert_eq!(op.operation, text);
    }

    #[test]
    fn anonymous_operation_takes_the_file_stem() {
        let op = parse("ops/ListEmployees.graphql", "{ employees { id } }").unwrap();
        assert_eq!(op.name, "ListEmployees");
        assert_eq!(op.kind, OperationKind::Query);
    }

    #[test]
    fn mutation_kind_is_detected() {
        let op = parse("m.gql", "mutation Update { update { id } }").unwrap();
        assert_eq!(op.kind, OperationKind::Mutation);
        assert_eq!(op.kind.to_string(), "mutation");
    }

    #[test]
    fn fragments_are_allowed_next_to_the_operation() {
        let text = "fragment F on Employee { id }\nquery WithFragment { employee { ...F } }";
        let op = parse("f.graphql", text).unwrap();
        assert_eq!(op.name, "WithFragment");
    }

    #[test]
    fn subscriptions_are_rejected() {
        let result = parse("s.graphql", "subscription OnEvent { event { id } }");
        assert!(matches!(result, Err(OperationError::Subscription(_))));
    }

    #[test]
    fn multiple_operations_are_rejected() {
        let result = parse("two.graphql", "query A { a } query B { b }");
        match result {
            Err(OperationError::OperationCount { count, .. }) => assert_eq!(count, 2),
            other => panic!("Expected OperationCount error, got {other:?}"),
        }
    }

    #[test]
    fn invalid_syntax_is_a_parse_error() {
        let result = parse("bad.graphql", "query {");
        assert!(matches!(result, Err(OperationError::Parse { .. })));
    }

    #[test]
    fn empty_service_name_is_rejected() {
        let result = load_operations_for_service("", &[]);
        assert!(matches!(result, Err(OperationError::EmptyServiceName)));
    }

    fn write(dir: &Path, name: &str, text: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, text).unwrap();
        path
    }

    #[test]
    fn last_duplicate_wins_and_the_rest_still_load() {
        let dir = tempfile::tempdir().unwrap();
        let files = vec![
            write(dir.path(), "a.graphql", "query Get { first }"),
            write(dir.path(), "b.graphql", "query List { items }"),
            write(dir.path(), "c.graphql", "query Get { second }"),
        ];

        let ops = load_operations_for_service("pkg.Service", &files).unwrap();

        assert_eq!(ops.len(), 2);
        assert_eq!(ops["Get"].operation, "query Get { second }");
        assert_eq!(ops["Get"].file_path, files[2]);
        assert!(ops.contains_key("List"));
    }

    #[test]
    fn broken_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let files = vec![
            write(dir.path(), "bad.graphql", "query {"),
            write(dir.path(), "good.graphql", "query Good { a }"),
        ];

        let ops = load_operations_for_service("pkg.Service", &files).unwrap();

        assert_eq!(ops.keys().collect::<Vec<_>>(), vec!["Good"]);
    }

    #[test]
    fn all_files_failing_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let files = vec![
            write(dir.path(), "bad.graphql", "query {"),
            write(dir.path(), "sub.graphql", "subscription S { s }"),
            dir.path().join("missing.graphql"),
        ];

        match load_operations_for_service("pkg.Service", &files) {
            Err(OperationError::AllFilesFailed { service, failed }) => {
                assert_eq!(service, "pkg.Service");
                assert_eq!(failed, 3);
            }
            other => panic!("Expected AllFilesFailed error, got {other:?}"),
        }
    }

    #[test]
    fn no_files_yield_an_empty_map() {
        let ops = load_operations_for_service("pkg.Service", &[]).unwrap();
        assert!(ops.is_empty());
    }

    #[test]
    fn registry_is_scoped_by_service() {
        let a = parse("a.graphql", "query Shared { a }").unwrap();
        let b = parse("b.graphql", "query Shared { b }").unwrap();
        let only_a = parse("c.graphql", "query OnlyA { c }").unwrap();

        let registry = OperationRegistry::new(HashMap::from([
            (
                "pkg.A".to_string(),
                HashMap::from([("Shared".to_string(), a), ("OnlyA".to_string(), only_a)]),
            ),
            ("pkg.B".to_string(), HashMap::from([("Shared".to_string(), b)])),
        ]));

        assert_eq!(registry.count(), 3);
        assert_eq!(registry.count_for_service("pkg.A"), 2);
        assert_eq!(registry.count_for_service("pkg.C"), 0);
        assert_eq!(registry.service_names(), vec!["pkg.A", "pkg.B"]);

        let shared_b = registry.get_operation_for_service("pkg.B", "Shared").unwrap();
        assert_eq!(shared_b.operation, "query Shared { b }");
        assert!(!registry.has_operation_for_service("pkg.B", "OnlyA"));
        assert!(registry.get_all_operations_for_service("pkg.C").is_empty());

        let names: Vec<_> = registry
            .get_all_operations_for_service("pkg.A")
            .into_iter()
            .map(|op| op.name.as_str())
            .collect();
        assert_eq!(names, vec!["OnlyA", "Shared"]);
    }
}
