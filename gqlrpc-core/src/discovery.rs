//! # Service Discovery
//!
//! Finds the services served by the bridge by walking a services root:
//!
//! ```text
//! services/
//! ├── employees/                 <- service directory (one .proto file)
//! │   ├── service.proto
//! │   ├── GetEmployee.graphql
//! │   └── mutations/
//! │       └── UpdateEmployee.graphql
//! └── company/
//!     └── projects.v1/           <- nested service directory
//!         ├── projects.proto
//!         └── ListProjects.graphql
//! ```
//!
//! The first directory on a path that directly contains exactly one `.proto` file is a
//! service; the walk does not descend below it. Every `.graphql`/`.gql` file anywhere under a
//! service directory belongs to that service.
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

/// Input of [`discover_services`].
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Root directory containing the service directories.
    pub services_dir: PathBuf,
}

/// A service found on disk, ready to be compiled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredService {
    pub service_dir: PathBuf,
    pub proto_files: Vec<PathBuf>,
    pub operation_files: Vec<PathBuf>,
    pub package: String,
    pub service_name: String,
    /// `package.ServiceName`
    pub full_name: String,
}

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("services directory '{0}' does not exist")]
    RootNotFound(PathBuf),
    #[error("services path '{0}' is not a directory")]
    RootNotADirectory(PathBuf),
    #[error("no services found in '{0}'")]
    NoServices(PathBuf),
    #[error("only one proto file is allowed per directory, found {} in '{}': {}", files.len(), dir.display(), display_files(files))]
    MultipleProtoFiles { dir: PathBuf, files: Vec<PathBuf> },
    #[error("duplicate service '{full_name}' found in '{}' and '{}'", first.display(), second.display())]
    DuplicateService {
        full_name: String,
        first: PathBuf,
        second: PathBuf,
    },
    #[error("no package declaration found in '{0}'")]
    MissingPackage(PathBuf),
    #[error("no service declaration found in '{0}'")]
    MissingService(PathBuf),
    #[error("failed to read '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn display_files(files: &[PathBuf]) -> String {
    files
        .iter()
        .map(|f| f.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Walks `config.services_dir` and returns every service found, sorted by directory.
pub fn discover_services(
    config: &DiscoveryConfig,
) -> Result<Vec<DiscoveredService>, DiscoveryError> {
    let root = &config.services_dir;

    if !root.exists() {
        return Err(DiscoveryError::RootNotFound(root.clone()));
    }

    if !root.is_dir() {
        return Err(DiscoveryError::RootNotADirectory(root.clone()));
    }

    let mut services = Vec::new();

    for dir in sorted_subdirectories(root)? {
        walk(&dir, &mut services)?;
    }

    if services.is_empty() {
        return Err(DiscoveryError::NoServices(root.clone()));
    }

    let mut seen: HashMap<String, PathBuf> = HashMap::new();

    for service in &services {
        if let Some(first) = seen.insert(service.full_name.clone(), service.service_dir.clone()) {
            return Err(DiscoveryError::DuplicateService {
                full_name: service.full_name.clone(),
                first,
                second: service.service_dir.clone(),
            });
        }
    }

    services.sort_by(|a, b| a.service_dir.cmp(&b.service_dir));

    tracing::info!(
        root = %root.display(),
        count = services.len(),
        "Discovered services"
    );

    Ok(services)
}

fn walk(dir: &Path, services: &mut Vec<DiscoveredService>) -> Result<(), DiscoveryError> {
    let proto_files = files_with_extension(dir, &["proto"])?;

    match proto_files.len() {
        0 => {
            for child in sorted_subdirectories(dir)? {
                walk(&child, services)?;
            }
            Ok(())
        }
        1 => {
            services.push(load_service(dir, proto_files)?);
            Ok(())
        }
        _ => Err(DiscoveryError::MultipleProtoFiles {
            dir: dir.to_path_buf(),
            files: proto_files,
        }),
    }
}

fn load_service(
    dir: &Path,
    proto_files: Vec<PathBuf>,
) -> Result<DiscoveredService, DiscoveryError> {
    let proto = &proto_files[0];

    let content = fs::read_to_string(proto).map_err(|source| DiscoveryError::Io {
        path: proto.clone(),
        source,
    })?;

    let package =
        extract_package(&content).ok_or_else(|| DiscoveryError::MissingPackage(proto.clone()))?;
    let service_name =
        extract_service(&content).ok_or_else(|| DiscoveryError::MissingService(proto.clone()))?;

    let operation_files = find_operation_files(dir)?;

    tracing::debug!(
        dir = %dir.display(),
        service = %format!("{package}.{service_name}"),
        operations = operation_files.len(),
        "Found service directory"
    );

    Ok(DiscoveredService {
        service_dir: dir.to_path_buf(),
        full_name: format!("{package}.{service_name}"),
        proto_files,
        operation_files,
        package,
        service_name,
    })
}

/// Returns the value of the first `package x.y;` line.
pub fn extract_package(content: &str) -> Option<String> {
    content.lines().find_map(|line| {
        let rest = line.trim().strip_prefix("package ")?;
        let package = rest.trim().trim_end_matches(';').trim();
        (!package.is_empty()).then(|| package.to_string())
    })
}

/// Returns the name of the first `service Name {` declaration.
pub fn extract_service(content: &str) -> Option<String> {
    content.lines().find_map(|line| {
        let rest = line.trim().strip_prefix("service ")?;
        let name = rest
            .split(|c: char| c.is_whitespace() || c == '{')
            .next()
            .unwrap_or_default();
        (!name.is_empty()).then(|| name.to_string())
    })
}

/// Recursively collects `.graphql` and `.gql` files below `dir`, sorted.
pub fn find_operation_files(dir: &Path) -> Result<Vec<PathBuf>, DiscoveryError> {
    let mut found = files_with_extension(dir, &["graphql", "gql"])?;

    for child in sorted_subdirectories(dir)? {
        found.extend(find_operation_files(&child)?);
    }

    found.sort();
    Ok(found)
}

fn read_dir_sorted(dir: &Path) -> Result<Vec<PathBuf>, DiscoveryError> {
    let entries = fs::read_dir(dir).map_err(|source| DiscoveryError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut paths = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| DiscoveryError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        paths.push(entry.path());
    }

    paths.sort();
    Ok(paths)
}

fn sorted_subdirectories(dir: &Path) -> Result<Vec<PathBuf>, DiscoveryError> {
    Ok(read_dir_sorted(dir)?
        .into_iter()
        .filter(|p| p.is_dir() && !is_hidden(p))
        .collect())
}

fn files_with_extension(dir: &Path, extensions: &[&str]) -> Result<Vec<PathBuf>, DiscoveryError> {
    Ok(read_dir_sorted(dir)?
        .into_iter()
        .filter(|p| p.is_file())
        .filter(|p| {
            p.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| extensions.contains(&ext))
        })
        .collect())
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with('.'))
}
