//! # Schema Loader
//!
//! Compiles the `.proto` files of service directories at runtime and exposes the services and
//! methods they declare.
//!
//! Every directory is compiled by [`protox`] into its own [`DescriptorPool`]. The pools of a
//! [`SchemaLoader`] form its [`TypeUniverse`]: two loaders never share types, and nothing is
//! registered in a process-wide registry. This is what allows a reload to compile a fresh set
//! of schemas next to the ones still serving traffic.
//!
//! Besides the directory itself, each compilation can import the Google well-known types and
//! the bundled `gqlrpc/options/v1/annotations.proto`, which declares the
//! `graphql_variable_name` field option.
use prost_reflect::{
    DescriptorPool, FileDescriptor, MessageDescriptor, MethodDescriptor, ServiceDescriptor,
};
use protox::{
    Compiler,
    file::{ChainFileResolver, File, FileResolver, GoogleFileResolver, IncludeFileResolver},
};
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    fs,
    path::{Path, PathBuf},
};

/// Import path of the bundled options file.
pub const ANNOTATIONS_FILE: &str = "gqlrpc/options/v1/annotations.proto";

/// Full name of the field option renaming a field in GraphQL variables.
pub const GRAPHQL_VARIABLE_NAME_OPTION: &str = "gqlrpc.options.v1.graphql_variable_name";

/// Field number of [`GRAPHQL_VARIABLE_NAME_OPTION`] on `google.protobuf.FieldOptions`.
pub const GRAPHQL_VARIABLE_NAME_FIELD_NUMBER: u32 = 50001;

const ANNOTATIONS_SOURCE: &str = include_str!("../proto/gqlrpc/options/v1/annotations.proto");

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("no directories provided")]
    NoDirectories,
    #[error("no proto files found in '{0}'")]
    NoProtoFiles(PathBuf),
    #[error("failed to compile proto files in '{}': {source}", dir.display())]
    Compile {
        dir: PathBuf,
        #[source]
        source: protox::Error,
    },
    #[error("duplicate proto package '{package}' found in multiple directories: '{}' and '{}'", first.display(), second.display())]
    DuplicatePackage {
        package: String,
        first: PathBuf,
        second: PathBuf,
    },
    #[error("duplicate service '{name}' defined in '{}' and '{}'", first.display(), second.display())]
    DuplicateService {
        name: String,
        first: PathBuf,
        second: PathBuf,
    },
    #[error("Service '{0}' not found")]
    ServiceNotFound(String),
    #[error("Method '{method}' not found in service '{service}'")]
    MethodNotFound { service: String, method: String },
    #[error("failed to read '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A compiled RPC service.
#[derive(Debug, Clone)]
pub struct ServiceDefinition {
    /// `package.ServiceName`
    pub full_name: String,
    pub package: String,
    pub service_name: String,
    pub methods: Vec<MethodDefinition>,
    /// The schema file declaring the service.
    pub file: FileDescriptor,
    pub descriptor: ServiceDescriptor,
    /// Directory the service was compiled from.
    pub dir: PathBuf,
}

impl ServiceDefinition {
    fn new(descriptor: ServiceDescriptor, dir: &Path) -> Self {
        Self {
            full_name: descriptor.full_name().to_string(),
            package: descriptor.package_name().to_string(),
            service_name: descriptor.name().to_string(),
            methods: descriptor.methods().map(MethodDefinition::new).collect(),
            file: descriptor.parent_file(),
            dir: dir.to_path_buf(),
            descriptor,
        }
    }

    /// Finds a method by its simple name.
    pub fn method(&self, name: &str) -> Option<&MethodDefinition> {
        self.methods.iter().find(|m| m.name == name)
    }
}

/// A compiled RPC method.
#[derive(Debug, Clone)]
pub struct MethodDefinition {
    pub name: String,
    /// `package.ServiceName.Method`
    pub full_name: String,
    pub input_type: String,
    pub output_type: String,
    pub input: MessageDescriptor,
    pub output: MessageDescriptor,
    pub client_streaming: bool,
    pub server_streaming: bool,
    pub descriptor: MethodDescriptor,
}

impl MethodDefinition {
    fn new(descriptor: MethodDescriptor) -> Self {
        let input = descriptor.input();
        let output = descriptor.output();

        Self {
            name: descriptor.name().to_string(),
            full_name: descriptor.full_name().to_string(),
            input_type: input.full_name().to_string(),
            output_type: output.full_name().to_string(),
            client_streaming: descriptor.is_client_streaming(),
            server_streaming: descriptor.is_server_streaming(),
            input,
            output,
            descriptor,
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.client_streaming || self.server_streaming
    }
}

/// One directory compiled into its own descriptor pool.
#[derive(Debug, Clone)]
pub struct CompiledDirectory {
    pub dir: PathBuf,
    /// Proto files of the directory, relative to it.
    pub files: Vec<PathBuf>,
    pub pool: DescriptorPool,
}

/// The isolated set of descriptor pools owned by one [`SchemaLoader`].
#[derive(Debug, Clone, Default)]
pub struct TypeUniverse {
    directories: Vec<CompiledDirectory>,
}

impl TypeUniverse {
    pub fn directories(&self) -> impl Iterator<Item = &CompiledDirectory> {
        self.directories.iter()
    }

    pub fn pools(&self) -> impl Iterator<Item = &DescriptorPool> {
        self.directories.iter().map(|d| &d.pool)
    }

    /// Looks a message up by full name across the pools, in load order.
    pub fn find_message(&self, full_name: &str) -> Option<MessageDescriptor> {
        self.pools()
            .find_map(|pool| pool.get_message_by_name(full_name))
    }

    pub fn is_empty(&self) -> bool {
        self.directories.is_empty()
    }
}

/// Compiles service directories and indexes the services they declare.
#[derive(Debug, Default)]
pub struct SchemaLoader {
    universe: TypeUniverse,
    services: BTreeMap<String, ServiceDefinition>,
    processed: HashSet<PathBuf>,
}

impl SchemaLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compiles every `.proto` file below `dir`.
    ///
    /// Fails when the directory has no proto files.
    pub fn load_from_directory(&mut self, dir: impl AsRef<Path>) -> Result<(), SchemaError> {
        let dir = dir.as_ref();
        let files = find_proto_files(dir)?;

        if files.is_empty() {
            return Err(SchemaError::NoProtoFiles(dir.to_path_buf()));
        }

        self.load_files(dir, files)
    }

    /// Compiles several directories, rejecting proto packages split across directories.
    ///
    /// Directories without proto files are skipped with a warning.
    pub fn load_from_directories<P: AsRef<Path>>(
        &mut self,
        dirs: &[P],
    ) -> Result<(), SchemaError> {
        if dirs.is_empty() {
            return Err(SchemaError::NoDirectories);
        }

        let mut packages: HashMap<String, PathBuf> = self
            .universe
            .directories()
            .flat_map(|compiled| {
                declared_files(compiled)
                    .map(|file| (file.package_name().to_string(), compiled.dir.clone()))
                    .collect::<Vec<_>>()
            })
            .collect();

        for dir in dirs {
            let dir = dir.as_ref();
            let files = find_proto_files(dir)?;

            if files.is_empty() {
                tracing::warn!(dir = %dir.display(), "No proto files found, skipping directory");
                continue;
            }

            let files = self.unprocessed(dir, files);

            if files.is_empty() {
                tracing::debug!(dir = %dir.display(), "Directory already loaded");
                continue;
            }

            let compiled = compile_directory(dir, &files)?;

            for file in declared_files(&compiled) {
                let package = file.package_name();

                if package.is_empty() {
                    continue;
                }

                match packages.get(package) {
                    Some(first) if first != dir => {
                        return Err(SchemaError::DuplicatePackage {
                            package: package.to_string(),
                            first: first.clone(),
                            second: dir.to_path_buf(),
                        });
                    }
                    Some(_) => {}
                    None => {
                        packages.insert(package.to_string(), dir.to_path_buf());
                    }
                }
            }

            self.register(compiled, files)?;
        }

        Ok(())
    }

    fn unprocessed(&self, dir: &Path, files: Vec<PathBuf>) -> Vec<PathBuf> {
        files
            .into_iter()
            .filter(|file| !self.processed.contains(&dir.join(file)))
            .collect()
    }

    fn load_files(&mut self, dir: &Path, files: Vec<PathBuf>) -> Result<(), SchemaError> {
        let files = self.unprocessed(dir, files);

        if files.is_empty() {
            tracing::debug!(dir = %dir.display(), "Directory already loaded");
            return Ok(());
        }

        let compiled = compile_directory(dir, &files)?;
        self.register(compiled, files)
    }

    fn register(
        &mut self,
        compiled: CompiledDirectory,
        files: Vec<PathBuf>,
    ) -> Result<(), SchemaError> {
        let mut new_services = Vec::new();

        for descriptor in compiled.pool.services() {
            let definition = ServiceDefinition::new(descriptor, &compiled.dir);

            if let Some(existing) = self.services.get(&definition.full_name) {
                return Err(SchemaError::DuplicateService {
                    name: definition.full_name.clone(),
                    first: existing.dir.clone(),
                    second: compiled.dir.clone(),
                });
            }

            new_services.push(definition);
        }

        tracing::info!(
            dir = %compiled.dir.display(),
            files = files.len(),
            services = new_services.len(),
            "Compiled proto files"
        );

        for definition in new_services {
            self.services.insert(definition.full_name.clone(), definition);
        }

        for file in files {
            self.processed.insert(compiled.dir.join(file));
        }

        self.universe.directories.push(compiled);
        Ok(())
    }

    pub fn universe(&self) -> &TypeUniverse {
        &self.universe
    }

    pub fn service(&self, full_name: &str) -> Option<&ServiceDefinition> {
        self.services.get(full_name)
    }

    /// Resolves a method of a service.
    pub fn method(&self, service: &str, method: &str) -> Result<&MethodDefinition, SchemaError> {
        let definition = self
            .service(service)
            .ok_or_else(|| SchemaError::ServiceNotFound(service.to_string()))?;

        definition
            .method(method)
            .ok_or_else(|| SchemaError::MethodNotFound {
                service: service.to_string(),
                method: method.to_string(),
            })
    }

    /// Loaded services, sorted by full name.
    pub fn services(&self) -> impl Iterator<Item = &ServiceDefinition> {
        self.services.values()
    }

    pub fn service_names(&self) -> Vec<String> {
        self.services.keys().cloned().collect()
    }

    /// The schema files declaring the loaded services, without duplicates.
    pub fn file_descriptors(&self) -> Vec<FileDescriptor> {
        let mut seen = HashSet::new();

        self.services
            .values()
            .filter(|service| seen.insert((service.dir.clone(), service.file.name().to_string())))
            .map(|service| service.file.clone())
            .collect()
    }
}

/// Files of the pool that live in the compiled directory (imports excluded).
fn declared_files(compiled: &CompiledDirectory) -> impl Iterator<Item = FileDescriptor> + '_ {
    compiled.pool.files().filter(|file| {
        compiled
            .files
            .iter()
            .any(|path| path_to_proto_name(path) == file.name())
    })
}

fn path_to_proto_name(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn compile_directory(dir: &Path, files: &[PathBuf]) -> Result<CompiledDirectory, SchemaError> {
    let mut resolver = ChainFileResolver::new();
    resolver.add(IncludeFileResolver::new(dir.to_path_buf()));
    resolver.add(BundledFileResolver);
    resolver.add(GoogleFileResolver::new());

    let mut compiler = Compiler::with_file_resolver(resolver);
    compiler.include_imports(true);

    compiler
        .open_files(files.iter().map(|file| dir.join(file)))
        .map_err(|source| {
            tracing::error!(dir = %dir.display(), error = %source, "Proto compilation failed");
            SchemaError::Compile {
                dir: dir.to_path_buf(),
                source,
            }
        })?;

    Ok(CompiledDirectory {
        dir: dir.to_path_buf(),
        files: files.to_vec(),
        pool: compiler.descriptor_pool(),
    })
}

/// Resolves the options file shipped with the crate.
struct BundledFileResolver;

impl FileResolver for BundledFileResolver {
    fn open_file(&self, name: &str) -> Result<File, protox::Error> {
        if name == ANNOTATIONS_FILE {
            File::from_source(name, ANNOTATIONS_SOURCE)
        } else {
            Err(protox::Error::file_not_found(name))
        }
    }
}

/// Recursively lists `.proto` files below `dir`, relative to it and sorted.
fn find_proto_files(dir: &Path) -> Result<Vec<PathBuf>, SchemaError> {
    let mut files = Vec::new();
    collect_proto_files(dir, dir, &mut files)?;
    files.sort();
    Ok(files)
}

fn collect_proto_files(root: &Path, dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), SchemaError> {
    let io_err = |source| SchemaError::Io {
        path: dir.to_path_buf(),
        source,
    };

    for entry in fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();

        let hidden = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with('.'));

        if path.is_dir() && !hidden {
            collect_proto_files(root, &path, out)?;
        } else if path.extension().is_some_and(|ext| ext == "proto") {
            if let Ok(relative) = path.strip_prefix(root) {
                out.push(relative.to_path_buf());
            }
        }
    }

    Ok(())
}
