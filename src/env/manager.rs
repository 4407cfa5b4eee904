//! Environment provisioning and caching
//!
//! Each task owns a sandbox directory `<dir>/<name>` holding a cache record
//! `.<name>.cache`. The record is reused as long as the task asks for the
//! same interpreter requirement; any other change in dependencies is
//! handled by re-running the install steps.

use crate::env::backend::{EnvBackend, Sandbox};
use crate::env::interpreter::{InterpreterInfo, InterpreterResolver};
use crate::error::{ExecutionError, ExecutionResult};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;

/// What to provision
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionParams {
    /// Remove any existing sandbox first
    pub recreate: bool,
    /// Directory holding the sandboxes
    pub dir: PathBuf,
    pub name: String,
    pub python_requirement: String,
}

impl ProvisionParams {
    /// Directory of this sandbox
    pub fn env_dir(&self) -> PathBuf {
        self.dir.join(&self.name)
    }

    /// Location of the cache record
    pub fn cache_file(&self) -> PathBuf {
        self.env_dir().join(format!(".{}.cache", self.name))
    }
}

/// A ready-to-use sandbox
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionedEnvironment {
    /// Interpreter the sandbox was created from
    pub interpreter: InterpreterInfo,
    #[serde(flatten)]
    pub sandbox: Sandbox,
}

impl ProvisionedEnvironment {
    pub fn bin_path(&self) -> &Path {
        &self.sandbox.bin_path
    }

    pub fn executable(&self) -> &Path {
        &self.sandbox.executable
    }
}

/// Creates, reuses and invalidates sandboxes
#[derive(Clone)]
pub struct EnvManager {
    resolver: Arc<dyn InterpreterResolver>,
    backend: Arc<dyn EnvBackend>,
}

impl EnvManager {
    pub fn new(resolver: Arc<dyn InterpreterResolver>, backend: Arc<dyn EnvBackend>) -> Self {
        EnvManager { resolver, backend }
    }

    pub fn backend(&self) -> &Arc<dyn EnvBackend> {
        &self.backend
    }

    /// Get a sandbox for `params`, reusing the cached one when it still fits
    pub async fn provision(&self, params: &ProvisionParams) -> ExecutionResult<ProvisionedEnvironment> {
        let env_dir = params.env_dir();
        if params.recreate {
            remove_dir(&env_dir, "recreate requested").await?;
        }

        match load_cache(params).await {
            Ok(Some(cached)) if cached.interpreter.requirement == params.python_requirement => {
                tracing::debug!("reuse environment {} from {}", params.name, env_dir.display());
                return Ok(cached);
            }
            Ok(Some(cached)) => {
                let reason = format!(
                    "python changed from {} to {}",
                    cached.interpreter.requirement, params.python_requirement
                );
                remove_dir(&env_dir, &reason).await?;
            }
            Ok(None) => remove_dir(&env_dir, "no cache record").await?,
            Err(e) => {
                tracing::warn!("ignore unreadable cache record: {}", e);
                remove_dir(&env_dir, "invalid cache record").await?;
            }
        }

        let interpreter = self.resolver.resolve(&params.python_requirement).await?;
        tracing::info!(
            "create environment {} at {} with {} ({})",
            params.name,
            env_dir.display(),
            interpreter.executable.display(),
            interpreter.version.lines().next().unwrap_or_default()
        );
        fs::create_dir_all(&params.dir).await?;
        let sandbox = self
            .backend
            .create_sandbox(&interpreter.executable, &env_dir)
            .await?;

        let provisioned = ProvisionedEnvironment {
            interpreter,
            sandbox,
        };
        write_cache(params, &provisioned).await?;
        tracing::debug!(
            "environment {} ready at {}",
            params.name,
            provisioned.executable().display()
        );
        Ok(provisioned)
    }

    /// Install `packages` into `env`; a no-op for an empty list
    pub async fn install(
        &self,
        env: &ProvisionedEnvironment,
        batch: &str,
        packages: &[String],
        develop: bool,
    ) -> ExecutionResult<()> {
        if packages.is_empty() {
            return Ok(());
        }
        tracing::info!(
            "install {}: {}{}",
            batch,
            if develop { "-e " } else { "" },
            packages.join(" ")
        );
        let code = self.backend.install(&env.sandbox, packages, develop).await?;
        if code != 0 {
            return Err(ExecutionError::InstallFailed {
                batch: batch.to_string(),
                code,
            });
        }
        Ok(())
    }
}

async fn load_cache(params: &ProvisionParams) -> ExecutionResult<Option<ProvisionedEnvironment>> {
    let path = params.cache_file();
    let contents = match fs::read_to_string(&path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    tracing::debug!("load cache record {}", path.display());
    serde_json::from_str(&contents)
        .map(Some)
        .map_err(|e| ExecutionError::Cache(format!("{}: {}", path.display(), e)))
}

async fn write_cache(params: &ProvisionParams, env: &ProvisionedEnvironment) -> ExecutionResult<()> {
    let path = params.cache_file();
    tracing::debug!("write cache record {}", path.display());
    let contents = serde_json::to_string_pretty(env)
        .map_err(|e| ExecutionError::Cache(format!("{}: {}", path.display(), e)))?;
    fs::write(&path, contents).await?;
    Ok(())
}

/// Remove a directory tree if it exists
pub async fn remove_dir(path: &Path, reason: &str) -> ExecutionResult<()> {
    if fs::try_exists(path).await? {
        tracing::debug!("remove {} ({})", path.display(), reason);
        fs::remove_dir_all(path).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BuildType;
    use crate::env::interpreter::VersionInfo;
    use async_trait::async_trait;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    #[derive(Default)]
    struct CountingResolver {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl InterpreterResolver for CountingResolver {
        async fn resolve(&self, requirement: &str) -> ExecutionResult<InterpreterInfo> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(InterpreterInfo {
                requirement: requirement.to_string(),
                executable: PathBuf::from(format!("/usr/bin/{}", requirement)),
                version: "3.6.9".to_string(),
                version_info: VersionInfo {
                    major: 3,
                    minor: 6,
                    micro: 9,
                    release_level: "final".to_string(),
                    serial: 0,
                },
            })
        }
    }

    #[derive(Default)]
    struct DirBackend {
        created: AtomicUsize,
        install_code: i32,
    }

    #[async_trait]
    impl EnvBackend for DirBackend {
        async fn create_sandbox(&self, _interpreter: &Path, dest: &Path) -> ExecutionResult<Sandbox> {
            self.created.fetch_add(1, Ordering::SeqCst);
            fs::create_dir_all(dest.join("bin"))?;
            Ok(Sandbox {
                root_dir: dest.to_path_buf(),
                bin_path: dest.join("bin"),
                executable: dest.join("bin").join("python"),
                site_packages: dest.join("lib"),
            })
        }

        async fn install(&self, _: &Sandbox, _: &[String], _: bool) -> ExecutionResult<i32> {
            Ok(self.install_code)
        }

        async fn get_requires_for_build(
            &self,
            _: &Sandbox,
            _: &str,
            _: BuildType,
            _: &Path,
        ) -> ExecutionResult<Vec<String>> {
            Ok(Vec::new())
        }

        async fn build(
            &self,
            _: &Sandbox,
            _: &str,
            _: BuildType,
            _: &Path,
            out_dir: &Path,
        ) -> ExecutionResult<PathBuf> {
            Ok(out_dir.join("pkg.whl"))
        }
    }

    fn params(dir: &Path, python: &str) -> ProvisionParams {
        ProvisionParams {
            recreate: false,
            dir: dir.to_path_buf(),
            name: "py36".to_string(),
            python_requirement: python.to_string(),
        }
    }

    fn manager() -> (Arc<CountingResolver>, Arc<DirBackend>, EnvManager) {
        let resolver = Arc::new(CountingResolver::default());
        let backend = Arc::new(DirBackend::default());
        let manager = EnvManager::new(resolver.clone(), backend.clone());
        (resolver, backend, manager)
    }

    #[test]
    fn test_cache_location() {
        let p = params(Path::new("/work"), "python3.6");
        assert_eq!(p.env_dir(), PathBuf::from("/work/py36"));
        assert_eq!(p.cache_file(), PathBuf::from("/work/py36/.py36.cache"));
    }

    #[tokio::test]
    async fn test_cache_hit() {
        let temp_dir = TempDir::new().unwrap();
        let (resolver, backend, manager) = manager();
        let p = params(temp_dir.path(), "python3.6");

        let first = manager.provision(&p).await.unwrap();
        let second = manager.provision(&p).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);
        assert_eq!(backend.created.load(Ordering::SeqCst), 1);
        assert!(p.cache_file().is_file());
    }

    #[tokio::test]
    async fn test_cache_invalidated_on_python_change() {
        let temp_dir = TempDir::new().unwrap();
        let (resolver, backend, manager) = manager();

        manager.provision(&params(temp_dir.path(), "python3.6")).await.unwrap();
        let marker = temp_dir.path().join("py36").join("marker");
        fs::write(&marker, "stale").unwrap();

        let env = manager
            .provision(&params(temp_dir.path(), "python3.7"))
            .await
            .unwrap();
        assert_eq!(env.interpreter.requirement, "python3.7");
        assert!(!marker.exists());
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 2);
        assert_eq!(backend.created.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_recreate_forces_new_sandbox() {
        let temp_dir = TempDir::new().unwrap();
        let (_resolver, backend, manager) = manager();
        let mut p = params(temp_dir.path(), "python3.6");

        manager.provision(&p).await.unwrap();
        p.recreate = true;
        manager.provision(&p).await.unwrap();
        assert_eq!(backend.created.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_corrupt_cache_is_replaced() {
        let temp_dir = TempDir::new().unwrap();
        let (_resolver, backend, manager) = manager();
        let p = params(temp_dir.path(), "python3.6");

        fs::create_dir_all(p.env_dir()).unwrap();
        fs::write(p.cache_file(), "{not json").unwrap();

        let env = manager.provision(&p).await.unwrap();
        assert_eq!(env.interpreter.requirement, "python3.6");
        assert_eq!(backend.created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_install_empty_is_noop() {
        let temp_dir = TempDir::new().unwrap();
        let resolver = Arc::new(CountingResolver::default());
        let backend = Arc::new(DirBackend {
            install_code: 1,
            ..DirBackend::default()
        });
        let manager = EnvManager::new(resolver, backend);
        let env = manager
            .provision(&params(temp_dir.path(), "python3.6"))
            .await
            .unwrap();

        manager.install(&env, "deps", &[], false).await.unwrap();
        let result = manager
            .install(&env, "deps", &["pytest".to_string()], false)
            .await;
        assert!(matches!(
            result,
            Err(ExecutionError::InstallFailed { ref batch, code: 1 }) if batch == "deps"
        ));
    }

    #[tokio::test]
    async fn test_remove_dir() {
        let temp_dir = TempDir::new().unwrap();
        let tree = temp_dir.path().join("env");
        fs::create_dir_all(tree.join("lib").join("site-packages")).unwrap();
        fs::write(tree.join("lib").join("marker"), "x").unwrap();

        remove_dir(&tree, "test").await.unwrap();
        assert!(!tree.exists());
        // Missing directories are fine
        remove_dir(&tree, "test").await.unwrap();
    }
}
