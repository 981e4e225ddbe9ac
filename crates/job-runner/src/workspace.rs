use std::fs;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::JobError;

/// Host directory bind-mounted into the container.
///
/// Owned by a single job for its lifetime; concurrent jobs must use distinct
/// workspaces.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    /// Ensures `dir` exists, creating parents as needed. Preparing an existing
    /// directory is a no-op. A directory created here is opened up so the
    /// container user can write its results regardless of UID.
    pub fn prepare(dir: impl AsRef<Path>) -> Result<Self, JobError> {
        let dir = dir.as_ref();
        let created = !dir.exists();

        fs::create_dir_all(dir).map_err(|source| JobError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        #[cfg(unix)]
        {
            if created {
                fs::set_permissions(dir, fs::Permissions::from_mode(0o777)).map_err(
                    |source| JobError::Io {
                        path: dir.to_path_buf(),
                        source,
                    },
                )?;
            }
        }

        let root = fs::canonicalize(dir).map_err(|source| JobError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        debug!(workspace = %root.display(), created, "workspace ready");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Copies `source` into the workspace root unmodified and returns its path
    /// relative to the workspace.
    pub fn stage(&self, source: impl AsRef<Path>) -> Result<PathBuf, JobError> {
        let source = source.as_ref();
        let file_name = source.file_name().ok_or_else(|| JobError::Io {
            path: source.to_path_buf(),
            source: std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "source has no file name",
            ),
        })?;

        if !source.is_file() {
            return Err(JobError::Io {
                path: source.to_path_buf(),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "payload source does not exist or is not a file",
                ),
            });
        }

        let destination = self.root.join(file_name);
        if self.already_staged(source, &destination)? {
            debug!(path = %destination.display(), "payload already in workspace");
            return Ok(PathBuf::from(file_name));
        }

        fs::copy(source, &destination).map_err(|source| JobError::Io {
            path: destination.clone(),
            source,
        })?;

        debug!(
            from = %source.display(),
            to = %destination.display(),
            "staged file into workspace"
        );
        Ok(PathBuf::from(file_name))
    }

    /// Copying a file onto itself truncates it, so a source that already is
    /// the destination is left alone.
    fn already_staged(&self, source: &Path, destination: &Path) -> Result<bool, JobError> {
        if !destination.exists() {
            return Ok(false);
        }
        let canonical = |path: &Path| {
            fs::canonicalize(path).map_err(|err| JobError::Io {
                path: path.to_path_buf(),
                source: err,
            })
        };
        Ok(canonical(source)? == canonical(destination)?)
    }

    /// Stages several inputs in order, stopping at the first failure.
    pub fn stage_all<I, P>(&self, sources: I) -> Result<Vec<PathBuf>, JobError>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        sources.into_iter().map(|source| self.stage(source)).collect()
    }

    /// Host-side location of an artifact the payload wrote into the mount.
    pub fn artifact(&self, name: impl AsRef<Path>) -> PathBuf {
        self.root.join(name)
    }
}

/// Ensures `dest` exists and copies the payload into it.
pub fn stage_payload(
    source: impl AsRef<Path>,
    dest: impl AsRef<Path>,
) -> Result<(Workspace, PathBuf), JobError> {
    let workspace = Workspace::prepare(dest)?;
    let staged = workspace.stage(source)?;
    Ok((workspace, staged))
}
