use std::path::{Component, Path, PathBuf};

use crate::error::{GatewayError, Result};
use crate::git::scanner::BARE_SUFFIX;

/// A validated, root-relative path to a bare repository.
///
/// Always ends in `.git`, never absolute, never contains `..`, and no
/// intermediate directory carries the bare suffix, so every repository created
/// through it is one the scanner can find again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryPath(PathBuf);

impl RepositoryPath {
    /// Joins name segments with `/`, appending `.git` when it is missing.
    pub fn from_segments<S: AsRef<str>>(segments: &[S]) -> Result<Self> {
        if segments.is_empty() {
            return Err(GatewayError::MissingRepositoryName);
        }

        let mut name = segments
            .iter()
            .map(AsRef::as_ref)
            .collect::<Vec<_>>()
            .join("/");
        if !name.ends_with(BARE_SUFFIX) {
            name.push_str(BARE_SUFFIX);
        }

        let invalid = |reason| GatewayError::InvalidRepositoryName {
            name: name.clone(),
            reason,
        };

        let mut normalized = PathBuf::new();
        for component in Path::new(&name).components() {
            match component {
                Component::Normal(part) => {
                    if part.to_string_lossy().starts_with('-') {
                        return Err(invalid("components may not start with '-'"));
                    }
                    normalized.push(part);
                }
                Component::CurDir => {}
                Component::ParentDir => {
                    return Err(invalid("parent directory references are not allowed"));
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(invalid("absolute paths are not allowed"));
                }
            }
        }

        let mut parts: Vec<String> = normalized
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        let file_name = match parts.pop() {
            Some(file_name) => file_name,
            None => return Err(invalid("empty repository name")),
        };
        if file_name == BARE_SUFFIX {
            return Err(invalid("empty repository name"));
        }
        if parts.iter().any(|p| p.ends_with(BARE_SUFFIX)) {
            return Err(invalid("repositories cannot be nested inside another repository"));
        }

        Ok(Self(normalized))
    }

    /// Validates the repository argument of a pack protocol request.
    ///
    /// Held to the same rules as a created name, so protocol commands can only
    /// reach repositories inside the root.
    pub fn from_request(raw: &str) -> Result<Self> {
        Self::from_segments(&[raw])
    }

    pub fn as_path(&self) -> &Path {
        &self.0
    }
}

impl AsRef<Path> for RepositoryPath {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}
