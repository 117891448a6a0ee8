//! Resolves a secret from one of the three places an operator might put it.

use std::path::PathBuf;

use crate::error::SecretError;

/// A secret value, sourced from a literal, an environment variable, or a file.
///
/// Single-use: a `SecretSource` resolves once, at provider `init`, into a
/// plain `String` that the provider holds for its own lifetime.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecretSource {
    Literal(String),
    EnvVar(String),
    File(PathBuf),
}

pub struct SecretResolver;

impl SecretResolver {
    pub fn resolve(source: &SecretSource) -> Result<String, SecretError> {
        match source {
            SecretSource::Literal(value) => Ok(value.clone()),
            SecretSource::EnvVar(name) => std::env::var(name)
                .map_err(|_| SecretError::MissingEnvVar(name.clone())),
            SecretSource::File(path) => std::fs::read_to_string(path)
                .map(|s| s.trim_end_matches(['\n', '\r']).to_string())
                .map_err(|source| SecretError::FileRead {
                    path: path.display().to_string(),
                    source,
                }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_literal() {
        let out = SecretResolver::resolve(&SecretSource::Literal("s3cr3t".into())).unwrap();
        assert_eq!(out, "s3cr3t");
    }

    #[test]
    fn resolves_env_var() {
        std::env::set_var("WATCHER_TEST_SECRET", "from-env");
        let out =
            SecretResolver::resolve(&SecretSource::EnvVar("WATCHER_TEST_SECRET".into())).unwrap();
        assert_eq!(out, "from-env");
        std::env::remove_var("WATCHER_TEST_SECRET");
    }

    #[test]
    fn missing_env_var_errors() {
        std::env::remove_var("WATCHER_TEST_SECRET_MISSING");
        let err =
            SecretResolver::resolve(&SecretSource::EnvVar("WATCHER_TEST_SECRET_MISSING".into()))
                .unwrap_err();
        assert!(matches!(err, SecretError::MissingEnvVar(_)));
    }

    #[test]
    fn resolves_file_and_trims_trailing_newline() {
        let dir = tempfile_dir();
        let path = dir.join("secret.txt");
        std::fs::write(&path, "file-secret\n").unwrap();
        let out = SecretResolver::resolve(&SecretSource::File(path)).unwrap();
        assert_eq!(out, "file-secret");
    }

    fn tempfile_dir() -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("watcher-core-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }
}
