use anyhow::{Context, Result};
use directories::ProjectDirs;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

pub const DB_ENV: &str = "RUNZEN_DB";
pub const SECRET_ENV: &str = "RUNZEN_SECRET_KEY";

pub struct Config {
    pub db_path: PathBuf,
    pub data_dir: PathBuf,
}

impl Config {
    /// Resolve the data directory. `db_override` comes from `--db` or
    /// `RUNZEN_DB`.
    pub fn load(db_override: Option<PathBuf>) -> Result<Self> {
        let proj_dirs =
            ProjectDirs::from("", "", "runzen").context("Could not determine home directory")?;
        Self::in_dir(proj_dirs.data_dir().to_path_buf(), db_override)
    }

    fn in_dir(data_dir: PathBuf, db_override: Option<PathBuf>) -> Result<Self> {
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;
        let db_path = db_override.unwrap_or_else(|| data_dir.join("runzen.db"));
        Ok(Config { db_path, data_dir })
    }

    /// Token signing secret: `explicit` (from `--secret-key` or
    /// `RUNZEN_SECRET_KEY`) if non-empty, otherwise the persisted secret,
    /// generated on first use.
    pub fn token_secret(&self, explicit: Option<&str>) -> Result<String> {
        match explicit.map(str::trim) {
            Some(secret) if !secret.is_empty() => Ok(secret.to_string()),
            _ => load_or_create_secret(&self.data_dir.join("token_secret")),
        }
    }
}

fn load_or_create_secret(path: &Path) -> Result<String> {
    use rand::Rng;
    use std::fmt::Write;
    use std::io::Write as _;

    if path.exists() {
        let secret = std::fs::read_to_string(path).context("Failed to read token secret file")?;
        let secret = secret.trim().to_string();
        if !secret.is_empty() {
            return Ok(secret);
        }
    }

    let bytes: [u8; 32] = rand::rng().random();
    let secret = bytes
        .iter()
        .fold(String::with_capacity(64), |mut acc: String, b| {
            let _ = write!(acc, "{b:02x}");
            acc
        });
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path).context("Failed to create token secret file")?;
    // A pre-existing empty file keeps its old mode on open.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(std::fs::Permissions::from_mode(0o600))
            .context("Failed to set token secret file permissions")?;
    }
    file.write_all(secret.as_bytes()).context("Failed to write token secret file")?;
    tracing::info!(path = %path.display(), "generated token signing secret");
    Ok(secret)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_path_defaults_into_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("nested");
        let config = Config::in_dir(data_dir.clone(), None).unwrap();
        assert!(data_dir.is_dir());
        assert_eq!(config.db_path, data_dir.join("runzen.db"));

        let custom = dir.path().join("elsewhere.db");
        let config = Config::in_dir(data_dir, Some(custom.clone())).unwrap();
        assert_eq!(config.db_path, custom);
    }

    #[test]
    fn test_secret_is_generated_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token_secret");
        let first = load_or_create_secret(&path).unwrap();
        assert_eq!(first.len(), 64);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
        let second = load_or_create_secret(&path).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_explicit_secret_wins_over_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::in_dir(dir.path().to_path_buf(), None).unwrap();
        assert_eq!(config.token_secret(Some("  from-env ")).unwrap(), "from-env");
        assert!(!dir.path().join("token_secret").exists());

        let generated = config.token_secret(Some("   ")).unwrap();
        assert_eq!(generated.len(), 64);
        assert_eq!(config.token_secret(None).unwrap(), generated);
    }

    #[cfg(unix)]
    #[test]
    fn test_empty_secret_file_is_replaced_privately() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token_secret");
        std::fs::write(&path, "").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();

        let secret = load_or_create_secret(&path).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), secret);
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[cfg(unix)]
    #[test]
    fn test_secret_file_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token_secret");
        load_or_create_secret(&path).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
