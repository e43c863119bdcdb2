use directories::ProjectDirs;
use std::path::{Path, PathBuf};

/// Get the configuration directory path
pub fn config_dir() -> Option<PathBuf> {
    ProjectDirs::from("com", "keymaster", "keymaster")
        .map(|proj_dirs| proj_dirs.config_dir().to_path_buf())
}

/// Get the path to the application config file
pub fn config_file() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("config.toml"))
}

/// Ensure the config directory exists with proper permissions
pub fn ensure_config_dir() -> std::io::Result<PathBuf> {
    let dir = config_dir().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "Could not determine config directory",
        )
    })?;
    create_private_dir(&dir)?;
    Ok(dir)
}

/// Get the log directory path
pub fn log_dir() -> Option<PathBuf> {
    if let Ok(raw) = std::env::var("KEYMASTER_LOG_DIR") {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        return Some(PathBuf::from(trimmed));
    }

    config_dir().map(|d| d.join("logs"))
}

/// Ensure the log directory exists with proper permissions
pub fn ensure_log_dir() -> std::io::Result<PathBuf> {
    if std::env::var_os("KEYMASTER_LOG_DIR").is_none() {
        ensure_config_dir()?;
    }

    let dir = log_dir().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "Could not determine log directory",
        )
    })?;
    create_private_dir(&dir)?;
    Ok(dir)
}

fn create_private_dir(dir: &Path) -> std::io::Result<()> {
    if !dir.exists() {
        std::fs::create_dir_all(dir)?;
        // Owner-only access on Unix
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))?;
        }
    }
    Ok(())
}

/// Get the user's home directory
fn dirs_home() -> Option<PathBuf> {
    // Try directories crate first, fall back to HOME env var
    directories::BaseDirs::new()
        .map(|dirs| dirs.home_dir().to_path_buf())
        .or_else(|| std::env::var("HOME").ok().map(PathBuf::from))
}

fn current_user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "root".to_string())
}

/// Filesystem locations and identity defaults the engine resolves against.
///
/// Built once at startup and handed to every component, so nothing below
/// the entry point goes looking at the environment on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    pub home_dir: PathBuf,
    pub ssh_dir: PathBuf,
    /// Tried in order when a host has no `IdentityFile`.
    pub default_identities: Vec<PathBuf>,
    pub user: String,
}

impl Paths {
    /// Paths rooted at an explicit home directory.
    pub fn with_home(home_dir: impl Into<PathBuf>, user: impl Into<String>) -> Self {
        let home_dir = home_dir.into();
        let ssh_dir = home_dir.join(".ssh");
        let default_identities = ["id_ed25519", "id_rsa", "id_ecdsa"]
            .iter()
            .map(|name| ssh_dir.join(name))
            .collect();
        Self {
            home_dir,
            ssh_dir,
            default_identities,
            user: user.into(),
        }
    }

    pub fn from_env() -> Self {
        let home = dirs_home().unwrap_or_else(|| PathBuf::from("."));
        Self::with_home(home, current_user())
    }

    /// Expand tilde in path (e.g., ~/.ssh/id_rsa -> /home/user/.ssh/id_rsa)
    pub fn expand_tilde(&self, path: &str) -> PathBuf {
        if path == "~" {
            return self.home_dir.clone();
        }
        match path.strip_prefix("~/") {
            Some(stripped) => self.home_dir.join(stripped),
            None => PathBuf::from(path),
        }
    }

    /// Expand `~` and anchor relative paths in the SSH directory.
    pub fn resolve_identity(&self, raw: &str) -> PathBuf {
        let cleaned = raw.trim_matches('"');
        let expanded = self.expand_tilde(cleaned);
        if expanded.is_absolute() {
            return expanded;
        }
        self.ssh_dir.join(expanded)
    }

    pub fn ssh_config_file(&self) -> PathBuf {
        self.ssh_dir.join("config")
    }

    pub fn known_hosts_file(&self) -> PathBuf {
        self.ssh_dir.join("known_hosts")
    }
}
