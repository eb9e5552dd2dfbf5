use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use crate::logging::{log, obj, v_str, Domain, Level};

/// Where the active token came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenSource {
    Argument,
    Link,
    Environment,
    File,
}

impl TokenSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenSource::Argument => "argument",
            TokenSource::Link => "link",
            TokenSource::Environment => "environment",
            TokenSource::File => "file",
        }
    }
}

/// Bearer token kept in a single file under the user's config directory.
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn default_path() -> PathBuf {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        Path::new(&home).join(".config").join("nodewatch").join("token")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Option<String>> {
        match fs::read_to_string(&self.path) {
            Ok(s) => {
                let tok = s.trim();
                Ok((!tok.is_empty()).then(|| tok.to_string()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("reading {}", self.path.display())),
        }
    }

    pub fn save(&self, token: &str) -> Result<()> {
        let token = token.trim();
        if token.is_empty() {
            bail!("Paste a token first.");
        }
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        }
        fs::write(&self.path, format!("{}\n", token))
            .with_context(|| format!("writing {}", self.path.display()))?;
        restrict_permissions(&self.path)?;
        log(
            Level::Info,
            Domain::System,
            "token_saved",
            obj(&[("path", v_str(&self.path.display().to_string()))]),
        );
        Ok(())
    }

    /// Remove the stored token; returns whether one existed.
    pub fn clear(&self) -> Result<bool> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e).with_context(|| format!("removing {}", self.path.display())),
        }
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
        .with_context(|| format!("chmod {}", path.display()))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

/// Extract `token=...` from the fragment of a dashboard link
/// (`https://host/page#token=abc` or `...#dev=x&token=abc`).
pub fn token_from_link(link: &str) -> Option<String> {
    let (_, fragment) = link.split_once('#')?;
    // '+' is literal in a fragment, not a space
    let fragment = fragment.replace('+', "%2B");
    url::form_urlencoded::parse(fragment.as_bytes())
        .find(|(k, _)| k == "token")
        .map(|(_, v)| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Pick the token to use. A token taken from a link is also persisted.
pub fn resolve_token(
    argument: Option<&str>,
    link: Option<&str>,
    env: Option<String>,
    store: &TokenStore,
) -> Result<Option<(String, TokenSource)>> {
    if let Some(tok) = argument.map(str::trim).filter(|t| !t.is_empty()) {
        return Ok(Some((tok.to_string(), TokenSource::Argument)));
    }
    if let Some(tok) = link.and_then(token_from_link) {
        store.save(&tok)?;
        return Ok(Some((tok, TokenSource::Link)));
    }
    if let Some(tok) = env.map(|t| t.trim().to_string()).filter(|t| !t.is_empty()) {
        return Ok(Some((tok, TokenSource::Environment)));
    }
    Ok(store.load()?.map(|t| (t, TokenSource::File)))
}

/// Show only the ends of a token.
pub fn mask(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}...{}", head, tail)
}
