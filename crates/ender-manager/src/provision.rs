//! Working-tree provisioning helpers
//!
//! Path containment, `server.properties` handling, start-script and EULA
//! generation, atomic file replacement and directory sizing. Everything here
//! operates strictly inside an instance's working tree.

use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use ender_store::ServerSettings;

use crate::error::{ManagerError, Result};

/// RCON port inside the container, written into `server.properties`.
pub const RCON_PORT_PROPERTY: &str = "25575";

/// Join `user_path` under `root`, rejecting any traversal out of it.
///
/// Leading separators are treated as relative; `..` components may not
/// escape the root. The returned path always has `root` as a prefix.
pub fn safe_join(root: &Path, user_path: &str) -> Result<PathBuf> {
    let mut joined = root.to_path_buf();
    let mut depth: usize = 0;

    for component in Path::new(user_path).components() {
        match component {
            Component::Normal(part) => {
                joined.push(part);
                depth += 1;
            }
            Component::ParentDir => {
                if depth == 0 {
                    return Err(ManagerError::InvalidInput(
                        "invalid path: access denied".to_string(),
                    ));
                }
                joined.pop();
                depth -= 1;
            }
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
        }
    }

    if !joined.starts_with(root) {
        return Err(ManagerError::InvalidInput(
            "invalid path: access denied".to_string(),
        ));
    }
    Ok(joined)
}

/// Parse `key=value` properties, skipping comments and blank lines.
pub fn parse_properties(content: &str) -> ServerSettings {
    let mut settings = ServerSettings::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            settings.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    settings
}

/// Render properties back to `key=value` lines.
pub fn serialize_properties(settings: &ServerSettings) -> String {
    let mut out = String::new();
    for (key, value) in settings {
        out.push_str(key);
        out.push('=');
        out.push_str(value);
        out.push('\n');
    }
    out
}

/// Read/merge/write `server.properties` so the remote console is enabled
/// with the instance's generated password on the fixed internal port.
pub fn ensure_rcon_in_properties(path: &Path, rcon_password: &str) -> Result<()> {
    let mut props = match fs::read_to_string(path) {
        Ok(content) => parse_properties(&content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => ServerSettings::new(),
        Err(e) => return Err(e.into()),
    };

    props.insert("enable-rcon".to_string(), "true".to_string());
    props.insert("rcon.password".to_string(), rcon_password.to_string());
    props.insert("rcon.port".to_string(), RCON_PORT_PROPERTY.to_string());

    fs::write(path, serialize_properties(&props))?;
    Ok(())
}

/// Write `start.sh`: shell entrypoints are made executable and invoked;
/// anything else is launched with the JVM and derived memory flags.
pub fn write_start_script(data_path: &Path, entrypoint: &str, max_memory_mb: i64) -> Result<()> {
    let content = if entrypoint.to_ascii_lowercase().ends_with(".sh") {
        format!("#!/bin/sh\nchmod +x ./{entrypoint}\n./{entrypoint}\n")
    } else {
        format!("#!/bin/sh\njava -Xmx{max_memory_mb}M -Xms1024M -jar {entrypoint} nogui\n")
    };
    write_script(data_path, &content)
}

/// Write `start.sh` from an explicit command line (template-provided).
pub fn write_start_script_command(data_path: &Path, command: &str) -> Result<()> {
    write_script(data_path, &format!("#!/bin/sh\n{command}\n"))
}

fn write_script(data_path: &Path, content: &str) -> Result<()> {
    let path = data_path.join("start.sh");
    fs::write(&path, content)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755))?;
    }
    Ok(())
}

/// Write the engine-acceptance marker.
pub fn write_eula(data_path: &Path) -> Result<()> {
    fs::write(data_path.join("eula.txt"), "eula=true\n")?;
    Ok(())
}

/// Replace a file's contents atomically (temp file + rename in the same
/// directory).
pub fn write_file_atomic(path: &Path, content: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| ManagerError::InvalidInput("path has no parent".to_string()))?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(content)?;
    tmp.persist(path)
        .map_err(|e| ManagerError::Io(e.error))?;
    Ok(())
}

/// Total size in bytes of all regular files under `path`.
pub fn dir_size(path: &Path) -> u64 {
    walkdir::WalkDir::new(path)
        .follow_links(false)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.metadata().ok())
        .map(|meta| meta.len())
        .sum()
}

/// Remove every top-level entry of a directory, keeping the directory.
pub fn clear_dir(path: &Path) -> Result<()> {
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        let entry_path = entry.path();
        if entry.file_type()?.is_dir() {
            fs::remove_dir_all(&entry_path)?;
        } else {
            fs::remove_file(&entry_path)?;
        }
    }
    Ok(())
}
