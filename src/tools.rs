use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::debug;

use crate::error::TabixError;

/// The external programs the concrete fetch and merge capabilities shell out to.
#[derive(Debug, Clone)]
pub struct ToolPaths {
    pub tabix: PathBuf,
    pub bgzip: PathBuf,
    pub bcftools: PathBuf,
}

/// Explicit tool locations, usually from the CLI or the config file.
#[derive(Debug, Clone, Default)]
pub struct ToolOverrides {
    pub tabix: Option<PathBuf>,
    pub bgzip: Option<PathBuf>,
    pub bcftools: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ToolInfo {
    pub tabix: Option<String>,
    pub bgzip: Option<String>,
    pub bcftools: Option<String>,
}

impl ToolPaths {
    /// Resolves each tool from the override, then `PATH_TO_<TOOL>`, then `PATH`.
    pub fn resolve(overrides: &ToolOverrides) -> Result<Self, TabixError> {
        Ok(Self {
            tabix: resolve_tool("tabix", overrides.tabix.as_deref())?,
            bgzip: resolve_tool("bgzip", overrides.bgzip.as_deref())?,
            bcftools: resolve_tool("bcftools", overrides.bcftools.as_deref())?,
        })
    }

    pub fn tool_info(&self) -> ToolInfo {
        ToolInfo {
            tabix: tool_version(&self.tabix, &["--version"]),
            bgzip: tool_version(&self.bgzip, &["--version"]),
            bcftools: tool_version(&self.bcftools, &["--version"]),
        }
    }
}

fn resolve_tool(name: &str, explicit: Option<&Path>) -> Result<PathBuf, TabixError> {
    if let Some(path) = explicit {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        return Err(TabixError::MissingTool(format!("{name} ({})", path.display())));
    }
    let env_var = format!("PATH_TO_{}", name.to_uppercase());
    if let Some(value) = std::env::var_os(&env_var) {
        let path = PathBuf::from(value);
        if path.exists() {
            return Ok(path);
        }
        return Err(TabixError::MissingTool(format!(
            "{name} ({env_var}={})",
            path.display()
        )));
    }
    find_in_path(name).ok_or_else(|| TabixError::MissingTool(name.to_string()))
}

pub fn find_in_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for path in std::env::split_paths(&path_var) {
        let exe = path.join(format!("{name}.exe"));
        if exe.exists() {
            return Some(exe);
        }
        let plain = path.join(name);
        if plain.exists() {
            return Some(plain);
        }
    }
    None
}

fn tool_version(path: &Path, args: &[&str]) -> Option<String> {
    let output = Command::new(path).args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    stdout
        .lines()
        .next()
        .map(|line| line.trim().to_string())
        .filter(|line| !line.is_empty())
}

/// Shell-style rendering of a command, for logs and `--dry-run`.
pub fn render_command(program: &Path, args: &[String]) -> String {
    std::iter::once(program.display().to_string())
        .chain(args.iter().map(|arg| quote_arg(arg)))
        .collect::<Vec<_>>()
        .join(" ")
}

fn quote_arg(arg: &str) -> String {
    if !arg.is_empty()
        && arg
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || "-_./:=@,+".contains(ch))
    {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

/// Runs a command to completion, returning stderr as the error on failure.
pub fn run_cmd(program: &Path, args: &[String]) -> Result<(), String> {
    debug!(command = %render_command(program, args), "running");
    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|err| format!("failed to start {}: {err}", program.display()))?;
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if stderr.is_empty() {
        Err(format!("command failed ({}): {}", output.status, program.display()))
    } else {
        Err(stderr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_commands_with_quoting() {
        let args = vec![
            "-h".to_string(),
            "ftp://host/a b.vcf.gz".to_string(),
            "it's".to_string(),
        ];
        assert_eq!(
            render_command(Path::new("/usr/bin/tabix"), &args),
            r"/usr/bin/tabix -h 'ftp://host/a b.vcf.gz' 'it'\''s'"
        );
    }

    #[test]
    fn explicit_missing_tool_is_reported() {
        let overrides = ToolOverrides {
            tabix: Some(PathBuf::from("/definitely/not/here/tabix")),
            ..ToolOverrides::default()
        };
        let err = ToolPaths::resolve(&overrides).unwrap_err();
        assert!(matches!(err, TabixError::MissingTool(ref name) if name.starts_with("tabix")));
    }
}
