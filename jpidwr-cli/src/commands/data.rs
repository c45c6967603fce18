//! `jpidwr data` subcommands.

use std::time::Duration;

use clap::Subcommand;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use jpidwr::manager::Transport;
use jpidwr::{DataAccess, InstallStage};

use super::GlobalArgs;
use crate::error::CliError;

/// Data subcommands.
#[derive(Debug, Subcommand)]
pub enum DataCommands {
    /// Download and verify a release, then print its cache directory
    Download {
        /// Release tag, e.g. v0.3.0 (default: JPINFECT_DATA_VERSION or built-in)
        #[arg(long)]
        version: Option<String>,

        /// Re-download even if the release is already cached
        #[arg(long)]
        force: bool,
    },

    /// Print the cache directory of an installed release
    Path {
        /// Release tag
        #[arg(long)]
        version: Option<String>,
    },

    /// Re-hash an installed release against its recorded digests
    Verify {
        /// Release tag
        #[arg(long)]
        version: Option<String>,
    },

    /// List installed releases
    List,

    /// Delete an installed release
    Remove {
        /// Release tag
        #[arg(long)]
        version: String,
    },
}

/// Where command results are written.
pub trait Output {
    fn println(&self, line: &str);
}

/// Writes results to stdout.
pub struct ConsoleOutput;

impl Output for ConsoleOutput {
    fn println(&self, line: &str) {
        println!("{}", line);
    }
}

/// Run a data subcommand.
pub fn run(command: DataCommands, global: &GlobalArgs) -> Result<(), CliError> {
    let output = ConsoleOutput;

    match command {
        DataCommands::Download { version, force } => {
            let data = DataAccess::from_settings(global.settings(version))?;
            download(&data, force, &output)
        }
        DataCommands::Path { version } => {
            let data = DataAccess::from_settings(global.settings(version))?;
            path(&data, &output)
        }
        DataCommands::Verify { version } => {
            let data = DataAccess::from_settings(global.settings(version))?;
            verify(&data, &output)
        }
        DataCommands::List => {
            let data = DataAccess::from_settings(global.settings(None))?;
            list(&data, &output)
        }
        DataCommands::Remove { version } => {
            let data = DataAccess::from_settings(global.settings(Some(version)))?;
            remove(&data, &output)
        }
    }
}

/// Install the active release if needed and print its directory.
pub fn download<T: Transport>(
    data: &DataAccess<T>,
    force: bool,
    output: &dyn Output,
) -> Result<(), CliError> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner.set_message(format!("Checking cache for {}", data.version()));

    let progress = spinner.clone();
    let result = data.ensure_data_with_progress(
        force,
        Box::new(move |stage: InstallStage, _fraction: f64, message: &str| {
            progress.set_message(format!("{}: {}", stage.name(), message));
        }),
    );
    spinner.finish_and_clear();

    let dir = result?;
    tracing::debug!(version = %data.version(), path = %dir.display(), "Release ready");
    output.println(&dir.display().to_string());
    Ok(())
}

/// Print the directory of the active release without downloading.
pub fn path<T: Transport>(data: &DataAccess<T>, output: &dyn Output) -> Result<(), CliError> {
    let dir = data.manager().version_dir(data.version());
    if !data.is_complete() {
        return Err(CliError::NotInstalled {
            version: data.version().to_string(),
            path: dir,
        });
    }
    output.println(&dir.display().to_string());
    Ok(())
}

/// Re-verify the active release.
pub fn verify<T: Transport>(data: &DataAccess<T>, output: &dyn Output) -> Result<(), CliError> {
    if !data.is_complete() {
        return Err(CliError::NotInstalled {
            version: data.version().to_string(),
            path: data.manager().version_dir(data.version()),
        });
    }
    data.verify()?;
    output.println(&format!("{} {} verified", style("✓").green(), data.version()));
    Ok(())
}

/// List installed releases, oldest first.
pub fn list<T: Transport>(data: &DataAccess<T>, output: &dyn Output) -> Result<(), CliError> {
    let versions = data.manager().cached_versions()?;
    if versions.is_empty() {
        output.println(&format!(
            "No cached releases in {}",
            data.manager().store().root().display()
        ));
        return Ok(());
    }

    for version in versions {
        let dir = data.manager().version_dir(&version);
        output.println(&format!("{}\t{}", version, dir.display()));
    }
    Ok(())
}

/// Delete the active release.
pub fn remove<T: Transport>(data: &DataAccess<T>, output: &dyn Output) -> Result<(), CliError> {
    if data.manager().remove_version(data.version())? {
        output.println(&format!("Removed {}", data.version()));
    } else {
        output.println(&format!("{} is not installed", data.version()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use jpidwr::manager::{calculate_file_checksum, CompletionMarker, HttpTransport};
    use jpidwr::{DataConfig, VersionTag};
    use std::cell::RefCell;
    use std::collections::BTreeMap;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn access(root: &Path, version: &str) -> DataAccess<HttpTransport> {
        let config = DataConfig::new(VersionTag::parse(version).unwrap(), root)
            .with_base_url("http://127.0.0.1:9/unused")
            .unwrap();
        DataAccess::with_transport(config, HttpTransport::new().unwrap())
    }

    /// Collects results in memory.
    #[derive(Default)]
    struct BufferedOutput {
        lines: RefCell<Vec<String>>,
    }

    impl BufferedOutput {
        fn lines(&self) -> Vec<String> {
            self.lines.borrow().clone()
        }
    }

    impl Output for BufferedOutput {
        fn println(&self, line: &str) {
            self.lines.borrow_mut().push(line.to_string());
        }
    }

    /// Lay out an installed release by hand.
    fn install(root: &Path, version: &str, files: &[(&str, &[u8])]) {
        let dir = root.join("data").join(version);
        fs::create_dir_all(&dir).unwrap();
        let mut digests = BTreeMap::new();
        for (name, body) in files {
            let path = dir.join(name);
            fs::write(&path, body).unwrap();
            digests.insert(name.to_string(), calculate_file_checksum(&path).unwrap());
        }
        CompletionMarker {
            version: version.to_string(),
            archive_sha256: Some("0".repeat(64)),
            files: digests,
            installed_at_secs: 0,
        }
        .write_to(&dir)
        .unwrap();
    }

    #[test]
    fn test_path_requires_install() {
        let temp = TempDir::new().unwrap();
        let data = access(temp.path(), "v0.3.0");
        let output = BufferedOutput::default();

        let err = path(&data, &output).unwrap_err();
        assert!(matches!(err, CliError::NotInstalled { .. }));

        install(temp.path(), "v0.3.0", &[("bullet.parquet", b"rows")]);
        path(&data, &output).unwrap();
        assert_eq!(
            output.lines(),
            vec![temp.path().join("data").join("v0.3.0").display().to_string()]
        );
    }

    #[test]
    fn test_verify_reports_corruption() {
        let temp = TempDir::new().unwrap();
        install(temp.path(), "v0.3.0", &[("bullet.parquet", b"rows")]);
        let data = access(temp.path(), "v0.3.0");
        let output = BufferedOutput::default();

        verify(&data, &output).unwrap();
        assert!(output.lines()[0].contains("v0.3.0 verified"));

        fs::write(temp.path().join("data/v0.3.0/bullet.parquet"), b"changed").unwrap();
        let err = verify(&data, &output).unwrap_err();
        assert_eq!(err.exit_code(), 4);
    }

    #[test]
    fn test_list_and_remove() {
        let temp = TempDir::new().unwrap();
        install(temp.path(), "v0.10.0", &[("a.parquet", b"a")]);
        install(temp.path(), "v0.2.2", &[("a.parquet", b"a")]);
        let output = BufferedOutput::default();

        list(&access(temp.path(), "v0.3.0"), &output).unwrap();
        let lines = output.lines();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("v0.2.2\t"));
        assert!(lines[1].starts_with("v0.10.0\t"));

        let output = BufferedOutput::default();
        remove(&access(temp.path(), "v0.2.2"), &output).unwrap();
        remove(&access(temp.path(), "v0.2.2"), &output).unwrap();
        assert_eq!(output.lines(), vec!["Removed v0.2.2", "v0.2.2 is not installed"]);
    }

    #[test]
    fn test_list_empty_cache() {
        let temp = TempDir::new().unwrap();
        let output = BufferedOutput::default();
        list(&access(temp.path(), "v0.3.0"), &output).unwrap();
        assert!(output.lines()[0].starts_with("No cached releases"));
    }

    #[test]
    fn test_download_uses_existing_install_without_network() {
        let temp = TempDir::new().unwrap();
        install(temp.path(), "v0.3.0", &[("bullet.parquet", b"rows")]);
        let data = access(temp.path(), "v0.3.0");
        let output = BufferedOutput::default();

        download(&data, false, &output).unwrap();
        assert!(output.lines()[0].ends_with("v0.3.0"));
    }
}
