use std::path::{Path, PathBuf};

use gridline_core::audit_trail::FileAuditTrail;
use gridline_core::settings::{default_config_dir, FileSettingsStore, GridSettings};
use gridline_tui::{TuiError, TuiOptions};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "GRIDLINE_LOG";
const LOG_FILE: &str = "gridline.log";

/// The terminal owns stdout, so logs go to a file in the config directory.
fn init_logging(log_dir: &Path) -> WorkerGuard {
    let file_appender = tracing_appender::rolling::never(log_dir, LOG_FILE);
    let (writer, guard) = tracing_appender::non_blocking(file_appender);
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true)
        .init();
    guard
}

fn load_options(settings: Option<GridSettings>, export_dir: PathBuf) -> TuiOptions {
    let settings = settings.unwrap_or_else(|| match FileSettingsStore::load_default() {
        Ok(store) => *store.settings(),
        Err(error) => {
            warn!(%error, "settings unavailable, using defaults");
            GridSettings::default()
        }
    });

    let journal = if settings.audit_applied_changes {
        match FileAuditTrail::load_default() {
            Ok(journal) => Some(journal),
            Err(error) => {
                warn!(%error, "apply journal disabled");
                None
            }
        }
    } else {
        None
    };

    TuiOptions {
        settings,
        export_dir,
        journal,
    }
}

fn run_app(
    options: TuiOptions,
    run_tui: impl FnOnce(TuiOptions) -> Result<(), TuiError>,
) -> Result<(), Box<dyn std::error::Error>> {
    info!(
        core = gridline_core::domain_name(),
        adapters = gridline_adapters::adapter_name(),
        ui = gridline_tui::ui_name(),
        export_dir = %options.export_dir.display(),
        journal = options.journal.is_some(),
        "starting grid session"
    );
    run_tui(options)?;
    info!("grid session closed");
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config_dir = default_config_dir()?;
    std::fs::create_dir_all(&config_dir)?;
    let _guard = init_logging(&config_dir);

    let export_dir = std::env::current_dir()?;
    run_app(load_options(None, export_dir), gridline_tui::run)
}

#[cfg(test)]
mod tests {
    use std::io;

    use gridline_core::settings::GridSettings;
    use gridline_tui::{TuiError, TuiOptions};
    use tempfile::TempDir;

    use super::{load_options, run_app};

    fn options(temp_dir: &TempDir) -> TuiOptions {
        TuiOptions {
            settings: GridSettings::default(),
            export_dir: temp_dir.path().to_path_buf(),
            journal: None,
        }
    }

    #[test]
    fn run_app_hands_options_to_the_runner() {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let expected = temp_dir.path().to_path_buf();
        let result = run_app(options(&temp_dir), |options| {
            assert_eq!(options.export_dir, expected);
            Ok(())
        });
        assert!(result.is_ok());
    }

    #[test]
    fn run_app_propagates_tui_errors() {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let result = run_app(options(&temp_dir), |_| {
            Err(TuiError::Io(io::Error::other("boom")))
        });
        assert!(result.is_err());
    }

    #[test]
    fn journal_is_skipped_when_auditing_is_off() {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let settings = GridSettings {
            audit_applied_changes: false,
            ..GridSettings::default()
        };
        let options = load_options(Some(settings), temp_dir.path().to_path_buf());
        assert!(options.journal.is_none());
        assert!(!options.settings.audit_applied_changes);
    }
}
