//! Health check for axp.
//!
//! Provides the `doctor` command: store connectivity, oracle reachability
//! and the effective settings, printed as a colored report.

use std::io::{self, Write};

use anyhow::{Context, Result};

use crate::config::Settings;
use crate::oracle::OllamaClient;
use crate::store::RecordStore;

// ANSI color codes for terminal output
const GREEN: &str = "\x1b[32m";
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";

/// Health status for a component.
#[derive(Debug, Clone, PartialEq)]
pub enum HealthStatus {
    /// Component is healthy
    Ok,
    /// Component has a warning but is functional
    Warning(String),
    /// Component is not functional
    Error(String),
}

impl HealthStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, HealthStatus::Ok)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, HealthStatus::Error(_))
    }
}

/// Record store health information.
#[derive(Debug)]
pub struct StoreHealth {
    pub status: HealthStatus,
    pub location: String,
}

/// Ollama connectivity information.
#[derive(Debug)]
pub struct OllamaHealth {
    pub status: HealthStatus,
    pub base_url: String,
    pub models: Vec<String>,
}

/// Everything the report shows.
#[derive(Debug)]
pub struct HealthReport {
    pub store: StoreHealth,
    pub ollama: OllamaHealth,
    pub settings: Settings,
}

impl HealthReport {
    /// True unless a component is unusable. Warnings still count as healthy.
    pub fn is_healthy(&self) -> bool {
        !self.store.status.is_error() && !self.ollama.status.is_error()
    }
}

// ============================================================================
// Health Check Functions
// ============================================================================

/// Performs all health checks and prints the report to stdout.
///
/// Returns whether every component is usable.
///
/// # Errors
///
/// Returns an error only if the report cannot be written.
pub fn run_health_checks(store: &dyn RecordStore, oracle: &OllamaClient, settings: &Settings) -> Result<bool> {
    let report = HealthReport {
        store: check_store_health(store),
        ollama: check_ollama_health(oracle, &settings.chat_model),
        settings: settings.clone(),
    };

    let stdout = io::stdout();
    let mut out = stdout.lock();
    write_health_report(&mut out, &report).context("Failed to write health report")?;

    Ok(report.is_healthy())
}

pub fn check_store_health(store: &dyn RecordStore) -> StoreHealth {
    let status = match store.verify_connection() {
        Ok(()) => HealthStatus::Ok,
        Err(e) => HealthStatus::Error(format!("Connection test failed: {}", e)),
    };

    StoreHealth {
        status,
        location: store.describe(),
    }
}

fn check_ollama_health(client: &OllamaClient, chat_model: &str) -> OllamaHealth {
    let base_url = client.base_url().to_string();

    match client.list_models() {
        Ok(models) => OllamaHealth {
            status: model_status(&models, chat_model),
            base_url,
            models,
        },
        Err(e) => OllamaHealth {
            status: HealthStatus::Error(format!("Connection failed: {}", e)),
            base_url,
            models: Vec::new(),
        },
    }
}

/// Checks the installed models against the configured chat model.
///
/// A configured name without a tag matches any tag of that model.
fn model_status(models: &[String], chat_model: &str) -> HealthStatus {
    if models.is_empty() {
        return HealthStatus::Warning("No models installed".to_string());
    }
    if chat_model.is_empty() {
        return HealthStatus::Warning("OLLAMA_MODEL is not set".to_string());
    }

    let installed = models.iter().any(|m| {
        m == chat_model || (!chat_model.contains(':') && m.split(':').next() == Some(chat_model))
    });
    if installed {
        HealthStatus::Ok
    } else {
        HealthStatus::Warning(format!("Model '{}' is not installed", chat_model))
    }
}

// ============================================================================
// Pretty Printing
// ============================================================================

fn status_symbol(status: &HealthStatus) -> &'static str {
    match status {
        HealthStatus::Ok => "\u{2713}",
        HealthStatus::Warning(_) => "!",
        HealthStatus::Error(_) => "\u{2717}",
    }
}

fn status_color(status: &HealthStatus) -> &'static str {
    match status {
        HealthStatus::Ok => GREEN,
        HealthStatus::Warning(_) => YELLOW,
        HealthStatus::Error(_) => RED,
    }
}

fn status_text(status: &HealthStatus, ok: &str) -> String {
    match status {
        HealthStatus::Ok => ok.to_string(),
        HealthStatus::Warning(w) => w.clone(),
        HealthStatus::Error(e) => e.clone(),
    }
}

pub fn write_health_report(out: &mut impl Write, report: &HealthReport) -> io::Result<()> {
    let HealthReport {
        store,
        ollama,
        settings,
    } = report;

    writeln!(out, "{}axp doctor{}", BOLD, RESET)?;
    writeln!(out)?;

    writeln!(out, "{}Record store{}", BOLD, RESET)?;
    writeln!(
        out,
        "  {}{}{} Connection: {}",
        status_color(&store.status),
        status_symbol(&store.status),
        RESET,
        status_text(&store.status, "OK")
    )?;
    writeln!(out, "    {}Location: {}{}", DIM, store.location, RESET)?;
    writeln!(out)?;

    writeln!(out, "{}Ollama{}", BOLD, RESET)?;
    writeln!(
        out,
        "  {}{}{} Status: {}",
        status_color(&ollama.status),
        status_symbol(&ollama.status),
        RESET,
        status_text(&ollama.status, "Connected")
    )?;
    if !ollama.base_url.is_empty() {
        writeln!(out, "    {}URL: {}{}", DIM, ollama.base_url, RESET)?;
    }
    if !ollama.models.is_empty() {
        let models_display = if ollama.models.len() > 3 {
            format!(
                "{}, ... ({} more)",
                ollama.models[..3].join(", "),
                ollama.models.len() - 3
            )
        } else {
            ollama.models.join(", ")
        };
        writeln!(out, "    {}Models: {}{}", DIM, models_display, RESET)?;
    }
    writeln!(out)?;

    writeln!(out, "{}Settings{}", BOLD, RESET)?;
    let chat_model = if settings.chat_model.is_empty() {
        "(unset)"
    } else {
        settings.chat_model.as_str()
    };
    writeln!(out, "  Chat model:        {}", chat_model)?;
    writeln!(out, "  Embedding model:   {}", settings.embedding_model)?;
    writeln!(out, "  Function policy:   {}", settings.function_policy)?;
    writeln!(out, "  Nearest default:   {}", settings.nearest_default)?;
    writeln!(out, "  Radius default:    {}", settings.radius_default)?;
    writeln!(out, "  Answer records:    {}", settings.answer_record_limit)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteRecordStore;
    use rusqlite::Connection;

    fn models(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_health_status_is_ok() {
        assert!(HealthStatus::Ok.is_ok());
        assert!(!HealthStatus::Warning("test".into()).is_ok());
        assert!(!HealthStatus::Error("test".into()).is_ok());
        assert!(HealthStatus::Error("test".into()).is_error());
    }

    #[test]
    fn model_status_accepts_untagged_name() {
        let installed = models(&["llama3.1:latest", "nomic-embed-text:latest"]);
        assert_eq!(model_status(&installed, "llama3.1"), HealthStatus::Ok);
        assert_eq!(model_status(&installed, "llama3.1:latest"), HealthStatus::Ok);
    }

    #[test]
    fn model_status_warns_for_missing_model() {
        let installed = models(&["llama3.1:latest"]);
        assert!(matches!(
            model_status(&installed, "qwen2.5:7b"),
            HealthStatus::Warning(w) if w.contains("qwen2.5:7b")
        ));
        assert!(matches!(model_status(&[], "llama3.1"), HealthStatus::Warning(_)));
        assert!(matches!(model_status(&installed, ""), HealthStatus::Warning(_)));
    }

    #[test]
    fn store_health_for_in_memory_database() {
        let store = SqliteRecordStore::from_connection(Connection::open_in_memory().unwrap());
        let health = check_store_health(&store);
        assert!(health.status.is_ok());
        assert_eq!(health.location, "sqlite::memory:");
    }

    #[test]
    fn report_lists_components_and_settings() {
        let report = HealthReport {
            store: StoreHealth {
                status: HealthStatus::Ok,
                location: "sqlite:/tmp/buildings.db".to_string(),
            },
            ollama: OllamaHealth {
                status: HealthStatus::Error("Connection failed: refused".to_string()),
                base_url: "http://localhost:11434".to_string(),
                models: Vec::new(),
            },
            settings: Settings::default(),
        };

        let mut out = Vec::new();
        write_health_report(&mut out, &report).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.contains("Location: sqlite:/tmp/buildings.db"));
        assert!(text.contains("Connection failed: refused"));
        assert!(text.contains("Function policy:   top_k:5"));
        assert!(text.contains("Chat model:        (unset)"));
        assert!(!report.is_healthy());
    }
}
