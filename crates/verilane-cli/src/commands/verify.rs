//! Verify and flush-cache commands

use crate::Format;
use std::path::Path;
use tracing::warn;
use verilane::{Controller, Notification, SessionSettings, StateChange, VerificationState};

fn backend_name(settings: &SessionSettings, requested: Option<&str>) -> Result<String, Box<dyn std::error::Error>> {
    match requested {
        Some(name) => Ok(name.to_string()),
        None => settings
            .backends
            .first()
            .map(|b| b.name.clone())
            .ok_or_else(|| "No backends are configured".into()),
    }
}

/// Verify `file` and print what the backend reported. Returns whether the
/// verification succeeded.
pub async fn run_verify(
    settings: SessionSettings,
    file: &Path,
    backend: Option<&str>,
    format: Format,
) -> Result<bool, Box<dyn std::error::Error>> {
    let backend = backend_name(&settings, backend)?;
    let (controller, mut rx) = Controller::new(settings);
    controller.select_backend(&backend).await?;

    let file_id = file.display().to_string();
    controller.verify(&file_id, true).await?;

    let mut finished: Option<StateChange> = None;
    while let Some(notification) = rx.recv().await {
        match &notification {
            Notification::Hint { message } => eprintln!("{message}"),
            Notification::Diagnostics { diagnostics, .. } if format == Format::Text => {
                for d in diagnostics {
                    println!("{}:{}: {}", file.display(), d.range.start, d.message);
                }
            }
            _ => {}
        }
        if format == Format::Json {
            println!("{}", serde_json::to_string(&notification)?);
        }
        if let Notification::StateChange(change) = notification {
            if change.new_state == VerificationState::Ready && change.success.is_some() {
                finished = Some(change);
                break;
            }
        }
    }

    if let Err(e) = controller.stop_backend().await {
        warn!("Stopping backend failed: {}", e);
    }
    let Some(change) = finished else {
        return Err("Verification ended without a result".into());
    };
    if format == Format::Text {
        println!(
            "{}: {:?} ({} errors, {:.2}s)",
            file.display(),
            change.success,
            change.error_count.unwrap_or(0),
            change.time.unwrap_or(0.0)
        );
    }
    Ok(change.success.is_some_and(verilane::Outcome::is_success))
}

pub async fn run_flush_cache(
    settings: SessionSettings,
    file: Option<&Path>,
    backend: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let backend = backend_name(&settings, backend)?;
    let (controller, _rx) = Controller::new(settings);
    controller.select_backend(&backend).await?;
    let file_id = file.map(|f| f.display().to_string());
    let result = controller.flush_cache(file_id.as_deref()).await;
    if let Err(e) = controller.stop_backend().await {
        warn!("Stopping backend failed: {}", e);
    }
    println!("{}", result?);
    Ok(())
}
