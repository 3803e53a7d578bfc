//! Offline inspection of persisted execution logs

use crate::Format;
use std::path::Path;
use verilane_trace::{decorations, read_log, ExecutionTrace, Navigator, StepType, Theme};

fn load(log: &Path) -> Result<ExecutionTrace, Box<dyn std::error::Error>> {
    if !log.exists() {
        return Err(format!("Execution log not found: {}", log.display()).into());
    }
    Ok(ExecutionTrace::build(&read_log(log)?)?)
}

pub fn run_trace(
    log: &Path,
    show_decorations: bool,
    theme: Theme,
    format: Format,
) -> Result<(), Box<dyn std::error::Error>> {
    let trace = load(log)?;
    if show_decorations {
        let decorations = decorations(&trace, theme);
        match format {
            Format::Json => println!("{}", serde_json::to_string_pretty(&decorations)?),
            Format::Text => {
                for d in &decorations {
                    println!("{} {}", d.label(), d.hover_text.lines().next().unwrap_or_default());
                }
            }
        }
        return Ok(());
    }
    match format {
        Format::Json => {
            let units: Vec<_> = trace
                .units()
                .iter()
                .map(|u| serde_json::json!({"name": u.name, "kind": u.kind.to_string(), "records": u.end_index - u.start_index + 1}))
                .collect();
            println!("{}", serde_json::to_string_pretty(&units)?);
        }
        Format::Text => print!("{}", trace.outline()),
    }
    Ok(())
}

pub fn run_step(
    log: &Path,
    from: usize,
    step: StepType,
    advanced: bool,
    format: Format,
) -> Result<(), Box<dyn std::error::Error>> {
    let trace = load(log)?;
    let navigator = if advanced {
        Navigator::Advanced
    } else {
        Navigator::simple(&trace, from)
    };
    let target = navigator
        .step(&trace, from, step)
        .ok_or_else(|| format!("No record with client index {from}"))?;
    let graph = trace.heap_graph(target.client_index);
    match format {
        Format::Json => println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({"move": target, "heapGraph": graph}))?
        ),
        Format::Text => {
            println!("{} -> {} at {}", from, target.client_index, target.position);
            if let Some(graph) = graph {
                print!("{}", graph.state_info);
            }
        }
    }
    Ok(())
}
