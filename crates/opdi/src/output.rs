use std::io::IsTerminal;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use opdi_port::PortDescriptor;
use opdi_protocol::DeviceCapabilities;
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct PortRow<'a> {
    id: &'a str,
    port_type: &'static str,
    label: &'a str,
    readonly: bool,
    details: String,
}

fn details(descriptor: &PortDescriptor) -> String {
    match descriptor {
        PortDescriptor::Digital { dircaps, flags, .. }
        | PortDescriptor::Analog { dircaps, flags, .. } => {
            format!("dircaps={} flags={flags:#x}", dircaps.as_wire())
        }
        PortDescriptor::Select { count, labels, .. } => {
            if labels.is_empty() {
                format!("{count} positions")
            } else {
                format!("{count} positions: {}", labels.join(", "))
            }
        }
        PortDescriptor::Dial { min, max, step, .. } => {
            format!("range {min}..={max} step {step}")
        }
        PortDescriptor::Streaming { driver_id, .. } => format!("driver {driver_id}"),
    }
}

pub fn print_capabilities(caps: &DeviceCapabilities, format: OutputFormat) {
    let rows: Vec<PortRow> = caps
        .ports()
        .iter()
        .map(|descriptor| PortRow {
            id: descriptor.id(),
            port_type: descriptor.type_name(),
            label: descriptor.label(),
            readonly: descriptor.readonly(),
            details: details(descriptor),
        })
        .collect();

    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(&rows).unwrap_or_else(|_| "[]".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["ID", "TYPE", "LABEL", "RO", "DETAILS"]);
            for row in &rows {
                table.add_row(vec![
                    row.id.to_string(),
                    row.port_type.to_string(),
                    row.label.to_string(),
                    if row.readonly { "yes" } else { "" }.to_string(),
                    row.details.clone(),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for row in &rows {
                println!(
                    "{} ({}) '{}'{} — {}",
                    row.id,
                    row.port_type,
                    row.label,
                    if row.readonly { " [readonly]" } else { "" },
                    row.details
                );
            }
        }
    }
}

/// The decoded state of one port, for display.
#[derive(Serialize)]
pub struct StateReport {
    pub port: String,
    pub port_type: &'static str,
    pub state: serde_json::Value,
}

pub fn print_state(report: &StateReport, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(report).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["PORT", "TYPE", "STATE"]);
            table.add_row(vec![
                report.port.clone(),
                report.port_type.to_string(),
                report.state.to_string(),
            ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!("{} ({}): {}", report.port, report.port_type, report.state);
        }
    }
}
