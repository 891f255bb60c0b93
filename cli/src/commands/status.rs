use anyhow::Result;
use serde::Serialize;
use tracing::debug;

use larder_core::{Client, SourceStatus, Table};

/// Checks every table with a one-row read and reports which path answered.
pub(crate) async fn cmd_status(client: &Client, json: bool) -> Result<()> {
    #[derive(Serialize)]
    struct Check {
        table: &'static str,
        ok: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    }

    #[derive(Serialize)]
    struct Report {
        mode: &'static str,
        checks: Vec<Check>,
        status: SourceStatus,
    }

    let mut checks = Vec::with_capacity(Table::ALL.len());
    for table in Table::ALL {
        let result = client.from(table.name()).select("id").limit(1).await;
        debug!(table = table.name(), ok = result.is_ok(), "checked table");
        checks.push(Check {
            table: table.name(),
            ok: result.is_ok(),
            error: result.err().map(|e| e.to_string()),
        });
    }

    let status = client.status();
    let mode = mode(&status);

    if json {
        let report = Report {
            mode,
            checks,
            status,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Mode: {mode}");
    for check in &checks {
        match &check.error {
            None => println!("  {:<20} ok", check.table),
            Some(e) => println!("  {:<20} {e}", check.table),
        }
    }
    println!(
        "\n  Served remotely: {}  |  From fallback: {}  |  Failed: {}",
        status.remote_served, status.fallback_served, status.failed
    );
    if let Some(d) = &status.last_degradation {
        println!(
            "  Last fallback: {} ({}) after {} attempt(s): {}",
            d.table,
            d.kind.as_str(),
            d.attempts,
            d.message
        );
    }
    Ok(())
}

fn mode(status: &SourceStatus) -> &'static str {
    if !status.remote_configured || status.prefer_fallback {
        "offline"
    } else if status.last_degradation.is_some() {
        "degraded"
    } else {
        "online"
    }
}
