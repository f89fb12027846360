use anyhow::{bail, Context};
use colored::Colorize;
use hc_client::HoneycombConfig;

use crate::cli::*;
use crate::scenarios::{self, Outcome, Scenario, SCENARIOS};

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(&cli)?;
    match cli.command {
        Command::List => cmd_list(cli.format),
        Command::Run(args) => cmd_run(args, &config, cli.format),
        Command::Config => cmd_config(&config, cli.format),
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<HoneycombConfig> {
    match &cli.config {
        Some(path) => HoneycombConfig::load(path)
            .with_context(|| format!("loading {}", path.display())),
        None => Ok(HoneycombConfig::default()),
    }
}

fn cmd_list(format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => {
            let listing: Vec<serde_json::Value> = SCENARIOS
                .iter()
                .map(|s| serde_json::json!({ "name": s.name, "description": s.description }))
                .collect();
            println!("{}", serde_json::to_string_pretty(&listing)?);
        }
        OutputFormat::Text => {
            let width = SCENARIOS.iter().map(|s| s.name.len()).max().unwrap_or(0);
            for s in SCENARIOS {
                println!("{}  {}", format!("{:width$}", s.name).bold(), s.description.dimmed());
            }
        }
    }
    Ok(())
}

fn select(names: &[String]) -> anyhow::Result<Vec<&'static Scenario>> {
    if names.is_empty() {
        return Ok(SCENARIOS.iter().collect());
    }
    names
        .iter()
        .map(|name| match scenarios::find(name) {
            Some(s) => Ok(s),
            None => bail!("unknown scenario '{name}' (see `hcsim list`)"),
        })
        .collect()
}

fn cmd_run(args: RunArgs, config: &HoneycombConfig, format: OutputFormat) -> anyhow::Result<()> {
    let selected = select(&args.names)?;
    let mut outcomes: Vec<Outcome> = Vec::with_capacity(selected.len());
    for scenario in selected {
        let outcome = scenario.run(config);
        if format == OutputFormat::Text {
            print_outcome(&outcome);
        }
        let failed = !outcome.passed;
        outcomes.push(outcome);
        if failed && args.fail_fast {
            break;
        }
    }

    let failures = outcomes.iter().filter(|o| !o.passed).count();
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&outcomes)?),
        OutputFormat::Text => {
            let summary = format!("{} passed, {} failed", outcomes.len() - failures, failures);
            if failures == 0 {
                println!("\n{} {}", "✓".green().bold(), summary);
            } else {
                println!("\n{} {}", "✗".red().bold(), summary);
            }
        }
    }
    if failures > 0 {
        bail!("{failures} scenario(s) failed");
    }
    Ok(())
}

fn print_outcome(outcome: &Outcome) {
    let mark = if outcome.passed { "✓".green().bold() } else { "✗".red().bold() };
    println!(
        "{} {} {}",
        mark,
        outcome.name.bold(),
        format!("({} ms)", outcome.elapsed_ms).dimmed()
    );
    if outcome.passed {
        println!("  {}", outcome.detail);
    } else {
        println!("  {}", outcome.detail.red());
    }
}

fn cmd_config(config: &HoneycombConfig, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(config)?),
        OutputFormat::Text => print!("{}", config.to_toml_string()?),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_all_when_empty() {
        assert_eq!(select(&[]).unwrap().len(), SCENARIOS.len());
    }

    #[test]
    fn select_rejects_unknown_names() {
        let err = select(&["double-delete".into(), "nope".into()]).unwrap_err();
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn run_selected_scenarios_succeeds() {
        let args = RunArgs {
            names: vec!["double-delete".into(), "dedup-store".into()],
            fail_fast: false,
        };
        assert!(cmd_run(args, &HoneycombConfig::default(), OutputFormat::Json).is_ok());
    }

    #[test]
    fn config_prints_in_both_formats() {
        let config = HoneycombConfig::default();
        assert!(cmd_config(&config, OutputFormat::Text).is_ok());
        assert!(cmd_config(&config, OutputFormat::Json).is_ok());
    }
}
