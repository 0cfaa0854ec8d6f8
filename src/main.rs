//! # xfa-flow CLI
//!
//! Usage:
//!   xfa-flow template.json [data.json] [-o summary.json] [--config config.json]
//!   xfa-flow --example > template.json

use std::env;
use std::fs;
use std::process::ExitCode;

use xfa_flow::{config, FlowError, LayoutConfig};

fn main() -> ExitCode {
    let args: Vec<String> = env::args().skip(1).collect();

    if args.iter().any(|a| a == "--example") {
        print!("{}", example_template_json());
        return ExitCode::SUCCESS;
    }

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("✗ {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &[String]) -> Result<(), FlowError> {
    let option = |flag: &str| args.windows(2).find(|w| w[0] == flag).map(|w| w[1].clone());
    let output_path = option("-o");
    let config = match option("--config") {
        Some(path) => LayoutConfig::from_json(&fs::read_to_string(path)?)?,
        None => LayoutConfig::default(),
    };
    config::init_tracing(&config.log_filter);

    let mut positional = Vec::new();
    let mut skip = false;
    for arg in args {
        if skip {
            skip = false;
        } else if arg == "-o" || arg == "--config" {
            skip = true;
        } else if !arg.starts_with('-') {
            positional.push(arg.as_str());
        }
    }
    let Some(template_path) = positional.first() else {
        eprintln!("usage: xfa-flow template.json [data.json] [-o summary.json] [--config config.json]");
        return Ok(());
    };

    let template = fs::read_to_string(template_path)?;
    let data = positional.get(1).map(fs::read_to_string).transpose()?;
    let summary = xfa_flow::layout_json(&template, data.as_deref(), &config)?;
    let json = serde_json::to_string_pretty(&summary).map_err(|e| FlowError::parse("summary", e))?;

    match output_path {
        Some(path) => {
            fs::write(&path, &json)?;
            eprintln!("✓ {} page(s) written to {}", summary.page_count, path);
        }
        None => println!("{json}"),
    }
    for defect in &summary.defects {
        eprintln!("  warning: {defect}");
    }
    Ok(())
}

fn example_template_json() -> &'static str {
    r##"{
  "element": "subform",
  "name": "invoice",
  "layout": "tb",
  "children": [
    {
      "element": "pageSet",
      "children": [
        {
          "element": "pageArea",
          "name": "page",
          "medium": { "short": "8.5in", "long": "11in" },
          "children": [
            { "element": "contentArea", "name": "body", "x": "0.5in", "y": "0.75in", "w": "7.5in", "h": "9.5in" },
            { "element": "draw", "name": "footer", "x": "0.5in", "y": "10.4in", "w": "7.5in", "h": "0.3in", "value": "Acme Corp" }
          ]
        }
      ]
    },
    {
      "element": "subform",
      "name": "header",
      "layout": "tb",
      "children": [
        { "element": "draw", "name": "title", "w": "7.5in", "h": "0.5in", "value": "INVOICE" },
        { "element": "field", "name": "customer", "w": "4in", "h": "0.3in" }
      ]
    },
    {
      "element": "subform",
      "name": "item",
      "layout": "lr-tb",
      "w": "7.5in",
      "occur": { "min": 0, "max": -1 },
      "children": [
        { "element": "field", "name": "description", "w": "5in", "h": "0.3in" },
        { "element": "field", "name": "amount", "w": "2.5in", "h": "0.3in" }
      ]
    },
    {
      "element": "subform",
      "name": "totals",
      "keep": { "previous": "contentArea" },
      "children": [
        { "element": "field", "name": "total", "w": "2.5in", "h": "0.3in", "x": "5in" }
      ]
    }
  ]
}
"##
}
