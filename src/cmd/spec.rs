//! Spec directory inspection: `convoy check` and `convoy plan`.

use anyhow::{Result, bail};
use convoy::template::{AppTemplate, TemplateRegistry};
use std::path::Path;

pub fn cmd_check(spec_dir: &Path) -> Result<()> {
    let registry = TemplateRegistry::load_dir(spec_dir)?;
    if registry.is_empty() {
        println!("No applications found in {}", spec_dir.display());
        return Ok(());
    }

    for template in registry.all() {
        let marker = if template.enabled {
            String::new()
        } else {
            format!(" {}", console::style("(disabled)").dim())
        };
        println!(
            "{} {} objects{}",
            console::style(&template.key).bold(),
            template.resources.len(),
            marker
        );
    }
    println!();
    println!("{} applications OK", registry.len());
    Ok(())
}

pub fn cmd_plan(spec_dir: &Path, app: Option<&str>) -> Result<()> {
    let registry = TemplateRegistry::load_dir(spec_dir)?;
    let templates: Vec<&AppTemplate> = match app {
        Some(key) => match registry.get(key) {
            Some(template) => vec![template],
            None => bail!("No application named '{}' in {}", key, spec_dir.display()),
        },
        None => registry.all().collect(),
    };

    for template in templates {
        println!("{}", console::style(&template.key).bold().cyan());
        println!("  1. Namespace {}-<instance id>", template.key);
        for (step, (phase, resources)) in template.by_phase().into_iter().enumerate() {
            let objects: Vec<String> = resources
                .iter()
                .map(|r| format!("{} {}", r.kind(), r.name()))
                .collect();
            println!("  {}. {}: {}", step + 2, phase, objects.join(", "));
        }
        println!();
    }
    Ok(())
}
