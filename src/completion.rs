//! Bash completion script generator.
//!
//! Completes subcommands and their flags; after a flag that takes a value the
//! choices (for enumerations) or the current configuration value are offered.

use crate::config::ScanConfig;
use crate::error::AppResult;
use clap::{Arg, Command};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Default script location (`~/complete_tomoscan.sh`).
pub fn default_output() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("complete_tomoscan.sh")
}

fn flag(arg: &Arg) -> Option<String> {
    arg.get_long().map(|long| format!("--{long}"))
}

fn takes_value(arg: &Arg) -> bool {
    arg.get_num_args().map_or(false, |n| n.takes_values())
        || arg.get_action().takes_values()
}

fn suggestions(arg: &Arg, current: &HashMap<String, String>) -> String {
    let choices: Vec<String> = arg
        .get_possible_values()
        .iter()
        .filter(|v| !v.is_hide_set())
        .map(|v| v.get_name().to_string())
        .collect();
    if !choices.is_empty() {
        return choices.join(" ");
    }
    current
        .get(arg.get_id().as_str())
        .filter(|v| v.as_str() != "None")
        .map(|v| v.replace(['"', '\''], ""))
        .unwrap_or_default()
}

/// Render the completion script for `cmd`, suggesting values from `config`.
pub fn bash_script(cmd: &Command, config: &ScanConfig) -> AppResult<String> {
    let name = cmd.get_name().to_string();
    let current: HashMap<String, String> = config
        .entries()?
        .into_iter()
        .map(|e| (e.key, e.value))
        .collect();

    let globals: Vec<&Arg> = cmd.get_arguments().filter(|a| a.is_global_set()).collect();
    let global_flags: Vec<String> = globals.iter().filter_map(|a| flag(a)).collect();
    let subcommands: Vec<&Command> = cmd.get_subcommands().collect();
    let sub_names: Vec<&str> = subcommands.iter().map(|s| s.get_name()).collect();

    // Value suggestions per flag, first definition wins.
    let mut value_cases: Vec<(String, String)> = Vec::new();
    let all_args = globals
        .iter()
        .copied()
        .chain(subcommands.iter().flat_map(|s| s.get_arguments()));
    for arg in all_args {
        let Some(long) = flag(arg) else { continue };
        if !takes_value(arg) || value_cases.iter().any(|(f, _)| *f == long) {
            continue;
        }
        value_cases.push((long, suggestions(arg, &current)));
    }

    let func = format!("_{}", name.replace('-', "_"));
    let mut lines: Vec<String> = vec![
        "#!/usr/bin/env bash".into(),
        format!("{func}()"),
        "{".into(),
        "    local cur prev opts sub w".into(),
        "    COMPREPLY=()".into(),
        "    cur=\"${COMP_WORDS[COMP_CWORD]}\"".into(),
        "    prev=\"${COMP_WORDS[COMP_CWORD-1]}\"".into(),
        "    sub=\"\"".into(),
        "    for w in \"${COMP_WORDS[@]:1:COMP_CWORD-1}\"; do".into(),
        "        case \"$w\" in".into(),
        format!("            {}) sub=\"$w\"; break ;;", sub_names.join("|")),
        "        esac".into(),
        "    done".into(),
        String::new(),
        "    case \"${prev}\" in".into(),
    ];
    for (long, values) in &value_cases {
        lines.push(format!("        {long})"));
        lines.push(format!("            opts=\"{values}\""));
        lines.push("            COMPREPLY=( $(compgen -W \"${opts}\" -- ${cur}) )".into());
        lines.push("            return 0 ;;".into());
    }
    lines.push("    esac".into());
    lines.push(String::new());
    lines.push("    case \"${sub}\" in".into());
    lines.push(format!(
        "        \"\") opts=\"{} {}\" ;;",
        sub_names.join(" "),
        global_flags.join(" ")
    ));
    for sub in &subcommands {
        let flags: Vec<String> = sub
            .get_arguments()
            .filter_map(flag)
            .chain(global_flags.iter().cloned())
            .collect();
        lines.push(format!("        {}) opts=\"{}\" ;;", sub.get_name(), flags.join(" ")));
    }
    lines.push("    esac".into());
    lines.push("    COMPREPLY=( $(compgen -W \"${opts}\" -- ${cur}) )".into());
    lines.push("    return 0".into());
    lines.push("}".into());
    lines.push(format!("complete -F {func} {name}"));

    let mut out = lines.join("\n");
    out.push('\n');
    Ok(out)
}

/// Write the script to `path`.
pub fn write_script(cmd: &Command, config: &ScanConfig, path: &Path) -> AppResult<()> {
    let script = bash_script(cmd, config)?;
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, script)?;
    tracing::info!(
        path = %path.display(),
        "completion script written; enable it with: source {}",
        path.display()
    );
    Ok(())
}
