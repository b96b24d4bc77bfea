//! Thin CLI layer: parse args, styled output, and call into tinypm-core.
//! Panics are caught and reported; all errors return Result.

use clap::{Arg, ArgAction, ArgMatches, Command};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::env;
use std::io::IsTerminal;

use tinypm_core::utils::split_spec;
use tinypm_core::{
    find_manifest, install_plan, load_config, resolve_manifest, DepKind, FileLockBackend,
    HttpRegistry, LockStore, ResolveOptions, RootManifest,
};

// ---- UI helpers (plain text when stdout isn't a TTY) ----

fn use_color() -> bool {
    std::io::stdout().is_terminal() && env::var("NO_COLOR").unwrap_or_default().is_empty()
}

fn success(msg: &str) {
    if use_color() {
        println!("{}", msg.green());
    } else {
        println!("{}", msg);
    }
}

fn error(msg: &str) {
    if use_color() {
        eprintln!("{}", msg.red());
    } else {
        eprintln!("{}", msg);
    }
}

fn info(msg: &str) {
    if use_color() {
        println!("{}", msg.cyan());
    } else {
        println!("{}", msg);
    }
}

fn dim(msg: &str) {
    if use_color() {
        println!("{}", msg.dimmed());
    } else {
        println!("{}", msg);
    }
}

fn install_command() -> Command {
    Command::new("install")
        .visible_alias("i")
        .about("Resolve package.json dependencies, update the lockfile and fill node_modules")
        .arg(
            Arg::new("package")
                .required(false)
                .num_args(0..)
                .help("Package(s) to add, e.g. left-pad or left-pad@^1.3.0"),
        )
        .arg(
            Arg::new("dev")
                .short('D')
                .long("dev")
                .visible_alias("save-dev")
                .action(ArgAction::SetTrue)
                .help("Add the named packages to devDependencies"),
        )
        .arg(
            Arg::new("production")
                .long("production")
                .visible_alias("prod")
                .action(ArgAction::SetTrue)
                .help("Skip devDependencies"),
        )
        .arg(
            Arg::new("lockfile-only")
                .long("lockfile-only")
                .action(ArgAction::SetTrue)
                .help("Only update the lockfile and package.json, do not install to node_modules"),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .action(ArgAction::SetTrue)
                .help("Print the install plan as JSON"),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .action(ArgAction::SetTrue)
                .help("Minimal output"),
        )
}

fn cmd_install(sub_m: Option<&ArgMatches>) -> Result<(), String> {
    let flag = |name: &str| sub_m.map(|m| m.get_flag(name)).unwrap_or(false);
    let quiet = flag("quiet");
    let json_out = flag("json");
    let lockfile_only = flag("lockfile-only");
    let kind = if flag("dev") { DepKind::Dev } else { DepKind::Prod };
    let packages: Vec<String> = sub_m
        .and_then(|m| m.get_many::<String>("package"))
        .map(|it| it.cloned().collect())
        .unwrap_or_default();

    if quiet || json_out {
        env::set_var("TINYPM_QUIET", "1");
    }

    let cwd = env::current_dir().map_err(|e| e.to_string())?;
    let manifest_path = find_manifest(&cwd)
        .ok_or_else(|| format!("No package.json found in {} or any parent directory.", cwd.display()))?;
    let project_dir = manifest_path.parent().unwrap_or(&cwd).to_path_buf();

    let config = load_config(&project_dir);
    let mut manifest = RootManifest::load(&manifest_path).map_err(|e| e.to_string())?;
    for spec in &packages {
        let (name, range) = split_spec(spec);
        if name.is_empty() {
            return Err(format!("Invalid package spec: {}", spec));
        }
        manifest.add_dependency(kind, name, range);
    }
    if manifest.dependencies().is_empty() && manifest.dev_dependencies().is_empty() {
        if !quiet && !json_out {
            dim("No dependencies to install.");
        }
        return Ok(());
    }

    let mut lock = LockStore::new(FileLockBackend::new(config.lockfile_path(&project_dir)));
    lock.read_previous().map_err(|e| e.to_string())?;
    let registry = HttpRegistry::from_config(&config);
    let options = ResolveOptions {
        production: flag("production") || config.production,
        concurrency: config.concurrency,
    };

    let resolution =
        resolve_manifest(&mut manifest, &registry, &mut lock, &options).map_err(|e| e.to_string())?;

    if !lockfile_only && !resolution.plan.is_empty() {
        tinypm_core::init_cache().map_err(|e| format!("Cannot create cache directory: {}", e))?;
        let bar = if quiet || json_out || !std::io::stdout().is_terminal() {
            ProgressBar::hidden()
        } else {
            ProgressBar::new(resolution.plan.len() as u64)
        };
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{bar:30.cyan/dim} {pos}/{len} {msg}")
                .map_err(|e| e.to_string())?,
        );
        let result = install_plan(
            &resolution.plan,
            &project_dir,
            &resolution.checksums,
            config.concurrency,
            |target| {
                bar.set_message(target.name.clone());
                bar.inc(1);
            },
        );
        bar.finish_and_clear();
        result.map_err(|e| e.to_string())?;
    }

    manifest.save(&manifest_path).map_err(|e| e.to_string())?;

    if json_out {
        let pinned: serde_json::Map<String, serde_json::Value> = resolution
            .pinned
            .iter()
            .map(|(_, name, range)| (name.clone(), serde_json::Value::String(range.clone())))
            .collect();
        let out = serde_json::json!({
            "hoisted": resolution.plan.hoisted,
            "nested": resolution.plan.nested,
            "pinned": pinned,
        });
        println!("{}", serde_json::to_string_pretty(&out).map_err(|e| e.to_string())?);
        return Ok(());
    }
    if quiet {
        return Ok(());
    }
    for (kind, name, range) in &resolution.pinned {
        info(&format!("Saved {}@{} to {}", name, range, kind.key()));
    }
    let verb = if lockfile_only { "Locked" } else { "Installed" };
    success(&format!(
        "{} {} package(s): {} hoisted, {} nested.",
        verb,
        resolution.plan.len(),
        resolution.plan.hoisted.len(),
        resolution.plan.nested.len()
    ));
    Ok(())
}

fn run() -> Result<(), String> {
    let matches = Command::new("tinypm")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Minimal npm-compatible package manager: hoisted node_modules and a reproducible lockfile")
        .after_help(
            "Examples:\n  tinypm install\n  tinypm install left-pad\n  tinypm install -D mocha@^10\n  tinypm install --lockfile-only",
        )
        .subcommand(install_command())
        .get_matches();

    match matches.subcommand() {
        Some(("install", sub_m)) => cmd_install(Some(sub_m)),
        Some((other, _)) => Err(format!("Unknown command: {}", other)),
        None => cmd_install(None),
    }
}

fn main() {
    if !use_color() {
        colored::control::set_override(false);
    }

    let code = match std::panic::catch_unwind(run) {
        Ok(Ok(())) => 0,
        Ok(Err(e)) => {
            error(&e);
            1
        }
        Err(_) => {
            error("An unexpected error occurred. Please report this issue.");
            1
        }
    };
    std::process::exit(code);
}
