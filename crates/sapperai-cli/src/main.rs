//! SapperAI CLI
//!
//! Commands:
//! - sapperai scan [PATHS] - Scan agent artifacts for malicious content
//! - sapperai watch - Watch artifact directories and enforce the policy
//! - sapperai campaign run/replay - Adversarial campaigns against the policy
//! - sapperai quarantine list/restore - Manage quarantined files
//! - sapperai policy show/validate/presets - Inspect policies

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sapperai_core::{
    create_detectors, evaluate_policy_match, preset, resolve_policy_path, Action, Decision,
    DecisionEngine, MatchProbe, Policy, QuarantineManager, Scanner, PRESET_NAMES,
};
use sapperai_watch::{AdversaryCampaignRunner, CampaignRunOptions, DynamicOptions, FileWatcher};

#[derive(Parser)]
#[command(name = "sapperai")]
#[command(about = "Policy-driven security guard for AI agent tool use", long_about = None)]
struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Policy file (overrides discovery)
    #[arg(long, global = true)]
    policy: Option<PathBuf>,

    /// Built-in preset to use when no policy file is found
    #[arg(long, global = true)]
    preset: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan artifact files for malicious content
    Scan {
        /// Paths to scan (defaults to the current directory)
        paths: Vec<PathBuf>,

        /// Recurse without a depth limit
        #[arg(long)]
        deep: bool,

        /// Also scan the system agent directories
        #[arg(long)]
        system: bool,

        /// Quarantine files that would be blocked
        #[arg(long)]
        fix: bool,
    },

    /// Watch artifact directories and enforce the policy on changes
    Watch {
        /// Enable dynamic probing of skills and agents
        #[arg(long)]
        dynamic: bool,

        /// Attack variants per dynamic probe
        #[arg(long, default_value = "8")]
        max_cases: usize,

        /// Soft time budget per dynamic probe
        #[arg(long, default_value = "1500")]
        max_duration_ms: u64,

        /// Deterministic probe seed
        #[arg(long, default_value = "watch-default")]
        seed: String,
    },

    /// Adversarial campaign commands
    Campaign {
        #[command(subcommand)]
        command: CampaignCommands,
    },

    /// Quarantine management commands
    Quarantine {
        #[command(subcommand)]
        command: QuarantineCommands,
    },

    /// Policy commands
    Policy {
        #[command(subcommand)]
        command: PolicyCommands,
    },
}

#[derive(Subcommand)]
enum CampaignCommands {
    /// Run a campaign and write artifacts to disk
    Run {
        /// Output directory for run artifacts
        #[arg(long)]
        out: PathBuf,

        /// Maximum attack variants to execute
        #[arg(long)]
        max_cases: Option<usize>,

        /// Soft time budget for the whole run
        #[arg(long)]
        max_duration_ms: Option<u64>,

        /// Deterministic shuffle seed
        #[arg(long)]
        seed: Option<String>,

        /// Agent config JSON contributing seed prompts
        #[arg(long)]
        agent_config: Option<PathBuf>,
    },

    /// Re-run a persisted repro file against the current policy
    Replay {
        /// Path to a finding-N.repro.json file
        repro: PathBuf,
    },
}

#[derive(Subcommand)]
enum QuarantineCommands {
    /// List quarantined files
    List,

    /// Restore a quarantined file to its original location
    Restore {
        /// Quarantine record id
        id: String,

        /// Overwrite an existing file at the original location
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand)]
enum PolicyCommands {
    /// Show the effective policy as YAML
    Show,

    /// Validate a policy file
    Validate {
        /// Path to policy YAML file
        file: PathBuf,
    },

    /// List built-in presets
    Presets,
}

/// Depth limit for non-deep scans.
const SCAN_DEPTH_LIMIT: usize = 4;

const SKIPPED_DIRS: [&str; 3] = ["node_modules", ".git", "dist"];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::filter::LevelFilter::from_level(
            log_level,
        ))
        .init();

    let policy = load_policy(cli.policy.as_deref(), cli.preset.as_deref())?;

    match cli.command {
        Commands::Scan {
            paths,
            deep,
            system,
            fix,
        } => run_scan(policy, paths, deep, system, fix).await,

        Commands::Watch {
            dynamic,
            max_cases,
            max_duration_ms,
            seed,
        } => {
            let watcher = Arc::new(FileWatcher::new(policy)?.with_dynamic(DynamicOptions {
                enabled: dynamic,
                max_cases,
                max_duration_ms,
                seed,
            }));
            watcher.start().await?;
            println!("Watching for artifact changes. Press Ctrl+C to stop.");
            tokio::signal::ctrl_c().await?;
            watcher.close();
            Ok(())
        }

        Commands::Campaign { command } => match command {
            CampaignCommands::Run {
                out,
                max_cases,
                max_duration_ms,
                seed,
                agent_config,
            } => {
                let runner = AdversaryCampaignRunner::new();
                let result = runner
                    .run(CampaignRunOptions {
                        policy,
                        output_dir: out,
                        agent_config_path: agent_config,
                        max_cases,
                        max_duration_ms,
                        seed,
                    })
                    .await?;

                println!("Campaign {} complete", result.run_id);
                println!("  Cases executed: {}", result.total_cases);
                println!("  Vulnerable:     {}", result.vulnerable_cases);
                println!("  Artifacts:      {}", result.out_dir.display());
                for finding in &result.findings {
                    println!(
                        "  [{:.1}] {} ({})",
                        finding.severity10, finding.label, finding.attack_id
                    );
                }
                if result.vulnerable_cases > 0 {
                    std::process::exit(1);
                }
                Ok(())
            }

            CampaignCommands::Replay { repro } => {
                let runner = AdversaryCampaignRunner::new();
                let outcome = runner.replay(&repro, &policy).await?;
                if outcome.vulnerable {
                    println!("VULNERABLE: the repro still slips through");
                    for reason in &outcome.decision.reasons {
                        println!("  {reason}");
                    }
                    std::process::exit(1);
                }
                println!("BLOCKED: the policy now stops this repro");
                Ok(())
            }
        },

        Commands::Quarantine { command } => match command {
            QuarantineCommands::List => {
                let manager = QuarantineManager::with_default_dir();
                let records = manager.list();
                if records.is_empty() {
                    println!("Quarantine is empty");
                    return Ok(());
                }
                for record in records {
                    let status = if record.restored_at.is_some() {
                        "restored"
                    } else {
                        "held"
                    };
                    println!(
                        "{}  {}  {}  {}",
                        record.id,
                        status,
                        record.quarantined_at.to_rfc3339(),
                        record.original_path.display()
                    );
                    if let Some(reason) = record.decision.reasons.first() {
                        println!("    {reason}");
                    }
                }
                Ok(())
            }

            QuarantineCommands::Restore { id, force } => {
                let manager = QuarantineManager::with_default_dir();
                let record = manager.restore(&id, force)?;
                println!("Restored {} to {}", record.id, record.original_path.display());
                Ok(())
            }
        },

        Commands::Policy { command } => match command {
            PolicyCommands::Show => {
                println!("{}", policy.to_yaml_string()?);
                Ok(())
            }

            PolicyCommands::Validate { file } => {
                let policy = Policy::from_yaml_file(&file)?;
                println!("Policy is valid:");
                println!("  Mode: {:?}", policy.mode);
                println!("  Detectors: {}", policy.effective_detectors().join(", "));
                Ok(())
            }

            PolicyCommands::Presets => {
                println!("Available presets:");
                for name in PRESET_NAMES {
                    if let Some(p) = preset(name) {
                        println!("  {} - {}", p.name, p.description);
                    }
                }
                Ok(())
            }
        },
    }
}

/// Explicit file, then discovered config, then preset (default `standard`).
fn load_policy(file: Option<&Path>, preset_name: Option<&str>) -> anyhow::Result<Policy> {
    if let Some(path) = file {
        return Ok(Policy::from_yaml_file(path)?);
    }

    let cwd = std::env::current_dir()?;
    let home = dirs::home_dir();
    if let Some(resolved) = resolve_policy_path(&cwd, home.as_deref())? {
        tracing::info!(path = %resolved.path.display(), "using discovered policy");
        return Ok(Policy::from_yaml_file(&resolved.path)?);
    }

    let name = preset_name.unwrap_or("standard");
    preset(name)
        .map(|p| p.policy)
        .ok_or_else(|| anyhow::anyhow!("Unknown preset: {name}"))
}

async fn run_scan(
    policy: Policy,
    paths: Vec<PathBuf>,
    deep: bool,
    system: bool,
    fix: bool,
) -> anyhow::Result<()> {
    let mut roots = if paths.is_empty() {
        vec![std::env::current_dir()?]
    } else {
        paths
    };
    if system {
        if let Some(home) = dirs::home_dir() {
            roots.push(home.join(".claude").join("plugins"));
            roots.push(home.join(".config").join("claude-code"));
        }
    }

    let mut files = Vec::new();
    for root in &roots {
        if root.is_file() {
            files.push(root.clone());
        } else if root.is_dir() {
            collect_files(root, if deep { usize::MAX } else { SCAN_DEPTH_LIMIT }, &mut files);
        }
    }

    let scanner = Scanner::new(DecisionEngine::new(create_detectors(
        &policy,
        Vec::new(),
        None,
        None,
    )?));
    let quarantine = QuarantineManager::with_default_dir();

    let mut scanned = 0usize;
    let mut blocked = 0usize;

    for file in &files {
        let Ok(content) = std::fs::read_to_string(file) else {
            continue;
        };
        if content.trim().is_empty() {
            continue;
        }

        let mut file_blocked = false;
        for target in sapperai_core::build_targets(file, &content) {
            scanned += 1;

            let fast_path = evaluate_policy_match(
                &policy,
                &MatchProbe {
                    tool_name: &target.name,
                    content: &target.surface,
                },
            );
            let decision = match fast_path.action {
                Some(Action::Allow) => continue,
                Some(Action::Block) => Decision {
                    action: if policy.is_enforcing() {
                        Action::Block
                    } else {
                        Action::Allow
                    },
                    risk: 1.0,
                    confidence: 1.0,
                    reasons: fast_path.reasons,
                    evidence: Vec::new(),
                },
                None => {
                    scanner
                        .scan_tool(
                            &target.name,
                            &target.surface,
                            &policy,
                            Some(serde_json::json!({
                                "scanSource": "file_surface",
                                "sourcePath": file,
                                "sourceType": target.target_type.as_str(),
                            })),
                        )
                        .await
                }
            };

            if decision.is_blocked() {
                println!(
                    "BLOCKED {} ({}) risk {:.2}",
                    file.display(),
                    target.name,
                    decision.risk
                );
                for reason in &decision.reasons {
                    println!("    {reason}");
                }
                blocked += 1;
                file_blocked = true;
            } else if !decision.reasons.is_empty() {
                println!(
                    "FLAGGED {} ({}) risk {:.2}",
                    file.display(),
                    target.name,
                    decision.risk
                );
                for reason in &decision.reasons {
                    println!("    {reason}");
                }
            }

            if file_blocked && fix {
                let record = quarantine.quarantine(file, decision)?;
                println!("    quarantined as {}", record.id);
                break;
            }
        }
    }

    println!(
        "Scanned {} surfaces across {} files: {} blocked",
        scanned,
        files.len(),
        blocked
    );
    if blocked > 0 {
        std::process::exit(1);
    }
    Ok(())
}

fn collect_files(dir: &Path, depth: usize, out: &mut Vec<PathBuf>) {
    if depth == 0 {
        return;
    }
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            let skipped = path
                .file_name()
                .and_then(|name| name.to_str())
                .map(|name| SKIPPED_DIRS.contains(&name))
                .unwrap_or(false);
            if !skipped {
                collect_files(&path, depth.saturating_sub(1), out);
            }
        } else if sapperai_core::is_config_like_file(&path) {
            out.push(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_collection_skips_vendored_dirs_and_non_config_files() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(root.path().join("node_modules/pkg")).unwrap();
        std::fs::create_dir_all(root.path().join("skills")).unwrap();
        std::fs::write(root.path().join("node_modules/pkg/README.md"), "x").unwrap();
        std::fs::write(root.path().join("skills/SKILL.md"), "x").unwrap();
        std::fs::write(root.path().join("binary.wasm"), "x").unwrap();
        std::fs::write(root.path().join("config.yaml"), "x").unwrap();

        let mut files = Vec::new();
        collect_files(root.path(), SCAN_DEPTH_LIMIT, &mut files);
        let names: Vec<String> = files
            .iter()
            .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .collect();
        assert!(names.contains(&"SKILL.md".to_string()));
        assert!(names.contains(&"config.yaml".to_string()));
        assert!(!names.contains(&"README.md".to_string()));
        assert!(!names.contains(&"binary.wasm".to_string()));
    }

    #[test]
    fn depth_limit_stops_recursion() {
        let root = tempfile::tempdir().unwrap();
        let nested = root.path().join("a/b/c");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("deep.md"), "x").unwrap();

        let mut files = Vec::new();
        collect_files(root.path(), 2, &mut files);
        assert!(files.is_empty());

        files.clear();
        collect_files(root.path(), usize::MAX, &mut files);
        assert_eq!(files.len(), 1);
    }
}
