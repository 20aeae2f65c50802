//! snapshotctl - drive CSI volume snapshots from the command line

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use kube::CustomResourceExt;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use snapshotter::config::{SnapshotterConfig, DEFAULT_CLASS_ANNOTATION};
use snapshotter::crd::{alpha, beta};
use snapshotter::kube_utils::create_client;
use snapshotter::poll::WaitContext;
use snapshotter::snapshot::resolver::{detect_generation, resolve, KubeProbe};
use snapshotter::snapshot::{ApiGeneration, Snapshotter, Source};

const MAX_TIMEOUT_SECS: u64 = 365 * 24 * 60 * 60;

/// snapshotctl - create, wait on, clone and delete CSI volume snapshots
#[derive(Parser, Debug)]
#[command(name = "snapshotctl", version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Options shared by every subcommand
#[derive(Args, Debug)]
struct GlobalArgs {
    /// Path to a kubeconfig file; in-cluster or default config when absent
    #[arg(long, global = true, env = "KUBECONFIG")]
    kubeconfig: Option<PathBuf>,

    /// Snapshot API generation to use instead of probing the cluster
    #[arg(long, global = true, env = "SNAPSHOT_API_VERSION", value_enum)]
    api_version: Option<Generation>,

    /// Delay before the second readiness poll, in milliseconds
    #[arg(
        long,
        global = true,
        env = "SNAPSHOT_POLL_INITIAL_MS",
        default_value = "100",
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    poll_initial_ms: u64,

    /// Upper bound on the delay between readiness polls, in milliseconds
    #[arg(
        long,
        global = true,
        env = "SNAPSHOT_POLL_MAX_MS",
        default_value = "10000",
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    poll_max_ms: u64,

    /// Overall time budget for waits, in seconds (at most one year)
    #[arg(
        long,
        global = true,
        env = "SNAPSHOT_WAIT_TIMEOUT_SECS",
        default_value = "600",
        value_parser = clap::value_parser!(u64).range(1..=MAX_TIMEOUT_SECS)
    )]
    timeout_secs: u64,

    /// Annotation that marks the VolumeSnapshotClass to use
    #[arg(
        long,
        global = true,
        env = "SNAPSHOT_CLASS_ANNOTATION",
        default_value = DEFAULT_CLASS_ANNOTATION
    )]
    class_annotation: String,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Generation {
    Alpha,
    Beta,
}

impl From<Generation> for ApiGeneration {
    fn from(g: Generation) -> Self {
        match g {
            Generation::Alpha => ApiGeneration::Alpha,
            Generation::Beta => ApiGeneration::Beta,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, ValueEnum)]
enum Output {
    #[default]
    Yaml,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the VolumeSnapshotClass selected by the class annotation
    Class,

    /// Snapshot a PersistentVolumeClaim
    Create {
        /// Snapshot name
        name: String,
        /// Namespace of the claim and the snapshot
        #[arg(short, long, default_value = "default")]
        namespace: String,
        /// Claim to snapshot
        #[arg(long)]
        pvc: String,
        /// VolumeSnapshotClass; the annotated class when absent
        #[arg(long)]
        class: Option<String>,
        /// Wait until the snapshot is ready to use
        #[arg(long)]
        wait: bool,
    },

    /// Print a snapshot
    Get {
        /// Snapshot name
        name: String,
        /// Snapshot namespace
        #[arg(short, long, default_value = "default")]
        namespace: String,
        /// Output format
        #[arg(short, long, value_enum, default_value_t)]
        output: Output,
    },

    /// Delete a snapshot; succeeds if it is already gone
    Delete {
        /// Snapshot name
        name: String,
        /// Snapshot namespace
        #[arg(short, long, default_value = "default")]
        namespace: String,
    },

    /// Wait until a snapshot is ready to use
    Wait {
        /// Snapshot name
        name: String,
        /// Snapshot namespace
        #[arg(short, long, default_value = "default")]
        namespace: String,
    },

    /// Print the storage-level source of a ready snapshot
    Source {
        /// Snapshot name
        name: String,
        /// Snapshot namespace
        #[arg(short, long, default_value = "default")]
        namespace: String,
        /// Output format
        #[arg(short, long, value_enum, default_value_t)]
        output: Output,
    },

    /// Create a snapshot from a source printed by `source`
    CreateFromSource {
        /// Snapshot name
        name: String,
        /// Snapshot namespace
        #[arg(short, long, default_value = "default")]
        namespace: String,
        /// Source file (YAML or JSON)
        #[arg(short = 'f', long = "file")]
        file: PathBuf,
        /// Wait until the snapshot is ready to use
        #[arg(long)]
        wait: bool,
    },

    /// Clone a snapshot into another name or namespace
    Clone {
        /// Snapshot to clone
        name: String,
        /// Namespace of the snapshot to clone
        #[arg(short, long, default_value = "default")]
        namespace: String,
        /// Name of the clone
        #[arg(long)]
        to: String,
        /// Namespace of the clone; the source namespace when absent
        #[arg(long)]
        to_namespace: Option<String>,
        /// Wait until the clone is ready to use
        #[arg(long)]
        wait: bool,
    },

    /// Report which snapshot API generation the cluster serves
    Probe,

    /// Print the CustomResourceDefinitions of a snapshot API generation
    Crd {
        /// Generation to print
        #[arg(value_enum, default_value = "beta")]
        generation: Generation,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if let Commands::Crd { generation } = cli.command {
        return print_crds(generation.into());
    }

    let config = SnapshotterConfig::default()
        .with_poll_bounds(
            Duration::from_millis(cli.global.poll_initial_ms),
            Duration::from_millis(cli.global.poll_max_ms),
            Duration::from_secs(cli.global.timeout_secs),
        )
        .with_api_version(cli.global.api_version.map(Into::into))
        .with_class_annotation(cli.global.class_annotation.clone());

    // Ctrl-C cancels in-flight calls and waits; objects already created stay in place
    let ctx = WaitContext::with_timeout(Duration::from_secs(cli.global.timeout_secs));
    let cancel = ctx.cancel_token().clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let client = create_client(cli.global.kubeconfig.as_deref()).await?;

    if let Commands::Probe = cli.command {
        let generation = detect_generation(&ctx, &KubeProbe::new(client)).await?;
        println!("{} ({})", generation, generation.api_version());
        return Ok(());
    }

    let snapshotter = resolve(&ctx, client, &config).await?;

    run(snapshotter, &ctx, &config, cli.command).await
}

async fn run(
    snapshotter: Arc<dyn Snapshotter>,
    ctx: &WaitContext,
    config: &SnapshotterConfig,
    command: Commands,
) -> anyhow::Result<()> {
    match command {
        Commands::Class => {
            let class = snapshotter
                .get_volume_snapshot_class(ctx, &config.class_annotation)
                .await?;
            println!("{class}");
        }
        Commands::Create {
            name,
            namespace,
            pvc,
            class,
            wait,
        } => {
            let class = match class {
                Some(class) => class,
                None => {
                    snapshotter
                        .get_volume_snapshot_class(ctx, &config.class_annotation)
                        .await?
                }
            };
            snapshotter
                .create(ctx, &name, &namespace, &pvc, Some(&class), wait)
                .await?;
            info!(snapshot = %name, namespace = %namespace, class = %class, ready = wait, "snapshot created");
        }
        Commands::Get {
            name,
            namespace,
            output,
        } => {
            let snap = snapshotter.get(ctx, &name, &namespace).await?;
            info!(snapshot = %name, namespace = %namespace, phase = %snap.phase(), "snapshot phase");
            print_value(&snap, output)?;
        }
        Commands::Delete { name, namespace } => {
            snapshotter.delete(ctx, &name, &namespace).await?;
        }
        Commands::Wait { name, namespace } => {
            snapshotter
                .wait_on_ready_to_use(ctx, &name, &namespace)
                .await?;
            info!(snapshot = %name, namespace = %namespace, "snapshot ready to use");
        }
        Commands::Source {
            name,
            namespace,
            output,
        } => {
            let source = snapshotter.get_source(ctx, &name, &namespace).await?;
            print_value(&source, output)?;
        }
        Commands::CreateFromSource {
            name,
            namespace,
            file,
            wait,
        } => {
            let content = tokio::fs::read_to_string(&file)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to read source file {:?}: {}", file, e))?;
            let source: Source = serde_yaml::from_str(&content)
                .map_err(|e| anyhow::anyhow!("Failed to parse source file {:?}: {}", file, e))?;
            snapshotter
                .create_from_source(ctx, &source, &name, &namespace, wait)
                .await?;
        }
        Commands::Clone {
            name,
            namespace,
            to,
            to_namespace,
            wait,
        } => {
            let to_namespace = to_namespace.unwrap_or_else(|| namespace.clone());
            snapshotter
                .clone_snapshot(ctx, &name, &namespace, &to, &to_namespace, wait)
                .await?;
            info!(from = %format!("{namespace}/{name}"), to = %format!("{to_namespace}/{to}"), "snapshot cloned");
        }
        Commands::Probe | Commands::Crd { .. } => {}
    }
    Ok(())
}

fn print_value<T: serde::Serialize>(value: &T, output: Output) -> anyhow::Result<()> {
    let rendered = match output {
        Output::Yaml => serde_yaml::to_string(value)
            .map_err(|e| anyhow::anyhow!("Failed to serialize output: {}", e))?,
        Output::Json => serde_json::to_string_pretty(value)
            .map_err(|e| anyhow::anyhow!("Failed to serialize output: {}", e))?,
    };
    println!("{}", rendered.trim_end());
    Ok(())
}

fn print_crds(generation: ApiGeneration) -> anyhow::Result<()> {
    let crds = match generation {
        ApiGeneration::Alpha => [alpha::VolumeSnapshot::crd(), alpha::VolumeSnapshotContent::crd()],
        ApiGeneration::Beta => [beta::VolumeSnapshot::crd(), beta::VolumeSnapshotContent::crd()],
    };
    for crd in crds {
        let yaml = serde_yaml::to_string(&crd)
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("---\n{}", yaml.trim_end());
    }
    Ok(())
}
