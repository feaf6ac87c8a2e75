#![forbid(unsafe_code)]

use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use bias_harness::batch::{self, BatchLayout, BatchOptions};
use bias_harness::config::Config;
use bias_harness::dataset::{self, ExportOptions};
use bias_harness::judge::Judge;
use bias_harness::prompts;
use bias_harness::report;
use bias_harness::trace::{JsonlTraceSink, TraceError, TraceSink, TraceWorker};
use bias_harness::trigger::{LocalObjectStore, TriggerHandler, TriggerOutcome};

#[derive(Parser)]
#[command(name = "bias", version, about = "LLM bias evaluation pipeline")]
struct Cli {
    /// Debug-level logging (RUST_LOG takes precedence)
    #[arg(long, short, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write one prompt file per dataset row
    Export {
        /// Local dataset dump (JSON array or JSON lines)
        #[arg(long)]
        dataset: PathBuf,
        #[arg(long, default_value = dataset::DEFAULT_TEXT_FIELD)]
        text_field: String,
        /// Maximum prompts to export (0 = all)
        #[arg(long, default_value_t = dataset::DEFAULT_LIMIT)]
        limit: usize,
        /// Keep existing prompt and output files
        #[arg(long)]
        no_clean: bool,
        #[arg(long, default_value = batch::DEFAULT_PROMPTS_DIR)]
        prompts_dir: PathBuf,
        #[arg(long, default_value = batch::DEFAULT_OUTPUTS_DIR)]
        outputs_dir: PathBuf,
    },
    /// Run every prompt file through the model under test
    Generate {
        /// Backend for the model under test (bedrock | openai)
        #[arg(long)]
        backend: Option<String>,
        #[arg(long)]
        model: Option<String>,
        /// Reply length cap (default: MAX_TOKENS)
        #[arg(long)]
        max_tokens: Option<u32>,
        /// Sampling temperature (default: TEMPERATURE)
        #[arg(long)]
        temperature: Option<f32>,
        /// Nucleus sampling mass (default: TOP_P)
        #[arg(long)]
        top_p: Option<f32>,
        #[command(flatten)]
        run: RunArgs,
    },
    /// Judge stored replies and write a results file
    Evaluate {
        /// Judge backend (bedrock | openai)
        #[arg(long)]
        provider: Option<String>,
        /// Judge model
        #[arg(long)]
        model: Option<String>,
        /// Judge prompt template
        #[arg(long, default_value = prompts::DEFAULT_TEMPLATE.slug)]
        template: String,
        /// Results path (default: bias_eval_results_<provider>_<model>.json)
        #[arg(long)]
        out: Option<PathBuf>,
        #[command(flatten)]
        run: RunArgs,
    },
    /// Handle one storage notification (or direct invocation) event
    HandleEvent {
        /// Event JSON file, or `-` for stdin
        #[arg(long)]
        event: PathBuf,
        /// Directory standing in for the object store (`<root>/<bucket>/<key>`)
        #[arg(long, default_value = ".")]
        store_root: PathBuf,
        #[arg(long)]
        backend: Option<String>,
        #[arg(long)]
        model: Option<String>,
        #[arg(long)]
        output_bucket: Option<String>,
        #[arg(long)]
        trace: Option<PathBuf>,
    },
    /// Summarize a results file
    Report {
        #[arg(long)]
        results: PathBuf,
        /// Write here instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
        /// markdown | json
        #[arg(long, default_value = "markdown")]
        format: String,
    },
}

#[derive(clap::Args)]
struct RunArgs {
    #[arg(long, default_value = batch::DEFAULT_PROMPTS_DIR)]
    prompts_dir: PathBuf,
    #[arg(long, default_value = batch::DEFAULT_OUTPUTS_DIR)]
    outputs_dir: PathBuf,
    /// Only the first N prompt files
    #[arg(long)]
    limit: Option<usize>,
    /// Items in flight (default: BATCH_CONCURRENCY or 4)
    #[arg(long)]
    concurrency: Option<usize>,
    /// Write per-item JSONL trace
    #[arg(long)]
    trace: Option<PathBuf>,
}

impl RunArgs {
    fn layout(&self) -> BatchLayout {
        BatchLayout::new(&self.prompts_dir, &self.outputs_dir)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Commands::Export {
            dataset: dataset_path,
            text_field,
            limit,
            no_clean,
            prompts_dir,
            outputs_dir,
        } => {
            let options = ExportOptions {
                text_field,
                limit,
                clean: !no_clean,
                prompts_dir,
                outputs_dir,
            };
            let written = dataset::export_prompts(&dataset_path, &options)?;
            println!(
                "exported {} prompts to {}",
                written.len(),
                options.prompts_dir.display()
            );
        }
        Commands::Generate {
            backend,
            model,
            max_tokens,
            temperature,
            top_p,
            run,
        } => {
            let mut config = Config::from_env()?;
            if let Some(backend) = backend {
                config.backend_kind = backend.parse()?;
            }
            if let Some(model) = model {
                config.model_id = model;
            }
            if let Some(n) = max_tokens {
                config.generation.max_tokens = Some(n);
            }
            if let Some(t) = temperature {
                config.generation.temperature = Some(t);
            }
            if let Some(p) = top_p {
                config.generation.top_p = Some(p);
            }
            if let Some(n) = run.concurrency {
                config.concurrency = n;
            }
            let gateway = config.model_gateway().await?;

            let trace = TraceGuard::open(run.trace.as_deref())?;
            let options = batch_options(&config, run.limit, &trace);
            let summary =
                batch::generate_outputs(&gateway, &config.model_id, &run.layout(), &options)
                    .await?;
            drop(options);
            trace.finish()?;

            println!(
                "wrote {} replies to {} ({} failed)",
                summary.written(),
                run.outputs_dir.display(),
                summary.failed()
            );
        }
        Commands::Evaluate {
            provider,
            model,
            template,
            out,
            run,
        } => {
            let mut config = Config::from_env()?;
            if let Some(provider) = provider {
                config.judge_backend_kind = provider.parse()?;
            }
            if let Some(model) = model {
                config.judge_model_id = model;
            }
            if let Some(n) = run.concurrency {
                config.concurrency = n;
            }
            let template = match prompts::prompt_by_slug(&template) {
                Some(t) => t,
                None => {
                    let available: Vec<&str> = prompts::template_slugs().collect();
                    return Err(format!(
                        "unknown template '{template}'; available templates: {}",
                        available.join(", ")
                    )
                    .into());
                }
            };
            let judge = Judge::new(config.judge_gateway().await?, &config.judge_model_id)
                .with_template(template);

            let trace = TraceGuard::open(run.trace.as_deref())?;
            let options = batch_options(&config, run.limit, &trace);
            let records = batch::evaluate_outputs(&judge, &run.layout(), &options).await?;
            drop(options);
            trace.finish()?;

            let out = out.unwrap_or_else(|| {
                PathBuf::from(batch::results_file_name(
                    config.judge_backend_kind.as_str(),
                    &config.judge_model_id,
                ))
            });
            batch::write_results(&out, &records).await?;
            println!("wrote {} results to {}", records.len(), out.display());
        }
        Commands::HandleEvent {
            event,
            store_root,
            backend,
            model,
            output_bucket,
            trace,
        } => {
            let mut config = Config::from_env()?;
            if let Some(backend) = backend {
                config.backend_kind = backend.parse()?;
            }
            if let Some(model) = model {
                config.model_id = model;
            }
            if let Some(bucket) = output_bucket {
                config.output_bucket = bucket;
            }
            let event: serde_json::Value = serde_json::from_str(&read_input(&event)?)?;
            let gateway = config.model_gateway().await?;

            let trace = TraceGuard::open(trace.as_deref())?;
            let mut handler = TriggerHandler::new(
                gateway,
                &config.model_id,
                Arc::new(LocalObjectStore::new(store_root)),
                &config.output_bucket,
            );
            if let Some(sink) = trace.sink() {
                handler = handler.with_trace(sink);
            }
            let outcome = handler.handle(&event).await;
            drop(handler);
            trace.finish()?;

            match outcome? {
                TriggerOutcome::Stored(objects) => {
                    for object in objects {
                        println!("{}/{}", object.bucket, object.key);
                    }
                }
                TriggerOutcome::Direct(reply) => {
                    println!("{}", serde_json::to_string_pretty(&reply)?);
                }
            }
        }
        Commands::Report {
            results,
            out,
            format,
        } => {
            let records = report::load_results(&results)?;
            let summary = report::summarize(&records);
            let rendered = match format.as_str() {
                "json" => serde_json::to_string_pretty(&summary)?,
                "markdown" => {
                    let title = results
                        .file_stem()
                        .map(|s| s.to_string_lossy().into_owned())
                        .unwrap_or_else(|| "Bias evaluation".to_string());
                    report::render_markdown(&title, &summary)
                }
                other => return Err(format!("unknown report format '{other}'").into()),
            };
            match out {
                Some(path) => {
                    std::fs::write(&path, rendered)?;
                    info!(path = %path.display(), "report written");
                }
                None => print!("{rendered}"),
            }
        }
    }

    Ok(())
}

fn batch_options(config: &Config, limit: Option<usize>, trace: &TraceGuard) -> BatchOptions {
    let options = BatchOptions::default()
        .concurrency(config.concurrency)
        .limit(limit);
    match trace.sink() {
        Some(sink) => options.trace(sink),
        None => options,
    }
}

/// Owns the trace writer for one command. Every sink clone handed out must
/// be dropped before [`TraceGuard::finish`].
struct TraceGuard {
    sink: Option<Arc<JsonlTraceSink>>,
    worker: Option<TraceWorker>,
}

impl TraceGuard {
    fn open(path: Option<&Path>) -> Result<Self, TraceError> {
        match path {
            Some(path) => {
                let (sink, worker) = JsonlTraceSink::new(path)?;
                Ok(Self {
                    sink: Some(Arc::new(sink)),
                    worker: Some(worker),
                })
            }
            None => Ok(Self {
                sink: None,
                worker: None,
            }),
        }
    }

    fn sink(&self) -> Option<Arc<dyn TraceSink>> {
        self.sink
            .as_ref()
            .map(|sink| Arc::clone(sink) as Arc<dyn TraceSink>)
    }

    fn finish(self) -> Result<(), TraceError> {
        let TraceGuard { sink, worker } = self;
        drop(sink);
        match worker {
            Some(worker) => worker.join(),
            None => Ok(()),
        }
    }
}

fn read_input(path: &Path) -> Result<String, io::Error> {
    if path.as_os_str() == "-" {
        let mut raw = String::new();
        io::stdin().read_to_string(&mut raw)?;
        Ok(raw)
    } else {
        std::fs::read_to_string(path)
    }
}
