//! effusive - command-line client for effusive-server

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use effusive_client::{ClientContext, RefAudioFilter, WorkerEvent};
use effusive_common::api::{DownloadHfModelsRequest, Language, SetModelsRequest, TextSplitMethod};
use effusive_common::db::MetadataUpdate;
use effusive_common::prefs::DEFAULT_PREFS_PATH;
use std::path::PathBuf;
use std::time::Instant;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "effusive", version, about = "Client for the effusive TTS server")]
struct Cli {
    /// Preferences file
    #[arg(long, global = true, default_value = DEFAULT_PREFS_PATH)]
    config: PathBuf,

    /// Server address (defaults to the last one used)
    #[arg(long, global = true, env = "EFFUSIVE_HOST")]
    host: Option<String>,

    /// Upload reference audio contents even when the server runs on this machine
    #[arg(long, global = true)]
    remote: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Check the server answers
    Ping,
    /// Find, load and download model weights
    Models {
        #[command(subcommand)]
        action: ModelsCommand,
    },
    /// Manage the reference audio catalog
    Refs {
        #[command(subcommand)]
        action: RefsCommand,
    },
    /// Generate speech
    Generate(GenerateArgs),
    /// Stop the running generation
    Stop,
    /// Show or change preferences
    Config {
        #[command(subcommand)]
        action: ConfigCommand,
    },
}

#[derive(Debug, Subcommand)]
enum ModelsCommand {
    /// List weights available on the server
    Find,
    /// Load weights on the server
    Set {
        #[arg(long)]
        gpt: Option<String>,
        #[arg(long)]
        sovits: Option<String>,
        #[arg(long)]
        cnhubert: Option<String>,
        #[arg(long)]
        bert: Option<String>,
    },
    /// Download models from a Hugging Face repository onto the server
    Download {
        repo: String,
        /// Single model to fetch; all complete models when omitted
        #[arg(long)]
        model: Option<String>,
    },
}

#[derive(Debug, Subcommand)]
enum RefsCommand {
    /// Add audio files to the catalog
    Add { paths: Vec<PathBuf> },
    /// Import every audio file below a folder (the reference folder by default)
    Import { dir: Option<PathBuf> },
    /// List cataloged reference audio
    List {
        #[arg(long)]
        character: Option<String>,
        /// Fuzzy transcript search
        #[arg(long)]
        search: Option<String>,
    },
    /// Edit metadata of one entry
    Edit {
        /// Hash or unique hash prefix
        hash: String,
        #[arg(long)]
        character: Option<String>,
        #[arg(long)]
        emotion: Option<String>,
        #[arg(long)]
        utterance: Option<String>,
    },
    /// Hide an entry from listings
    Delete { hash: String },
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    Show,
    /// Set a dotted key, e.g. `inference.top_k 8`
    Set { key: String, value: String },
}

fn parse_language(code: &str) -> Result<Language, String> {
    Language::from_code(code).ok_or_else(|| {
        let known: Vec<_> = Language::ALL.iter().map(|l| l.code()).collect();
        format!("unknown language '{}' (expected one of {})", code, known.join(", "))
    })
}

fn parse_split(code: &str) -> Result<TextSplitMethod, String> {
    TextSplitMethod::from_code(code).ok_or_else(|| format!("unknown split method '{}' (cut0..cut5)", code))
}

#[derive(Debug, Args)]
struct GenerateArgs {
    /// Text to speak
    text: String,
    /// Primary reference audio (hash or unique prefix)
    #[arg(long = "ref")]
    reference: String,
    /// Auxiliary reference audio (hash or unique prefix), repeatable
    #[arg(long = "aux")]
    aux: Vec<String>,
    /// Transcript of the primary reference; catalog transcript when omitted
    #[arg(long)]
    prompt_text: Option<String>,
    #[arg(long, value_parser = parse_language)]
    text_lang: Option<Language>,
    #[arg(long, value_parser = parse_language)]
    prompt_lang: Option<Language>,
    /// Number of repetitions
    #[arg(short = 'n', long)]
    repetitions: Option<u32>,
    /// Fixed seed (disables random seeding)
    #[arg(long)]
    seed: Option<i64>,
    #[arg(long)]
    top_k: Option<u32>,
    #[arg(long)]
    top_p: Option<f64>,
    #[arg(long)]
    temperature: Option<f64>,
    #[arg(long)]
    speed: Option<f64>,
    #[arg(long)]
    batch_size: Option<u32>,
    #[arg(long, value_parser = parse_split)]
    split: Option<TextSplitMethod>,
    /// Run repetitions one after another instead of batched
    #[arg(long)]
    sequential: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let cli = Cli::parse();
    let mut ctx = ClientContext::open(&cli.config, cli.host.as_deref())
        .await
        .with_context(|| format!("Failed to load session from {}", cli.config.display()))?;
    if cli.remote {
        ctx.set_is_local(false);
    }

    match cli.command {
        Command::Ping => {
            let client = ctx.connect().await?;
            println!("{} is up", client.base_url());
        }
        Command::Models { action } => run_models(&mut ctx, action).await?,
        Command::Refs { action } => run_refs(&mut ctx, action).await?,
        Command::Generate(args) => run_generate(&mut ctx, args).await?,
        Command::Stop => {
            ctx.connect().await?.stop().await?;
            println!("Stop requested");
        }
        Command::Config { action } => match action {
            ConfigCommand::Show => print!("{}", ctx.prefs().to_yaml_string()?),
            ConfigCommand::Set { key, value } => {
                ctx.prefs_store().set_value(&key, &value)?;
                println!("{} = {}", key, value);
            }
        },
    }
    Ok(())
}

async fn run_models(ctx: &mut ClientContext, action: ModelsCommand) -> Result<()> {
    let client = ctx.connect().await?;
    match action {
        ModelsCommand::Find => {
            let found = client.find_models().await?;
            println!("Model folders:");
            for model in &found.folder_models {
                println!("  {}\n    gpt:    {}\n    sovits: {}", model.model_name, model.gpt_weight, model.sovits_weight);
            }
            println!("GPT weights:");
            for path in &found.loose_models.gpt_weights {
                println!("  {}", path);
            }
            println!("SoVITS weights:");
            for path in &found.loose_models.sovits_weights {
                println!("  {}", path);
            }
        }
        ModelsCommand::Set {
            gpt,
            sovits,
            cnhubert,
            bert,
        } => {
            let request = SetModelsRequest {
                gpt_path: gpt,
                sovits_path: sovits,
                cnhubert_base_path: cnhubert,
                bert_path: bert,
            };
            if request.paths().is_empty() {
                bail!("nothing to set; pass at least one of --gpt, --sovits, --cnhubert, --bert");
            }
            let active = client.set_models(&request).await?;
            for (name, path) in active.paths() {
                println!("{}: {}", name, path);
            }
        }
        ModelsCommand::Download { repo, model } => {
            println!("Downloading from {} (this may take a while)", repo);
            let response = client
                .download_hf_models(&DownloadHfModelsRequest { repo, model_name: model })
                .await?;
            for model in response.models {
                println!("  {}", model.model_name);
            }
        }
    }
    Ok(())
}

async fn run_refs(ctx: &mut ClientContext, action: RefsCommand) -> Result<()> {
    let catalog = ctx.catalog().clone();
    match action {
        RefsCommand::Add { paths } => {
            if paths.is_empty() {
                bail!("no files given");
            }
            for path in paths {
                let record = catalog.add_file(&path, None, true).await?;
                println!("{}  {}", &record.audio_hash[..12], record.local_filepath);
            }
        }
        RefsCommand::Import { dir } => {
            let dir = dir.unwrap_or_else(|| ctx.prefs().ref_audios_dir.clone());
            let added = catalog.autoload_dir(&dir).await?;
            println!("Imported {} new file(s) from {}", added, dir.display());
        }
        RefsCommand::List { character, search } => {
            let records = catalog
                .list(&RefAudioFilter {
                    character,
                    utterance_query: search,
                })
                .await?;
            for r in records {
                println!(
                    "{}  {:<12} {:<10} {:>6}  {}",
                    &r.audio_hash[..12],
                    r.character.as_deref().unwrap_or("-"),
                    r.emotion.as_deref().unwrap_or("-"),
                    r.duration_secs.map(|d| format!("{:.1}s", d)).unwrap_or_default(),
                    r.utterance.as_deref().unwrap_or(""),
                );
            }
        }
        RefsCommand::Edit {
            hash,
            character,
            emotion,
            utterance,
        } => {
            let hash = catalog.resolve_prefix(&hash).await?;
            let record = catalog
                .update(
                    &hash,
                    &MetadataUpdate {
                        character,
                        emotion,
                        utterance,
                    },
                )
                .await?;
            println!("Updated {}", record.audio_hash);
        }
        RefsCommand::Delete { hash } => {
            let hash = catalog.resolve_prefix(&hash).await?;
            catalog.delete(&hash).await?;
            println!("Deleted {}", hash);
        }
    }
    Ok(())
}

async fn run_generate(ctx: &mut ClientContext, args: GenerateArgs) -> Result<()> {
    let catalog = ctx.catalog().clone();
    let mut request = ctx.default_request();
    request.text = args.text;
    request.ref_audio_hash = Some(catalog.resolve_prefix(&args.reference).await?);
    for aux in &args.aux {
        request.aux_ref_audio_hashes.push(catalog.resolve_prefix(aux).await?);
    }
    request.prompt_text = args.prompt_text;
    if let Some(lang) = args.text_lang {
        request.text_lang = lang;
    }
    if let Some(lang) = args.prompt_lang {
        request.prompt_lang = lang;
    }
    if let Some(n) = args.repetitions {
        request.n_repetitions = n;
    }
    if let Some(seed) = args.seed {
        request.seed = Some(seed);
        request.keep_random = false;
    }
    if let Some(v) = args.top_k {
        request.top_k = v;
    }
    if let Some(v) = args.top_p {
        request.top_p = v;
    }
    if let Some(v) = args.temperature {
        request.temperature = v;
    }
    if let Some(v) = args.speed {
        request.speed_factor = v;
    }
    if let Some(v) = args.batch_size {
        request.batch_size = v;
    }
    if let Some(split) = args.split {
        request.text_split_method = split;
    }
    request.parallel_infer = !args.sequential;

    let client = ctx.connect().await?;
    let writer = ctx.output_writer();
    let started = Instant::now();
    let (handle, mut events) = ctx.start_generation(client.clone(), &mut request).await?;
    println!("Sent generation request");

    let mut sample_rate = None;
    let mut failed = None;
    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                match event {
                    WorkerEvent::Status(message) => println!("{}", message),
                    WorkerEvent::SampleRate(sr) => sample_rate = Some(sr),
                    WorkerEvent::Output { index, audio } => {
                        let sr = sample_rate.context("audio arrived before its sample rate")?;
                        let path = writer.write(&request, &audio, sr)?;
                        println!("[{}] {}", index, path.display());
                    }
                    WorkerEvent::Error(message) => failed = Some(message),
                    WorkerEvent::Finished => {}
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("Stopping");
                if let Err(e) = client.stop().await {
                    println!("Stop failed: {}", e);
                }
            }
        }
    }
    handle.await.context("inference worker panicked")?;

    let elapsed = started.elapsed();
    info!(elapsed_ms = elapsed.as_millis() as u64, "Generation finished");
    if let Some(message) = failed {
        bail!("generation failed after {:.1}s: {}", elapsed.as_secs_f64(), message);
    }
    println!("Done in {:.1}s", elapsed.as_secs_f64());
    Ok(())
}
