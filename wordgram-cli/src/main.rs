use std::error::Error;
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};
use env_logger::Env;
use log::{info, warn};
use wordgram_core::{DEFAULT_ORDER, GenerationSettings, LanguageModel};

type CliResult = Result<(), Box<dyn Error>>;

#[derive(Parser, Debug)]
#[command(author, version, about = "Word n-gram language model toolkit", long_about = None)]
struct Cli {
	/// Increase verbosity (-v, -vv)
	#[arg(short = 'v', long, global = true, action = ArgAction::Count)]
	verbose: u8,

	/// Decrease verbosity (-q, -qq)
	#[arg(short = 'q', long, global = true, action = ArgAction::Count)]
	quiet: u8,

	#[command(subcommand)]
	command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
	/// Train a model from a corpus (one sentence per line) and save it
	Train(TrainArgs),
	/// Print the most likely next tokens for a context
	Predict(PredictArgs),
	/// Measure the top-k hit rate on a held-out corpus
	Eval(EvalArgs),
	/// Generate a response to a prompt
	Generate(GenerateArgs),
	/// Interactive generation, one prompt per line
	Chat(ChatArgs),
	/// Interactive prediction, one context per line
	Run(RunArgs),
}

#[derive(Args, Debug)]
struct ModelArgs {
	/// Model file prefix (`.vocab`, `.uni`, `.bi`, `.tri`, `.ngr` are appended)
	#[arg(short = 'm', long, default_value = "data/bin/model")]
	model_prefix: PathBuf,

	/// N-gram order of the model
	#[arg(short = 'n', long, default_value_t = DEFAULT_ORDER)]
	order: usize,
}

#[derive(Args, Debug)]
struct TrainArgs {
	/// Training corpus
	corpus: PathBuf,

	#[command(flatten)]
	model: ModelArgs,

	/// Count n-grams on worker threads
	#[arg(long)]
	parallel: bool,

	/// Reuse the `<corpus stem>.bin` snapshot next to the corpus, or write it
	#[arg(long, conflicts_with = "parallel")]
	snapshot: bool,
}

#[derive(Args, Debug)]
struct PredictArgs {
	/// Context words
	#[arg(required = true, num_args = 1..)]
	context: Vec<String>,

	#[command(flatten)]
	model: ModelArgs,

	#[command(flatten)]
	ranking: RankingArgs,
}

#[derive(Args, Debug)]
struct EvalArgs {
	/// Held-out corpus
	corpus: PathBuf,

	#[command(flatten)]
	model: ModelArgs,

	#[command(flatten)]
	ranking: RankingArgs,
}

#[derive(Args, Debug)]
struct RankingArgs {
	/// Number of predictions to consider
	#[arg(short = 'k', long, default_value_t = 5)]
	top_k: usize,
}

#[derive(Args, Debug)]
struct SamplingArgs {
	/// Sampling temperature (<= 0.01 is greedy)
	#[arg(short = 't', long = "temp", default_value_t = 0.7)]
	temperature: f64,

	/// Maximum number of generated tokens
	#[arg(long, default_value_t = 20)]
	max_tokens: usize,

	/// Seed for reproducible sampling
	#[arg(long)]
	seed: Option<u64>,
}

#[derive(Args, Debug)]
struct GenerateArgs {
	/// Prompt words
	#[arg(required = true, num_args = 1..)]
	prompt: Vec<String>,

	#[command(flatten)]
	model: ModelArgs,

	#[command(flatten)]
	sampling: SamplingArgs,
}

#[derive(Args, Debug)]
struct ChatArgs {
	#[command(flatten)]
	model: ModelArgs,

	#[command(flatten)]
	sampling: SamplingArgs,
}

#[derive(Args, Debug)]
struct RunArgs {
	#[command(flatten)]
	model: ModelArgs,

	#[command(flatten)]
	ranking: RankingArgs,
}

impl ModelArgs {
	fn load(&self) -> Result<LanguageModel, Box<dyn Error>> {
		let model = LanguageModel::load(&self.model_prefix, self.order)?;
		info!(
			"model {} ready: vocabulary {}, {} training tokens",
			self.model_prefix.display(),
			model.vocab_size(),
			model.total_tokens()
		);
		Ok(model)
	}
}

impl RankingArgs {
	fn top_k(&self) -> Result<usize, Box<dyn Error>> {
		let mut settings = GenerationSettings::default();
		settings.set_top_k(self.top_k)?;
		Ok(settings.top_k())
	}
}

impl SamplingArgs {
	fn settings(&self) -> Result<GenerationSettings, Box<dyn Error>> {
		let mut settings = GenerationSettings::new(self.max_tokens, self.seed);
		settings.set_temperature(self.temperature)?;
		Ok(settings)
	}
}

fn main() -> CliResult {
	let cli = Cli::parse();
	init_logging(cli.verbose, cli.quiet);

	match cli.command {
		Commands::Train(args) => run_train(args),
		Commands::Predict(args) => run_predict(args),
		Commands::Eval(args) => run_eval(args),
		Commands::Generate(args) => run_generate(args),
		Commands::Chat(args) => run_chat(args),
		Commands::Run(args) => run_repl(args),
	}
}

fn init_logging(verbose: u8, quiet: u8) {
	use log::LevelFilter;

	let level = if quiet > 0 {
		match quiet {
			1 => LevelFilter::Warn,
			_ => LevelFilter::Error,
		}
	} else {
		match verbose {
			0 => LevelFilter::Info,
			1 => LevelFilter::Debug,
			_ => LevelFilter::Trace,
		}
	};

	let mut builder = env_logger::Builder::from_env(Env::default().default_filter_or("info"));
	builder.format_timestamp_millis();
	builder.filter_level(level);
	let _ = builder.try_init();
}

impl TrainArgs {
	fn train(&self) -> Result<LanguageModel, Box<dyn Error>> {
		if self.snapshot {
			let model = LanguageModel::open(&self.corpus, self.model.order)?;
			if model.max_order() != self.model.order {
				warn!("snapshot has order {}, requested {}", model.max_order(), self.model.order);
			}
			return Ok(model);
		}

		let mut model = LanguageModel::new(self.model.order)?;
		if self.parallel {
			model.train_file_parallel(&self.corpus)?;
		} else {
			model.train_file(&self.corpus)?;
		}
		Ok(model)
	}
}

fn run_train(args: TrainArgs) -> CliResult {
	let model = args.train()?;

	if let Some(parent) = args.model.model_prefix.parent().filter(|p| !p.as_os_str().is_empty()) {
		fs::create_dir_all(parent)?;
	}
	model.save(&args.model.model_prefix)?;
	println!(
		"trained order-{} model: vocabulary {}, {} tokens, {} n-grams ({} distinct)",
		model.max_order(),
		model.vocab_size(),
		model.total_tokens(),
		model.index().total_ngrams(),
		model.index().node_count()
	);
	Ok(())
}

fn print_predictions(model: &LanguageModel, context: &str, top_k: usize) -> CliResult {
	let predictions = model.predict(context, top_k)?;
	if predictions.is_empty() {
		println!("(no prediction)");
	}
	for (rank, (token, score)) in predictions.iter().enumerate() {
		println!("{:>2}. {:<24} {:.4}", rank + 1, token, score);
	}
	Ok(())
}

fn run_predict(args: PredictArgs) -> CliResult {
	let top_k = args.ranking.top_k()?;
	let model = args.model.load()?;
	print_predictions(&model, &args.context.join(" "), top_k)
}

fn run_eval(args: EvalArgs) -> CliResult {
	let top_k = args.ranking.top_k()?;
	let model = args.model.load()?;
	let report = model.evaluate(&args.corpus, top_k)?;
	println!(
		"top-{} accuracy: {:.2}% ({} / {} pairs)",
		top_k,
		report.hit_rate() * 100.0,
		report.hits,
		report.pairs
	);
	Ok(())
}

fn run_generate(args: GenerateArgs) -> CliResult {
	let settings = args.sampling.settings()?;
	let model = args.model.load()?;
	let generation = model.generate_with(&args.prompt.join(" "), &settings)?;
	println!("{}", generation.text);
	Ok(())
}

fn run_chat(args: ChatArgs) -> CliResult {
	let settings = args.sampling.settings()?;
	let model = args.model.load()?;
	repl(|line| {
		let generation = model.generate_with(line, &settings)?;
		if generation.text.is_empty() {
			println!("...");
		} else {
			println!("{}", generation.text);
		}
		Ok(())
	})
}

fn run_repl(args: RunArgs) -> CliResult {
	let top_k = args.ranking.top_k()?;
	let model = args.model.load()?;
	repl(|line| print_predictions(&model, line, top_k))
}

/// Reads lines from stdin until EOF or `exit`, handing each non-empty one to `handle`.
fn repl<F>(mut handle: F) -> CliResult
where
	F: FnMut(&str) -> CliResult,
{
	println!("type `exit` to quit");
	let stdin = io::stdin();
	let mut stdout = io::stdout();
	let mut line = String::new();

	loop {
		print!("> ");
		stdout.flush()?;
		line.clear();
		if stdin.lock().read_line(&mut line)? == 0 {
			break;
		}
		let input = line.trim();
		if input == "exit" {
			break;
		}
		if input.is_empty() {
			continue;
		}
		handle(input)?;
	}
	Ok(())
}
