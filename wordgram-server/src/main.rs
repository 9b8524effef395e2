use std::path::PathBuf;
use std::sync::RwLock;

use actix_web::{App, HttpResponse, HttpServer, Responder, get, put, web};
use serde::{Deserialize, Serialize};
use wordgram_core::io::{list_models, model_dir};
use wordgram_core::{DEFAULT_ORDER, GenerationSettings, LanguageModel};

const DEFAULT_PREFIX: &str = "data/bin/model";
const MODEL_DIR: &str = "data/bin";

/// Query parameters for the `/v1/predict` endpoint
#[derive(Deserialize)]
struct PredictParams {
	context: Option<String>,
	k: Option<usize>,
}

/// Query parameters for the `/v1/generate` endpoint
#[derive(Deserialize)]
struct GenerateParams {
	prompt: Option<String>,
	max_tokens: Option<usize>,
	temperature: Option<f64>,
	seed: Option<u64>,
}

#[derive(Deserialize)]
struct ModelsQuery {
	dir: Option<String>,
}

#[derive(Deserialize)]
struct ModelQuery {
	prefix: Option<String>,
	order: Option<usize>,
}

#[derive(Serialize)]
struct PredictionBody {
	token: String,
	score: f64,
}

#[derive(Serialize)]
struct GenerationBody {
	text: String,
	tokens: usize,
	stop: String,
}

#[derive(Serialize)]
struct InfoBody {
	prefix: Option<String>,
	order: usize,
	vocab_size: usize,
	total_tokens: u64,
	ngrams: u64,
	nodes: usize,
}

struct SharedData {
	model: LanguageModel,
	prefix: Option<PathBuf>,
}

impl GenerateParams {
	/// Turns the query into validated generation settings.
	fn settings(&self) -> Result<GenerationSettings, String> {
		let mut settings = GenerationSettings::default();
		if let Some(max_tokens) = self.max_tokens {
			settings.max_tokens = max_tokens;
		}
		if let Some(temperature) = self.temperature {
			settings.set_temperature(temperature).map_err(|e| e.to_string())?;
		}
		settings.seed = self.seed;
		Ok(settings)
	}
}

/// HTTP GET endpoint `/v1/predict`
///
/// Returns the top-k next tokens for `context` as a JSON array of
/// `{ token, score }`, best first.
#[get("/v1/predict")]
async fn get_predict(data: web::Data<RwLock<SharedData>>, query: web::Query<PredictParams>) -> impl Responder {
	let mut settings = GenerationSettings::default();
	if let Some(k) = query.k {
		if let Err(e) = settings.set_top_k(k) {
			return HttpResponse::BadRequest().body(e.to_string());
		}
	}

	let shared_data = match data.read() {
		Ok(m) => m,
		Err(_) => return HttpResponse::InternalServerError().body("Model lock failed"),
	};

	let context = query.context.as_deref().unwrap_or("");
	match shared_data.model.predict(context, settings.top_k()) {
		Ok(predictions) => HttpResponse::Ok().json(
			predictions.into_iter().map(|(token, score)| PredictionBody { token, score }).collect::<Vec<_>>(),
		),
		Err(e) => HttpResponse::InternalServerError().body(e.to_string()),
	}
}

/// HTTP GET endpoint `/v1/generate`
///
/// Generates a response to `prompt`. A `seed` makes the result reproducible.
#[get("/v1/generate")]
async fn get_generated(data: web::Data<RwLock<SharedData>>, query: web::Query<GenerateParams>) -> impl Responder {
	let prompt = match &query.prompt {
		Some(s) if !s.trim().is_empty() => s.trim(),
		_ => return HttpResponse::BadRequest().body("Missing or empty prompt"),
	};

	let settings = match query.settings() {
		Ok(s) => s,
		Err(e) => return HttpResponse::BadRequest().body(e),
	};

	let shared_data = match data.read() {
		Ok(m) => m,
		Err(_) => return HttpResponse::InternalServerError().body("Model lock failed"),
	};

	match shared_data.model.generate_with(prompt, &settings) {
		Ok(generation) => HttpResponse::Ok().json(GenerationBody {
			tokens: generation.tokens.len(),
			stop: format!("{:?}", generation.stop),
			text: generation.text,
		}),
		Err(e) => HttpResponse::InternalServerError().body(e.to_string()),
	}
}

#[get("/v1/info")]
async fn get_info(data: web::Data<RwLock<SharedData>>) -> impl Responder {
	let shared_data = match data.read() {
		Ok(m) => m,
		Err(_) => return HttpResponse::InternalServerError().body("Model lock failed"),
	};
	let model = &shared_data.model;
	HttpResponse::Ok().json(InfoBody {
		prefix: shared_data.prefix.as_ref().map(|p| p.display().to_string()),
		order: model.max_order(),
		vocab_size: model.vocab_size(),
		total_tokens: model.total_tokens(),
		ngrams: model.index().total_ngrams(),
		nodes: model.index().node_count(),
	})
}

/// HTTP GET endpoint `/v1/models`
///
/// Lists the model prefixes saved in `dir` (default `data/bin`), one per line.
#[get("/v1/models")]
async fn get_models(query: web::Query<ModelsQuery>) -> impl Responder {
	match model_dir(query.dir.as_deref().unwrap_or(MODEL_DIR)).and_then(|dir| list_models(&dir)) {
		Ok(prefixes) => HttpResponse::Ok()
			.body(prefixes.iter().map(|prefix| prefix.display().to_string()).collect::<Vec<_>>().join("\n")),
		Err(e) => {
			log::warn!("listing models failed: {e}");
			HttpResponse::InternalServerError().body("Failed to list models")
		}
	}
}

/// HTTP PUT endpoint `/v1/load_model`
///
/// Loads the model saved under `prefix`. The served model is only replaced
/// once the new one has been read completely.
#[put("/v1/load_model")]
async fn put_model(data: web::Data<RwLock<SharedData>>, query: web::Query<ModelQuery>) -> impl Responder {
	let prefix = match &query.prefix {
		Some(s) if !s.trim().is_empty() => PathBuf::from(s.trim()),
		_ => return HttpResponse::BadRequest().body("Missing or empty model prefix"),
	};
	let order = query.order.unwrap_or(DEFAULT_ORDER);

	// Read without holding the lock so predictions keep being served
	let model = match LanguageModel::load(&prefix, order) {
		Ok(m) => m,
		Err(e) => return HttpResponse::InternalServerError().body(format!("Failed to load model: {e}")),
	};

	let mut shared_data = match data.write() {
		Ok(m) => m,
		Err(_) => return HttpResponse::InternalServerError().body("Model lock failed"),
	};
	shared_data.model = model;
	shared_data.prefix = Some(prefix);

	HttpResponse::Ok().body("Model loaded successfully")
}

/// Loads the default model if it was saved, otherwise starts empty.
fn initial_data() -> std::io::Result<SharedData> {
	match LanguageModel::load(DEFAULT_PREFIX, DEFAULT_ORDER) {
		Ok(model) => Ok(SharedData { model, prefix: Some(PathBuf::from(DEFAULT_PREFIX)) }),
		Err(e) => {
			log::warn!("no model served at startup ({e}); use PUT /v1/load_model");
			let model = LanguageModel::new(DEFAULT_ORDER).map_err(std::io::Error::other)?;
			Ok(SharedData { model, prefix: None })
		}
	}
}

/// Main entry point for the server.
///
/// Loads the default model, wraps it in a `RwLock` so requests read it
/// concurrently, and starts an Actix-web HTTP server.
///
/// # Notes
/// - The server binds to 127.0.0.1:5000.
/// - `RUST_LOG` controls logging (defaults to `info`).
#[actix_web::main]
async fn main() -> std::io::Result<()> {
	env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

	let shared_model = web::Data::new(RwLock::new(initial_data()?));

	log::info!("listening on 127.0.0.1:5000");
	HttpServer::new(move || {
		App::new()
			.app_data(shared_model.clone())
			.service(get_predict)
			.service(get_generated)
			.service(get_info)
			.service(get_models)
			.service(put_model)
	})
		.bind(("127.0.0.1", 5000))?
		.run()
		.await
}
