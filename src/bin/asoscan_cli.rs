use asoscan::backend::HttpScoringBackend;
use asoscan::dispatch::ScoreRequest;
use asoscan::reconciler::{reconcile_job, ReconcilerContext};
use asoscan::service::{AsoScanService, ServiceConfig};
use serde::Serialize;
use std::sync::Arc;
use std::{env, fs};
use tracing_subscriber::EnvFilter;

const API_KEY_ENV: &str = "ASOSCAN_API_KEY";
const DEFAULT_BACKEND_URL: &str = "https://api.runpod.ai/v2/oligo-scorer";

fn usage() {
    eprintln!(
        "Usage:\n  \
  asoscan_cli [OPTIONS] gene GENE\n  \
  asoscan_cli [OPTIONS] check-cache '<request-json>'\n  \
  asoscan_cli [OPTIONS] submit '<request-json>'\n  \
  asoscan_cli [OPTIONS] status JOB_ID\n  \
  asoscan_cli [OPTIONS] results JOB_ID PAGE [PAGE_SIZE]\n  \
  asoscan_cli [OPTIONS] csv JOB_ID [OUTPUT.csv]\n  \
  asoscan_cli [OPTIONS] cancel JOB_ID\n  \
  asoscan_cli [OPTIONS] reconcile JOB_ID|--pending\n\n  \
  Options:\n    \
  --data DIR     gene data directory (default data/gene_sequences)\n    \
  --store DIR    job store directory (default data/jobs)\n    \
  --backend URL  scoring backend base URL\n\n  \
  The backend API key is read from {API_KEY_ENV}.\n  \
  Tip: pass @file.json instead of inline request JSON"
    );
}

fn load_json_arg(value: &str) -> Result<String, String> {
    if let Some(path) = value.strip_prefix('@') {
        fs::read_to_string(path).map_err(|e| format!("Could not read JSON file '{path}': {e}"))
    } else {
        Ok(value.to_string())
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), String> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| format!("Could not serialize JSON output: {e}"))?;
    println!("{text}");
    Ok(())
}

struct CliOptions {
    config: ServiceConfig,
    backend_url: String,
    command_start: usize,
}

fn parse_options(args: &[String]) -> Result<CliOptions, String> {
    let mut config = ServiceConfig::default();
    let mut backend_url = DEFAULT_BACKEND_URL.to_string();
    let mut i = 1;
    while i + 1 < args.len() {
        match args[i].as_str() {
            "--data" => config.gene_data_dir = args[i + 1].clone().into(),
            "--store" => config.store_dir = args[i + 1].clone().into(),
            "--backend" => backend_url = args[i + 1].clone(),
            _ => break,
        }
        i += 2;
    }
    Ok(CliOptions {
        config,
        backend_url,
        command_start: i,
    })
}

fn parse_request(raw: &str) -> Result<ScoreRequest, String> {
    let json = load_json_arg(raw)?;
    serde_json::from_str(&json).map_err(|e| format!("Invalid request JSON: {e}"))
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(e) = run() {
        eprintln!("{e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let args: Vec<String> = env::args().collect();
    if args.len() <= 1 {
        usage();
        return Err("Missing command".to_string());
    }

    let options = parse_options(&args)?;
    if args.len() <= options.command_start {
        usage();
        return Err("Missing command".to_string());
    }
    let command = args[options.command_start].as_str();
    let operands = &args[options.command_start + 1..];

    let api_key = env::var(API_KEY_ENV)
        .map_err(|_| format!("{API_KEY_ENV} environment variable is not set"))?;
    let backend = Arc::new(
        HttpScoringBackend::new(options.backend_url.clone(), api_key).map_err(|e| e.to_string())?,
    );
    let config = options.config.clone();
    let service =
        AsoScanService::new(options.config, backend.clone()).map_err(|e| e.to_string())?;

    match command {
        "gene" => {
            let [gene] = operands else {
                usage();
                return Err("gene requires: GENE".to_string());
            };
            let annotation = service.gene_annotation(gene).map_err(|e| e.to_string())?;
            print_json(&annotation)
        }
        "check-cache" => {
            let [raw] = operands else {
                usage();
                return Err("check-cache requires: '<request-json>'".to_string());
            };
            let request = parse_request(raw)?;
            let cached = service.check_cache(&request).map_err(|e| e.to_string())?;
            match cached {
                Some(job_id) => println!("{job_id}"),
                None => println!("(no cached job)"),
            }
            Ok(())
        }
        "submit" => {
            let [raw] = operands else {
                usage();
                return Err("submit requires: '<request-json>'".to_string());
            };
            let request = parse_request(raw)?;
            let outcome = service
                .submit_scoring_request(&request)
                .map_err(|e| e.to_string())?;
            print_json(&outcome)
        }
        "status" => {
            let [job_id] = operands else {
                usage();
                return Err("status requires: JOB_ID".to_string());
            };
            let report = service.job_status(job_id).map_err(|e| e.to_string())?;
            print_json(&report)
        }
        "results" => {
            let (job_id, page, page_size) = match operands {
                [job_id, page] => (job_id, page.as_str(), "100"),
                [job_id, page, size] => (job_id, page.as_str(), size.as_str()),
                _ => {
                    usage();
                    return Err("results requires: JOB_ID PAGE [PAGE_SIZE]".to_string());
                }
            };
            let page: usize = page.parse().map_err(|e| format!("Invalid page: {e}"))?;
            let page_size: usize = page_size
                .parse()
                .map_err(|e| format!("Invalid page size: {e}"))?;
            let results = service
                .results_page(job_id, page, page_size)
                .map_err(|e| e.to_string())?;
            print_json(&results)
        }
        "csv" => {
            let (job_id, output) = match operands {
                [job_id] => (job_id, None),
                [job_id, output] => (job_id, Some(output)),
                _ => {
                    usage();
                    return Err("csv requires: JOB_ID [OUTPUT.csv]".to_string());
                }
            };
            let csv = service.csv_export(job_id).map_err(|e| e.to_string())?;
            match output {
                Some(path) => {
                    fs::write(path, &csv)
                        .map_err(|e| format!("Could not write CSV output '{path}': {e}"))?;
                    println!("Wrote {} bytes to '{path}'", csv.len());
                }
                None => print!("{csv}"),
            }
            Ok(())
        }
        "cancel" => {
            let [job_id] = operands else {
                usage();
                return Err("cancel requires: JOB_ID".to_string());
            };
            service.cancel_job(job_id).map_err(|e| e.to_string())?;
            println!("Canceled job '{job_id}'");
            Ok(())
        }
        "reconcile" => {
            // Drive reconciliation synchronously, so the command only
            // returns once the job(s) reach a terminal state.
            let context = ReconcilerContext {
                genes: asoscan::gene_store::GeneDataStore::new(&config.gene_data_dir),
                store: Arc::new(
                    asoscan::store::ResultStore::open(&config.store_dir)
                        .map_err(|e| e.to_string())?,
                ),
                backend,
                poll_interval: config.poll_interval,
                max_polls: config.max_polls,
            };
            match operands {
                [flag] if flag == "--pending" => {
                    let pending = context.store.pending_job_ids().map_err(|e| e.to_string())?;
                    if pending.is_empty() {
                        println!("No pending jobs");
                        return Ok(());
                    }
                    for job_id in pending {
                        let status =
                            reconcile_job(&context, &job_id).map_err(|e| e.to_string())?;
                        println!("{job_id}: {status:?}");
                    }
                    Ok(())
                }
                [job_id] => {
                    let status = reconcile_job(&context, job_id).map_err(|e| e.to_string())?;
                    println!("{job_id}: {status:?}");
                    Ok(())
                }
                _ => {
                    usage();
                    Err("reconcile requires: JOB_ID or --pending".to_string())
                }
            }
        }
        _ => {
            usage();
            Err(format!("Unknown command '{command}'"))
        }
    }
}
