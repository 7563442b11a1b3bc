//! High-performance load-testing client for the gateway, translating
//! `original_source/test_client.py` into a typed Rust CLI: schedules
//! requests at a target rate against a pool of nodes and API keys, then
//! writes a JSON report.

use clap::Parser;
use rand::Rng;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

#[derive(Parser)]
#[command(name = "loadtest", about = "Load tester for the LLM rate-limiting gateway")]
struct Cli {
    /// Target gateway base URLs (e.g. http://localhost:8000).
    #[arg(long, num_args = 1.., default_values_t = ["http://localhost:8000".to_string()])]
    nodes: Vec<String>,

    /// API keys to rotate through.
    #[arg(long, num_args = 1.., default_values_t = ["test_key_1".to_string(), "test_key_2".to_string(), "test_key_3".to_string()])]
    api_keys: Vec<String>,

    /// Maximum number of requests in flight at once.
    #[arg(long, default_value_t = 100)]
    concurrent: usize,

    /// Test duration in seconds.
    #[arg(long, default_value_t = 60)]
    duration: u64,

    /// Target requests per second.
    #[arg(long, default_value_t = 1000)]
    rate: u64,

    /// Output file for the JSON report.
    #[arg(long, default_value = "test_results.json")]
    output: String,
}

#[derive(Debug, Clone)]
struct RequestResult {
    success: bool,
    status_code: u16,
    response_time: Duration,
    api_key: String,
    error_message: Option<String>,
}

#[derive(Serialize)]
struct DetailedResult {
    success: bool,
    status_code: u16,
    response_time_ms: f64,
    api_key: String,
    error: Option<String>,
}

/// Builds a deterministic mock chat-completion request from an API key,
/// mirroring `MockRequestGenerator.generate_request`.
fn generate_request(api_key: &str) -> serde_json::Value {
    const PROMPTS: &[&str] = &[
        "Explain the concept of distributed systems.",
        "Write a function to reverse a string.",
        "What are the benefits of using Redis for rate limiting?",
        "Describe how sliding window algorithms work.",
        "Generate a haiku about programming.",
        "Compare REST vs GraphQL APIs.",
        "Explain CAP theorem in distributed systems.",
        "Write a SQL query to find duplicate records.",
        "What is the difference between async and sync programming?",
        "How does load balancing work in microservices?",
    ];

    let mut rng = rand::thread_rng();
    let prompt = PROMPTS[rng.gen_range(0..PROMPTS.len())];

    let digest = md5::compute(api_key.as_bytes());
    let input_tokens = 100 + (u16::from_be_bytes([digest.0[0], digest.0[1]]) as u32 % 900);
    let words_needed = (input_tokens as f64 * 0.75) as usize;

    let mut extended_prompt = prompt.to_string();
    while extended_prompt.split_whitespace().count() < words_needed {
        extended_prompt.push(' ');
        extended_prompt.push_str(prompt);
    }

    json!({
        "model": "gpt-3.5-turbo",
        "messages": [{"role": "user", "content": extended_prompt}],
        "max_tokens": rng.gen_range(50..=500),
        "temperature": rng.gen_range(0.1..=1.0),
    })
}

async fn send_request(
    client: &reqwest::Client,
    target: &str,
    api_key: &str,
) -> RequestResult {
    let body = generate_request(api_key);
    let start = Instant::now();

    let result = client
        .post(format!("{target}/v1/chat/completions"))
        .bearer_auth(api_key)
        .json(&body)
        .timeout(Duration::from_secs(30))
        .send()
        .await;

    let response_time = start.elapsed();

    match result {
        Ok(resp) => {
            let status = resp.status();
            let error_message = if status.is_success() {
                None
            } else {
                resp.text().await.ok()
            };
            RequestResult {
                success: status.is_success(),
                status_code: status.as_u16(),
                response_time,
                api_key: api_key.to_string(),
                error_message,
            }
        }
        Err(e) => RequestResult {
            success: false,
            status_code: 0,
            response_time,
            api_key: api_key.to_string(),
            error_message: Some(e.to_string()),
        },
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    println!(
        "Starting load test: {} concurrent, {}s duration, {} req/s target",
        cli.concurrent, cli.duration, cli.rate
    );
    println!("Target nodes: {:?}", cli.nodes);
    println!("API keys: {}", cli.api_keys.len());

    let client = reqwest::Client::new();
    let semaphore = Arc::new(Semaphore::new(cli.concurrent));
    let results: Arc<tokio::sync::Mutex<Vec<RequestResult>>> =
        Arc::new(tokio::sync::Mutex::new(Vec::new()));

    let total_requests = cli.duration * cli.rate;
    let start_time = Instant::now();
    let mut handles = Vec::with_capacity(total_requests as usize);

    for i in 0..total_requests {
        let target_offset = Duration::from_secs_f64(i as f64 / cli.rate as f64);
        let node = cli.nodes[rand::thread_rng().gen_range(0..cli.nodes.len())].clone();
        let api_key = cli.api_keys[rand::thread_rng().gen_range(0..cli.api_keys.len())].clone();

        let client = client.clone();
        let semaphore = semaphore.clone();
        let results = results.clone();

        handles.push(tokio::spawn(async move {
            let now = start_time.elapsed();
            if target_offset > now {
                tokio::time::sleep(target_offset - now).await;
            }
            let _permit = semaphore.acquire().await.expect("semaphore closed");
            let result = send_request(&client, &node, &api_key).await;
            results.lock().await.push(result);
        }));
    }

    for handle in handles {
        let _ = handle.await;
    }

    let test_duration = start_time.elapsed();
    let results = Arc::try_unwrap(results).unwrap().into_inner();
    let report = build_report(&cli, &results, test_duration);

    std::fs::write(&cli.output, serde_json::to_string_pretty(&report)?)?;

    println!("\n{}", "=".repeat(60));
    println!("LOAD TEST SUMMARY");
    println!("{}", "=".repeat(60));
    println!("Total Requests: {}", results.len());
    let successful = results.iter().filter(|r| r.success).count();
    println!("Successful: {successful}");
    println!("Failed: {}", results.len() - successful);
    if !results.is_empty() {
        println!(
            "Success Rate: {:.2}%",
            successful as f64 / results.len() as f64 * 100.0
        );
    }
    println!("Duration: {:.2}s", test_duration.as_secs_f64());
    println!(
        "Throughput: {:.2} req/s",
        results.len() as f64 / test_duration.as_secs_f64()
    );

    let rate_limited = results.iter().filter(|r| r.status_code == 429).count();
    if rate_limited > 0 {
        println!("\nRate Limit Hits: {rate_limited}");
    }

    Ok(())
}

fn percentile(sorted_ms: &[f64], pct: f64) -> f64 {
    if sorted_ms.is_empty() {
        return 0.0;
    }
    let idx = ((sorted_ms.len() as f64 - 1.0) * pct).round() as usize;
    sorted_ms[idx.min(sorted_ms.len() - 1)]
}

fn build_report(cli: &Cli, results: &[RequestResult], test_duration: Duration) -> serde_json::Value {
    if results.is_empty() {
        return json!({"error": "No results collected"});
    }

    let mut times_ms: Vec<f64> = results
        .iter()
        .map(|r| r.response_time.as_secs_f64() * 1000.0)
        .collect();
    times_ms.sort_by(|a, b| a.partial_cmp(b).unwrap());

    let successful = results.iter().filter(|r| r.success).count();
    let failed = results.len() - successful;

    let mean = times_ms.iter().sum::<f64>() / times_ms.len() as f64;
    let variance = times_ms.iter().map(|t| (t - mean).powi(2)).sum::<f64>() / times_ms.len() as f64;

    let mut error_types: std::collections::HashMap<String, u64> = std::collections::HashMap::new();
    for r in results.iter().filter(|r| !r.success) {
        let key = r.error_message.clone().unwrap_or_else(|| "unknown".to_string());
        *error_types.entry(key).or_insert(0) += 1;
    }

    let mut by_key: std::collections::HashMap<String, (u64, u64)> = std::collections::HashMap::new();
    for r in results {
        let entry = by_key.entry(r.api_key.clone()).or_insert((0, 0));
        entry.0 += 1;
        if r.success {
            entry.1 += 1;
        }
    }
    let throughput_by_key: serde_json::Value = by_key
        .into_iter()
        .map(|(k, (total, success))| {
            (
                k,
                json!({
                    "total_requests": total,
                    "success_rate": success as f64 / total as f64,
                    "requests_per_second": total as f64 / test_duration.as_secs_f64(),
                }),
            )
        })
        .collect();

    json!({
        "test_config": {
            "target_nodes": cli.nodes,
            "api_keys_count": cli.api_keys.len(),
            "concurrent_requests": cli.concurrent,
            "duration_seconds": cli.duration,
            "request_rate": cli.rate,
            "total_expected_requests": cli.duration * cli.rate,
        },
        "summary": {
            "total_requests": results.len(),
            "successful_requests": successful,
            "failed_requests": failed,
            "success_rate": successful as f64 / results.len() as f64,
            "test_duration_seconds": test_duration.as_secs_f64(),
            "requests_per_second": results.len() as f64 / test_duration.as_secs_f64(),
        },
        "performance_metrics": {
            "min_response_time_ms": times_ms.first().copied().unwrap_or(0.0),
            "max_response_time_ms": times_ms.last().copied().unwrap_or(0.0),
            "mean_response_time_ms": mean,
            "median_response_time_ms": percentile(&times_ms, 0.5),
            "p95_response_time_ms": percentile(&times_ms, 0.95),
            "p99_response_time_ms": percentile(&times_ms, 0.99),
            "std_dev_response_time_ms": variance.sqrt(),
        },
        "error_analysis": {
            "total_errors": failed,
            "error_types": error_types,
            "rate_limit_hits": results.iter().filter(|r| r.status_code == 429).count(),
        },
        "throughput_by_key": throughput_by_key,
        "detailed_results": results.iter().map(|r| DetailedResult {
            success: r.success,
            status_code: r.status_code,
            response_time_ms: r.response_time.as_secs_f64() * 1000.0,
            api_key: format!("{}...", &r.api_key[..r.api_key.len().min(8)]),
            error: r.error_message.clone(),
        }).collect::<Vec<_>>(),
    })
}
