//! Live smoke test for the classification path.
//!
//! Sends local image files through preprocessing and the real classifier
//! endpoint, printing whatever codes come back. Useful when changing the
//! prompt or trying a different model.
//!
//! Usage:
//!   OPENROUTER_API_KEY=sk-... cargo run --example live_classify -- scan1.png scan2.jpg

use std::time::{Duration, Instant};

use medcoder::services::classifier::{Classifier, ClassifierConfig, VlmClassifier};
use medcoder::services::preprocess;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let paths: Vec<String> = std::env::args().skip(1).collect();
    if paths.is_empty() {
        eprintln!("usage: cargo run --example live_classify -- <image> [<image> ...]");
        std::process::exit(1);
    }

    let config = ClassifierConfig {
        api_url: std::env::var("OPENROUTER_API_URL")
            .unwrap_or_else(|_| "https://openrouter.ai/api/v1/chat/completions".to_string()),
        api_key: std::env::var("OPENROUTER_API_KEY").expect("OPENROUTER_API_KEY is required"),
        model: std::env::var("OPENROUTER_MODEL")
            .unwrap_or_else(|_| "nvidia/nemotron-nano-12b-v2-vl:free".to_string()),
        timeout: Duration::from_secs(60),
    };
    println!("model: {}", config.model);

    let classifier = VlmClassifier::new(config).expect("failed to build classifier client");

    for path in paths {
        println!("\n=== {path} ===");
        let raw = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) => {
                eprintln!("  cannot read file: {e}");
                continue;
            }
        };

        let encoded = match preprocess::prepare_for_classifier(&raw) {
            Ok(encoded) => encoded,
            Err(e) => {
                eprintln!("  preprocessing failed: {e}");
                continue;
            }
        };
        println!("  payload: {} bytes ({})", encoded.bytes.len(), encoded.mime_type);

        let start = Instant::now();
        match classifier.classify(&encoded).await {
            Ok(codes) if codes.is_empty() => {
                println!("  no codes found ({} ms)", start.elapsed().as_millis());
            }
            Ok(codes) => {
                println!("  {} code(s) in {} ms:", codes.len(), start.elapsed().as_millis());
                for item in codes {
                    println!(
                        "    {:<10} {}",
                        item.code.as_deref().unwrap_or("?"),
                        item.description.as_deref().unwrap_or("")
                    );
                }
            }
            Err(e) => eprintln!("  classification failed: {e}"),
        }
    }
}
