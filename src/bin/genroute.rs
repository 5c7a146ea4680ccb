//! Smoke test against the providers configured in the environment.
//!
//! Usage: genroute [prompt]
//! Set RUST_LOG=debug to watch selection and failover.

use genroute::{GenerationRequest, Orchestrator, TaskKind};
use log::error;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>>
{   env_logger::init();

    let orchestrator = Orchestrator::from_env()?;
    let providers = orchestrator.available_providers();
    if providers.is_empty()
    {   error!("no providers configured; set CEREBRAS_API_KEYS, \
                GEMINI_API_KEYS or NVIDIA_API_KEYS");
        orchestrator.shutdown().await?;
        std::process::exit(1);
    }
    println!("Providers initialized: {:?}", orchestrator.provider_models());
    for (id, models) in orchestrator.available_models()
    {   println!("  {} offers: {}", id, models.join(", "));
    }

    for outcome in orchestrator.check_health_now().await
    {   println!(
          "  {} probe: {}"
        , outcome.provider
        , if outcome.alive { "ok" } else { "failed" }
        );
    }

    let prompt = std::env::args().nth(1)
      .unwrap_or_else(|| {
        "Write a catchy headline for a new smartphone".to_string()
      });
    let request = GenerationRequest::new(TaskKind::Headline, prompt)?
      .with_max_tokens(50)?;

    let result = orchestrator.generate(&request).await;
    let status = serde_json::to_string_pretty(&orchestrator.health_status())?;
    orchestrator.shutdown().await?;

    match result
    {   Ok(response) => {
          println!("Provider: {}", response.provider);
          println!("Model: {}", response.model);
          println!("Latency: {}ms", response.latency_ms);
          println!("Fallback: {}", response.fallback);
          println!("Result: {:?}", response.text);
        }
      , Err(e) => {
          error!("generation failed: {}", e);
          println!("Health: {}", status);
          std::process::exit(1);
        }
    }
    println!("Health: {}", status);
    Ok(())
}
