//! Cost estimation for provider usage.
//!
//! A hardcoded price table keyed by model-name prefix, with a conservative
//! fallback for unknown hosted models. Local backends (ollama, lm_studio)
//! cost nothing. Estimates are approximate; display code prefixes them
//! with `~`.

use ensemble_types::llm::ProviderType;

struct PricingEntry {
    model_pattern: &'static str,
    input_cost_per_million: f64,
    output_cost_per_million: f64,
}

/// Conservative fallback pricing when no model match is found.
const FALLBACK_INPUT_COST: f64 = 5.0;
const FALLBACK_OUTPUT_COST: f64 = 15.0;

/// Approximate USD-per-million-token rates as of mid 2026,
/// matched by model-name prefix.
const PRICING_TABLE: &[PricingEntry] = &[
    PricingEntry {
        model_pattern: "claude-sonnet-4",
        input_cost_per_million: 3.0,
        output_cost_per_million: 15.0,
    },
    PricingEntry {
        model_pattern: "claude-opus-4",
        input_cost_per_million: 15.0,
        output_cost_per_million: 75.0,
    },
    PricingEntry {
        model_pattern: "claude-haiku-3",
        input_cost_per_million: 0.25,
        output_cost_per_million: 1.25,
    },
    PricingEntry {
        model_pattern: "gpt-4o-mini",
        input_cost_per_million: 0.15,
        output_cost_per_million: 0.60,
    },
    PricingEntry {
        model_pattern: "gpt-4o",
        input_cost_per_million: 2.50,
        output_cost_per_million: 10.0,
    },
    PricingEntry {
        model_pattern: "gemini-2",
        input_cost_per_million: 1.25,
        output_cost_per_million: 5.0,
    },
];

/// Whether a backend bills per token at all.
fn is_local(provider_type: ProviderType) -> bool {
    matches!(
        provider_type,
        ProviderType::Ollama | ProviderType::LmStudio
    )
}

/// Estimate the cost of one usage event in USD.
///
/// Lookup order: local backends are free; otherwise the model name is
/// matched by prefix against the price table; unknown hosted models fall
/// back to a deliberately high rate so budget checks err on the safe side.
pub fn estimate_cost(
    provider_type: ProviderType,
    model: &str,
    tokens_input: u64,
    tokens_output: u64,
) -> f64 {
    if is_local(provider_type) {
        return 0.0;
    }

    for entry in PRICING_TABLE {
        if model.starts_with(entry.model_pattern) {
            return compute_cost(
                tokens_input,
                tokens_output,
                entry.input_cost_per_million,
                entry.output_cost_per_million,
            );
        }
    }

    compute_cost(
        tokens_input,
        tokens_output,
        FALLBACK_INPUT_COST,
        FALLBACK_OUTPUT_COST,
    )
}

fn compute_cost(
    tokens_input: u64,
    tokens_output: u64,
    input_cost_per_million: f64,
    output_cost_per_million: f64,
) -> f64 {
    let input_cost = (tokens_input as f64 / 1_000_000.0) * input_cost_per_million;
    let output_cost = (tokens_output as f64 / 1_000_000.0) * output_cost_per_million;
    input_cost + output_cost
}

/// Format a cost estimate for display.
///
/// Always prefixed with `~` to mark the value as an estimate.
pub fn format_cost(cost: f64) -> String {
    if cost < 0.01 {
        format!("~${cost:.3}")
    } else {
        format!("~${cost:.2}")
    }
}
