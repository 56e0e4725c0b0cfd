use crate::types::Usage;

/// USD per 1M tokens, (model prefix, input, output). Longest prefix wins.
const PRICING: &[(&str, f64, f64)] = &[
    ("gpt-4o-mini", 0.15, 0.60),
    ("gpt-4o", 2.50, 10.00),
    ("gpt-4.1-mini", 0.40, 1.60),
    ("gpt-4.1-nano", 0.10, 0.40),
    ("gpt-4.1", 2.00, 8.00),
];

fn rates_for(model: &str) -> Option<(f64, f64)> {
    let model = model.to_ascii_lowercase();
    PRICING
        .iter()
        .filter(|(prefix, _, _)| model.starts_with(prefix))
        .max_by_key(|(prefix, _, _)| prefix.len())
        .map(|(_, input, output)| (*input, *output))
}

/// Cost estimate from reported token usage.
pub fn estimate_from_usage(model: &str, usage: &Usage) -> Option<f64> {
    let (input, output) = rates_for(model)?;
    Some(
        (usage.prompt_tokens as f64 * input + usage.completion_tokens as f64 * output) / 1_000_000.0,
    )
}

/// Character-count fallback when the provider reported no usage:
/// roughly four characters per token.
pub fn estimate_from_chars(model: &str, input_chars: usize, output_chars: usize) -> Option<f64> {
    let usage = Usage {
        prompt_tokens: (input_chars / 4) as u32,
        completion_tokens: (output_chars / 4) as u32,
    };
    estimate_from_usage(model, &usage)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn longest_prefix_wins() {
        let usage = Usage {
            prompt_tokens: 1_000_000,
            completion_tokens: 0,
        };
        let mini = estimate_from_usage("gpt-4o-mini-2024-07-18", &usage).unwrap();
        let full = estimate_from_usage("gpt-4o-2024-08-06", &usage).unwrap();
        assert!(mini < full);
        assert!((mini - 0.15).abs() < 1e-9);
    }

    #[test]
    fn unpriced_model_yields_none() {
        let usage = Usage {
            prompt_tokens: 100,
            completion_tokens: 100,
        };
        assert!(estimate_from_usage("some-local-model", &usage).is_none());
        assert!(estimate_from_chars("some-local-model", 400, 100).is_none());
    }

    #[test]
    fn char_fallback_approximates_tokens() {
        let by_chars = estimate_from_chars("gpt-4o-mini", 4000, 400).unwrap();
        let by_usage = estimate_from_usage(
            "gpt-4o-mini",
            &Usage {
                prompt_tokens: 1000,
                completion_tokens: 100,
            },
        )
        .unwrap();
        assert!((by_chars - by_usage).abs() < 1e-12);
    }
}
