use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

/// A successful summarization outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    pub text: String,
    pub usage: Option<Usage>,
    /// Best-effort USD estimate; `None` when the model is unpriced.
    pub cost_estimate: Option<f64>,
    /// Hex SHA-256 of model + clipped input, for auditing.
    pub fingerprint: String,
}
