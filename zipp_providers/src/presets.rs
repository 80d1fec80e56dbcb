use serde_json::{Map, Value, json};

/// Sampling options the KoboldAI generate endpoint understands.
pub const KOBOLD_OPTIONS: &[(&str, &str)] = &[
    ("temperature", "Temperature value"),
    ("top_p", "Top-p sampling value"),
    ("rep_pen", "Base repetition penalty value"),
    ("rep_pen_range", "Repetition penalty range"),
    ("rep_pen_slope", "Repetition penalty slope"),
    ("top_k", "Top-k sampling value"),
    ("top_a", "Top-a sampling value"),
    ("typical", "Typical sampling value"),
    ("tfs", "Tail free sampling value"),
    ("sampler_seed", "RNG seed to use for sampling"),
    (
        "sampler_order",
        "The order by which all 7 samplers are applied. 0=top_k, 1=top_a, 2=top_p, 3=tfs, 4=typ, 5=temp, 6=rep_pen",
    ),
    ("min_p", "Min-p sampling value"),
    ("dynatemp_range", "Dynamic temperature range"),
    ("dynatemp_exponent", "Exponent used in dynatemp"),
    ("smoothing_factor", "Modifies temperature behavior"),
];

/// Sampling values used when a conversation has not set any.
#[must_use]
pub fn default_preset() -> Map<String, Value> {
    let preset = json!({
        "temperature": 0.7,
        "top_p": 0.92,
        "rep_pen": 1.1,
        "rep_pen_range": 320,
        "rep_pen_slope": 0.7,
        "top_k": 100,
        "top_a": 0,
        "typical": 1,
        "tfs": 1,
        "sampler_order": [6, 0, 1, 3, 4, 2, 5],
        "min_p": 0,
        "dynatemp_range": 0,
    });
    match preset {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
