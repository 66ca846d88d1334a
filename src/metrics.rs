//! Request, latency, and AI-spend accumulation with Prometheus text
//! exposition. The sink is owned by the process and injected into handlers;
//! nothing here is ambient global state.

use std::collections::HashMap;
use std::time::Duration;

const LATENCY_BUCKETS: [f64; 5] = [0.1, 0.5, 1.0, 2.0, 5.0];

/// USD micros per token. Unknown models cost nothing.
fn unit_cost_usd_micros(model: &str) -> u64 {
    match model {
        "gemini-pro" => 10,
        "gemini-pro-vision" => 20,
        _ => 0,
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CostAlert {
    pub model: String,
    pub cost_usd: f64,
    pub threshold_usd: f64,
}

#[derive(Debug)]
pub struct MetricsSink {
    request_counts: HashMap<(String, u16), u64>,
    latency: HashMap<String, LatencyHistogram>,
    cost_usd_micros: HashMap<String, u64>,
    named: HashMap<String, u64>,
    threshold_usd_micros: u64,
    debug_counters: bool,
}

impl MetricsSink {
    pub fn new(cost_alert_threshold_usd: f64) -> Self {
        Self {
            request_counts: HashMap::new(),
            latency: HashMap::new(),
            cost_usd_micros: HashMap::new(),
            named: HashMap::new(),
            threshold_usd_micros: to_micros(cost_alert_threshold_usd),
            debug_counters: false,
        }
    }

    pub fn with_debug_counters(mut self) -> Self {
        self.debug_counters = true;
        self
    }

    pub fn record_request(&mut self, endpoint: &str, status: u16, duration: Duration) {
        let count = self
            .request_counts
            .entry((endpoint.to_string(), status))
            .or_default();
        *count = count.saturating_add(1);
        self.latency
            .entry(endpoint.to_string())
            .or_default()
            .observe(duration);
    }

    /// Adds the spend to the per-model ledger. The alert fires on the
    /// incremental cost of this one call, not the running total.
    pub fn record_cost(&mut self, model: &str, tokens: u64) -> Option<CostAlert> {
        let cost = tokens.saturating_mul(unit_cost_usd_micros(model));
        let spent = self.cost_usd_micros.entry(model.to_string()).or_default();
        *spent = spent.saturating_add(cost);

        if cost > self.threshold_usd_micros {
            let alert = CostAlert {
                model: model.to_string(),
                cost_usd: to_usd(cost),
                threshold_usd: to_usd(self.threshold_usd_micros),
            };
            tracing::warn!(
                model,
                cost_usd = alert.cost_usd,
                threshold_usd = alert.threshold_usd,
                "daily AI cost threshold exceeded"
            );
            return Some(alert);
        }
        None
    }

    pub fn cost_usd(&self, model: &str) -> f64 {
        to_usd(self.cost_usd_micros.get(model).copied().unwrap_or(0))
    }

    pub fn incr(&mut self, name: &str) {
        self.incr_by(name, 1);
    }

    pub fn incr_by(&mut self, name: &str, n: u64) {
        let value = self.named.entry(name.to_string()).or_default();
        *value = value.saturating_add(n);
        if self.debug_counters {
            tracing::info!(counter = name, value = *value, "metrics counter");
        }
    }

    pub fn value(&self, name: &str) -> u64 {
        self.named.get(name).copied().unwrap_or(0)
    }

    /// Clears the named counters; the exposition series live for the
    /// process lifetime.
    pub fn reset_all(&mut self) {
        self.named.clear();
    }

    pub fn render(&self) -> String {
        let mut out = String::new();

        out.push_str("# HELP api_requests_total Total number of API requests.\n");
        out.push_str("# TYPE api_requests_total counter\n");
        let mut requests: Vec<(&(String, u16), &u64)> = self.request_counts.iter().collect();
        requests.sort();
        for ((endpoint, status), count) in requests {
            out.push_str(&format!(
                "api_requests_total{{endpoint=\"{}\",status=\"{status}\"}} {count}\n",
                escape_label_value(endpoint)
            ));
        }

        out.push_str("# HELP api_request_duration_seconds API request latency.\n");
        out.push_str("# TYPE api_request_duration_seconds histogram\n");
        let mut latencies: Vec<(&String, &LatencyHistogram)> = self.latency.iter().collect();
        latencies.sort_by(|(a, _), (b, _)| a.cmp(b));
        for (endpoint, histogram) in latencies {
            let endpoint = escape_label_value(endpoint);
            for (idx, bound) in LATENCY_BUCKETS.iter().enumerate() {
                out.push_str(&format!(
                    "api_request_duration_seconds_bucket{{endpoint=\"{endpoint}\",le=\"{bound}\"}} {}\n",
                    histogram.bucket_counts[idx]
                ));
            }
            out.push_str(&format!(
                "api_request_duration_seconds_bucket{{endpoint=\"{endpoint}\",le=\"+Inf\"}} {}\n",
                histogram.count
            ));
            out.push_str(&format!(
                "api_request_duration_seconds_sum{{endpoint=\"{endpoint}\"}} {}\n",
                histogram.sum_seconds
            ));
            out.push_str(&format!(
                "api_request_duration_seconds_count{{endpoint=\"{endpoint}\"}} {}\n",
                histogram.count
            ));
        }

        out.push_str("# HELP ai_request_cost_dollars Total cost of AI requests in dollars.\n");
        out.push_str("# TYPE ai_request_cost_dollars counter\n");
        let mut costs: Vec<(&String, &u64)> = self.cost_usd_micros.iter().collect();
        costs.sort_by(|(a, _), (b, _)| a.cmp(b));
        for (model, micros) in costs {
            out.push_str(&format!(
                "ai_request_cost_dollars{{model=\"{}\"}} {}\n",
                escape_label_value(model),
                to_usd(*micros)
            ));
        }

        out
    }
}

fn to_micros(usd: f64) -> u64 {
    if !usd.is_finite() || usd <= 0.0 {
        return 0;
    }
    let micros = (usd * 1_000_000.0).round();
    if micros > u64::MAX as f64 {
        u64::MAX
    } else {
        micros as u64
    }
}

fn to_usd(micros: u64) -> f64 {
    micros as f64 / 1_000_000.0
}

fn escape_label_value(value: &str) -> String {
    let mut out = String::new();
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '"' => out.push_str("\\\""),
            _ => out.push(c),
        }
    }
    out
}

#[derive(Clone, Debug, Default)]
struct LatencyHistogram {
    bucket_counts: [u64; 5],
    sum_seconds: f64,
    count: u64,
}

impl LatencyHistogram {
    fn observe(&mut self, duration: Duration) {
        let seconds = duration.as_secs_f64();
        self.sum_seconds += seconds;
        self.count = self.count.saturating_add(1);
        for (idx, bound) in LATENCY_BUCKETS.iter().enumerate() {
            if seconds <= *bound {
                self.bucket_counts[idx] = self.bucket_counts[idx].saturating_add(1);
            }
        }
    }
}
