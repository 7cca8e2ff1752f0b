use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicI64, AtomicU64, Ordering},
        Arc, Mutex, OnceLock,
    },
};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct EndpointMetricKey {
    endpoint: String,
    method: String,
}

/// Process-wide counters rendered at `/metrics` in Prometheus text format.
pub struct RelayMetrics {
    request_duration_count: Mutex<HashMap<EndpointMetricKey, u64>>,
    request_duration_sum_ms: Mutex<HashMap<EndpointMetricKey, u64>>,
    request_errors_total: Mutex<HashMap<EndpointMetricKey, u64>>,
    request_rate_total: Mutex<HashMap<EndpointMetricKey, u64>>,
    ws_duration_count: Mutex<HashMap<String, u64>>,
    ws_duration_sum_ms: Mutex<HashMap<String, u64>>,
    ws_errors_total: Mutex<HashMap<String, u64>>,
    ws_rate_total: Mutex<HashMap<String, u64>>,
    open_connections: AtomicI64,
    room_count: AtomicU64,
    rooms_created_total: AtomicU64,
    liveness_terminations_total: AtomicU64,
    seeds_applied_total: AtomicU64,
}

const FRAME_CLASSES: [&str; 4] = ["sync", "awareness", "signal", "invalid"];
static GLOBAL_METRICS: OnceLock<Arc<RelayMetrics>> = OnceLock::new();

impl Default for RelayMetrics {
    fn default() -> Self {
        let mut ws_rate_total = HashMap::new();
        for class in FRAME_CLASSES {
            ws_rate_total.insert(class.to_string(), 0);
        }

        Self {
            request_duration_count: Mutex::new(HashMap::new()),
            request_duration_sum_ms: Mutex::new(HashMap::new()),
            request_errors_total: Mutex::new(HashMap::new()),
            request_rate_total: Mutex::new(HashMap::new()),
            ws_duration_count: Mutex::new(HashMap::new()),
            ws_duration_sum_ms: Mutex::new(HashMap::new()),
            ws_errors_total: Mutex::new(HashMap::new()),
            ws_rate_total: Mutex::new(ws_rate_total),
            open_connections: AtomicI64::new(0),
            room_count: AtomicU64::new(0),
            rooms_created_total: AtomicU64::new(0),
            liveness_terminations_total: AtomicU64::new(0),
            seeds_applied_total: AtomicU64::new(0),
        }
    }
}

pub fn set_global_metrics(metrics: Arc<RelayMetrics>) {
    let _ = GLOBAL_METRICS.set(metrics);
}

pub fn global_metrics() -> Option<&'static Arc<RelayMetrics>> {
    GLOBAL_METRICS.get()
}

pub fn record_ws_request(class: &str, is_error: bool, latency_ms: u64) {
    if let Some(metrics) = global_metrics() {
        metrics.record_ws_request(class, is_error, latency_ms);
    }
}

pub fn connection_opened() {
    if let Some(metrics) = global_metrics() {
        metrics.open_connections.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn connection_closed() {
    if let Some(metrics) = global_metrics() {
        metrics.open_connections.fetch_sub(1, Ordering::SeqCst);
    }
}

pub fn set_room_count(rooms: usize) {
    if let Some(metrics) = global_metrics() {
        metrics.room_count.store(rooms as u64, Ordering::SeqCst);
    }
}

pub fn increment_rooms_created() {
    if let Some(metrics) = global_metrics() {
        metrics.rooms_created_total.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn increment_liveness_terminations() {
    if let Some(metrics) = global_metrics() {
        metrics.liveness_terminations_total.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn increment_seeds_applied() {
    if let Some(metrics) = global_metrics() {
        metrics.seeds_applied_total.fetch_add(1, Ordering::SeqCst);
    }
}

impl RelayMetrics {
    pub fn record_http_request(&self, method: &str, path: &str, status_code: u16, latency_ms: u64) {
        let key = EndpointMetricKey {
            endpoint: normalize_endpoint(path),
            method: method.to_ascii_uppercase(),
        };

        increment_counter(&self.request_rate_total, &key, 1);
        increment_counter(&self.request_duration_sum_ms, &key, latency_ms);
        increment_counter(&self.request_duration_count, &key, 1);
        if status_code >= 400 {
            increment_counter(&self.request_errors_total, &key, 1);
        }
    }

    pub fn record_ws_request(&self, class: &str, is_error: bool, latency_ms: u64) {
        let normalized_class = normalize_frame_class(class);
        increment_label_counter(&self.ws_rate_total, &normalized_class, 1);
        increment_label_counter(&self.ws_duration_sum_ms, &normalized_class, latency_ms);
        increment_label_counter(&self.ws_duration_count, &normalized_class, 1);
        if is_error {
            increment_label_counter(&self.ws_errors_total, &normalized_class, 1);
        }
    }

    pub fn open_connections(&self) -> i64 {
        self.open_connections.load(Ordering::SeqCst)
    }

    pub fn render_prometheus(&self) -> String {
        let mut output = String::new();

        output.push_str("# HELP relay_request_rate_total Total HTTP requests by endpoint.\n");
        output.push_str("# TYPE relay_request_rate_total counter\n");
        append_counter_lines(&mut output, "relay_request_rate_total", &self.request_rate_total);

        output.push_str(
            "# HELP relay_request_errors_total Total HTTP error responses by endpoint.\n",
        );
        output.push_str("# TYPE relay_request_errors_total counter\n");
        append_counter_lines(&mut output, "relay_request_errors_total", &self.request_errors_total);

        output.push_str("# HELP relay_request_duration_ms_sum Sum of HTTP request latency in milliseconds by endpoint.\n");
        output.push_str("# TYPE relay_request_duration_ms_sum counter\n");
        append_counter_lines(
            &mut output,
            "relay_request_duration_ms_sum",
            &self.request_duration_sum_ms,
        );

        output.push_str("# HELP relay_request_duration_ms_count Count of HTTP request latency samples by endpoint.\n");
        output.push_str("# TYPE relay_request_duration_ms_count counter\n");
        append_counter_lines(
            &mut output,
            "relay_request_duration_ms_count",
            &self.request_duration_count,
        );

        output.push_str("# HELP relay_ws_frames_total Inbound websocket frames by message class.\n");
        output.push_str("# TYPE relay_ws_frames_total counter\n");
        append_label_counter_lines(&mut output, "relay_ws_frames_total", &self.ws_rate_total);

        output.push_str(
            "# HELP relay_ws_frame_errors_total Inbound websocket frames dropped by message class.\n",
        );
        output.push_str("# TYPE relay_ws_frame_errors_total counter\n");
        append_label_counter_lines(&mut output, "relay_ws_frame_errors_total", &self.ws_errors_total);

        output.push_str("# HELP relay_ws_frame_duration_ms_sum Sum of frame routing latency in milliseconds by message class.\n");
        output.push_str("# TYPE relay_ws_frame_duration_ms_sum counter\n");
        append_label_counter_lines(
            &mut output,
            "relay_ws_frame_duration_ms_sum",
            &self.ws_duration_sum_ms,
        );

        output.push_str("# HELP relay_ws_frame_duration_ms_count Count of frame routing latency samples by message class.\n");
        output.push_str("# TYPE relay_ws_frame_duration_ms_count counter\n");
        append_label_counter_lines(
            &mut output,
            "relay_ws_frame_duration_ms_count",
            &self.ws_duration_count,
        );

        append_scalar(
            &mut output,
            "relay_open_connections",
            "gauge",
            "Currently registered websocket connections.",
            self.open_connections.load(Ordering::SeqCst),
        );
        append_scalar(
            &mut output,
            "relay_rooms",
            "gauge",
            "Rooms held in memory at the last liveness sweep.",
            self.room_count.load(Ordering::SeqCst),
        );
        append_scalar(
            &mut output,
            "relay_rooms_created_total",
            "counter",
            "Rooms created since startup.",
            self.rooms_created_total.load(Ordering::SeqCst),
        );
        append_scalar(
            &mut output,
            "relay_liveness_terminations_total",
            "counter",
            "Connections terminated for missing a heartbeat.",
            self.liveness_terminations_total.load(Ordering::SeqCst),
        );
        append_scalar(
            &mut output,
            "relay_seeds_applied_total",
            "counter",
            "Rooms seeded through the bootstrap endpoint.",
            self.seeds_applied_total.load(Ordering::SeqCst),
        );

        output
    }
}

fn normalize_endpoint(path: &str) -> String {
    if path.is_empty() {
        return "/".to_string();
    }

    let mut normalized_segments = Vec::new();
    let mut previous = "";
    for segment in path.split('/').filter(|segment| !segment.is_empty()) {
        // Room ids are caller-chosen, so they would otherwise explode label cardinality.
        if previous == "rooms" {
            normalized_segments.push("{room_id}".to_string());
        } else if uuid::Uuid::parse_str(segment).is_ok() {
            normalized_segments.push("{uuid}".to_string());
        } else if segment.chars().all(|character| character.is_ascii_digit()) {
            normalized_segments.push("{number}".to_string());
        } else {
            normalized_segments.push(segment.to_string());
        }
        previous = segment;
    }

    if normalized_segments.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", normalized_segments.join("/"))
    }
}

fn normalize_frame_class(class: &str) -> String {
    let normalized = class.trim().to_ascii_lowercase();
    if FRAME_CLASSES.contains(&normalized.as_str()) {
        normalized
    } else {
        "invalid".to_string()
    }
}

fn increment_counter(
    map: &Mutex<HashMap<EndpointMetricKey, u64>>,
    key: &EndpointMetricKey,
    delta: u64,
) {
    let mut guard = map.lock().expect("metrics map lock poisoned");
    let value = guard.entry(key.clone()).or_insert(0);
    *value = value.saturating_add(delta);
}

fn increment_label_counter(map: &Mutex<HashMap<String, u64>>, label: &str, delta: u64) {
    let mut guard = map.lock().expect("metrics map lock poisoned");
    let value = guard.entry(label.to_string()).or_insert(0);
    *value = value.saturating_add(delta);
}

fn append_counter_lines(
    output: &mut String,
    metric_name: &str,
    map: &Mutex<HashMap<EndpointMetricKey, u64>>,
) {
    let guard = map.lock().expect("metrics map lock poisoned");
    let mut entries: Vec<_> = guard.iter().collect();
    entries.sort_by(|(left_key, _), (right_key, _)| {
        left_key
            .method
            .cmp(&right_key.method)
            .then_with(|| left_key.endpoint.cmp(&right_key.endpoint))
    });

    for (key, value) in entries {
        output.push_str(&format!(
            "{metric_name}{{method=\"{}\",endpoint=\"{}\"}} {value}\n",
            escape_label_value(&key.method),
            escape_label_value(&key.endpoint),
        ));
    }
}

fn append_label_counter_lines(
    output: &mut String,
    metric_name: &str,
    map: &Mutex<HashMap<String, u64>>,
) {
    let guard = map.lock().expect("metrics map lock poisoned");
    let mut entries: Vec<_> = guard.iter().collect();
    entries.sort_by(|(left, _), (right, _)| left.cmp(right));

    for (label, value) in entries {
        output.push_str(&format!(
            "{metric_name}{{class=\"{}\"}} {value}\n",
            escape_label_value(label),
        ));
    }
}

fn append_scalar(
    output: &mut String,
    metric_name: &str,
    kind: &str,
    help: &str,
    value: impl std::fmt::Display,
) {
    output.push_str(&format!("# HELP {metric_name} {help}\n"));
    output.push_str(&format!("# TYPE {metric_name} {kind}\n"));
    output.push_str(&format!("{metric_name} {value}\n"));
}

fn escape_label_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\n', "\\n").replace('"', "\\\"")
}
