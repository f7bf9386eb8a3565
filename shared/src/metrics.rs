use cadence::{Counted, Gauged, MetricError, StatsdClient, Timed, UdpMetricSink};
use std::net::UdpSocket;
use std::sync::Arc;

enum MetricsBackend {
    Statsd(StatsdClient),
    Noop,
}

#[derive(Clone)]
pub struct Metrics {
    backend: Arc<MetricsBackend>,
}

impl Metrics {
    /// Create a new Metrics client that sends to StatsD
    pub fn new(statsd_host: &str, statsd_port: u16, prefix: &str) -> Result<Self, MetricError> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.set_nonblocking(true)?;

        let addr = format!("{statsd_host}:{statsd_port}");
        let sink = UdpMetricSink::from(addr, socket)?;
        let client = StatsdClient::from_sink(prefix, sink);

        Ok(Metrics {
            backend: Arc::new(MetricsBackend::Statsd(client)),
        })
    }

    /// Create a no-op Metrics client that discards all metrics
    pub fn new_noop() -> Self {
        Metrics {
            backend: Arc::new(MetricsBackend::Noop),
        }
    }

    /// Increment a counter metric by 1
    /// metrics.incr("cache.hit", Some(&[("platform", "steam"), ("layer", "kv")]));
    pub fn incr(&self, metric: &str, tags: Option<&[(&str, &str)]>) {
        let client = match self.backend.as_ref() {
            MetricsBackend::Statsd(client) => client,
            MetricsBackend::Noop => return,
        };

        let result = match tags {
            Some(tag_list) if !tag_list.is_empty() => {
                let mut counter = client.count_with_tags(metric, 1);
                for (key, value) in tag_list {
                    counter = counter.with_tag(key, value);
                }
                counter.try_send()
            }
            _ => client.count(metric, 1),
        };

        if let Err(e) = result {
            tracing::debug!(metric = metric, "Failed to send counter: {e}");
        }
    }

    /// Record a timing metric in milliseconds
    /// metrics.timing("request.duration", 42, Some(&[("platform", "xbox")]));
    pub fn timing(&self, metric: &str, value_ms: u64, tags: Option<&[(&str, &str)]>) {
        let client = match self.backend.as_ref() {
            MetricsBackend::Statsd(client) => client,
            MetricsBackend::Noop => return,
        };

        let result = match tags {
            Some(tag_list) if !tag_list.is_empty() => {
                let mut timer = client.time_with_tags(metric, value_ms);
                for (key, value) in tag_list {
                    timer = timer.with_tag(key, value);
                }
                timer.try_send()
            }
            _ => client.time(metric, value_ms),
        };

        if let Err(e) = result {
            tracing::debug!(metric = metric, "Failed to send timing: {e}");
        }
    }

    /// Record a gauge value, e.g. the current session pool size
    pub fn gauge(&self, metric: &str, value: u64) {
        let client = match self.backend.as_ref() {
            MetricsBackend::Statsd(client) => client,
            MetricsBackend::Noop => return,
        };

        if let Err(e) = client.gauge(metric, value) {
            tracing::debug!(metric = metric, "Failed to send gauge: {e}");
        }
    }
}
