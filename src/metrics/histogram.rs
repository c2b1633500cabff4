//! Fixed-bucket latency histogram accumulation.

/// A sampled raw observation attached to a histogram data point.
#[derive(Debug, Clone)]
pub struct Exemplar {
    /// Originating trace identifier (16 bytes on the wire).
    pub trace_id: Vec<u8>,
    /// Originating span identifier (8 bytes on the wire).
    pub span_id: Vec<u8>,
    /// The observed latency in milliseconds.
    pub value: f64,
}

impl Exemplar {
    /// Whether the trace identifier is absent or all zero; such exemplars
    /// carry no drill-down value and are dropped at export.
    pub fn is_empty(&self) -> bool {
        self.trace_id.iter().all(|b| *b == 0)
    }
}

/// Accumulated histogram state for one metric key.
///
/// `bucket_counts` has one slot per bound plus the final +Inf overflow
/// bucket; `sum(bucket_counts) == count` holds after every observation.
#[derive(Debug, Clone)]
pub struct HistogramData {
    /// Total number of observations.
    pub count: u64,
    /// Sum of all observed values.
    pub sum: f64,
    /// Per-bucket observation counts, overflow bucket last.
    pub bucket_counts: Vec<u64>,
    /// Batch-scoped exemplars, cleared every flush cycle.
    pub exemplars: Vec<Exemplar>,
}

impl HistogramData {
    /// An empty histogram sized for `bound_count` explicit bounds.
    pub fn new(bound_count: usize) -> Self {
        Self {
            count: 0,
            sum: 0.0,
            bucket_counts: vec![0; bound_count + 1],
            exemplars: Vec::new(),
        }
    }

    /// Records one observation against the ascending `bounds`.
    ///
    /// The bucket index is the count of bounds strictly below the value, so
    /// a value exactly equal to a bound falls into the bucket after it and
    /// values beyond every bound land in the overflow bucket.
    pub fn observe(&mut self, bounds: &[f64], value: f64, trace_id: &[u8], span_id: &[u8]) {
        self.count += 1;
        self.sum += value;
        let index = bounds.partition_point(|bound| *bound < value);
        self.bucket_counts[index] += 1;
        self.exemplars.push(Exemplar {
            trace_id: trace_id.to_vec(),
            span_id: span_id.to_vec(),
            value,
        });
    }

    /// Drops accumulated exemplars. Exemplars are meaningful only for the
    /// batch just exported.
    pub fn clear_exemplars(&mut self) {
        self.exemplars.clear();
    }
}
