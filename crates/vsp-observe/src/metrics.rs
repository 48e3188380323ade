use prometheus::{
    exponential_buckets, Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Registry,
    TextEncoder,
};

/// All Prometheus series exported by the processor, registered against a
/// dedicated registry. Series names are part of the operational contract;
/// alerts and dashboards key off them.
pub struct Metrics {
    registry: Registry,
    pub files_detected: IntCounter,
    pub chunks_uploaded: IntCounter,
    pub upload_failures: IntCounter,
    pub redis_errors: IntCounter,
    pub files_in_progress: IntGauge,
    pub file_processing_duration: Histogram,
    pub chunk_upload_duration: Histogram,
    pub last_file_processed: IntGauge,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let files_detected = IntCounter::new(
            "vsp_files_detected_total",
            "Total number of files detected for processing.",
        )?;
        let chunks_uploaded = IntCounter::new(
            "vsp_chunks_uploaded_total",
            "Total number of chunks uploaded.",
        )?;
        let upload_failures = IntCounter::new(
            "vsp_upload_failures_total",
            "Total number of upload failures.",
        )?;
        let redis_errors =
            IntCounter::new("vsp_redis_errors_total", "Total number of Redis errors.")?;
        let files_in_progress = IntGauge::new(
            "vsp_files_in_progress",
            "Current number of files being processed.",
        )?;
        let file_processing_duration = Histogram::with_opts(
            HistogramOpts::new(
                "vsp_file_processing_duration_seconds",
                "Histogram of file processing durations.",
            )
            .buckets(exponential_buckets(1.0, 2.0, 8)?),
        )?;
        let chunk_upload_duration = Histogram::with_opts(
            HistogramOpts::new(
                "vsp_chunk_upload_duration_seconds",
                "Histogram of chunk upload durations.",
            )
            .buckets(exponential_buckets(0.1, 2.0, 8)?),
        )?;
        let last_file_processed = IntGauge::new(
            "vsp_last_file_processed_unixtime",
            "Unix timestamp of the last successfully processed file.",
        )?;

        registry.register(Box::new(files_detected.clone()))?;
        registry.register(Box::new(chunks_uploaded.clone()))?;
        registry.register(Box::new(upload_failures.clone()))?;
        registry.register(Box::new(redis_errors.clone()))?;
        registry.register(Box::new(files_in_progress.clone()))?;
        registry.register(Box::new(file_processing_duration.clone()))?;
        registry.register(Box::new(chunk_upload_duration.clone()))?;
        registry.register(Box::new(last_file_processed.clone()))?;

        Ok(Self {
            registry,
            files_detected,
            chunks_uploaded,
            upload_failures,
            redis_errors,
            files_in_progress,
            file_processing_duration,
            chunk_upload_duration,
            last_file_processed,
        })
    }

    /// Renders the registry in the Prometheus text exposition format.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}
