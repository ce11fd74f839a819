use serde::Serialize;

/// Error body returned by the administrative endpoints.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub job: Option<String>,
    pub error: String,
    pub message: String,
}

/// Response for a reset request.
#[derive(Debug, Serialize)]
pub struct ResetResponse {
    pub job: String,
    pub message: String,
}

/// One entry of the job listing.
#[derive(Debug, Serialize)]
pub struct JobListing {
    pub job: String,
    pub collection: String,
    pub page_size: usize,
    pub batch_quota: usize,
    pub lock_ttl_secs: u64,
}
