use crate::ingress::api::{PutEventsRequest, PutEventsRequestEntry, PutEventsResponse};
use crate::writer::RetryPolicy;
use chrono::{Duration as ChronoDuration, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

pub const SOURCE: &str = "localTest";
pub const DETAIL_TYPE: &str = "eventTested";

const MAX_ATTEMPTS: u32 = 8;

const FIRST_NAMES: &[&str] = &[
    "Ada", "Grace", "Alan", "Edsger", "Barbara", "Donald", "Margaret", "Ken", "Radia", "Dennis",
];
const LAST_NAMES: &[&str] = &[
    "Lovelace", "Hopper", "Turing", "Dijkstra", "Liskov", "Knuth", "Hamilton", "Thompson",
    "Perlman", "Ritchie",
];
const DOMAINS: &[&str] = &["example.com", "example.org", "example.net"];

#[derive(Debug, Error)]
pub enum ProducerError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("bus returned error status {status}: {message}")]
    Bus { status: u16, message: String },

    #[error("{failed} entries still failing after {attempts} attempts")]
    RetriesExhausted { failed: usize, attempts: u32 },

    #[error("entry rejected: {code}: {message}")]
    Rejected { code: String, message: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct Person {
    pub email: String,
    pub name: String,
    pub created_at: String,
}

impl Person {
    pub fn random<R: Rng>(rng: &mut R) -> Self {
        let first = FIRST_NAMES.choose(rng).copied().unwrap_or("Ada");
        let last = LAST_NAMES.choose(rng).copied().unwrap_or("Lovelace");
        let domain = DOMAINS.choose(rng).copied().unwrap_or("example.com");
        let created_at = Utc::now() - ChronoDuration::seconds(rng.gen_range(0..365 * 24 * 3600));

        Self {
            email: format!(
                "{}.{}{}@{}",
                first.to_lowercase(),
                last.to_lowercase(),
                rng.gen_range(1..10_000),
                domain
            ),
            name: format!("{} {}", first, last),
            created_at: created_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProducerOptions {
    pub endpoint: String,
    pub count: usize,
    pub batch_size: usize,
}

/// Submit `count` synthetic events to a running bus, returning how many
/// were accepted
pub async fn put_events(options: &ProducerOptions) -> Result<usize, ProducerError> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()?;
    let url = format!("{}/events", options.endpoint.trim_end_matches('/'));
    let policy = RetryPolicy::default();
    let batch_size = options.batch_size.max(1);

    let mut sent = 0;
    let mut next_report = 100;
    while sent < options.count {
        let size = batch_size.min(options.count - sent);
        let people: Vec<Person> = {
            let mut rng = rand::thread_rng();
            (0..size).map(|_| Person::random(&mut rng)).collect()
        };

        send_batch(&client, &url, &people, &policy).await?;
        sent += size;

        while sent >= next_report {
            println!("Sent {} events", next_report);
            next_report += 100;
        }
    }

    println!("Done: {} events accepted", sent);
    Ok(sent)
}

async fn send_batch(
    client: &reqwest::Client,
    url: &str,
    people: &[Person],
    policy: &RetryPolicy,
) -> Result<(), ProducerError> {
    let mut pending: Vec<&Person> = people.iter().collect();
    let mut attempt = 0;

    loop {
        let entries = pending
            .iter()
            .map(|person| {
                Ok::<_, serde_json::Error>(PutEventsRequestEntry {
                    source: SOURCE.to_string(),
                    detail_type: DETAIL_TYPE.to_string(),
                    detail: Some(serde_json::to_string(person)?),
                    resources: Vec::new(),
                    event_bus_name: None,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let response = client
            .post(url)
            .json(&PutEventsRequest { entries })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ProducerError::Bus {
                status: response.status().as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        let body: PutEventsResponse = response.json().await?;
        if body.failed_entry_count == 0 {
            return Ok(());
        }

        let mut retry = Vec::new();
        for (person, result) in pending.iter().zip(&body.entries) {
            let Some(code) = &result.error_code else {
                continue;
            };
            if !is_retryable(code) {
                return Err(ProducerError::Rejected {
                    code: code.clone(),
                    message: result.error_message.clone().unwrap_or_default(),
                });
            }
            retry.push(*person);
        }

        attempt += 1;
        if attempt >= MAX_ATTEMPTS {
            return Err(ProducerError::RetriesExhausted {
                failed: retry.len(),
                attempts: attempt,
            });
        }

        let delay = policy.delay_for_attempt(attempt);
        warn!(
            failed = retry.len(),
            attempt = attempt,
            delay_ms = delay.as_millis() as u64,
            "Bus throttled entries, backing off"
        );
        tokio::time::sleep(delay).await;
        debug!(entries = retry.len(), "Resubmitting failed entries");
        pending = retry;
    }
}

fn is_retryable(code: &str) -> bool {
    matches!(code, "ThrottlingException" | "ServiceUnavailable")
}
