// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Exponential backoff bounded by total elapsed time.
//!
//! A retry budget expressed as wall-clock time rather than an attempt count
//! keeps callers close to their deadline however slow individual attempts are.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::constants;

#[derive(Clone, Debug)]
pub struct Backoff {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub multiplier: f64,
    /// Retrying stops once the next attempt would start after this much time.
    pub max_elapsed_time: Duration,
}

impl Backoff {
    pub fn new(max_elapsed_time: Duration) -> Self {
        Self {
            initial_interval: constants::RETRY_INITIAL_INTERVAL,
            max_interval: constants::RETRY_MAX_INTERVAL,
            multiplier: constants::RETRY_MULTIPLIER,
            max_elapsed_time,
        }
    }

    pub fn constant(interval: Duration, max_elapsed_time: Duration) -> Self {
        Self {
            initial_interval: interval,
            max_interval: interval,
            multiplier: 1.0,
            max_elapsed_time,
        }
    }

    fn next_interval(&self, current: Duration) -> Duration {
        current.mul_f64(self.multiplier).min(self.max_interval)
    }
}

/// Retries `operation` on every error until it succeeds or the budget runs out.
pub async fn retry<F, Fut, T, E>(backoff: &Backoff, operation_name: &str, operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    retry_if(backoff, operation_name, operation, |_| true).await
}

/// Like [`retry`], but errors for which `is_transient` is false are returned at once.
pub async fn retry_if<F, Fut, T, E, P>(
    backoff: &Backoff,
    operation_name: &str,
    mut operation: F,
    is_transient: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
    P: Fn(&E) -> bool,
{
    let started = Instant::now();
    let mut attempt = 0u32;
    let mut interval = backoff.initial_interval;

    loop {
        attempt += 1;

        let error = match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => e,
        };

        if !is_transient(&error) {
            tracing::debug!(
                operation = %operation_name,
                attempt,
                error = %error,
                "permanent failure, not retrying"
            );
            return Err(error);
        }

        // Add jitter: 0.5x to 1.5x of the interval
        let delay = interval.mul_f64(0.5 + fastrand::f64());
        if started.elapsed() + delay > backoff.max_elapsed_time {
            tracing::warn!(
                operation = %operation_name,
                attempt,
                error = %error,
                elapsed_ms = started.elapsed().as_millis(),
                "giving up after max elapsed time"
            );
            return Err(error);
        }

        tracing::debug!(
            operation = %operation_name,
            attempt,
            error = %error,
            delay_ms = delay.as_millis(),
            "operation failed, retrying"
        );

        tokio::time::sleep(delay).await;
        interval = backoff.next_interval(interval);
    }
}
