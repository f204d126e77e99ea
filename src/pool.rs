//! 워커 풀 조정자
//!
//! 파일 이름을 작업 큐(MPMC 채널)에 순서대로 넣고
//! `min(concurrency, 파일 수)`개의 워커 태스크가 하나씩 꺼내 처리함.
//! 각 파일은 정확히 한 워커만 가져감.

use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::client::{DownloadWorker, FailureReason, TransferOutcome};
use crate::config::RetryPolicy;
use crate::transport::Connector;
use crate::{Error, Result};

/// 다운로드 워커 풀
pub struct WorkerPool<C> {
    worker: Arc<DownloadWorker<C>>,
    cancel: CancellationToken,
}

impl<C: Connector> WorkerPool<C> {
    pub fn new(worker: DownloadWorker<C>) -> Self {
        Self {
            worker: Arc::new(worker),
            cancel: CancellationToken::new(),
        }
    }

    /// 외부 취소 토큰 사용
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// 모든 파일 처리 후 입력 순서대로 결과 반환
    pub async fn run(&self, filenames: Vec<String>, concurrency: usize) -> Result<Vec<TransferOutcome>> {
        if concurrency == 0 {
            return Err(Error::InvalidConfig("concurrency는 0일 수 없음".into()));
        }
        if filenames.is_empty() {
            return Ok(Vec::new());
        }

        let total = filenames.len();
        let (queue_tx, queue_rx) = crossbeam_channel::unbounded::<(usize, String)>();
        for item in filenames.into_iter().enumerate() {
            queue_tx
                .send(item)
                .map_err(|e| Error::WorkerFailed(format!("작업 큐 전송 실패: {}", e)))?;
        }
        drop(queue_tx);

        let workers = concurrency.min(total);
        info!("{}개 파일, 워커 {}개로 다운로드 시작", total, workers);

        let mut tasks = JoinSet::new();
        for worker_id in 0..workers {
            let queue = queue_rx.clone();
            let worker = Arc::clone(&self.worker);
            let cancel = self.cancel.clone();

            tasks.spawn(async move {
                let mut outcomes = Vec::new();
                // 큐가 미리 채워져 있으므로 비면 종료
                while let Ok((index, filename)) = queue.try_recv() {
                    debug!("워커 {}: {} 시작", worker_id, filename);
                    let outcome = if cancel.is_cancelled() {
                        TransferOutcome::failed(&filename, FailureReason::Cancelled, Instant::now())
                    } else {
                        attempt_with_retry(&worker, &filename, &cancel).await
                    };
                    outcomes.push((index, outcome));
                }
                outcomes
            });
        }

        let mut slots: Vec<Option<TransferOutcome>> = vec![None; total];
        while let Some(joined) = tasks.join_next().await {
            let outcomes = joined.map_err(|e| Error::WorkerFailed(e.to_string()))?;
            for (index, outcome) in outcomes {
                slots[index] = Some(outcome);
            }
        }

        let outcomes: Vec<TransferOutcome> = slots.into_iter().flatten().collect();
        if outcomes.len() != total {
            return Err(Error::WorkerFailed(format!(
                "결과 누락: {}/{}",
                outcomes.len(),
                total
            )));
        }

        let verified = outcomes.iter().filter(|o| o.is_verified()).count();
        info!("다운로드 종료: {}/{} 검증 완료", verified, total);
        Ok(outcomes)
    }
}

/// 재시도 정책에 따라 전송 시도 반복
async fn attempt_with_retry<C: Connector>(
    worker: &DownloadWorker<C>,
    filename: &str,
    cancel: &CancellationToken,
) -> TransferOutcome {
    let policy: &RetryPolicy = &worker.config().retry;
    let mut attempts = 1;

    loop {
        let mut outcome = worker.download(filename, cancel).await;
        outcome.attempts = attempts;

        let retryable = outcome
            .reason
            .as_ref()
            .is_some_and(FailureReason::is_retryable);
        if !retryable || !policy.allows(attempts) {
            return outcome;
        }

        let backoff = policy.backoff(attempts);
        info!(
            "{} 재시도 {}/{} ({}ms 후)",
            filename,
            attempts + 1,
            policy.max_attempts,
            backoff.as_millis()
        );
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return outcome,
            _ = tokio::time::sleep(backoff) => {}
        }
        attempts += 1;
    }
}
