//! Consumer actor: the poll, dispatch, settle loop.

use std::sync::Arc;
use std::time::Duration;

use broker::{Broker, ReceiveRequest};
use chrono::Utc;
use docpipe_core::{ConsumerConfig, ConsumerStats, JobEvent, JobOutcome};
use ractor::{Actor, ActorProcessingErr, ActorRef};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::dispatch::{AckStatus, Dispatcher, JobReport};
use crate::messages::{ConsumerError, ConsumerMessage};
use crate::runner::JobRunner;

/// Consumer actor arguments.
pub struct ConsumerArgs {
    pub broker: Arc<dyn Broker>,
    pub runner: Arc<JobRunner>,
    pub config: ConsumerConfig,
    pub event_tx: broadcast::Sender<JobEvent>,
    /// Cancelling this token has the same effect as sending `Shutdown`.
    pub shutdown: CancellationToken,
}

impl ConsumerArgs {
    pub fn new(broker: Arc<dyn Broker>, runner: Arc<JobRunner>, config: ConsumerConfig) -> Self {
        let (event_tx, _) = broadcast::channel(1024);
        Self {
            broker,
            runner,
            config,
            event_tx,
            shutdown: CancellationToken::new(),
        }
    }

    /// Subscribe to consumer events. Call before starting the consumer.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.event_tx.subscribe()
    }
}

/// State for the consumer actor.
pub struct ConsumerState {
    broker: Arc<dyn Broker>,
    dispatcher: Dispatcher,
    request: ReceiveRequest,
    poll_backoff: Duration,
    event_tx: broadcast::Sender<JobEvent>,
    shutdown: CancellationToken,
    /// A receive or dispatch is in progress.
    cycle_running: bool,
    pub stats: ConsumerStats,
}

impl ConsumerState {
    fn emit(&self, event: JobEvent) {
        let _ = self.event_tx.send(event);
    }

    fn record(&mut self, reports: &[JobReport], panicked: u64) {
        self.stats.received += reports.len() as u64 + panicked;
        self.stats.panicked += panicked;
        for report in reports {
            match report.outcome {
                JobOutcome::Success { .. } => self.stats.succeeded += 1,
                JobOutcome::Failure(_) => self.stats.failed += 1,
            }
            match report.ack {
                AckStatus::Acknowledged => self.stats.acknowledged += 1,
                AckStatus::Failed(_) => self.stats.ack_failures += 1,
                AckStatus::Redeliver => {}
            }
        }
    }

    /// Receive one batch and drain it, off the actor's mailbox.
    fn spawn_cycle(&mut self, myself: ActorRef<ConsumerMessage>) {
        self.cycle_running = true;

        let broker = self.broker.clone();
        let dispatcher = self.dispatcher.clone();
        let request = self.request;
        let shutdown = self.shutdown.clone();
        let event_tx = self.event_tx.clone();

        tokio::spawn(async move {
            let received = tokio::select! {
                _ = shutdown.cancelled() => Ok(Vec::new()),
                result = broker.receive_batch(request) => result,
            };

            let message = match received {
                Ok(batch) => {
                    if !batch.is_empty() {
                        tracing::debug!("Received batch of {}", batch.len());
                        let _ = event_tx.send(JobEvent::BatchReceived {
                            count: batch.len(),
                            timestamp: Utc::now(),
                        });
                    }
                    let drained = dispatcher.dispatch(batch).await;
                    ConsumerMessage::BatchDrained {
                        reports: drained.reports,
                        panicked: drained.panicked,
                    }
                }
                Err(e) => ConsumerMessage::PollFailed {
                    error: e.to_string(),
                },
            };

            if myself.send_message(message).is_err() {
                tracing::warn!("Consumer stopped before its batch drained");
            }
        });
    }
}

/// Long-polls the broker and runs each batch to completion before polling again.
pub struct ConsumerActor;

impl Actor for ConsumerActor {
    type Msg = ConsumerMessage;
    type State = ConsumerState;
    type Arguments = ConsumerArgs;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!(
            "Starting consumer: batch size {}, max in flight {}, visibility timeout {}s",
            args.config.batch_size,
            args.config.max_in_flight,
            args.config.visibility_timeout.as_secs()
        );

        let dispatcher = Dispatcher::new(
            args.broker.clone(),
            args.runner,
            args.config.max_in_flight,
            args.event_tx.clone(),
        )
        .with_ack_unretryable(args.config.ack_unretryable);

        Ok(ConsumerState {
            broker: args.broker,
            dispatcher,
            request: ReceiveRequest::from(&args.config),
            poll_backoff: args.config.poll_backoff,
            event_tx: args.event_tx,
            shutdown: args.shutdown,
            cycle_running: false,
            stats: ConsumerStats::default(),
        })
    }

    async fn post_start(
        &self,
        myself: ActorRef<Self::Msg>,
        _state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        myself.send_message(ConsumerMessage::Poll)?;
        Ok(())
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            ConsumerMessage::Poll => {
                if state.shutdown.is_cancelled() {
                    if !state.cycle_running {
                        myself.stop(None);
                    }
                    return Ok(());
                }
                if state.cycle_running {
                    return Ok(());
                }
                state.spawn_cycle(myself.clone());
            }

            ConsumerMessage::BatchDrained { reports, panicked } => {
                state.cycle_running = false;
                state.stats.polls += 1;
                state.record(&reports, panicked);

                let count = reports.len() + panicked as usize;
                if count > 0 {
                    tracing::debug!("Drained batch of {}", count);
                    state.emit(JobEvent::BatchDrained {
                        count,
                        timestamp: Utc::now(),
                    });
                }

                if state.shutdown.is_cancelled() {
                    tracing::info!("Consumer drained, stopping");
                    myself.stop(None);
                    return Ok(());
                }
                myself.send_message(ConsumerMessage::Poll)?;
            }

            ConsumerMessage::PollFailed { error } => {
                state.cycle_running = false;
                state.stats.poll_errors += 1;
                tracing::error!(
                    "Failed to receive from broker, retrying in {}s: {}",
                    state.poll_backoff.as_secs(),
                    error
                );
                state.emit(JobEvent::PollFailed {
                    error,
                    timestamp: Utc::now(),
                });

                let backoff = state.poll_backoff;
                let shutdown = state.shutdown.clone();
                tokio::spawn(async move {
                    tokio::select! {
                        _ = shutdown.cancelled() => {}
                        _ = tokio::time::sleep(backoff) => {}
                    }
                    let _ = myself.send_message(ConsumerMessage::Poll);
                });
            }

            ConsumerMessage::GetStats { reply } => {
                let _ = reply.send(state.stats.clone());
            }

            ConsumerMessage::Shutdown => {
                tracing::info!("Shutting down consumer");
                state.shutdown.cancel();
                if !state.cycle_running {
                    myself.stop(None);
                }
            }
        }

        Ok(())
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        let stats = &state.stats;
        match stats.success_rate() {
            Some(rate) => tracing::info!(
                "Consumer stopped: {} processed ({:.1}% succeeded), {} acknowledged",
                stats.processed(),
                rate,
                stats.acknowledged
            ),
            None => tracing::info!("Consumer stopped before processing any jobs"),
        }
        Ok(())
    }
}

/// Start the consumer. It begins polling immediately.
pub async fn start_consumer(
    args: ConsumerArgs,
) -> Result<(ActorRef<ConsumerMessage>, tokio::task::JoinHandle<()>), ractor::SpawnErr> {
    let (actor, handle) = Actor::spawn(None, ConsumerActor, args).await?;

    Ok((actor, handle))
}

/// Ask a running consumer for its counters.
pub async fn consumer_stats(
    consumer: &ActorRef<ConsumerMessage>,
) -> Result<ConsumerStats, ConsumerError> {
    let timeout = Duration::from_secs(5);
    let result = ractor::rpc::call(
        consumer,
        |reply| ConsumerMessage::GetStats { reply },
        Some(timeout),
    )
    .await
    .map_err(|e| ConsumerError::Actor(e.to_string()))?;

    match result {
        ractor::rpc::CallResult::Success(stats) => Ok(stats),
        ractor::rpc::CallResult::Timeout => Err(ConsumerError::Timeout),
        ractor::rpc::CallResult::SenderError => {
            Err(ConsumerError::Actor("consumer dropped the reply".to_string()))
        }
    }
}
