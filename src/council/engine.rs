//! Turn orchestration
//!
//! One logical pipeline per turn: route the mode, build history, run the
//! stages (or the direct chairman call), and commit exactly one outcome
//! message. Progress streams out as ordered `CouncilEvent`s over an mpsc
//! channel; the aggregated (non-streaming) result is assembled by draining
//! the same stream. Cancellation is observed at stage boundaries: in-flight
//! gateway calls finish but their results are discarded and the turn
//! commits as cancelled.

use super::events::CouncilEvent;
use super::history::{linear_history, summarize};
use super::ranking::{self, AggregateRanking, RankingSubmission};
use super::router::{route, Routing, TurnMode};
use super::stage1::{self, ModelAnswer};
use super::synthesis::{self, ChairmanResult, DEFAULT_TITLE};
use crate::config::{CouncilConfig, HistoryConfig};
use crate::documents::DocumentContextSource;
use crate::llm::{ChatMessage, ModelGateway};
use crate::personality::resolve_for_turn;
use crate::storage::{Conversation, ConversationStore, Message, StorageError};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

/// Buffered events per in-flight turn
const EVENT_CHANNEL_CAPACITY: usize = 32;

/// One submitted turn
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub conversation_id: String,
    pub content: String,
    pub mode: Option<TurnMode>,
    pub include_documents: bool,
}

/// Aggregated result of a completed turn
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub mode: TurnMode,
    pub message: Message,
    pub title: Option<String>,
}

/// Fatal turn errors
///
/// Gateway failures never appear here; the stages recover from those with
/// placeholder answers and the turn still commits.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Conversation not found: {0}")]
    ConversationNotFound(String),

    #[error("A turn is already in flight for conversation {0}")]
    TurnInFlight(String),

    #[error("Turn failed: {0}")]
    TurnFailed(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

struct EngineInner {
    gateway: Arc<dyn ModelGateway>,
    store: Arc<dyn ConversationStore>,
    documents: Arc<dyn DocumentContextSource>,
    council: CouncilConfig,
    history: HistoryConfig,
    in_flight: DashMap<String, Arc<AtomicBool>>,
}

/// The deliberation engine
///
/// Cheap to clone; all clones share the gateway, store, and cancellation
/// registry.
#[derive(Clone)]
pub struct CouncilEngine {
    inner: Arc<EngineInner>,
}

/// Removes the cancellation-registry entry when a turn ends, however it ends
struct InFlightGuard {
    inner: Arc<EngineInner>,
    conversation_id: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.inner.in_flight.remove(&self.conversation_id);
    }
}

impl CouncilEngine {
    pub fn new(
        gateway: Arc<dyn ModelGateway>,
        store: Arc<dyn ConversationStore>,
        documents: Arc<dyn DocumentContextSource>,
        council: CouncilConfig,
        history: HistoryConfig,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                gateway,
                store,
                documents,
                council,
                history,
                in_flight: DashMap::new(),
            }),
        }
    }

    /// Request cancellation of a conversation's in-flight turn
    ///
    /// Observed at the next stage boundary. Returns false when no turn is
    /// running for the conversation.
    pub fn cancel(&self, conversation_id: &str) -> bool {
        match self.inner.in_flight.get(conversation_id) {
            Some(flag) => {
                flag.store(true, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    /// Submit a turn and stream its progress events
    ///
    /// The stream always ends with exactly one terminal event. At most one
    /// turn may run per conversation; a second submission while one is in
    /// flight is rejected.
    pub async fn submit_turn_streaming(
        &self,
        request: TurnRequest,
    ) -> Result<ReceiverStream<CouncilEvent>, EngineError> {
        let conversation = self
            .inner
            .store
            .load(&request.conversation_id)
            .await?
            .ok_or_else(|| EngineError::ConversationNotFound(request.conversation_id.clone()))?;

        let cancel_flag = Arc::new(AtomicBool::new(false));
        match self.inner.in_flight.entry(request.conversation_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(EngineError::TurnInFlight(request.conversation_id));
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(cancel_flag.clone());
            }
        }

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let inner = self.inner.clone();
        tokio::spawn(async move {
            let _guard = InFlightGuard {
                inner: inner.clone(),
                conversation_id: request.conversation_id.clone(),
            };
            run_turn(inner, conversation, request, cancel_flag, tx).await;
        });

        Ok(ReceiverStream::new(rx))
    }

    /// Submit a turn and wait for the aggregated result
    pub async fn submit_turn(&self, request: TurnRequest) -> Result<TurnOutcome, EngineError> {
        let mut stream = self.submit_turn_streaming(request).await?;

        let mut mode = None;
        let mut answers: Option<Vec<ModelAnswer>> = None;
        let mut rankings: Option<(Vec<RankingSubmission>, AggregateRanking)> = None;
        let mut chairman: Option<ChairmanResult> = None;
        let mut title = None;

        while let Some(event) = stream.next().await {
            match event {
                CouncilEvent::Stage1Start => mode = Some(TurnMode::Council),
                CouncilEvent::ChairmanStart => mode = Some(TurnMode::Chairman),
                CouncilEvent::Stage1Complete { answers: a } => answers = Some(a),
                CouncilEvent::Stage2Complete {
                    rankings: r,
                    aggregate,
                } => rankings = Some((r, aggregate)),
                CouncilEvent::Stage3Complete { result }
                | CouncilEvent::ChairmanComplete { result } => chairman = Some(result),
                CouncilEvent::TitleComplete { title: t } => title = Some(t),
                CouncilEvent::Stage2Start | CouncilEvent::Stage3Start => {}
                CouncilEvent::Complete { mode } => {
                    let message = assemble_message(mode, answers, rankings, chairman)?;
                    return Ok(TurnOutcome {
                        mode,
                        message,
                        title,
                    });
                }
                CouncilEvent::Cancelled => {
                    return Ok(TurnOutcome {
                        mode: mode.unwrap_or(TurnMode::Council),
                        message: Message::Cancelled {},
                        title,
                    });
                }
                CouncilEvent::Error { message } => {
                    return Err(EngineError::TurnFailed(message));
                }
            }
        }

        Err(EngineError::TurnFailed(
            "event stream ended without a terminal event".to_string(),
        ))
    }
}

fn assemble_message(
    mode: TurnMode,
    answers: Option<Vec<ModelAnswer>>,
    rankings: Option<(Vec<RankingSubmission>, AggregateRanking)>,
    chairman: Option<ChairmanResult>,
) -> Result<Message, EngineError> {
    match mode {
        TurnMode::Council => {
            let (stage1, (stage2, aggregate), stage3) = answers
                .zip(rankings)
                .zip(chairman)
                .map(|((a, r), c)| (a, r, c))
                .ok_or_else(|| {
                    EngineError::TurnFailed("council turn completed with missing stages".to_string())
                })?;
            Ok(Message::Council {
                stage1,
                stage2,
                stage3,
                aggregate,
            })
        }
        TurnMode::Chairman => {
            let result = chairman.ok_or_else(|| {
                EngineError::TurnFailed("chairman turn completed without a result".to_string())
            })?;
            Ok(Message::Chairman {
                model: result.model,
                response: result.response,
                ok: result.ok,
            })
        }
    }
}

async fn run_turn(
    inner: Arc<EngineInner>,
    conversation: Conversation,
    request: TurnRequest,
    cancel_flag: Arc<AtomicBool>,
    tx: mpsc::Sender<CouncilEvent>,
) {
    // The receiver may be dropped by a disconnecting client; the turn still
    // runs to a committed terminal state.
    let emit = |event: CouncilEvent| {
        let tx = tx.clone();
        async move {
            let _ = tx.send(event).await;
        }
    };

    let routing = route(conversation.messages.len(), request.mode);
    let history = if routing.include_history {
        linear_history(&conversation.messages)
    } else {
        Vec::new()
    };

    let query = match augmented_query(&inner, &request) {
        Ok(query) => query,
        Err(e) => {
            emit(CouncilEvent::Error {
                message: format!("document context unavailable: {}", e),
            })
            .await;
            return;
        }
    };

    if let Err(e) = inner
        .store
        .append_message(
            &conversation.id,
            Message::User {
                content: request.content.clone(),
            },
        )
        .await
    {
        emit(CouncilEvent::Error {
            message: e.to_string(),
        })
        .await;
        return;
    }

    match routing.mode {
        TurnMode::Chairman => {
            run_chairman_turn(&inner, &conversation, &query, &history, &cancel_flag, emit).await
        }
        TurnMode::Council => {
            run_council_turn(
                &inner,
                &conversation,
                &request,
                routing,
                &query,
                &history,
                &cancel_flag,
                emit,
            )
            .await
        }
    }
}

fn augmented_query(inner: &EngineInner, request: &TurnRequest) -> anyhow::Result<String> {
    if !request.include_documents {
        return Ok(request.content.clone());
    }
    let context = inner.documents.active_context()?;
    if context.is_empty() {
        Ok(request.content.clone())
    } else {
        Ok(format!("{}\n\n{}", context, request.content))
    }
}

async fn run_chairman_turn<F, Fut>(
    inner: &EngineInner,
    conversation: &Conversation,
    query: &str,
    history: &[ChatMessage],
    cancel_flag: &AtomicBool,
    emit: F,
) where
    F: Fn(CouncilEvent) -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    emit(CouncilEvent::ChairmanStart).await;

    let result = synthesis::chairman_reply(
        inner.gateway.as_ref(),
        &inner.council.chairman,
        history,
        query,
    )
    .await;

    if cancel_flag.load(Ordering::Relaxed) {
        commit_cancelled(inner, conversation, emit).await;
        return;
    }

    if let Err(e) = inner
        .store
        .append_message(
            &conversation.id,
            Message::Chairman {
                model: result.model.clone(),
                response: result.response.clone(),
                ok: result.ok,
            },
        )
        .await
    {
        emit(CouncilEvent::Error {
            message: e.to_string(),
        })
        .await;
        return;
    }

    emit(CouncilEvent::ChairmanComplete { result }).await;
    emit(CouncilEvent::Complete {
        mode: TurnMode::Chairman,
    })
    .await;
}

#[allow(clippy::too_many_arguments)]
async fn run_council_turn<F, Fut>(
    inner: &EngineInner,
    conversation: &Conversation,
    request: &TurnRequest,
    routing: Routing,
    query: &str,
    history: &[ChatMessage],
    cancel_flag: &AtomicBool,
    emit: F,
) where
    F: Fn(CouncilEvent) -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    // Title generation runs alongside the pipeline on a first turn; the
    // original question alone is enough input for it.
    let title_task = routing.first_turn.then(|| {
        let gateway = inner.gateway.clone();
        let model = inner.council.title_model.clone();
        let question = request.content.clone();
        tokio::spawn(async move { synthesis::generate_title(gateway.as_ref(), &model, &question).await })
    });

    let abort_title = |task: &Option<tokio::task::JoinHandle<String>>| {
        if let Some(task) = task {
            task.abort();
        }
    };

    let context_summary = summarize(history, &inner.history);
    let personas = resolve_for_turn(conversation.personalities.as_ref(), &inner.council.models);

    emit(CouncilEvent::Stage1Start).await;
    let answers = stage1::collect_responses(
        inner.gateway.as_ref(),
        &inner.council.models,
        query,
        history,
        &personas,
    )
    .await;

    if cancel_flag.load(Ordering::Relaxed) {
        abort_title(&title_task);
        commit_cancelled(inner, conversation, emit).await;
        return;
    }
    emit(CouncilEvent::Stage1Complete {
        answers: answers.clone(),
    })
    .await;

    emit(CouncilEvent::Stage2Start).await;
    let rankings = ranking::collect_rankings(
        inner.gateway.as_ref(),
        &inner.council.models,
        query,
        &answers,
        context_summary.as_deref(),
        &personas,
    )
    .await;
    let label_to_model = ranking::label_map(&answers);
    let aggregate = ranking::aggregate(&answers, &rankings, &label_to_model);

    if cancel_flag.load(Ordering::Relaxed) {
        abort_title(&title_task);
        commit_cancelled(inner, conversation, emit).await;
        return;
    }
    emit(CouncilEvent::Stage2Complete {
        rankings: rankings.clone(),
        aggregate: aggregate.clone(),
    })
    .await;

    emit(CouncilEvent::Stage3Start).await;
    let result = synthesis::synthesize(
        inner.gateway.as_ref(),
        &inner.council.chairman,
        query,
        &answers,
        &rankings,
        &aggregate,
        context_summary.as_deref(),
        personas.chairman.as_deref(),
    )
    .await;

    if cancel_flag.load(Ordering::Relaxed) {
        abort_title(&title_task);
        commit_cancelled(inner, conversation, emit).await;
        return;
    }
    emit(CouncilEvent::Stage3Complete {
        result: result.clone(),
    })
    .await;

    if let Some(task) = title_task {
        let title = task.await.unwrap_or_else(|_| DEFAULT_TITLE.to_string());
        if let Err(e) = inner.store.update_title(&conversation.id, &title).await {
            emit(CouncilEvent::Error {
                message: e.to_string(),
            })
            .await;
            return;
        }
        emit(CouncilEvent::TitleComplete { title }).await;
    }

    if let Err(e) = inner
        .store
        .append_message(
            &conversation.id,
            Message::Council {
                stage1: answers,
                stage2: rankings,
                stage3: result,
                aggregate,
            },
        )
        .await
    {
        emit(CouncilEvent::Error {
            message: e.to_string(),
        })
        .await;
        return;
    }

    emit(CouncilEvent::Complete {
        mode: TurnMode::Council,
    })
    .await;
}

async fn commit_cancelled<F, Fut>(inner: &EngineInner, conversation: &Conversation, emit: F)
where
    F: Fn(CouncilEvent) -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    tracing::info!("Turn cancelled for conversation {}", conversation.id);
    if let Err(e) = inner
        .store
        .append_message(&conversation.id, Message::Cancelled {})
        .await
    {
        emit(CouncilEvent::Error {
            message: e.to_string(),
        })
        .await;
        return;
    }
    emit(CouncilEvent::Cancelled).await;
}
