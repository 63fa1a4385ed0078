use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Framed, LinesCodec};
use tracing::debug;

use crate::availability::{AvailabilityFeed, AvailabilityQuery};
use crate::engine::{validate_holder, Engine, EngineError};
use crate::hold::HoldSession;
use crate::limits::MAX_FRAME_LEN;
use crate::lock::LockManager;
use crate::model::Ms;
use crate::observability::{REQUESTS_TOTAL, REQUEST_DURATION_SECONDS};
use crate::protocol::{
    decode_request, encode_response, HoldView, ProtocolError, Request, Response,
};

/// Everything a connection needs, shared by all connections.
#[derive(Clone)]
pub struct ServerContext {
    pub engine: Arc<Engine>,
    pub locks: LockManager,
    pub availability: AvailabilityQuery,
}

type Lines<S> = Framed<S, LinesCodec>;

async fn send<S>(framed: &mut Lines<S>, response: &Response) -> Result<(), ProtocolError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    framed.send(encode_response(response)?).await?;
    Ok(())
}

fn until(deadline: Option<Ms>, now: Ms) -> Duration {
    deadline
        .map(|at| Duration::from_millis((at - now).max(0) as u64))
        .unwrap_or(Duration::MAX)
}

/// Drive one client connection: one browsing session with its own hold and
/// availability feed. Returns when the client disconnects.
pub async fn serve_connection<S>(stream: S, ctx: ServerContext) -> Result<(), ProtocolError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut framed = Framed::new(stream, LinesCodec::new_with_max_length(MAX_FRAME_LEN));
    let mut hold = HoldSession::new(ctx.locks.clone());
    let mut feed = AvailabilityFeed::new(ctx.availability.clone());

    let result = loop {
        let deadline = hold.deadline();
        let expiry = tokio::time::sleep(until(deadline, ctx.engine.now_ms()));

        tokio::select! {
            line = framed.next() => {
                let line = match line {
                    None => break Ok(()),
                    Some(Ok(line)) => line,
                    Some(Err(e)) => {
                        let e = ProtocolError::from(e);
                        if matches!(e, ProtocolError::FrameTooLong) {
                            let _ = send(&mut framed, &Response::from(e)).await;
                            break Ok(());
                        }
                        break Err(e);
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                let response = handle_line(&line, &ctx, &mut hold, &mut feed).await;
                if let Err(e) = send(&mut framed, &response).await {
                    break Err(e);
                }
            }
            update = feed.next() => {
                let Some(days) = update else {
                    feed.clear();
                    continue;
                };
                let plan = feed.plan().unwrap_or_default().to_string();
                if let Err(e) = send(&mut framed, &Response::Availability { plan, days }).await {
                    break Err(e);
                }
            }
            _ = expiry, if deadline.is_some() => {
                if let Some(slot_id) = hold.state().slot_id()
                    && hold.tick(ctx.engine.now_ms())
                {
                    debug!("hold on slot {slot_id} expired");
                    if let Err(e) = send(&mut framed, &Response::HoldExpired { slot_id }).await {
                        break Err(e);
                    }
                }
            }
        }
    };

    // Disconnect: let go of whatever the session still holds.
    if let Some(handle) = hold.release() {
        debug!("released slot {} on disconnect", handle.slot_id());
    }
    result
}

async fn handle_line(
    line: &str,
    ctx: &ServerContext,
    hold: &mut HoldSession,
    feed: &mut AvailabilityFeed,
) -> Response {
    let request = match decode_request(line) {
        Ok(request) => request,
        Err(e) => {
            metrics::counter!(REQUESTS_TOTAL, "op" => "invalid", "status" => "error").increment(1);
            return Response::from(e);
        }
    };
    let op = request.op_name();
    let started = Instant::now();
    let response = match dispatch(request, ctx, hold, feed).await {
        Ok(response) => response,
        Err(response) => response,
    };
    let status = if matches!(response, Response::Error(_)) { "error" } else { "ok" };
    metrics::counter!(REQUESTS_TOTAL, "op" => op, "status" => status).increment(1);
    metrics::histogram!(REQUEST_DURATION_SECONDS, "op" => op).record(started.elapsed().as_secs_f64());
    response
}

async fn dispatch(
    request: Request,
    ctx: &ServerContext,
    hold: &mut HoldSession,
    feed: &mut AvailabilityFeed,
) -> Result<Response, Response> {
    let engine = &ctx.engine;
    let response = match request {
        // ── Hold lifecycle ───────────────────────────────
        Request::Identify { holder } => {
            let holder = holder.trim().to_string();
            validate_holder(&holder).map_err(EngineError::from)?;
            hold.identify(holder.clone());
            Response::Identified { holder }
        }
        Request::Acquire { slot_id } => Response::acquired(&hold.request(slot_id).await?),
        Request::Release => Response::Released {
            slot_id: hold.release().map(|h| h.slot_id()),
        },
        Request::Acknowledge => {
            hold.acknowledge();
            Response::Hold(HoldView::new(hold.state(), engine.now_ms()))
        }
        Request::HoldStatus => Response::Hold(HoldView::new(hold.state(), engine.now_ms())),

        // ── Availability ─────────────────────────────────
        Request::Availability { plan } => {
            let days = ctx.availability.snapshot(&plan).await?;
            Response::Availability { plan, days }
        }
        Request::Subscribe { plan } => {
            feed.select_plan(&plan).await?;
            Response::Subscribed { plan }
        }
        Request::Unsubscribe => {
            feed.clear();
            Response::Unsubscribed
        }

        // ── Catalog administration ───────────────────────
        Request::CreateSlot { slot } => Response::SlotCreated {
            id: engine.create_slot(slot).await?,
        },
        Request::CreateSlotForInterviewer {
            interviewer_id,
            schedule,
        } => Response::SlotCreated {
            id: engine
                .create_slot_for_interviewer(interviewer_id, schedule)
                .await?,
        },
        Request::UpdateSlot { id, patch } => Response::Slot {
            slot: engine.update_slot(id, patch).await?,
        },
        Request::DeleteSlot { id } => {
            engine.delete_slot(id).await?;
            Response::SlotDeleted { id }
        }
        Request::GetSlot { id } => Response::Slot {
            slot: engine.get_slot(id).await?,
        },
        Request::ListSlots { filter } => Response::Slots {
            slots: engine.list_slots(&filter).await,
        },
        Request::UpsertInterviewer { interviewer } => {
            let id = interviewer.id;
            engine.upsert_interviewer(interviewer).await?;
            Response::InterviewerSaved { id }
        }
        Request::GetInterviewer { id } => Response::Interviewer {
            interviewer: engine.get_interviewer(id)?,
        },
        Request::ListInterviewers { active_only } => Response::Interviewers {
            interviewers: engine.list_interviewers(active_only),
        },
    };
    Ok(response)
}

impl ServerContext {
    pub fn new(engine: Arc<Engine>, locks: LockManager, availability: AvailabilityQuery) -> Self {
        Self {
            engine,
            locks,
            availability,
        }
    }
}
