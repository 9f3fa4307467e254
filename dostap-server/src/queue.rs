//! Frame-synchronous execution of TYPE plans.
//!
//! Plans with actions are queued and advanced one key event per poll tick,
//! with frame and wall-clock pauses honoured in between; the client's
//! response is deferred until the plan completes.

use std::collections::VecDeque;
use std::rc::Rc;
use std::time::{Duration, Instant};

use crate::error::ServiceError;
use crate::plan::{TypeAction, TypeCommandPlan};
use crate::protocol::{ClientHandle, CommandOrigin, CommandResponse};

/// Ships deferred payload bytes to a client. Returns false when the client
/// is gone.
pub type SendHandle = Rc<dyn Fn(ClientHandle, &str) -> bool>;

/// Drops a client connection.
pub type CloseHandle = Rc<dyn Fn(ClientHandle)>;

/// Runs one keyboard command line (e.g. `PRESS A`) against the keyboard
/// processor.
pub type KeyboardHandler = Rc<dyn Fn(&str) -> CommandResponse>;

/// Produces an encoded frame for deferred GET-style replies.
pub type FrameProvider = Rc<dyn Fn() -> Result<String, ServiceError>>;

/// Invoked exactly once per plan with the overall outcome.
pub type CompletionCallback = Box<dyn FnOnce(bool)>;

struct PendingRequest {
    id: u64,
    origin: CommandOrigin,
    plan: TypeCommandPlan,
    keyboard_handler: KeyboardHandler,
    frame_provider: Option<FrameProvider>,
    on_complete: Option<CompletionCallback>,
    next_action: usize,
    resume_at: Option<Instant>,
    frames_remaining: u32,
    send_response: bool,
    response_payload: String,
    saw_key_action: bool,
    final_frame_wait_inserted: bool,
}

fn send_keyboard_action(handler: &KeyboardHandler, action: &TypeAction) -> bool {
    let command = match action {
        TypeAction::Press(key) => format!("PRESS {key}"),
        TypeAction::Down(key) => format!("DOWN {key}"),
        TypeAction::Up(key) => format!("UP {key}"),
        TypeAction::DelayMs(_) | TypeAction::DelayFrames(_) => return true,
    };

    let response = handler(&command);
    if !response.ok {
        log::warn!(
            "queued keyboard command {command:?} failed: {}",
            response.payload.trim_end()
        );
        return false;
    }
    true
}

/// Executes TYPE plans across successive poll ticks and delivers the
/// deferred responses through injected send/close handles.
pub struct QueuedTypeActionSink {
    send: SendHandle,
    close: CloseHandle,
    close_after_response: bool,
    token_frame_spacing: u32,
    next_id: u64,
    pending: VecDeque<PendingRequest>,
}

impl QueuedTypeActionSink {
    pub fn new(send: SendHandle, close: CloseHandle) -> Self {
        Self {
            send,
            close,
            close_after_response: false,
            token_frame_spacing: 0,
            next_id: 1,
            pending: VecDeque::new(),
        }
    }

    pub fn set_close_after_response(&mut self, enable: bool) {
        self.close_after_response = enable;
    }

    /// Frames inserted after each key action that is not followed by an
    /// explicit delay.
    pub fn set_inter_token_frame_delay(&mut self, frames: u32) {
        self.token_frame_spacing = frames;
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Run a plan. Plans without actions complete inline; anything else is
    /// queued and paced by `poll`. The completion callback fires exactly
    /// once on every path.
    pub fn execute(
        &mut self,
        plan: &TypeCommandPlan,
        origin: CommandOrigin,
        keyboard_handler: KeyboardHandler,
        frame_provider: Option<FrameProvider>,
        on_complete: CompletionCallback,
    ) -> CommandResponse {
        if plan.actions.is_empty() {
            if !plan.request_frame {
                on_complete(true);
                return CommandResponse::success("OK\n");
            }
            return match &frame_provider {
                None => {
                    on_complete(false);
                    CommandResponse::error(ServiceError::Unavailable.to_string())
                },
                Some(provider) => match provider() {
                    Ok(frame) => {
                        on_complete(true);
                        CommandResponse::success(frame)
                    },
                    Err(err) => {
                        on_complete(false);
                        CommandResponse::error(err.to_string())
                    },
                },
            };
        }

        let id = self.next_id;
        self.next_id += 1;

        let defer_response = plan.request_frame || self.close_after_response;
        let send_response = defer_response && !plan.request_frame;

        log::debug!(
            "enqueue type plan id={id} client={} deferred={defer_response} frame={} actions={}",
            origin.client,
            plan.request_frame,
            plan.actions.len()
        );

        self.pending.push_back(PendingRequest {
            id,
            origin,
            plan: plan.clone(),
            keyboard_handler,
            frame_provider,
            on_complete: Some(on_complete),
            next_action: 0,
            resume_at: None,
            frames_remaining: 0,
            send_response,
            response_payload: if send_response {
                "OK\n".to_string()
            } else {
                String::new()
            },
            saw_key_action: false,
            final_frame_wait_inserted: false,
        });

        if defer_response {
            CommandResponse::deferred(id)
        } else {
            CommandResponse::success("OK\n")
        }
    }

    /// Advance the queue front by one step. Called once per emulator poll
    /// tick; never blocks.
    pub fn poll(&mut self) {
        let mut now = Instant::now();
        let spacing = self.token_frame_spacing;
        let close_after = self.close_after_response;
        let send = Rc::clone(&self.send);
        let close = Rc::clone(&self.close);

        while let Some(request) = self.pending.front_mut() {
            if request.frames_remaining > 0 {
                request.frames_remaining -= 1;
                if request.frames_remaining > 0 {
                    break;
                }
            }

            if let Some(resume_at) = request.resume_at {
                if now < resume_at {
                    break;
                }
                request.resume_at = None;
            }

            let mut advanced = false;
            while request.next_action < request.plan.actions.len() {
                let action = request.plan.actions[request.next_action].clone();

                // Zero-duration delays are consumed without spending a tick.
                match action {
                    TypeAction::DelayFrames(0) | TypeAction::DelayMs(0) => {
                        request.next_action += 1;
                        advanced = true;
                        continue;
                    },
                    _ => {},
                }

                match &action {
                    TypeAction::Press(_) | TypeAction::Down(_) | TypeAction::Up(_) => {
                        if matches!(action, TypeAction::Press(_)) {
                            request.saw_key_action = true;
                        }
                        send_keyboard_action(&request.keyboard_handler, &action);
                        request.next_action += 1;
                        advanced = true;

                        let next_is_delay = request
                            .plan
                            .actions
                            .get(request.next_action)
                            .map(TypeAction::is_delay)
                            .unwrap_or(false);
                        if !next_is_delay && spacing > 0 {
                            request.frames_remaining = spacing;
                        }
                    },
                    TypeAction::DelayMs(ms) => {
                        request.resume_at = Some(now + Duration::from_millis(*ms));
                        request.next_action += 1;
                        advanced = true;
                    },
                    TypeAction::DelayFrames(frames) => {
                        request.frames_remaining = *frames;
                        request.next_action += 1;
                        advanced = true;
                    },
                }

                // At most one non-trivial action per tick.
                break;
            }

            if request.next_action >= request.plan.actions.len()
                && request.frames_remaining == 0
                && request.resume_at.is_none()
            {
                if request.saw_key_action && !request.final_frame_wait_inserted {
                    // Let the guest render the last keystroke before any
                    // final snapshot.
                    request.frames_remaining = spacing.max(1);
                    request.final_frame_wait_inserted = true;
                    continue;
                }

                let mut success = true;

                if request.plan.request_frame {
                    let payload = match &request.frame_provider {
                        None => {
                            success = false;
                            format!("ERR {}\n", ServiceError::Unavailable)
                        },
                        Some(provider) => match provider() {
                            Ok(frame) => frame,
                            Err(err) => {
                                success = false;
                                format!("ERR {err}\n")
                            },
                        },
                    };
                    if !send(request.origin.client, &payload) {
                        success = false;
                    }
                    if close_after {
                        close(request.origin.client);
                    }
                } else if request.send_response {
                    if !send(request.origin.client, &request.response_payload) {
                        success = false;
                    }
                    if close_after {
                        close(request.origin.client);
                    }
                }

                if let Some(on_complete) = request.on_complete.take() {
                    on_complete(success);
                }
                log::debug!("type plan id={} finished success={success}", request.id);

                self.pending.pop_front();
                now = Instant::now();
                continue;
            }

            if !advanced {
                break;
            }
            break;
        }
    }

    /// Drop every pending request belonging to a client that went away,
    /// failing their completions, then close the connection.
    pub fn cancel_client(&mut self, client: ClientHandle) {
        self.pending.retain_mut(|request| {
            if request.origin.client != client {
                return true;
            }
            log::debug!("cancel type plan id={} client={client}", request.id);
            if let Some(on_complete) = request.on_complete.take() {
                on_complete(false);
            }
            false
        });

        (self.close)(client);
    }
}
