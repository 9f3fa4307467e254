/// Opaque handle identifying a connected client. Zero means "no client"
/// (introspection or test calls that have no socket to reply to).
pub type ClientHandle = u64;

/// The client a command arrived from, threaded through the dispatcher so
/// deferred replies can find their way back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommandOrigin {
    pub client: ClientHandle,
}

impl CommandOrigin {
    /// Origin for calls with no client attached.
    pub const NONE: CommandOrigin = CommandOrigin { client: 0 };

    pub fn new(client: ClientHandle) -> Self {
        Self { client }
    }
}

/// Outcome of handling one protocol line.
///
/// When `deferred` is set the payload is empty and the actual bytes are
/// delivered later through the queued sink's send handle, tagged with
/// `deferred_id`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandResponse {
    pub ok: bool,
    pub payload: String,
    pub deferred: bool,
    pub deferred_id: u64,
}

impl CommandResponse {
    pub fn success(payload: impl Into<String>) -> Self {
        Self {
            ok: true,
            payload: payload.into(),
            ..Self::default()
        }
    }

    pub fn error(reason: impl AsRef<str>) -> Self {
        Self {
            ok: false,
            payload: format!("ERR {}\n", reason.as_ref()),
            ..Self::default()
        }
    }

    pub fn deferred(id: u64) -> Self {
        Self {
            ok: true,
            payload: String::new(),
            deferred: true,
            deferred_id: id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_responses_carry_the_wire_form() {
        let response = CommandResponse::error("unknown command");
        assert!(!response.ok);
        assert_eq!(response.payload, "ERR unknown command\n");
        assert!(!response.deferred);
    }

    #[test]
    fn deferred_responses_have_no_payload() {
        let response = CommandResponse::deferred(7);
        assert!(response.ok);
        assert!(response.deferred);
        assert_eq!(response.deferred_id, 7);
        assert!(response.payload.is_empty());
    }
}
