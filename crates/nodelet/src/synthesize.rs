//! Reply fabrication for `ReplyMode::Synthesized`.
//!
//! The worker's own output is not consulted: the reply is built from the
//! request alone, with fixed placeholder contents where a real node would
//! compute something.

use crate::bridge::protocol::{Message, Operation, Payload};

/// Id returned for every `generate` request.
pub const PLACEHOLDER_UNIQUE_ID: i64 = 1;

/// Messages returned for every `read` request.
pub const PLACEHOLDER_READ_MESSAGES: [i64; 3] = [1, 2, 3];

/// Build the `<op>_ok` reply to `request`.
///
/// Source and destination are swapped; `msg_id` and `in_reply_to` both carry
/// the request's `msg_id` (absent if the request had none). `init_ok` is the
/// exception: it always has `msg_id` 0 and no `in_reply_to`.
pub fn synthesize(op: Operation, request: &Message) -> Message {
    let payload = match op {
        Operation::Init => Payload::InitOk,
        Operation::Echo => Payload::EchoOk {
            echo: match request.payload() {
                Payload::Echo { echo } => echo.clone(),
                _ => String::new(),
            },
        },
        Operation::Generate => Payload::GenerateOk {
            id: PLACEHOLDER_UNIQUE_ID.into(),
        },
        Operation::Broadcast => Payload::BroadcastOk,
        Operation::Read => Payload::ReadOk {
            messages: PLACEHOLDER_READ_MESSAGES.to_vec(),
        },
        Operation::Topology => Payload::TopologyOk,
    };

    let mut reply = Message::new(request.dest.clone(), request.src.clone(), payload);
    if op == Operation::Init {
        reply.body.msg_id = Some(0);
    } else {
        reply.body.msg_id = request.body.msg_id;
        reply.body.in_reply_to = request.body.msg_id;
    }
    reply
}
